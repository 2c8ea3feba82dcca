use async_trait::async_trait;

use super::notebook::{Cell, Notebook};
use super::{read_document, RenderError, Rendered, Renderer};
use crate::publisher::ContentReader;

/// 内置源码提取器：代码单元原样输出，Markdown 转为行注释
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptExporter;

#[async_trait]
impl Renderer for ScriptExporter {
    async fn render(&self, source: ContentReader) -> Result<Rendered, RenderError> {
        let bytes = read_document(source).await?;
        let (body, content_type) =
            tokio::task::spawn_blocking(move || -> Result<(String, String), RenderError> {
                let notebook = Notebook::parse(&bytes)?;
                let content_type = notebook
                    .metadata
                    .language_info
                    .as_ref()
                    .and_then(|info| info.mimetype.clone())
                    .unwrap_or_else(|| "text/plain".to_string());
                Ok((render_script(&notebook), content_type))
            })
            .await
            .map_err(|e| RenderError::Task(e.to_string()))??;

        Ok(Rendered { body, content_type })
    }
}

/// 各语言的行注释前缀
fn comment_prefix(language: &str) -> &'static str {
    match language {
        "javascript" | "typescript" | "rust" | "c" | "c++" | "cpp" | "java" | "go" | "scala"
        | "kotlin" | "csharp" | "c#" | "swift" | "groovy" => "//",
        "sql" | "haskell" | "lua" => "--",
        "matlab" | "octave" => "%",
        _ => "#",
    }
}

pub fn render_script(notebook: &Notebook) -> String {
    let language = notebook.language();
    let comment = comment_prefix(&language);
    let mut script = String::new();

    if language == "python" {
        script.push_str("#!/usr/bin/env python\n# coding: utf-8\n\n");
    }

    for cell in &notebook.cells {
        match cell {
            Cell::Code {
                source,
                execution_count,
                ..
            } => {
                let marker = execution_count
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| " ".to_string());
                script.push_str(&format!("{} In[{}]:\n\n\n", comment, marker));
                script.push_str(source.trim_end_matches('\n'));
                script.push_str("\n\n\n");
            }
            Cell::Markdown { source } => {
                for line in source.trim_end_matches('\n').lines() {
                    if line.is_empty() {
                        script.push_str(comment);
                    } else {
                        script.push_str(&format!("{} {}", comment, line));
                    }
                    script.push('\n');
                }
                script.push('\n');
            }
            // raw 单元不属于可执行源码
            Cell::Raw { .. } => {}
        }
    }

    script
}
