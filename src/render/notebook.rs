use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::RenderError;

/// nbformat v4 文档（只保留渲染需要的字段）
#[derive(Debug, Deserialize)]
pub struct Notebook {
    #[serde(default)]
    pub nbformat: u32,
    #[serde(default)]
    pub metadata: NotebookMetadata,
    #[serde(default)]
    pub cells: Vec<Cell>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotebookMetadata {
    pub title: Option<String>,
    pub language_info: Option<LanguageInfo>,
    pub kernelspec: Option<KernelSpec>,
}

#[derive(Debug, Deserialize)]
pub struct LanguageInfo {
    pub name: Option<String>,
    pub mimetype: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KernelSpec {
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum Cell {
    Markdown {
        #[serde(deserialize_with = "multiline")]
        source: String,
    },
    Code {
        #[serde(deserialize_with = "multiline")]
        source: String,
        execution_count: Option<u64>,
        #[serde(default)]
        outputs: Vec<Output>,
    },
    Raw {
        #[serde(deserialize_with = "multiline")]
        source: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    Stream {
        name: String,
        #[serde(deserialize_with = "multiline")]
        text: String,
    },
    ExecuteResult {
        execution_count: Option<u64>,
        #[serde(default)]
        data: MimeBundle,
    },
    DisplayData {
        #[serde(default)]
        data: MimeBundle,
    },
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

/// 输出的多 MIME 表示；JSON 类输出保持原样，文本类可能是字符串或字符串数组
pub type MimeBundle = BTreeMap<String, Value>;

/// 从 bundle 中取文本表示
pub fn bundle_text(bundle: &MimeBundle, mime: &str) -> Option<String> {
    match bundle.get(mime)? {
        Value::String(text) => Some(text.clone()),
        Value::Array(lines) => Some(
            lines
                .iter()
                .filter_map(|line| line.as_str())
                .collect::<String>(),
        ),
        _ => None,
    }
}

/// nbformat 的多行文本既可能是字符串，也可能是按行切分的数组
fn multiline<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Text {
        Single(String),
        Lines(Vec<String>),
    }

    Ok(match Text::deserialize(deserializer)? {
        Text::Single(text) => text,
        Text::Lines(lines) => lines.concat(),
    })
}

impl Notebook {
    pub fn parse(bytes: &[u8]) -> Result<Self, RenderError> {
        let notebook: Notebook = serde_json::from_slice(bytes)?;
        if notebook.nbformat < 4 {
            return Err(RenderError::Unsupported(format!(
                "nbformat {} (only v4 is supported)",
                notebook.nbformat
            )));
        }
        Ok(notebook)
    }

    /// 内核语言，缺省为 python
    pub fn language(&self) -> String {
        self.metadata
            .language_info
            .as_ref()
            .and_then(|info| info.name.clone())
            .or_else(|| {
                self.metadata
                    .kernelspec
                    .as_ref()
                    .and_then(|spec| spec.language.clone())
            })
            .unwrap_or_else(|| "python".to_string())
            .to_ascii_lowercase()
    }

    /// 标题：元数据 > 第一个 Markdown 标题 > 默认值
    pub fn title(&self) -> String {
        if let Some(title) = self.metadata.title.as_deref().map(str::trim) {
            if !title.is_empty() {
                return title.to_string();
            }
        }
        self.cells
            .iter()
            .filter_map(|cell| match cell {
                Cell::Markdown { source } => Some(source),
                _ => None,
            })
            .flat_map(|source| source.lines())
            .find_map(|line| {
                let heading = line.trim_start().strip_prefix('#')?;
                let text = heading.trim_start_matches('#').trim();
                (!text.is_empty()).then(|| text.to_string())
            })
            .unwrap_or_else(|| "Notebook".to_string())
    }
}
