use async_trait::async_trait;
use html_escape::{encode_double_quoted_attribute, encode_text};

use super::notebook::{bundle_text, Cell, MimeBundle, Notebook, Output};
use super::{read_document, RenderError, Rendered, Renderer};
use crate::publisher::ContentReader;

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

const STYLE: &str = r#"
body { margin: 0; background: #fff; color: #1f2328; font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; }
.notebook { max-width: 960px; margin: 0 auto; padding: 24px; }
.cell { margin: 12px 0; }
.input, .output { display: flex; align-items: flex-start; }
.prompt { flex: 0 0 80px; padding: 4px 8px 0 0; text-align: right; font-family: monospace; font-size: 12px; color: #6e7781; }
.input .prompt { color: #0550ae; }
.output .prompt { color: #953800; }
.body { flex: 1 1 auto; min-width: 0; }
pre { margin: 0; padding: 8px; overflow-x: auto; font-size: 13px; line-height: 1.4; }
.input pre { background: #f6f8fa; border: 1px solid #d0d7de; border-radius: 4px; }
.stream.stderr { background: #fff5f5; }
.error { background: #ffebe9; color: #82071e; }
.markdown { padding: 0 8px 0 88px; }
img { max-width: 100%; }
"#;

/// 内置 HTML 导出器
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExporter;

#[async_trait]
impl Renderer for HtmlExporter {
    async fn render(&self, source: ContentReader) -> Result<Rendered, RenderError> {
        let bytes = read_document(source).await?;
        // 解析与拼接属于 CPU 工作，放到阻塞线程
        let body = tokio::task::spawn_blocking(move || -> Result<String, RenderError> {
            let notebook = Notebook::parse(&bytes)?;
            Ok(render_html(&notebook))
        })
        .await
        .map_err(|e| RenderError::Task(e.to_string()))??;

        Ok(Rendered {
            body,
            content_type: HTML_CONTENT_TYPE.to_string(),
        })
    }
}

pub fn render_html(notebook: &Notebook) -> String {
    let language = notebook.language();
    let mut html = String::with_capacity(16 * 1024);

    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{}</title>\n", encode_text(&notebook.title())));
    html.push_str(&format!("<style>{}</style>\n", STYLE));
    html.push_str("</head>\n<body>\n<main class=\"notebook\">\n");

    for cell in &notebook.cells {
        match cell {
            Cell::Markdown { source } => {
                html.push_str("<div class=\"cell markdown\">\n");
                html.push_str(&markdown_to_html(source));
                html.push_str("</div>\n");
            }
            Cell::Code {
                source,
                execution_count,
                outputs,
            } => {
                html.push_str("<div class=\"cell code\">\n");
                html.push_str(&format!(
                    "<div class=\"input\"><div class=\"prompt\">In&nbsp;[{}]:</div><div class=\"body\"><pre><code class=\"language-{}\">{}</code></pre></div></div>\n",
                    prompt_number(*execution_count),
                    encode_double_quoted_attribute(&language),
                    encode_text(source)
                ));
                for output in outputs {
                    render_output(&mut html, output);
                }
                html.push_str("</div>\n");
            }
            Cell::Raw { source } => {
                html.push_str(&format!(
                    "<div class=\"cell raw\"><pre>{}</pre></div>\n",
                    encode_text(source)
                ));
            }
        }
    }

    html.push_str("</main>\n</body>\n</html>\n");
    html
}

fn prompt_number(count: Option<u64>) -> String {
    count.map(|n| n.to_string()).unwrap_or_else(|| "&nbsp;".to_string())
}

fn render_output(html: &mut String, output: &Output) {
    let (prompt, body) = match output {
        Output::Stream { name, text } => (
            String::new(),
            format!(
                "<pre class=\"stream {}\">{}</pre>",
                encode_double_quoted_attribute(name),
                encode_text(text)
            ),
        ),
        Output::ExecuteResult {
            execution_count,
            data,
        } => (
            format!("Out[{}]:", prompt_number(*execution_count)),
            render_bundle(data),
        ),
        Output::DisplayData { data } => (String::new(), render_bundle(data)),
        Output::Error {
            ename,
            evalue,
            traceback,
        } => {
            let text = if traceback.is_empty() {
                format!("{}: {}", ename, evalue)
            } else {
                strip_ansi(&traceback.join("\n"))
            };
            (
                String::new(),
                format!("<pre class=\"error\">{}</pre>", encode_text(&text)),
            )
        }
    };

    html.push_str(&format!(
        "<div class=\"output\"><div class=\"prompt\">{}</div><div class=\"body\">{}</div></div>\n",
        prompt, body
    ));
}

/// 按表现力从高到低挑选一种表示
fn render_bundle(data: &MimeBundle) -> String {
    if let Some(markup) = bundle_text(data, "text/html") {
        return markup;
    }
    if let Some(svg) = bundle_text(data, "image/svg+xml") {
        return svg;
    }
    for mime in ["image/png", "image/jpeg", "image/gif"] {
        if let Some(encoded) = bundle_text(data, mime) {
            let encoded: String = encoded.split_whitespace().collect();
            return format!(
                "<img src=\"data:{};base64,{}\">",
                mime,
                encode_double_quoted_attribute(&encoded)
            );
        }
    }
    if let Some(markdown) = bundle_text(data, "text/markdown") {
        return markdown_to_html(&markdown);
    }
    if let Some(text) = bundle_text(data, "text/plain") {
        return format!("<pre>{}</pre>", encode_text(&text));
    }
    String::new()
}

fn markdown_to_html(source: &str) -> String {
    let mut options = comrak::Options::default();
    options.extension.table = true;
    options.extension.strikethrough = true;
    options.extension.autolink = true;
    comrak::markdown_to_html(source, &options)
}

/// 去除 traceback 中的 ANSI 颜色控制序列
pub fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            // CSI 序列以 0x40..=0x7E 之间的字符结束
            for next in chars.by_ref() {
                if ('\u{40}'..='\u{7e}').contains(&next) {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}
