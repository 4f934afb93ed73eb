#![forbid(unsafe_code)]

/// Converts terminal output into HTML.
pub trait AnsiRenderer {
    fn convert(&self, text: &str) -> String;
}

/// Drops escape sequences and HTML-escapes the rest; one `<br>` per line.
#[derive(Clone, Copy, Debug, Default)]
pub struct EscapingRenderer;

impl AnsiRenderer for EscapingRenderer {
    fn convert(&self, text: &str) -> String {
        let mut html = String::with_capacity(text.len());
        let mut chars = text.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '\u{1b}' => {
                    if chars.peek() == Some(&'[') {
                        chars.next();
                        // CSI parameters run until a final byte in '@'..='~'.
                        for next in chars.by_ref() {
                            if ('@'..='~').contains(&next) {
                                break;
                            }
                        }
                    }
                }
                '\r' => {}
                '\n' => html.push_str("<br>"),
                '&' => html.push_str("&amp;"),
                '<' => html.push_str("&lt;"),
                '>' => html.push_str("&gt;"),
                '"' => html.push_str("&quot;"),
                '\'' => html.push_str("&#39;"),
                other => html.push(other),
            }
        }
        html
    }
}

/// Where an incremental HTML render stopped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HtmlState {
    pub offset: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedHtml {
    pub html: String,
    pub state: HtmlState,
}
