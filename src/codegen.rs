//! Codegen Module for the view compiler
//!
//! Drives the mode state machine over a token stream and emits the generated
//! source executed by [`crate::execute`]. Every statement lands on its own
//! line, in document order:
//!
//! - literal text      → `__append("...")`
//! - `<%= expr %>`     → `__append(escapeFunction(expr))`
//! - `<%- expr %>`     → `__append(expr)`
//! - `<% code %>`      → `code`
//! - `<%# comment %>`  → nothing

use crate::error::{Result, ViewError};
use crate::tokenize::{TagMarker, Token};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TRAILING_SEMI_RE: Regex =
        Regex::new(r";(\s*$)").expect("semicolon pattern is valid");
    static ref LEADING_BREAK_RE: Regex =
        Regex::new(r"^(?:\r\n|\r|\n)").expect("line break pattern is valid");
}

/// Name of the output primitive in generated source.
pub const APPEND_FN: &str = "__append";
/// Name under which the escape function is bound in the render context.
pub const ESCAPE_FN: &str = "escapeFunction";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    None,
    Eval,
    Escaped,
    Raw,
    Comment,
    Literal,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRUCTURAL VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Every code-bearing open tag must be followed by exactly one content token
/// and a close marker.
fn check_close_tags(tokens: &[Token]) -> Result<()> {
    for (index, token) in tokens.iter().enumerate() {
        let Some(marker) = token.marker() else {
            continue;
        };
        if !marker.requires_close() {
            continue;
        }
        let closed = tokens
            .get(index + 2)
            .and_then(|t| t.marker())
            .is_some_and(|m| m.is_close());
        if !closed {
            return Err(ViewError::UnmatchedTag {
                tag: marker.as_str().to_string(),
            });
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// GENERATOR
// ═══════════════════════════════════════════════════════════════════════════════

struct Generator {
    mode: Mode,
    trim_next: bool,
    source: String,
}

impl Generator {
    fn new() -> Self {
        Self {
            mode: Mode::None,
            trim_next: false,
            source: String::new(),
        }
    }

    fn scan_tag(&mut self, marker: TagMarker) {
        match marker {
            TagMarker::OpenEval | TagMarker::OpenEvalSlurp => self.mode = Mode::Eval,
            TagMarker::OpenEscaped => self.mode = Mode::Escaped,
            TagMarker::OpenRaw => self.mode = Mode::Raw,
            TagMarker::OpenComment => self.mode = Mode::Comment,
            TagMarker::OpenLiteral => {
                self.mode = Mode::Literal;
                self.push_append_literal("<%");
            }
            TagMarker::CloseLiteral => match self.mode {
                Mode::None | Mode::Literal => {
                    self.mode = Mode::None;
                    self.push_append_literal("%>");
                }
                // Inside code the marker is ordinary text.
                _ => self.scan_text(marker.as_str()),
            },
            TagMarker::Close | TagMarker::CloseTrim | TagMarker::CloseSlurp => {
                if self.mode == Mode::Literal {
                    self.add_output(marker.as_str());
                }
                self.mode = Mode::None;
                self.trim_next = marker.trims_newline();
            }
        }
    }

    fn scan_text(&mut self, text: &str) {
        let line = match self.mode {
            Mode::Eval | Mode::Escaped | Mode::Raw => guard_line_comment(text),
            _ => text.to_string(),
        };

        match self.mode {
            Mode::None | Mode::Literal => self.add_output(&line),
            Mode::Eval => {
                self.source.push_str(&line);
                self.source.push('\n');
            }
            Mode::Escaped => {
                self.source.push_str(&format!(
                    "{}({}({}))\n",
                    APPEND_FN,
                    ESCAPE_FN,
                    strip_semi(&line)
                ));
            }
            Mode::Raw => {
                self.source
                    .push_str(&format!("{}({})\n", APPEND_FN, strip_semi(&line)));
            }
            Mode::Comment => {}
        }
    }

    /// Literal output, honoring a pending trim flag.
    fn add_output(&mut self, text: &str) {
        let text = if self.trim_next {
            self.trim_next = false;
            LEADING_BREAK_RE.replace(text, "")
        } else {
            std::borrow::Cow::Borrowed(text)
        };

        if text.is_empty() {
            return;
        }
        let escaped = escape_literal(&text);
        self.push_append_literal(&escaped);
    }

    fn push_append_literal(&mut self, escaped: &str) {
        self.source
            .push_str(&format!("{}(\"{}\")\n", APPEND_FN, escaped));
    }
}

/// Escape characters that are meta to a double-quoted string literal.
/// Backslashes go first so later escapes are not doubled.
pub fn escape_literal(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('"', "\\\"")
}

/// Drop one trailing semicolon (and keep whatever whitespace followed it).
pub fn strip_semi(expr: &str) -> String {
    TRAILING_SEMI_RE.replace(expr, "$1").into_owned()
}

/// A `//` comment after the last line break would swallow the next statement.
fn guard_line_comment(text: &str) -> String {
    let comment = text.rfind("//");
    let newline = text.rfind('\n');
    match (comment, newline) {
        (Some(c), Some(n)) if c > n => format!("{}\n", text),
        (Some(_), None) => format!("{}\n", text),
        _ => text.to_string(),
    }
}

/// Generate executable source from a token stream.
pub fn generate_source(tokens: &[Token]) -> Result<String> {
    check_close_tags(tokens)?;

    let mut generator = Generator::new();
    for token in tokens {
        match token {
            Token::Tag(marker) => generator.scan_tag(*marker),
            Token::Text(text) => generator.scan_text(text),
        }
    }
    Ok(generator.source)
}
