//! Tag Tokenizer
//!
//! Splits raw template text into literal runs and tag markers. The marker
//! alphabet is fixed and matched leftmost-first, so `<%%` wins over `<%` at the
//! same position. Concatenating the `as_str()` of every token reproduces the
//! input exactly.

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

lazy_static! {
    /// Alternation order matters: three-character markers precede their
    /// two-character prefixes.
    static ref TAG_RE: Regex = Regex::new(r"<%%|%%>|<%=|<%-|<%_|<%#|<%|%>|-%>|_%>")
        .expect("tag marker pattern is valid");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagMarker {
    /// `<%`
    OpenEval,
    /// `<%_`
    OpenEvalSlurp,
    /// `<%=`
    OpenEscaped,
    /// `<%-`
    OpenRaw,
    /// `<%#`
    OpenComment,
    /// `<%%`
    OpenLiteral,
    /// `%%>`
    CloseLiteral,
    /// `%>`
    Close,
    /// `-%>`
    CloseTrim,
    /// `_%>`
    CloseSlurp,
}

impl FromStr for TagMarker {
    type Err = String;

    fn from_str(marker: &str) -> Result<Self, Self::Err> {
        match marker {
            "<%" => Ok(TagMarker::OpenEval),
            "<%_" => Ok(TagMarker::OpenEvalSlurp),
            "<%=" => Ok(TagMarker::OpenEscaped),
            "<%-" => Ok(TagMarker::OpenRaw),
            "<%#" => Ok(TagMarker::OpenComment),
            "<%%" => Ok(TagMarker::OpenLiteral),
            "%%>" => Ok(TagMarker::CloseLiteral),
            "%>" => Ok(TagMarker::Close),
            "-%>" => Ok(TagMarker::CloseTrim),
            "_%>" => Ok(TagMarker::CloseSlurp),
            other => Err(format!("unknown tag marker \"{}\"", other)),
        }
    }
}

impl TagMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagMarker::OpenEval => "<%",
            TagMarker::OpenEvalSlurp => "<%_",
            TagMarker::OpenEscaped => "<%=",
            TagMarker::OpenRaw => "<%-",
            TagMarker::OpenComment => "<%#",
            TagMarker::OpenLiteral => "<%%",
            TagMarker::CloseLiteral => "%%>",
            TagMarker::Close => "%>",
            TagMarker::CloseTrim => "-%>",
            TagMarker::CloseSlurp => "_%>",
        }
    }

    /// Opening markers that must be followed by content and a close marker.
    pub fn requires_close(&self) -> bool {
        matches!(
            self,
            TagMarker::OpenEval
                | TagMarker::OpenEvalSlurp
                | TagMarker::OpenEscaped
                | TagMarker::OpenRaw
                | TagMarker::OpenComment
        )
    }

    /// `%>`, `-%>` and `_%>`.
    pub fn is_close(&self) -> bool {
        matches!(
            self,
            TagMarker::Close | TagMarker::CloseTrim | TagMarker::CloseSlurp
        )
    }

    /// Close markers that consume the line break following them.
    pub fn trims_newline(&self) -> bool {
        matches!(self, TagMarker::CloseTrim | TagMarker::CloseSlurp)
    }
}

impl fmt::Display for TagMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'s> {
    Text(&'s str),
    Tag(TagMarker),
}

impl<'s> Token<'s> {
    pub fn as_str(&self) -> &'s str {
        match self {
            Token::Text(text) => text,
            Token::Tag(marker) => marker.as_str(),
        }
    }

    pub fn marker(&self) -> Option<TagMarker> {
        match self {
            Token::Tag(marker) => Some(*marker),
            Token::Text(_) => None,
        }
    }
}

/// Tokenize template text in document order.
pub fn tokenize(contents: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut cursor = 0;

    for found in TAG_RE.find_iter(contents) {
        if found.start() > cursor {
            tokens.push(Token::Text(&contents[cursor..found.start()]));
        }
        if let Ok(marker) = found.as_str().parse::<TagMarker>() {
            tokens.push(Token::Tag(marker));
        }
        cursor = found.end();
    }

    if cursor < contents.len() {
        tokens.push(Token::Text(&contents[cursor..]));
    }

    tokens
}
