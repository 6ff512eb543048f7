use serde::{Deserialize, Serialize};

/// How a raw document line was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Blank,
    /// A run of punctuation such as `---` or `===`
    Separator,
    /// A section heading: `# ...`, a line ending in `:`, or a short all-caps label
    Header,
    Content,
}

/// One source line with list markers stripped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLine {
    /// 1-based line number
    pub number: usize,
    pub kind: LineKind,
    /// Trimmed text with bullet or numbering prefix removed
    pub content: String,
}

impl DocumentLine {
    #[must_use]
    pub fn is_header(&self) -> bool {
        self.kind == LineKind::Header
    }

    #[must_use]
    pub fn is_content(&self) -> bool {
        self.kind == LineKind::Content
    }
}

/// An atomic directive candidate extracted from a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveUnit {
    pub text: String,
    /// 1-based source line
    pub line: usize,
    /// Sentence index within the line when the line held more than one sentence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clause: Option<usize>,
}

impl DirectiveUnit {
    pub fn new(text: impl Into<String>, line: usize) -> Self {
        Self {
            text: text.into(),
            line,
            clause: None,
        }
    }
}
