use serde::{Deserialize, Serialize};

/// Coarse role of a chunk inside its document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Heading,
    Label,
    Summary,
    #[default]
    Body,
}

impl SectionKind {
    /// Classify a chunk by its first non-blank line
    pub fn detect(text: &str) -> Self {
        let Some(first) = text.lines().map(str::trim).find(|line| !line.is_empty()) else {
            return Self::Body;
        };

        if first.chars().count() <= 40 && is_upper(first) {
            return Self::Heading;
        }
        if first.ends_with(':') {
            return Self::Label;
        }

        let lower = first.to_lowercase();
        if ["summary", "overview", "abstract"]
            .iter()
            .any(|prefix| lower.starts_with(prefix))
        {
            return Self::Summary;
        }

        Self::Body
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Heading => "heading",
            Self::Label => "label",
            Self::Summary => "summary",
            Self::Body => "body",
        }
    }
}

// At least one cased character and no lowercase ones.
fn is_upper(s: &str) -> bool {
    let mut cased = false;
    for c in s.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            cased = true;
        }
    }
    cased
}
