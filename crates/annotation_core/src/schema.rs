use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_by: String,
    pub created_at: String, // RFC 3339, UTC
    pub status: DocumentStatus,
}

impl Document {
    /// Length of the content in characters; span offsets are measured in these units.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }

    /// Substring between two character offsets. A reversed or out-of-range
    /// span yields the overlapping part, possibly empty.
    pub fn slice(&self, span: Span) -> String {
        self.content
            .chars()
            .skip(span.start)
            .take(span.end.saturating_sub(span.start))
            .collect()
    }
}

/// Half-open character range `[start, end)` into a document's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum AnnotationSource {
    Manual,
    AutoSuggested,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Annotation {
    pub id: String,
    pub document_id: String,
    pub span: Span,
    pub label: String,        // open vocabulary: "ORG", "GPE", or anything custom
    pub text: String,         // copy of the spanned text, for display only
    pub annotator: String,
    pub created_at: String,
    pub confidence: f64,
    pub notes: Option<String>,
    pub source: AnnotationSource,
    pub status: AnnotationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Vote {
    pub id: String,
    pub annotation_id: String,
    pub voter: String,
    pub choice: VoteChoice,
    pub cast_at: String,
}

/// Candidate span produced by the external NER collaborator. Not persisted until accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Suggestion {
    pub text: String,
    pub label: String,
    pub start: usize,
    pub end: usize,
}

impl Suggestion {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = EngineError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($ty::$variant),)+
                    other => Err(EngineError::Corrupt(format!(
                        "unknown {} value: {other}",
                        stringify!($ty)
                    ))),
                }
            }
        }
    };
}

text_enum!(DocumentStatus { Active => "active", Archived => "archived" });
text_enum!(AnnotationStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});
text_enum!(AnnotationSource { Manual => "manual", AutoSuggested => "auto-suggested" });
text_enum!(VoteChoice { Approve => "approve", Reject => "reject" });

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_enums_match_serde_names() {
        for status in [
            AnnotationStatus::Pending,
            AnnotationStatus::Approved,
            AnnotationStatus::Rejected,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        let json = serde_json::to_string(&AnnotationSource::AutoSuggested).unwrap();
        assert_eq!(json, "\"auto-suggested\"");
    }

    #[test]
    fn unknown_stored_value_is_corrupt() {
        let err = "maybe".parse::<VoteChoice>().unwrap_err();
        assert!(matches!(err, EngineError::Corrupt(_)));
    }

    #[test]
    fn slice_counts_characters_not_bytes() {
        let doc = Document {
            id: "d".into(),
            title: "t".into(),
            content: "Zürich is in Switzerland".into(),
            created_by: "a".into(),
            created_at: "2024-01-01T00:00:00Z".into(),
            status: DocumentStatus::Active,
        };
        assert_eq!(doc.char_len(), 24);
        assert_eq!(doc.slice(Span::new(0, 6)), "Zürich");
    }

    #[test]
    fn slice_of_reversed_span_is_empty() {
        let doc = Document {
            id: "d".into(),
            title: "t".into(),
            content: "Zürich".into(),
            created_by: "a".into(),
            created_at: "2024-01-01T00:00:00Z".into(),
            status: DocumentStatus::Active,
        };
        assert_eq!(doc.slice(Span::new(4, 2)), "");
        assert_eq!(doc.slice(Span::new(3, 40)), "ich");
    }
}
