//! Persistence seam. The registry, vote aggregator and stats facade only talk
//! to [`Store`]; [`crate::db::SqliteStore`] and [`crate::memory::MemoryStore`]
//! are the two implementations.

use crate::error::Result;
use crate::schema::{Annotation, AnnotationStatus, Document, DocumentStatus, Vote};

/// Row access inside a read or a transaction.
///
/// `put_*` inserts or replaces by id. `upsert_vote` keys on
/// `(annotation_id, voter)`: an existing row keeps its id and takes the new
/// choice and timestamp. The stored row is returned.
pub trait StoreTx {
    fn put_document(&mut self, document: &Document) -> Result<()>;
    fn get_document(&self, id: &str) -> Result<Option<Document>>;
    fn query_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>>;

    fn put_annotation(&mut self, annotation: &Annotation) -> Result<()>;
    fn get_annotation(&self, id: &str) -> Result<Option<Annotation>>;
    fn query_annotations(&self, filter: &AnnotationFilter) -> Result<Vec<Annotation>>;

    fn upsert_vote(&mut self, vote: &Vote) -> Result<Vote>;
    /// Latest vote per voter on one annotation.
    fn votes_for(&self, annotation_id: &str) -> Result<Vec<Vote>>;
}

pub trait Store: Send + Sync {
    /// Run `f` against current committed state.
    fn read<T>(&self, f: impl FnOnce(&dyn StoreTx) -> Result<T>) -> Result<T>;

    /// Run `f` with exclusive write access. Commits when `f` returns `Ok`,
    /// rolls back every write otherwise.
    fn transaction<T>(&self, f: impl FnOnce(&mut dyn StoreTx) -> Result<T>) -> Result<T>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentFilter {
    pub include_archived: bool,
}

impl DocumentFilter {
    pub fn matches(&self, document: &Document) -> bool {
        self.include_archived || document.status == DocumentStatus::Active
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationFilter {
    pub document_id: Option<String>,
    pub status: Option<AnnotationStatus>,
    pub label: Option<String>,
    pub annotator: Option<String>,
}

impl AnnotationFilter {
    pub fn document(document_id: impl Into<String>) -> Self {
        Self {
            document_id: Some(document_id.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: AnnotationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_annotator(mut self, annotator: impl Into<String>) -> Self {
        self.annotator = Some(annotator.into());
        self
    }

    pub fn matches(&self, annotation: &Annotation) -> bool {
        self.document_id
            .as_deref()
            .is_none_or(|id| annotation.document_id == id)
            && self.status.is_none_or(|status| annotation.status == status)
            && self
                .label
                .as_deref()
                .is_none_or(|label| annotation.label == label)
            && self
                .annotator
                .as_deref()
                .is_none_or(|annotator| annotation.annotator == annotator)
    }
}
