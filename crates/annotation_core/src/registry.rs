use tracing::info;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::schema::{
    Annotation, AnnotationSource, AnnotationStatus, Document, DocumentStatus, Span,
};
use crate::store::{AnnotationFilter, DocumentFilter, Store, StoreTx};
use crate::{new_id, now_timestamp};

/// Fields a caller supplies for a new annotation. Status, id, timestamp and
/// span text are filled in by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnnotation {
    pub span: Span,
    pub label: String,
    pub annotator: String,
    pub confidence: f64,
    pub notes: Option<String>,
    pub source: AnnotationSource,
}

impl NewAnnotation {
    /// A hand-made annotation at full confidence.
    pub fn manual(span: Span, label: impl Into<String>, annotator: impl Into<String>) -> Self {
        Self {
            span,
            label: label.into(),
            annotator: annotator.into(),
            confidence: 1.0,
            notes: None,
            source: AnnotationSource::Manual,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Documents and annotations. Nothing here writes an annotation's status.
pub struct Registry<'a, S: Store> {
    store: &'a S,
    config: &'a EngineConfig,
}

impl<'a, S: Store> Registry<'a, S> {
    pub fn new(store: &'a S, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    // ── Documents ──

    pub fn create_document(
        &self,
        title: &str,
        content: &str,
        created_by: &str,
    ) -> Result<Document> {
        let title = title.trim();
        if title.is_empty() {
            return Err(EngineError::InvalidDocument("title must not be empty"));
        }
        if content.is_empty() {
            return Err(EngineError::InvalidDocument("content must not be empty"));
        }
        let document = Document {
            id: new_id(),
            title: title.to_string(),
            content: content.to_string(),
            created_by: created_by.to_string(),
            created_at: now_timestamp()?,
            status: DocumentStatus::Active,
        };
        self.store.transaction(|tx| tx.put_document(&document))?;
        info!(document_id = %document.id, title = %document.title, "document created");
        Ok(document)
    }

    pub fn get_document(&self, id: &str) -> Result<Document> {
        self.store.read(|tx| require_document(tx, id))
    }

    /// Active documents, or every document when `include_archived` is set.
    pub fn list_documents(&self, include_archived: bool) -> Result<Vec<Document>> {
        self.store
            .read(|tx| tx.query_documents(&DocumentFilter { include_archived }))
    }

    /// Archive instead of delete, so annotations keep a valid owner. Idempotent.
    pub fn archive_document(&self, id: &str) -> Result<Document> {
        let document = self.store.transaction(|tx| {
            let mut document = require_document(tx, id)?;
            if document.status != DocumentStatus::Archived {
                document.status = DocumentStatus::Archived;
                tx.put_document(&document)?;
            }
            Ok(document)
        })?;
        info!(document_id = %id, "document archived");
        Ok(document)
    }

    // ── Annotations ──

    pub fn create(&self, document_id: &str, new: NewAnnotation) -> Result<Annotation> {
        let mut created = self.create_many(document_id, vec![new])?;
        created
            .pop()
            .ok_or_else(|| EngineError::Corrupt("annotation batch came back empty".into()))
    }

    /// Validate every entry, then write them all in one transaction. A single
    /// bad entry fails the batch with nothing written.
    pub fn create_many(
        &self,
        document_id: &str,
        batch: Vec<NewAnnotation>,
    ) -> Result<Vec<Annotation>> {
        for new in &batch {
            validate_fields(new)?;
        }
        let created = self.store.transaction(|tx| {
            let document = require_document(tx, document_id)?;
            if document.status == DocumentStatus::Archived {
                return Err(EngineError::ArchivedDocument(document.id));
            }
            let len = document.char_len();
            for new in &batch {
                self.validate_span(new.span, len)?;
            }

            let mut created = Vec::with_capacity(batch.len());
            for new in &batch {
                let annotation = Annotation {
                    id: new_id(),
                    document_id: document.id.clone(),
                    span: new.span,
                    label: new.label.trim().to_string(),
                    text: document.slice(new.span),
                    annotator: new.annotator.clone(),
                    created_at: now_timestamp()?,
                    confidence: new.confidence,
                    notes: new.notes.clone(),
                    source: new.source,
                    status: AnnotationStatus::Pending,
                };
                tx.put_annotation(&annotation)?;
                created.push(annotation);
            }
            Ok(created)
        })?;

        for annotation in &created {
            info!(
                annotation_id = %annotation.id,
                document_id = %annotation.document_id,
                label = %annotation.label,
                source = %annotation.source,
                "annotation created"
            );
        }
        Ok(created)
    }

    pub fn get(&self, annotation_id: &str) -> Result<Annotation> {
        self.store.read(|tx| require_annotation(tx, annotation_id))
    }

    pub fn list_by_document(&self, document_id: &str) -> Result<Vec<Annotation>> {
        self.store.read(|tx| {
            require_document(tx, document_id)?;
            tx.query_annotations(&AnnotationFilter::document(document_id))
        })
    }

    pub fn list_all(&self, filter: &AnnotationFilter) -> Result<Vec<Annotation>> {
        self.store.read(|tx| tx.query_annotations(filter))
    }

    fn validate_span(&self, span: Span, len: usize) -> Result<()> {
        let in_bounds = span.start <= span.end && span.end <= len;
        let empty_ok = !span.is_empty() || self.config.spans.allow_empty;
        if in_bounds && empty_ok {
            Ok(())
        } else {
            Err(EngineError::InvalidSpan {
                start: span.start,
                end: span.end,
                len,
            })
        }
    }
}

fn validate_fields(new: &NewAnnotation) -> Result<()> {
    if new.label.trim().is_empty() {
        return Err(EngineError::InvalidLabel);
    }
    if !(0.0..=1.0).contains(&new.confidence) {
        return Err(EngineError::InvalidConfidence(new.confidence));
    }
    Ok(())
}

pub(crate) fn require_document(tx: &dyn StoreTx, id: &str) -> Result<Document> {
    tx.get_document(id)?
        .ok_or_else(|| EngineError::UnknownDocument(id.to_string()))
}

pub(crate) fn require_annotation(tx: &dyn StoreTx, id: &str) -> Result<Annotation> {
    tx.get_annotation(id)?
        .ok_or_else(|| EngineError::UnknownAnnotation(id.to_string()))
}
