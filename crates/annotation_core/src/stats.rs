use schemars::JsonSchema;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::registry::require_document;
use crate::schema::{Annotation, AnnotationStatus};
use crate::store::{AnnotationFilter, Store};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, JsonSchema)]
pub struct AnnotationStats {
    pub total: usize,
    pub by_status: BTreeMap<AnnotationStatus, usize>,
    pub by_label: BTreeMap<String, usize>,
    pub by_annotator: BTreeMap<String, usize>,
}

impl AnnotationStats {
    fn from_annotations(annotations: &[Annotation]) -> Self {
        let mut stats = AnnotationStats {
            total: annotations.len(),
            ..Self::default()
        };
        for status in [
            AnnotationStatus::Pending,
            AnnotationStatus::Approved,
            AnnotationStatus::Rejected,
        ] {
            stats.by_status.insert(status, 0);
        }
        for a in annotations {
            *stats.by_status.entry(a.status).or_insert(0) += 1;
            *stats.by_label.entry(a.label.clone()).or_insert(0) += 1;
            *stats.by_annotator.entry(a.annotator.clone()).or_insert(0) += 1;
        }
        stats
    }

    pub fn count(&self, status: AnnotationStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Read-only aggregates, computed from live store state on every call.
pub struct StatsFacade<'a, S: Store> {
    store: &'a S,
}

impl<'a, S: Store> StatsFacade<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn summary(&self) -> Result<AnnotationStats> {
        self.store.read(|tx| {
            let annotations = tx.query_annotations(&AnnotationFilter::default())?;
            Ok(AnnotationStats::from_annotations(&annotations))
        })
    }

    pub fn for_document(&self, document_id: &str) -> Result<AnnotationStats> {
        self.store.read(|tx| {
            require_document(tx, document_id)?;
            let annotations = tx.query_annotations(&AnnotationFilter::document(document_id))?;
            Ok(AnnotationStats::from_annotations(&annotations))
        })
    }
}
