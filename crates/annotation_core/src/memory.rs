use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{EngineError, Result};
use crate::schema::{Annotation, Document, Vote};
use crate::store::{AnnotationFilter, DocumentFilter, Store, StoreTx};

/// In-process store. Every call takes the one mutex; a transaction works on a
/// copy of the tables and swaps it in only if the closure succeeds.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    documents: BTreeMap<String, Document>,
    annotations: BTreeMap<String, Annotation>,
    // keyed by (annotation_id, voter)
    votes: BTreeMap<(String, String), Vote>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| EngineError::StoreUnavailable("memory store mutex poisoned".into()))
    }
}

impl Store for MemoryStore {
    fn read<T>(&self, f: impl FnOnce(&dyn StoreTx) -> Result<T>) -> Result<T> {
        let tables = self.lock()?;
        f(&*tables)
    }

    fn transaction<T>(&self, f: impl FnOnce(&mut dyn StoreTx) -> Result<T>) -> Result<T> {
        let mut tables = self.lock()?;
        let mut working = tables.clone();
        let value = f(&mut working)?;
        *tables = working;
        Ok(value)
    }
}

impl StoreTx for Tables {
    fn put_document(&mut self, document: &Document) -> Result<()> {
        self.documents.insert(document.id.clone(), document.clone());
        Ok(())
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.documents.get(id).cloned())
    }

    fn query_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        let mut documents: Vec<Document> = self
            .documents
            .values()
            .filter(|document| filter.matches(document))
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(documents)
    }

    fn put_annotation(&mut self, annotation: &Annotation) -> Result<()> {
        if !self.documents.contains_key(&annotation.document_id) {
            return Err(EngineError::UnknownDocument(annotation.document_id.clone()));
        }
        self.annotations
            .insert(annotation.id.clone(), annotation.clone());
        Ok(())
    }

    fn get_annotation(&self, id: &str) -> Result<Option<Annotation>> {
        Ok(self.annotations.get(id).cloned())
    }

    fn query_annotations(&self, filter: &AnnotationFilter) -> Result<Vec<Annotation>> {
        let mut annotations: Vec<Annotation> = self
            .annotations
            .values()
            .filter(|annotation| filter.matches(annotation))
            .cloned()
            .collect();
        annotations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(annotations)
    }

    fn upsert_vote(&mut self, vote: &Vote) -> Result<Vote> {
        if !self.annotations.contains_key(&vote.annotation_id) {
            return Err(EngineError::UnknownAnnotation(vote.annotation_id.clone()));
        }
        let key = (vote.annotation_id.clone(), vote.voter.clone());
        let stored = match self.votes.get(&key) {
            Some(existing) => Vote {
                choice: vote.choice,
                cast_at: vote.cast_at.clone(),
                ..existing.clone()
            },
            None => vote.clone(),
        };
        self.votes.insert(key, stored.clone());
        Ok(stored)
    }

    fn votes_for(&self, annotation_id: &str) -> Result<Vec<Vote>> {
        let mut votes: Vec<Vote> = self
            .votes
            .values()
            .filter(|vote| vote.annotation_id == annotation_id)
            .cloned()
            .collect();
        votes.sort_by(|a, b| a.cast_at.cmp(&b.cast_at).then_with(|| a.voter.cmp(&b.voter)));
        Ok(votes)
    }
}
