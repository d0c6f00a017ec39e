use serde::Serialize;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::registry::{NewAnnotation, Registry};
use crate::schema::{Annotation, AnnotationSource, Suggestion};
use crate::store::Store;

/// The external NER model. Implementations own their model handle; the engine
/// only ever sees candidate spans.
pub trait EntitySuggester {
    fn suggest(&self, text: &str) -> anyhow::Result<Vec<Suggestion>>;
}

impl<F> EntitySuggester for F
where
    F: Fn(&str) -> anyhow::Result<Vec<Suggestion>>,
{
    fn suggest(&self, text: &str) -> anyhow::Result<Vec<Suggestion>> {
        self(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReviewReport {
    pub accepted: Vec<Annotation>,
    pub rejected: usize,
}

pub struct SuggestionIngestor<'a, S: Store> {
    registry: Registry<'a, S>,
    config: &'a EngineConfig,
}

impl<'a, S: Store> SuggestionIngestor<'a, S> {
    pub fn new(store: &'a S, config: &'a EngineConfig) -> Self {
        Self {
            registry: Registry::new(store, config),
            config,
        }
    }

    /// Ask the suggester for candidates over a document's text. A failing
    /// suggester yields no candidates; an unknown document is still an error.
    pub fn request(
        &self,
        document_id: &str,
        suggester: &dyn EntitySuggester,
    ) -> Result<Vec<Suggestion>> {
        let document = self.registry.get_document(document_id)?;
        match suggester.suggest(&document.content) {
            Ok(suggestions) => {
                info!(document_id, count = suggestions.len(), "suggestions received");
                Ok(suggestions)
            }
            Err(err) => {
                warn!(
                    document_id,
                    error = %err,
                    "suggester failed, continuing without suggestions"
                );
                Ok(Vec::new())
            }
        }
    }

    pub fn accept(
        &self,
        document_id: &str,
        annotator: &str,
        suggestion: &Suggestion,
    ) -> Result<Annotation> {
        self.registry
            .create(document_id, self.to_new_annotation(annotator, suggestion))
    }

    /// Apply accept/reject decisions. Rejected candidates are dropped without a
    /// trace; accepted ones are created together, all or nothing.
    pub fn review(
        &self,
        document_id: &str,
        annotator: &str,
        decisions: impl IntoIterator<Item = (Suggestion, Decision)>,
    ) -> Result<ReviewReport> {
        let mut batch = Vec::new();
        let mut rejected = 0;
        for (suggestion, decision) in decisions {
            match decision {
                Decision::Accept => batch.push(self.to_new_annotation(annotator, &suggestion)),
                Decision::Reject => rejected += 1,
            }
        }
        let accepted = if batch.is_empty() {
            Vec::new()
        } else {
            self.registry.create_many(document_id, batch)?
        };
        Ok(ReviewReport { accepted, rejected })
    }

    fn to_new_annotation(&self, annotator: &str, suggestion: &Suggestion) -> NewAnnotation {
        NewAnnotation {
            span: suggestion.span(),
            label: suggestion.label.clone(),
            annotator: annotator.to_string(),
            confidence: self.config.suggestions.default_confidence,
            notes: Some(self.config.suggestions.notes.clone()),
            source: AnnotationSource::AutoSuggested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::memory::MemoryStore;
    use crate::schema::AnnotationStatus;

    fn candidate(text: &str, label: &str, start: usize, end: usize) -> Suggestion {
        Suggestion {
            text: text.to_string(),
            label: label.to_string(),
            start,
            end,
        }
    }

    #[test]
    fn failing_suggester_means_no_suggestions() {
        let store = MemoryStore::new();
        let config = EngineConfig::default();
        let doc = Registry::new(&store, &config)
            .create_document("Doc", "Some text", "alice")
            .unwrap();
        let ingestor = SuggestionIngestor::new(&store, &config);

        let broken =
            |_: &str| -> anyhow::Result<Vec<Suggestion>> { anyhow::bail!("model not loaded") };
        assert!(ingestor.request(&doc.id, &broken).unwrap().is_empty());
    }

    #[test]
    fn unknown_document_still_fails() {
        let store = MemoryStore::new();
        let config = EngineConfig::default();
        let ingestor = SuggestionIngestor::new(&store, &config);
        let never = |_: &str| -> anyhow::Result<Vec<Suggestion>> { Ok(Vec::new()) };
        assert!(matches!(
            ingestor.request("nope", &never),
            Err(EngineError::UnknownDocument(_))
        ));
    }

    #[test]
    fn accepted_suggestions_carry_provenance() {
        let store = MemoryStore::new();
        let config = EngineConfig::default();
        let doc = Registry::new(&store, &config)
            .create_document("Doc", "Paris in spring", "alice")
            .unwrap();
        let ingestor = SuggestionIngestor::new(&store, &config);

        let report = ingestor
            .review(
                &doc.id,
                "bob",
                vec![
                    (candidate("Paris", "GPE", 0, 5), Decision::Accept),
                    (candidate("spring", "DATE", 9, 15), Decision::Reject),
                ],
            )
            .unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.accepted.len(), 1);

        let annotation = &report.accepted[0];
        assert_eq!(annotation.source, AnnotationSource::AutoSuggested);
        assert_eq!(annotation.confidence, 0.8);
        assert_eq!(annotation.notes.as_deref(), Some("auto-suggested"));
        assert_eq!(annotation.status, AnnotationStatus::Pending);
        assert_eq!(annotation.annotator, "bob");
    }

    #[test]
    fn accept_single_suggestion_validates_span() {
        let store = MemoryStore::new();
        let config = EngineConfig::default();
        let doc = Registry::new(&store, &config)
            .create_document("Doc", "Paris", "alice")
            .unwrap();
        let ingestor = SuggestionIngestor::new(&store, &config);

        let created = ingestor
            .accept(&doc.id, "bob", &candidate("Paris", "GPE", 0, 5))
            .unwrap();
        assert_eq!(created.text, "Paris");

        let err = ingestor
            .accept(&doc.id, "bob", &candidate("Paris!", "GPE", 0, 6))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidSpan { .. }));
    }
}
