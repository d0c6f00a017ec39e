//! Collaborative annotation consensus engine.
//!
//! Documents hold immutable text. Annotators propose labelled spans over that
//! text, by hand or by accepting suggestions from an external NER model, and
//! other annotators vote on them. An annotation's status is always derived
//! from the latest vote of each voter, never set directly.

pub mod config;
pub mod db;
pub mod error;
pub mod memory;
pub mod registry;
pub mod schema;
pub mod stats;
pub mod store;
pub mod suggest;
pub mod votes;

pub use config::{ConsensusRule, EngineConfig};
pub use db::SqliteStore;
pub use error::{EngineError, Result};
pub use memory::MemoryStore;
pub use registry::{NewAnnotation, Registry};
pub use stats::{AnnotationStats, StatsFacade};
pub use store::{AnnotationFilter, DocumentFilter, Store, StoreTx};
pub use suggest::{Decision, EntitySuggester, ReviewReport, SuggestionIngestor};
pub use votes::{derive_status, Tally, VoteAggregator, VoteOutcome};

use time::macros::format_description;
use time::OffsetDateTime;

/// Store plus configuration, handing out the four component views.
pub struct AnnotationEngine<S: Store> {
    store: S,
    config: EngineConfig,
}

impl<S: Store> AnnotationEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> Registry<'_, S> {
        Registry::new(&self.store, &self.config)
    }

    pub fn votes(&self) -> VoteAggregator<'_, S> {
        VoteAggregator::new(&self.store, &self.config)
    }

    pub fn suggestions(&self) -> SuggestionIngestor<'_, S> {
        SuggestionIngestor::new(&self.store, &self.config)
    }

    pub fn stats(&self) -> StatsFacade<'_, S> {
        StatsFacade::new(&self.store)
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// UTC timestamp with fixed-width microseconds, so stored values sort lexically.
pub(crate) fn now_timestamp() -> Result<String> {
    let format =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z");
    OffsetDateTime::now_utc()
        .format(&format)
        .map_err(|err| EngineError::Timestamp(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_fixed_width() {
        let stamp = now_timestamp().unwrap();
        assert_eq!(stamp.len(), "2024-01-01T00:00:00.000000Z".len());
        assert!(stamp.ends_with('Z'));
    }
}
