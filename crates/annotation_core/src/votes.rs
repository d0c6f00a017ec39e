//! Vote aggregation: one live vote per (annotation, voter), and an annotation
//! status recomputed from the full tally inside the same transaction as the
//! vote write.

use schemars::JsonSchema;
use serde::Serialize;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ConsensusRule, EngineConfig};
use crate::error::Result;
use crate::registry::require_annotation;
use crate::schema::{AnnotationStatus, Vote, VoteChoice};
use crate::store::Store;
use crate::{new_id, now_timestamp};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, JsonSchema)]
pub struct Tally {
    pub approvals: u32,
    pub rejections: u32,
}

impl Tally {
    /// Count choices. Callers pass the latest vote per voter.
    pub fn from_votes(votes: &[Vote]) -> Self {
        votes.iter().fold(Self::default(), |mut tally, vote| {
            match vote.choice {
                VoteChoice::Approve => tally.approvals += 1,
                VoteChoice::Reject => tally.rejections += 1,
            }
            tally
        })
    }

    pub fn total(&self) -> u32 {
        self.approvals + self.rejections
    }
}

/// Status for a tally. Pure: the same tally always gives the same status,
/// whatever the previous status was.
pub fn derive_status(tally: Tally, rule: &ConsensusRule) -> AnnotationStatus {
    let beats = |winner: u32, loser: u32| {
        let majority = if rule.strict_majority {
            winner > loser
        } else {
            winner >= loser
        };
        majority && winner >= rule.quorum
    };

    if beats(tally.approvals, tally.rejections) {
        AnnotationStatus::Approved
    } else if beats(tally.rejections, tally.approvals) {
        AnnotationStatus::Rejected
    } else {
        AnnotationStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct VoteOutcome {
    pub vote: Vote,
    pub tally: Tally,
    pub previous_status: AnnotationStatus,
    pub status: AnnotationStatus,
}

impl VoteOutcome {
    pub fn changed(&self) -> bool {
        self.previous_status != self.status
    }
}

pub struct VoteAggregator<'a, S: Store> {
    store: &'a S,
    config: &'a EngineConfig,
}

impl<'a, S: Store> VoteAggregator<'a, S> {
    pub fn new(store: &'a S, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    /// Record `voter`'s choice on an annotation, replacing any earlier choice
    /// by the same voter, and recompute the annotation's status.
    ///
    /// Store conflicts are retried up to `store.max_vote_attempts` times in
    /// total; every other error is returned as is.
    pub fn cast_vote(
        &self,
        annotation_id: &str,
        voter: &str,
        choice: VoteChoice,
    ) -> Result<VoteOutcome> {
        self.store.read(|tx| require_annotation(tx, annotation_id))?;

        let max_attempts = self.config.store.max_vote_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.try_cast(annotation_id, voter, choice) {
                Ok(outcome) => {
                    debug!(
                        annotation_id,
                        voter,
                        choice = %choice,
                        approvals = outcome.tally.approvals,
                        rejections = outcome.tally.rejections,
                        "vote recorded"
                    );
                    if outcome.changed() {
                        info!(
                            annotation_id,
                            from = %outcome.previous_status,
                            to = %outcome.status,
                            "annotation status changed"
                        );
                    }
                    return Ok(outcome);
                }
                Err(err) if err.is_conflict() && attempt < max_attempts => {
                    warn!(
                        annotation_id,
                        voter,
                        attempt,
                        error = %err,
                        "vote conflicted, retrying"
                    );
                    thread::sleep(Duration::from_millis(10 * u64::from(attempt)));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn try_cast(
        &self,
        annotation_id: &str,
        voter: &str,
        choice: VoteChoice,
    ) -> Result<VoteOutcome> {
        let cast_at = now_timestamp()?;
        self.store.transaction(|tx| {
            let mut annotation = require_annotation(tx, annotation_id)?;
            let vote = tx.upsert_vote(&Vote {
                id: new_id(),
                annotation_id: annotation_id.to_string(),
                voter: voter.to_string(),
                choice,
                cast_at,
            })?;

            let tally = Tally::from_votes(&tx.votes_for(annotation_id)?);
            let previous_status = annotation.status;
            let status = derive_status(tally, &self.config.consensus);
            if status != previous_status {
                annotation.status = status;
                tx.put_annotation(&annotation)?;
            }

            Ok(VoteOutcome {
                vote,
                tally,
                previous_status,
                status,
            })
        })
    }

    /// Latest vote of each voter on an annotation.
    pub fn votes_for(&self, annotation_id: &str) -> Result<Vec<Vote>> {
        self.store.read(|tx| {
            require_annotation(tx, annotation_id)?;
            tx.votes_for(annotation_id)
        })
    }

    pub fn tally(&self, annotation_id: &str) -> Result<Tally> {
        self.votes_for(annotation_id)
            .map(|votes| Tally::from_votes(&votes))
    }

    /// Re-derive and persist an annotation's status from its stored votes,
    /// e.g. after the consensus rule was reconfigured.
    pub fn recompute(&self, annotation_id: &str) -> Result<AnnotationStatus> {
        self.store.transaction(|tx| {
            let mut annotation = require_annotation(tx, annotation_id)?;
            let tally = Tally::from_votes(&tx.votes_for(annotation_id)?);
            let status = derive_status(tally, &self.config.consensus);
            if status != annotation.status {
                annotation.status = status;
                tx.put_annotation(&annotation)?;
            }
            Ok(status)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(approvals: u32, rejections: u32) -> Tally {
        Tally {
            approvals,
            rejections,
        }
    }

    #[test]
    fn quorum_boundaries() {
        let rule = ConsensusRule::default();
        assert_eq!(derive_status(tally(0, 0), &rule), AnnotationStatus::Pending);
        assert_eq!(derive_status(tally(1, 0), &rule), AnnotationStatus::Pending);
        assert_eq!(derive_status(tally(0, 1), &rule), AnnotationStatus::Pending);
        assert_eq!(derive_status(tally(2, 0), &rule), AnnotationStatus::Approved);
        assert_eq!(derive_status(tally(0, 2), &rule), AnnotationStatus::Rejected);
        assert_eq!(derive_status(tally(2, 1), &rule), AnnotationStatus::Approved);
        assert_eq!(derive_status(tally(1, 2), &rule), AnnotationStatus::Rejected);
    }

    #[test]
    fn ties_stay_pending_under_strict_majority() {
        let rule = ConsensusRule::default();
        assert_eq!(derive_status(tally(2, 2), &rule), AnnotationStatus::Pending);
        assert_eq!(derive_status(tally(5, 5), &rule), AnnotationStatus::Pending);
    }

    #[test]
    fn relaxed_majority_resolves_ties_to_approved() {
        let rule = ConsensusRule {
            quorum: 2,
            strict_majority: false,
        };
        assert_eq!(derive_status(tally(2, 2), &rule), AnnotationStatus::Approved);
        assert_eq!(derive_status(tally(1, 1), &rule), AnnotationStatus::Pending);
        assert_eq!(derive_status(tally(1, 2), &rule), AnnotationStatus::Rejected);
    }

    #[test]
    fn higher_quorum() {
        let rule = ConsensusRule {
            quorum: 3,
            strict_majority: true,
        };
        assert_eq!(derive_status(tally(2, 0), &rule), AnnotationStatus::Pending);
        assert_eq!(derive_status(tally(3, 0), &rule), AnnotationStatus::Approved);
    }

    #[test]
    fn derive_is_idempotent() {
        let rule = ConsensusRule::default();
        for approvals in 0..5 {
            for rejections in 0..5 {
                let t = tally(approvals, rejections);
                assert_eq!(derive_status(t, &rule), derive_status(t, &rule));
            }
        }
    }

    #[test]
    fn tally_counts_each_vote_once() {
        let vote = |voter: &str, choice| Vote {
            id: voter.to_string(),
            annotation_id: "a".to_string(),
            voter: voter.to_string(),
            choice,
            cast_at: "t".to_string(),
        };
        let votes = vec![
            vote("a", VoteChoice::Approve),
            vote("b", VoteChoice::Reject),
            vote("c", VoteChoice::Approve),
        ];
        let t = Tally::from_votes(&votes);
        assert_eq!(t, tally(2, 1));
        assert_eq!(t.total(), 3);
    }
}
