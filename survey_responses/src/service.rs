use log::{error, info, warn};
use snafu::prelude::*;

use crate::cache::{read_json, write_json, SharedCache};
use crate::config::*;
use crate::queue::{SyncQueue, SyncTicket};
use crate::session::SurveySession;
use crate::store::*;
use crate::sync::{BatchReport, BatchUpdate, ExternalRecord, UserOutcome};

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum SubmissionKind {
    Draft,
    Final,
}

impl SubmissionKind {
    fn headline(&self) -> &'static str {
        match self {
            SubmissionKind::Draft => "Draft saved successfully.",
            SubmissionKind::Final => "Survey submitted successfully.",
        }
    }
}

const SYNCED: &str = "The shared response file has been updated.";
const SYNC_WARNING: &str = "However, there was an issue updating the shared response file. \
    Your changes have been saved locally.";

/// What the user is told once a submission is settled.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SubmissionOutcome {
    pub message: String,
    /// Set when the external record could not be updated.
    pub warning: Option<String>,
}

/// A save that is done locally, with its sync still in flight.
pub struct Submission {
    pub kind: SubmissionKind,
    pub merge: MergeReport,
    sync: SyncTicket<UserOutcome>,
    pending: Option<SyncTicket<BatchReport>>,
    cache: SharedCache,
}

impl Submission {
    /// Waits for the external record and composes the message.
    pub fn finish(self) -> SubmissionOutcome {
        let synced = match self.sync.wait() {
            Ok(outcome) if outcome.is_success() => true,
            Ok(outcome) => {
                warn!("sync: {}", outcome.message(&self.merge.email));
                false
            }
            Err(e) => {
                error!("sync: {}", e);
                false
            }
        };

        if let Some(ticket) = self.pending {
            match ticket.wait() {
                Ok(report) => {
                    info!("Applied pending batch updates: {}", report.message);
                    if let Err(e) = self.cache.remove(PENDING_BATCH_KEY) {
                        error!("Error clearing pending batch updates: {}", e);
                    }
                }
                // Kept for the next submission.
                Err(e) => error!("Pending batch updates not applied: {}", e),
            }
        }

        let headline = self.kind.headline();
        if synced {
            SubmissionOutcome {
                message: format!("{} {}", headline, SYNCED),
                warning: None,
            }
        } else {
            SubmissionOutcome {
                message: format!("{} {}", headline, SYNC_WARNING),
                warning: Some(SYNC_WARNING.to_string()),
            }
        }
    }
}

/// Saves drafts and submissions: locally first, then to the external record
/// through the sync queue.
pub struct SurveyService {
    cache: SharedCache,
    queue: SyncQueue,
}

impl SurveyService {
    pub fn new(cache: SharedCache, target: Box<dyn ExternalRecord + Send>) -> SurveyService {
        SurveyService {
            cache,
            queue: SyncQueue::start(target),
        }
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Only a missing email or a form without a single valid entry is an
    /// error. Everything that can go wrong after the local save ends up as a
    /// warning in `Submission::finish`.
    pub fn submit(
        &self,
        session: &SurveySession,
        store: &mut ResponseStore,
        kind: SubmissionKind,
    ) -> StoreResult<Submission> {
        let email = session.email();
        ensure!(!email.trim().is_empty(), MissingEmailSnafu);
        let updates = session.compact_updates();
        ensure!(!updates.is_empty(), NoValidUpdatesSnafu { email });

        let merge = store.merge_answers(email, &updates)?;
        ensure!(merge.applied > 0, NoValidUpdatesSnafu { email });
        info!(
            "{:?} for {}: {} fields changed locally",
            kind, email, merge.changed
        );

        let sync = self.queue.dispatch_user(email, updates);
        let pending = self
            .pending_batch()
            .filter(|b| !b.is_empty())
            .map(|b| self.queue.dispatch_batch(b));
        Ok(Submission {
            kind,
            merge,
            sync,
            pending,
            cache: self.cache.clone(),
        })
    }

    pub fn pending_batch(&self) -> Option<BatchUpdate> {
        match read_json(self.cache.as_ref(), PENDING_BATCH_KEY) {
            Ok(b) => b,
            Err(e) => {
                error!("Error loading pending batch updates: {}", e);
                None
            }
        }
    }

    /// Stores a batch to apply with the next save or submission.
    pub fn set_pending_batch(&self, batch: &BatchUpdate) -> bool {
        match write_json(self.cache.as_ref(), PENDING_BATCH_KEY, batch) {
            Ok(()) => {
                info!("Pending batch updates saved for {} users", batch.len());
                true
            }
            Err(e) => {
                error!("Error saving pending batch updates: {}", e);
                false
            }
        }
    }

    pub fn clear_pending_batch(&self) {
        if let Err(e) = self.cache.remove(PENDING_BATCH_KEY) {
            error!("Error clearing pending batch updates: {}", e);
        }
    }
}
