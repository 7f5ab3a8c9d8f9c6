use std::collections::BTreeMap;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::cache::{read_json, write_json, SharedCache};
use crate::config::*;

/// The in-progress draft of the respondent using this session.
///
/// Answers and comments are keyed by sectioned question id (`s1_q1`), as the
/// form holds them.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub user_email: String,
    /// RFC 3339, UTC.
    pub timestamp: String,
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
    #[serde(default)]
    pub comments: BTreeMap<String, String>,
    #[serde(default)]
    pub active_section: Option<String>,
}

impl ProgressSnapshot {
    pub fn is_for(&self, email: &str) -> bool {
        self.user_email.to_lowercase() == email.to_lowercase()
    }
}

/// Keeps the single progress snapshot in the durable cache.
///
/// All the failures are logged here and never reach the caller.
#[derive(Clone)]
pub struct ProgressStore {
    cache: SharedCache,
}

impl ProgressStore {
    pub fn new(cache: SharedCache) -> ProgressStore {
        ProgressStore { cache }
    }

    /// Overwrites the snapshot, if there is anything worth resuming.
    /// Returns true if a snapshot was written.
    pub fn save(
        &self,
        email: &str,
        answers: &BTreeMap<String, String>,
        comments: &BTreeMap<String, String>,
        active_section: Option<&str>,
    ) -> bool {
        if email.is_empty() || (answers.is_empty() && comments.is_empty()) {
            return false;
        }
        let snapshot = ProgressSnapshot {
            user_email: email.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            answers: answers.clone(),
            comments: comments.clone(),
            active_section: active_section.map(|s| s.to_string()),
        };
        match write_json(self.cache.as_ref(), PROGRESS_KEY, &snapshot) {
            Ok(()) => {
                debug!(
                    "Saved survey progress for {} ({} answers, {} comments)",
                    email,
                    answers.len(),
                    comments.len()
                );
                true
            }
            Err(e) => {
                error!("Error saving survey progress: {}", e);
                false
            }
        }
    }

    /// The stored snapshot, only if it belongs to `email`.
    pub fn restore(&self, email: &str) -> Option<ProgressSnapshot> {
        let snapshot: ProgressSnapshot = match read_json(self.cache.as_ref(), PROGRESS_KEY) {
            Ok(Some(s)) => s,
            Ok(None) => return None,
            Err(e) => {
                error!("Error loading saved survey progress: {}", e);
                return None;
            }
        };
        if snapshot.is_for(email) {
            info!(
                "Restoring survey progress for {} saved at {}",
                email, snapshot.timestamp
            );
            Some(snapshot)
        } else {
            debug!(
                "Ignoring survey progress of {} while {} is logged in",
                snapshot.user_email, email
            );
            None
        }
    }

    pub fn clear(&self) {
        match self.cache.remove(PROGRESS_KEY) {
            Ok(()) => debug!("Cleared saved survey progress"),
            Err(e) => error!("Error clearing survey progress: {}", e),
        }
    }
}
