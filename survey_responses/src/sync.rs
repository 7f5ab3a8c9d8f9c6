/*!
Propagation of answers to the external record.

The external record is the shared JSON file of respondent records that the
updater process owns. Updates reach it one respondent at a time or as a
batch (email -> update map). The bridge is advisory: callers log a
[`SyncError`] and report it as a warning, the local store stays valid.
*/

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JSValue;
use snafu::{prelude::*, Snafu};

use crate::record::{today, RespondentRecord};
use crate::updates::{parse_updates, to_update_map, UpdateMap, UpdateScope};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SyncError {
    #[snafu(display("Error opening the external record {path}"))]
    OpeningRecords {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("The external record {path} is malformed"))]
    ParsingRecords {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error writing the external record {path}"))]
    WritingRecords {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error serializing respondent records"))]
    SerializingRecords { source: serde_json::Error },
    #[snafu(display("Error serializing the batch update"))]
    SerializingBatch { source: serde_json::Error },
    #[snafu(display("Error preparing the batch file for the updater"))]
    WritingBatch { source: std::io::Error },
    #[snafu(display("Could not start the updater {program}"))]
    SpawningUpdater {
        source: std::io::Error,
        program: String,
    },
    #[snafu(display("The updater failed ({status}): {stderr}"))]
    UpdaterFailed { status: String, stderr: String },
    #[snafu(display("The updater did not print a readable report"))]
    ReadingReport { source: serde_json::Error },
    #[snafu(display("Invalid batch update: {reason}"))]
    InvalidBatch { reason: String },
    #[snafu(display("The sync worker is not running"))]
    WorkerGone,
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Email -> update map.
pub type BatchUpdate = BTreeMap<String, UpdateMap>;

/// What happened to one respondent of an update.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UserOutcome {
    #[serde(rename_all = "camelCase")]
    Updated {
        /// The valid updates, with ratings coerced.
        updated_fields: UpdateMap,
        /// How many of them changed the stored value.
        changed: usize,
        skipped: Vec<String>,
    },
    /// Nothing was asked.
    NoChange,
    /// Something was asked but no key was acceptable.
    NoValidUpdates { skipped: Vec<String> },
    NotFound,
}

impl UserOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UserOutcome::Updated { .. } | UserOutcome::NoChange)
    }

    pub fn message(&self, email: &str) -> String {
        match self {
            UserOutcome::Updated { updated_fields, .. } => format!(
                "Successfully updated {} fields for user {}",
                updated_fields.len(),
                email
            ),
            UserOutcome::NoChange => "No updates to process".to_string(),
            UserOutcome::NoValidUpdates { .. } => "No valid updates were made".to_string(),
            UserOutcome::NotFound => format!("No user found with email: {}", email),
        }
    }
}

/// The answer to a batch update. `success` is always true: look at the
/// details to find the respondents that failed.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub success: bool,
    pub message: String,
    pub details: BTreeMap<String, UserOutcome>,
    pub success_count: usize,
    pub total_count: usize,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.success_count == self.total_count
    }

    pub fn outcome(&self, email: &str) -> Option<&UserOutcome> {
        self.details.get(email)
    }

    pub fn failures(&self) -> Vec<&str> {
        self.details
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(e, _)| e.as_str())
            .collect()
    }
}

/// Applies the updates of one respondent to a set of records.
///
/// The record is never created. The modification date is set to `date` once,
/// if any value changed.
pub fn update_user_records(
    records: &mut [RespondentRecord],
    email: &str,
    updates: &UpdateMap,
    date: &str,
) -> UserOutcome {
    if updates.is_empty() {
        debug!("No updates provided for user: {}", email);
        return UserOutcome::NoChange;
    }
    let record = match records.iter_mut().find(|r| r.matches_email(email)) {
        Some(r) => r,
        None => {
            warn!("No user found with email: {}", email);
            return UserOutcome::NotFound;
        }
    };
    debug!(
        "Found user: {} {}",
        record.first_name, record.last_name
    );

    let parsed = parse_updates(updates, UpdateScope::Responses);
    if parsed.is_empty() {
        warn!("No valid updates were made for {}", email);
        return UserOutcome::NoValidUpdates {
            skipped: parsed.skipped,
        };
    }
    let changed = record.apply_all(&parsed.updates, date);
    info!(
        "Updated {} fields for user {} ({} changed)",
        parsed.updates.len(),
        email,
        changed
    );
    UserOutcome::Updated {
        updated_fields: to_update_map(&parsed.updates),
        changed,
        skipped: parsed.skipped,
    }
}

/// Applies a batch, one respondent after the other.
pub fn update_batch_records(
    records: &mut [RespondentRecord],
    batch: &BatchUpdate,
    date: &str,
) -> BatchReport {
    let mut details: BTreeMap<String, UserOutcome> = BTreeMap::new();
    for (email, updates) in batch.iter() {
        debug!("Processing updates for {}", email);
        let outcome = update_user_records(records, email, updates, date);
        details.insert(email.clone(), outcome);
    }
    let success_count = details.values().filter(|o| o.is_success()).count();
    let total_count = batch.len();
    let message = if total_count == 0 {
        "No updates to process".to_string()
    } else {
        format!(
            "Batch update complete: {}/{} users updated successfully",
            success_count, total_count
        )
    };
    info!("{}", message);
    BatchReport {
        success: true,
        message,
        details,
        success_count,
        total_count,
    }
}

/// Reads a pasted batch document. It must be an object whose values are
/// non-empty objects.
pub fn parse_batch(contents: &str) -> SyncResult<BatchUpdate> {
    let js: JSValue = serde_json::from_str(contents).map_err(|e| SyncError::InvalidBatch {
        reason: e.to_string(),
    })?;
    let entries = match js {
        JSValue::Object(m) => m,
        _ => {
            return InvalidBatchSnafu {
                reason: "not an object",
            }
            .fail()
        }
    };
    ensure!(
        !entries.is_empty(),
        InvalidBatchSnafu {
            reason: "empty object"
        }
    );
    let mut res = BatchUpdate::new();
    for (email, updates) in entries {
        match updates {
            JSValue::Object(m) if !m.is_empty() => {
                res.insert(email, m);
            }
            JSValue::Object(_) => {
                return InvalidBatchSnafu {
                    reason: format!("empty updates for {}", email),
                }
                .fail()
            }
            _ => {
                return InvalidBatchSnafu {
                    reason: format!("updates for {} are not an object", email),
                }
                .fail()
            }
        }
    }
    Ok(res)
}

/// Where updates are propagated to.
pub trait ExternalRecord {
    fn update_user(&mut self, email: &str, updates: &UpdateMap) -> SyncResult<UserOutcome>;
    fn update_batch(&mut self, batch: &BatchUpdate) -> SyncResult<BatchReport>;
}

/// The external record as a JSON file on disk, updated in process.
#[derive(Debug, Clone)]
pub struct RecordFile {
    path: PathBuf,
}

impl RecordFile {
    pub fn new(path: &Path) -> RecordFile {
        RecordFile {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> SyncResult<Vec<RespondentRecord>> {
        let path = self.path.display().to_string();
        let contents = fs::read_to_string(&self.path).context(OpeningRecordsSnafu {
            path: path.clone(),
        })?;
        let records: Vec<RespondentRecord> =
            serde_json::from_str(&contents).context(ParsingRecordsSnafu { path })?;
        debug!("Loaded {} records from {:?}", records.len(), self.path);
        Ok(records)
    }

    /// The file contents for a record set: pretty printed, two spaces.
    pub fn render(records: &[RespondentRecord]) -> SyncResult<String> {
        serde_json::to_string_pretty(records).context(SerializingRecordsSnafu {})
    }

    pub fn save(&self, records: &[RespondentRecord]) -> SyncResult<()> {
        let contents = RecordFile::render(records)?;
        fs::write(&self.path, contents).context(WritingRecordsSnafu {
            path: self.path.display().to_string(),
        })?;
        info!("Changes saved to {:?}", self.path);
        Ok(())
    }
}

// A same-value update still moves the modification date, so any applied
// update means the file has to be written.
fn any_applied<'a, I: IntoIterator<Item = &'a UserOutcome>>(outcomes: I) -> bool {
    outcomes
        .into_iter()
        .any(|o| matches!(o, UserOutcome::Updated { .. }))
}

impl ExternalRecord for RecordFile {
    fn update_user(&mut self, email: &str, updates: &UpdateMap) -> SyncResult<UserOutcome> {
        if updates.is_empty() {
            return Ok(UserOutcome::NoChange);
        }
        let mut records = self.load()?;
        let outcome = update_user_records(&mut records, email, updates, &today());
        if any_applied([&outcome]) {
            self.save(&records)?;
        }
        Ok(outcome)
    }

    fn update_batch(&mut self, batch: &BatchUpdate) -> SyncResult<BatchReport> {
        if batch.is_empty() {
            return Ok(update_batch_records(&mut [], batch, &today()));
        }
        let mut records = self.load()?;
        let report = update_batch_records(&mut records, batch, &today());
        if any_applied(report.details.values()) {
            self.save(&records)?;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use serde_json::json;

    fn records() -> Vec<RespondentRecord> {
        let mut a = RespondentRecord::new(&Profile::blank("a@b.com"), "2024-01-01");
        a.answers.insert("s1q1".to_string(), AnswerValue::Integer(2));
        let b = RespondentRecord::new(&Profile::blank("Other@B.com"), "2024-01-01");
        vec![a, b]
    }

    fn map(js: JSValue) -> UpdateMap {
        js.as_object().unwrap().clone()
    }

    fn batch(js: JSValue) -> BatchUpdate {
        serde_json::from_value(js).unwrap()
    }

    #[test]
    fn single_user_skips_bogus_keys() {
        let mut rs = records();
        let outcome = update_user_records(
            &mut rs,
            "A@B.com",
            &map(json!({"s1q1": "4", "bogus_key": "x"})),
            "2024-05-05",
        );
        assert_eq!(
            outcome,
            UserOutcome::Updated {
                updated_fields: map(json!({"s1q1": 4})),
                changed: 1,
                skipped: vec!["bogus_key".to_string()],
            }
        );
        assert_eq!(outcome.message("a@b.com"), "Successfully updated 1 fields for user a@b.com");
        assert_eq!(rs[0].answers.get("s1q1"), Some(&AnswerValue::Integer(4)));
        assert_eq!(rs[0].last_modified_date, "2024-05-05");
        assert!(!rs[0].extra.contains_key("bogus_key"));
    }

    #[test]
    fn single_user_edge_cases() {
        let mut rs = records();
        assert_eq!(
            update_user_records(&mut rs, "nobody@b.com", &map(json!({"s1q1": 1})), "2024-05-05"),
            UserOutcome::NotFound
        );
        assert_eq!(
            update_user_records(&mut rs, "nobody@b.com", &UpdateMap::new(), "2024-05-05"),
            UserOutcome::NoChange
        );
        let outcome = update_user_records(&mut rs, "a@b.com", &map(json!({"x": 1})), "2024-05-05");
        assert!(!outcome.is_success());
        assert_eq!(rs[0].last_modified_date, "2024-01-01");
        // Same value again: nothing changed, but the record was saved.
        let outcome = update_user_records(&mut rs, "a@b.com", &map(json!({"s1q1": "2"})), "2024-05-05");
        assert!(matches!(outcome, UserOutcome::Updated { changed: 0, .. }));
        assert_eq!(rs[0].last_modified_date, "2024-05-05");
    }

    #[test]
    fn sectioned_keys_are_not_record_keys() {
        let mut rs = records();
        let outcome = update_user_records(
            &mut rs,
            "a@b.com",
            &map(json!({"s1_q1": "4", "s1_q1_comment": "no"})),
            "2024-05-05",
        );
        assert_eq!(
            outcome,
            UserOutcome::NoValidUpdates {
                skipped: vec!["s1_q1".to_string(), "s1_q1_comment".to_string()],
            }
        );
        assert_eq!(rs[0].answers.get("s1q1"), Some(&AnswerValue::Integer(2)));
        assert_eq!(rs[0].last_modified_date, "2024-01-01");
    }

    #[test]
    fn same_value_resubmit_rewrites_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("SurveyResponse.json");
        let mut file = RecordFile::new(&p);
        file.save(&records()).unwrap();
        let outcome = file
            .update_user("a@b.com", &map(json!({"s1q1": "2"})))
            .unwrap();
        assert!(matches!(outcome, UserOutcome::Updated { changed: 0, .. }));
        let reloaded = file.load().unwrap();
        assert_eq!(reloaded[0].last_modified_date, today());
        assert_eq!(reloaded[1].last_modified_date, "2024-01-01");
    }

    #[test]
    fn empty_batches() {
        let report = update_batch_records(&mut records(), &BatchUpdate::new(), "2024-05-05");
        assert!(report.success);
        assert_eq!((report.success_count, report.total_count), (0, 0));

        let report = update_batch_records(&mut records(), &batch(json!({"a@b.com": {}})), "2024-05-05");
        assert!(report.success);
        assert_eq!((report.success_count, report.total_count), (1, 1));
        assert_eq!(report.outcome("a@b.com"), Some(&UserOutcome::NoChange));
    }

    #[test]
    fn partial_batch_failure_is_in_the_details() {
        let mut rs = records();
        let report = update_batch_records(
            &mut rs,
            &batch(json!({
                "a@b.com": {"s1q2": "5"},
                "other@b.com": {"s2q1_comment": "later"},
                "ghost@b.com": {"s1q1": 3}
            })),
            "2024-05-05",
        );
        assert!(report.success);
        assert!(!report.all_succeeded());
        assert_eq!(report.success_count, 2);
        assert_eq!(report.total_count, 3);
        assert_eq!(report.failures(), vec!["ghost@b.com"]);
        assert_eq!(
            report.message,
            "Batch update complete: 2/3 users updated successfully"
        );
        assert_eq!(rs[1].comments.get("s2q1_comment").map(|s| s.as_str()), Some("later"));
    }

    #[test]
    fn report_is_camel_case() {
        let report = update_batch_records(&mut records(), &batch(json!({"x@b.com": {"s1q1": 1}})), "2024-05-05");
        let js = serde_json::to_value(&report).unwrap();
        assert_eq!(js["successCount"], json!(0));
        assert_eq!(js["totalCount"], json!(1));
        assert_eq!(js["details"]["x@b.com"]["status"], json!("notFound"));
        let back: BatchReport = serde_json::from_value(js).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn validates_pasted_batches() {
        assert!(parse_batch(r#"{"a@b.com": {"s1q1": 3}}"#).is_ok());
        assert!(parse_batch("[1, 2]").is_err());
        assert!(parse_batch("{}").is_err());
        assert!(parse_batch(r#"{"a@b.com": {}}"#).is_err());
        assert!(parse_batch(r#"{"a@b.com": 3}"#).is_err());
        assert!(parse_batch("{oops").is_err());
    }

    #[test]
    fn record_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("SurveyResponse.json");
        let mut file = RecordFile::new(&p);
        assert!(matches!(file.load(), Err(SyncError::OpeningRecords { .. })));
        file.save(&records()).unwrap();
        let text = fs::read_to_string(&p).unwrap();
        assert!(text.contains("\n  {\n    \"Business_Email\": \"a@b.com\""));

        let outcome = file
            .update_user("a@b.com", &map(json!({"s3q1": "1"})))
            .unwrap();
        assert!(outcome.is_success());
        let reloaded = file.load().unwrap();
        assert_eq!(reloaded[0].answers.get("s3q1"), Some(&AnswerValue::Integer(1)));
        assert_eq!(reloaded[0].last_modified_date, today());

        fs::write(&p, "{ not a list").unwrap();
        assert!(matches!(
            file.update_batch(&batch(json!({"a@b.com": {"s1q1": 1}}))),
            Err(SyncError::ParsingRecords { .. })
        ));
    }
}
