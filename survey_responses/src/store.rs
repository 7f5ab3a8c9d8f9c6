use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use snafu::{prelude::*, Snafu};

use crate::cache::{read_json, write_json, SharedCache};
use crate::config::*;
use crate::record::{today, RespondentRecord};
use crate::updates::{parse_updates, UpdateMap, UpdateScope};

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("A respondent email is required"))]
    MissingEmail,
    #[snafu(display("{email:?} is not a valid email address"))]
    InvalidEmail { email: String },
    #[snafu(display("No respondent found with email {email}"))]
    UserNotFound { email: String },
    #[snafu(display("No valid updates to save for {email}"))]
    NoValidUpdates { email: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The result of merging an update map into a record.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct MergeReport {
    pub email: String,
    /// Valid updates applied, including those that stored the same value.
    pub applied: usize,
    /// Fields whose stored value actually changed.
    pub changed: usize,
    /// Keys that were not recognized and left alone.
    pub skipped: Vec<String>,
    /// True if the record did not exist before this merge.
    pub created: bool,
}

impl MergeReport {
    pub fn is_noop(&self) -> bool {
        self.applied == 0 && !self.created
    }
}

/// What the login form gets back.
#[derive(PartialEq, Debug, Clone)]
pub struct Lookup {
    pub record: RespondentRecord,
    pub has_responses: bool,
    pub created: bool,
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

/// The session's single source of truth for respondent records.
///
/// Records are unique by lower-cased email. Every mutation writes the whole
/// set to the durable cache under `RESPONSES_KEY`. A failed write is logged
/// and the in-memory set stays authoritative: until a later write succeeds,
/// reads no longer reload from the (stale) cache.
pub struct ResponseStore {
    records: Vec<RespondentRecord>,
    cache: SharedCache,
    // Set when the last write to the cache failed.
    unsaved: bool,
}

impl ResponseStore {
    /// Starts from the bundled snapshot, replaced by the cached set when the
    /// cache holds a readable one.
    pub fn open(cache: SharedCache, bundled: Vec<RespondentRecord>) -> ResponseStore {
        let mut store = ResponseStore {
            records: bundled,
            cache,
            unsaved: false,
        };
        store.refresh();
        info!(
            "ResponseStore: {} respondent records loaded",
            store.records.len()
        );
        store
    }

    /// Reloads from the durable cache. The cache fully replaces memory.
    fn refresh(&mut self) {
        if self.unsaved {
            debug!("ResponseStore: unsaved changes in memory, not reloading from cache");
            return;
        }
        match read_json::<Vec<RespondentRecord>>(self.cache.as_ref(), RESPONSES_KEY) {
            Ok(Some(records)) => {
                debug!("ResponseStore: refreshed {} records from cache", records.len());
                self.records = records;
            }
            Ok(None) => {}
            Err(e) => {
                error!("ResponseStore: cannot load records from cache: {}", e);
            }
        }
    }

    fn persist(&mut self) {
        match write_json(self.cache.as_ref(), RESPONSES_KEY, &self.records) {
            Ok(()) => {
                debug!("ResponseStore: {} records written to cache", self.records.len());
                self.unsaved = false;
            }
            Err(e) => {
                // Nothing is lost for this session: memory stays the source of truth.
                error!("ResponseStore: cannot save records to cache: {}", e);
                self.unsaved = true;
            }
        }
    }

    fn position(&self, email: &str) -> Option<usize> {
        self.records.iter().position(|r| r.matches_email(email))
    }

    /// All the records, after resynchronizing with the durable cache.
    pub fn get(&mut self) -> &[RespondentRecord] {
        self.refresh();
        &self.records
    }

    pub fn find_by_email(&self, email: &str) -> Option<&RespondentRecord> {
        self.records.iter().find(|r| r.matches_email(email))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the existing record for this email, or creates and stores a
    /// new one from the profile.
    pub fn register_if_absent(&mut self, profile: &Profile) -> StoreResult<RespondentRecord> {
        ensure!(!profile.email.trim().is_empty(), MissingEmailSnafu);
        if let Some(existing) = self.find_by_email(&profile.email) {
            info!("User {} already exists", profile.email);
            return Ok(existing.clone());
        }
        let record = RespondentRecord::new(profile, &today());
        self.records.push(record.clone());
        self.persist();
        info!("User {} registered", profile.email);
        Ok(record)
    }

    /// The login path: finds the respondent, registering a blank one if
    /// allowed.
    pub fn lookup(&mut self, email: &str, create_if_missing: bool) -> StoreResult<Lookup> {
        ensure!(!email.trim().is_empty(), MissingEmailSnafu);
        ensure!(
            is_valid_email(email),
            InvalidEmailSnafu {
                email: email.to_string()
            }
        );
        self.refresh();
        if let Some(record) = self.find_by_email(email) {
            let has_responses = record.has_responses();
            debug!("lookup: found {}, has responses: {}", email, has_responses);
            return Ok(Lookup {
                record: record.clone(),
                has_responses,
                created: false,
            });
        }
        if !create_if_missing {
            return UserNotFoundSnafu { email }.fail();
        }
        info!("User with email {} not found, creating a new one", email);
        let record = self.register_if_absent(&Profile::blank(email))?;
        Ok(Lookup {
            record,
            has_responses: false,
            created: true,
        })
    }

    fn merge(
        &mut self,
        email: &str,
        updates: &UpdateMap,
        scope: UpdateScope,
        create: bool,
    ) -> StoreResult<MergeReport> {
        ensure!(!email.trim().is_empty(), MissingEmailSnafu);
        let (idx, created) = match self.position(email) {
            Some(idx) => (idx, false),
            None if create => {
                info!("User {} not found, creating a new entry", email);
                self.records
                    .push(RespondentRecord::new(&Profile::blank(email), &today()));
                (self.records.len() - 1, true)
            }
            None => {
                warn!("User {} not found in survey responses", email);
                return UserNotFoundSnafu { email }.fail();
            }
        };

        let parsed = parse_updates(updates, scope);
        let changed = self.records[idx].apply_all(&parsed.updates, &today());
        let applied = parsed.updates.len();
        debug!(
            "merge: {} updates applied for {} ({} changed), {} keys skipped",
            applied,
            email,
            changed,
            parsed.skipped.len()
        );
        if applied > 0 || created {
            self.persist();
        }
        Ok(MergeReport {
            email: email.to_string(),
            applied,
            changed,
            skipped: parsed.skipped,
            created,
        })
    }

    /// Merges answers and comments, creating a blank record when the email
    /// is unknown. Keys that are not answers or comments are skipped.
    pub fn merge_answers(&mut self, email: &str, updates: &UpdateMap) -> StoreResult<MergeReport> {
        self.merge(email, updates, UpdateScope::Responses, true)
    }

    /// Like `merge_answers` against the latest cached state, but never
    /// creates a record.
    pub fn update_responses(&mut self, email: &str, updates: &UpdateMap) -> StoreResult<MergeReport> {
        self.refresh();
        self.merge(email, updates, UpdateScope::Responses, false)
    }

    /// Updates profile columns (and answers/comments if present in the map).
    pub fn update_profile(&mut self, email: &str, updates: &UpdateMap) -> StoreResult<MergeReport> {
        self.merge(email, updates, UpdateScope::WithProfile, false)
    }

    /// Clears every answer and comment of one respondent.
    pub fn reset_responses(&mut self, email: &str) -> StoreResult<usize> {
        let idx = self
            .position(email)
            .context(UserNotFoundSnafu { email })?;
        let removed = self.records[idx].clear_responses();
        if removed > 0 {
            self.records[idx].last_modified_date = today();
            self.persist();
        }
        info!("Cleared {} stored responses for {}", removed, email);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DurableCache, MemoryCache};
    use serde_json::json;
    use std::rc::Rc;

    fn map(js: serde_json::Value) -> UpdateMap {
        js.as_object().unwrap().clone()
    }

    fn cached_records(cache: &dyn DurableCache) -> Vec<RespondentRecord> {
        read_json(cache, RESPONSES_KEY).unwrap().unwrap()
    }

    fn profile(email: &str) -> Profile {
        Profile {
            email: email.to_string(),
            first_name: "Ada".to_string(),
            company: "Acme".to_string(),
            ..Profile::default()
        }
    }

    #[test]
    fn register_twice_keeps_one_record() {
        let cache = MemoryCache::shared();
        let mut store = ResponseStore::open(cache.clone(), vec![]);
        let first = store.register_if_absent(&profile("ada@x.com")).unwrap();
        let second = store.register_if_absent(&profile("ADA@x.com")).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(first.email, second.email);
        assert_eq!(first, second);
        assert_eq!(first.registration_date, today());
        assert_eq!(first.last_modified_date, today());
        assert!(first.answers.is_empty());
        assert_eq!(cached_records(cache.as_ref()).len(), 1);
    }

    #[test]
    fn register_requires_an_email() {
        let mut store = ResponseStore::open(MemoryCache::shared(), vec![]);
        assert_eq!(
            store.register_if_absent(&Profile::default()),
            Err(StoreError::MissingEmail)
        );
        assert!(store.is_empty());
    }

    #[test]
    fn update_responses_skips_bogus_keys() {
        let mut store = ResponseStore::open(MemoryCache::shared(), vec![]);
        store.register_if_absent(&profile("a@b.com")).unwrap();
        let report = store
            .update_responses("a@b.com", &map(json!({"s1q1": "4", "bogus_key": "x"})))
            .unwrap();
        assert_eq!(report.changed, 1);
        assert_eq!(report.skipped, vec!["bogus_key"]);
        let r = store.find_by_email("a@b.com").unwrap();
        assert_eq!(r.answers.get("s1q1"), Some(&AnswerValue::Integer(4)));
        assert_eq!(r.answers.len(), 1);
        assert!(!r.extra.contains_key("bogus_key"));
    }

    #[test]
    fn update_responses_does_not_create() {
        let mut store = ResponseStore::open(MemoryCache::shared(), vec![]);
        let res = store.update_responses("nobody@x.com", &map(json!({"s1q1": 3})));
        assert_eq!(
            res,
            Err(StoreError::UserNotFound {
                email: "nobody@x.com".to_string()
            })
        );
        assert!(store.is_empty());
    }

    #[test]
    fn merge_creates_missing_records() {
        let mut store = ResponseStore::open(MemoryCache::shared(), vec![]);
        let report = store
            .merge_answers("new@x.com", &map(json!({"s2q1": "2", "s2q1_comment": "meh"})))
            .unwrap();
        assert!(report.created);
        assert_eq!(report.changed, 2);
        let r = store.find_by_email("NEW@x.com").unwrap();
        assert_eq!(r.first_name, "");
        assert_eq!(r.comments.get("s2q1_comment").map(|s| s.as_str()), Some("meh"));
    }

    #[test]
    fn empty_merge_is_a_noop() {
        let cache = MemoryCache::shared();
        let mut store = ResponseStore::open(cache.clone(), vec![]);
        store.register_if_absent(&profile("a@b.com")).unwrap();
        let before = store.find_by_email("a@b.com").unwrap().clone();
        let cached_before = cache.get(RESPONSES_KEY).unwrap();

        let report = store.merge_answers("a@b.com", &UpdateMap::new()).unwrap();
        assert!(report.is_noop());
        assert_eq!(store.find_by_email("a@b.com").unwrap(), &before);
        assert_eq!(cache.get(RESPONSES_KEY).unwrap(), cached_before);
    }

    #[test]
    fn counts_only_changed_fields() {
        let mut store = ResponseStore::open(MemoryCache::shared(), vec![]);
        store
            .merge_answers("a@b.com", &map(json!({"s1q1": 4, "s1q2": "3"})))
            .unwrap();
        let report = store
            .merge_answers("a@b.com", &map(json!({"s1q1": "4", "s1q2": "5"})))
            .unwrap();
        assert_eq!(report.changed, 1);
        assert!(!report.created);
    }

    #[test]
    fn same_value_resubmit_touches_the_date() {
        let cache = MemoryCache::shared();
        let stale = RespondentRecord {
            answers: [("s1q1".to_string(), AnswerValue::Integer(4))]
                .into_iter()
                .collect(),
            ..RespondentRecord::new(&profile("a@b.com"), "2024-01-01")
        };
        let mut store = ResponseStore::open(cache.clone(), vec![stale]);
        let report = store
            .update_responses("a@b.com", &map(json!({"s1q1": "4"})))
            .unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.changed, 0);
        assert!(!report.is_noop());
        assert_eq!(store.find_by_email("a@b.com").unwrap().last_modified_date, today());
        assert_eq!(cached_records(cache.as_ref())[0].last_modified_date, today());
    }

    #[test]
    fn sectioned_keys_are_skipped() {
        let mut store = ResponseStore::open(MemoryCache::shared(), vec![]);
        let report = store
            .merge_answers("a@b.com", &map(json!({"s1_q1": 4})))
            .unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped, vec!["s1_q1"]);
        assert!(!store.find_by_email("a@b.com").unwrap().has_responses());
    }

    #[test]
    fn free_text_is_kept_as_text() {
        let mut store = ResponseStore::open(MemoryCache::shared(), vec![]);
        store
            .merge_answers("a@b.com", &map(json!({"s1q1": "10", "s1q2": " 2 "})))
            .unwrap();
        let r = store.find_by_email("a@b.com").unwrap();
        assert_eq!(r.answers.get("s1q1"), Some(&AnswerValue::Text("10".to_string())));
        assert_eq!(r.answers.get("s1q2"), Some(&AnswerValue::Integer(2)));
    }

    #[test]
    fn cache_replaces_the_bundled_snapshot() {
        let cache = MemoryCache::shared();
        let cached = vec![RespondentRecord::new(&profile("cached@x.com"), "2024-01-01")];
        write_json(cache.as_ref(), RESPONSES_KEY, &cached).unwrap();
        let bundled = vec![RespondentRecord::new(&profile("bundled@x.com"), "2024-01-01")];
        let mut store = ResponseStore::open(cache.clone(), bundled);
        assert!(store.find_by_email("cached@x.com").is_some());
        assert!(store.find_by_email("bundled@x.com").is_none());

        // Another tab wrote to the cache: last writer wins on the next read.
        let other_tab = vec![
            RespondentRecord::new(&profile("cached@x.com"), "2024-01-01"),
            RespondentRecord::new(&profile("other@x.com"), "2024-01-02"),
        ];
        write_json(cache.as_ref(), RESPONSES_KEY, &other_tab).unwrap();
        assert_eq!(store.get().len(), 2);
    }

    #[test]
    fn unreadable_cache_keeps_the_bundled_snapshot() {
        let cache = MemoryCache::shared();
        cache.set(RESPONSES_KEY, "[{broken").unwrap();
        let bundled = vec![RespondentRecord::new(&profile("bundled@x.com"), "2024-01-01")];
        let mut store = ResponseStore::open(cache, bundled);
        assert_eq!(store.get().len(), 1);
    }

    #[test]
    fn failed_writes_keep_memory_authoritative() {
        let cache: SharedCache = Rc::new(MemoryCache::with_quota(64));
        let mut store = ResponseStore::open(cache.clone(), vec![]);
        let report = store
            .merge_answers(
                "someone.with.a.long.address@example.com",
                &map(json!({"s1q1": 5, "s1q1_comment": "a comment that will not fit"})),
            )
            .unwrap();
        assert_eq!(report.changed, 2);
        assert_eq!(cache.get(RESPONSES_KEY).unwrap(), None);
        // The read does not reload the stale cache over the unsaved change.
        assert_eq!(store.get().len(), 1);
        assert!(store
            .find_by_email("someone.with.a.long.address@example.com")
            .is_some());
    }

    #[test]
    fn lookup_validates_and_registers() {
        let mut store = ResponseStore::open(MemoryCache::shared(), vec![]);
        assert_eq!(
            store.lookup("not-an-email", true),
            Err(StoreError::InvalidEmail {
                email: "not-an-email".to_string()
            })
        );
        assert_eq!(
            store.lookup("a@b.com", false),
            Err(StoreError::UserNotFound {
                email: "a@b.com".to_string()
            })
        );
        let l = store.lookup("a@b.com", true).unwrap();
        assert!(l.created);
        assert!(!l.has_responses);

        store.merge_answers("a@b.com", &map(json!({"s1q1": 1}))).unwrap();
        let l = store.lookup("A@B.com", false).unwrap();
        assert!(!l.created);
        assert!(l.has_responses);
    }

    #[test]
    fn profile_updates_and_reset() {
        let mut store = ResponseStore::open(MemoryCache::shared(), vec![]);
        store.register_if_absent(&profile("a@b.com")).unwrap();
        let report = store
            .update_profile(
                "a@b.com",
                &map(json!({"Job_Title": "CTO", "s1q1": 2, "nope": 1})),
            )
            .unwrap();
        assert_eq!(report.changed, 2);
        assert_eq!(report.skipped, vec!["nope"]);
        assert_eq!(store.find_by_email("a@b.com").unwrap().job_title, "CTO");

        assert_eq!(store.reset_responses("a@b.com"), Ok(1));
        assert!(!store.find_by_email("a@b.com").unwrap().has_responses());
        assert_eq!(store.find_by_email("a@b.com").unwrap().job_title, "CTO");
        assert!(store.reset_responses("x@y.com").is_err());
    }
}
