use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Map as JSMap;
use serde_json::Value as JSValue;

use crate::config::*;
use crate::ids;

/// An update map as it travels between the form, the store and the external
/// record: compact key -> raw value.
pub type UpdateMap = JSMap<String, JSValue>;

static RATING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[1-5]$").expect("valid rating regex"));

/// Which kinds of keys a parse accepts.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum UpdateScope {
    /// Answers and comments only. This is what the external record accepts.
    Responses,
    /// Answers, comments and the profile columns.
    WithProfile,
}

/// One validated change to a respondent record.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum FieldUpdate {
    Rating { id: String, value: AnswerValue },
    /// `id` is the compact question id, without the comment suffix.
    Comment { id: String, text: String },
    Profile { field: ProfileField, value: String },
}

impl FieldUpdate {
    /// The key under which the update is stored in the flat record layout.
    pub fn key(&self) -> String {
        match self {
            FieldUpdate::Rating { id, .. } => id.clone(),
            FieldUpdate::Comment { id, .. } => ids::comment_key(id),
            FieldUpdate::Profile { field, .. } => field.key().to_string(),
        }
    }

    pub fn value_json(&self) -> JSValue {
        match self {
            FieldUpdate::Rating { value, .. } => value.to_json(),
            FieldUpdate::Comment { text, .. } => JSValue::String(text.clone()),
            FieldUpdate::Profile { value, .. } => JSValue::String(value.clone()),
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct ParsedUpdates {
    pub updates: Vec<FieldUpdate>,
    /// Keys that were rejected, in input order.
    pub skipped: Vec<String>,
}

impl ParsedUpdates {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// Coerces the text of a rating: `"3"` (or `" 3 "`) becomes the integer 3,
/// anything else is kept verbatim. Only 1 to 5 are coerced; `"10"` stays text.
pub fn coerce_text(s: &str) -> AnswerValue {
    let trimmed = s.trim();
    if RATING.is_match(trimmed) {
        if let Ok(i) = trimmed.parse::<i64>() {
            return AnswerValue::Integer(i);
        }
    }
    AnswerValue::Text(s.to_string())
}

/// Coerces a raw rating value. Integers are kept, strings go through
/// `coerce_text`. Null and structured values yield nothing.
pub fn coerce_answer(value: &JSValue) -> Option<AnswerValue> {
    match value {
        JSValue::String(s) => Some(coerce_text(s)),
        other => AnswerValue::from_json(other),
    }
}

fn profile_text(value: &JSValue) -> Option<String> {
    match value {
        JSValue::String(s) => Some(s.clone()),
        JSValue::Number(n) => Some(n.to_string()),
        JSValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_one(key: &str, value: &JSValue, scope: UpdateScope) -> Option<FieldUpdate> {
    // Only the stored spelling is accepted: `s1_q1` is not a record key.
    if ids::is_compact_answer(key) {
        return coerce_answer(value).map(|v| FieldUpdate::Rating {
            id: key.to_string(),
            value: v,
        });
    }
    if let Some(base) = ids::comment_base(key) {
        if ids::is_compact_answer(base) {
            return match value {
                JSValue::Null => None,
                JSValue::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            }
            .map(|text| FieldUpdate::Comment {
                id: base.to_string(),
                text,
            });
        }
    }
    if scope == UpdateScope::WithProfile {
        if let Some(field) = ProfileField::from_key(key) {
            return profile_text(value).map(|v| FieldUpdate::Profile { field, value: v });
        }
    }
    None
}

/// Validates an update map into a list of typed updates.
///
/// Keys that do not fit the scope, or carry a value that cannot be stored,
/// are reported in `skipped` and logged. This is never an error by itself.
pub fn parse_updates(map: &UpdateMap, scope: UpdateScope) -> ParsedUpdates {
    let mut res = ParsedUpdates::default();
    for (key, value) in map.iter() {
        match parse_one(key, value, scope) {
            Some(u) => {
                debug!("parse_updates: {} -> {:?}", key, u);
                res.updates.push(u);
            }
            None => {
                warn!("Skipping invalid update key {:?} (value {})", key, value);
                res.skipped.push(key.clone());
            }
        }
    }
    res
}

/// The inverse of `parse_updates`, used to ship validated updates onward.
pub fn to_update_map(updates: &[FieldUpdate]) -> UpdateMap {
    updates.iter().map(|u| (u.key(), u.value_json())).collect()
}
