use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Map as JSMap;
use serde_json::Value as JSValue;

use crate::config::*;
use crate::ids;
use crate::updates::FieldUpdate;

/// Today's date as stored in the records (`YYYY-MM-DD`, UTC).
pub fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

/// One respondent: profile, answers and comments.
///
/// Serialized in the flat layout of the shared response file: profile
/// columns first, then one `sNqM` / `sNqM_comment` entry per stored answer
/// or comment. Keys that are neither are kept in `extra` and written back
/// untouched.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawRecord", into = "RawRecord")]
pub struct RespondentRecord {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub company: String,
    pub job_title: String,
    pub industry: String,
    pub insurance_type: String,
    pub employee_count: String,
    pub annual_revenue: String,
    pub ownership_type: String,
    pub registration_date: String,
    pub last_modified_date: String,
    /// Compact question id -> answer.
    pub answers: BTreeMap<String, AnswerValue>,
    /// Compact comment key (`s1q1_comment`) -> comment.
    pub comments: BTreeMap<String, String>,
    pub extra: JSMap<String, JSValue>,
}

impl RespondentRecord {
    /// A fresh record with no answers, registered on `date`.
    pub fn new(profile: &Profile, date: &str) -> RespondentRecord {
        RespondentRecord {
            email: profile.email.clone(),
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            company: profile.company.clone(),
            job_title: profile.job_title.clone(),
            industry: profile.industry.clone(),
            insurance_type: profile.insurance_type.clone(),
            employee_count: profile.employee_count.clone(),
            annual_revenue: profile.annual_revenue.clone(),
            ownership_type: profile.ownership_type.clone(),
            registration_date: date.to_string(),
            last_modified_date: date.to_string(),
            answers: BTreeMap::new(),
            comments: BTreeMap::new(),
            extra: JSMap::new(),
        }
    }

    /// The email is the unique key and compares case-insensitively.
    pub fn matches_email(&self, email: &str) -> bool {
        self.email.to_lowercase() == email.to_lowercase()
    }

    /// True if at least one answer has been stored.
    pub fn has_responses(&self) -> bool {
        !self.answers.is_empty()
    }

    fn profile_field_mut(&mut self, field: ProfileField) -> &mut String {
        match field {
            ProfileField::FirstName => &mut self.first_name,
            ProfileField::LastName => &mut self.last_name,
            ProfileField::Company => &mut self.company,
            ProfileField::JobTitle => &mut self.job_title,
            ProfileField::Industry => &mut self.industry,
            ProfileField::InsuranceType => &mut self.insurance_type,
            ProfileField::EmployeeCount => &mut self.employee_count,
            ProfileField::AnnualRevenue => &mut self.annual_revenue,
            ProfileField::OwnershipType => &mut self.ownership_type,
        }
    }

    /// Applies one update. Returns true if the stored value changed.
    pub fn apply(&mut self, update: &FieldUpdate) -> bool {
        match update {
            FieldUpdate::Rating { id, value } => {
                let changed = self.answers.get(id) != Some(value);
                if changed {
                    debug!(
                        "{}: {} {:?} -> {}",
                        self.email,
                        id,
                        self.answers.get(id).map(|v| v.to_string()),
                        value
                    );
                    self.answers.insert(id.clone(), value.clone());
                }
                changed
            }
            FieldUpdate::Comment { id, text } => {
                let key = ids::comment_key(id);
                let changed = self.comments.get(&key) != Some(text);
                if changed {
                    debug!("{}: comment on {} updated", self.email, id);
                    self.comments.insert(key, text.clone());
                }
                changed
            }
            FieldUpdate::Profile { field, value } => {
                let slot = self.profile_field_mut(*field);
                let changed = *slot != *value;
                if changed {
                    *slot = value.clone();
                    debug!("{}: {} -> {:?}", self.email, field.key(), value);
                }
                changed
            }
        }
    }

    /// Applies all the updates and sets the modification date once, even
    /// when every value was already stored. Returns the number of fields
    /// whose value changed.
    pub fn apply_all(&mut self, updates: &[FieldUpdate], date: &str) -> usize {
        let changed = updates.iter().filter(|u| self.apply(u)).count();
        if !updates.is_empty() {
            self.last_modified_date = date.to_string();
        }
        changed
    }

    /// Drops every answer and comment. Returns how many entries were removed.
    pub fn clear_responses(&mut self) -> usize {
        let removed = self.answers.len() + self.comments.len();
        self.answers.clear();
        self.comments.clear();
        removed
    }
}

// ********* Wire layout ***********

#[derive(Serialize, Deserialize)]
struct RawRecord {
    #[serde(rename = "Business_Email", default, deserialize_with = "lenient_string")]
    business_email: String,
    #[serde(rename = "First_Name", default, deserialize_with = "lenient_string")]
    first_name: String,
    #[serde(rename = "Last_Name", default, deserialize_with = "lenient_string")]
    last_name: String,
    #[serde(rename = "Company", default, deserialize_with = "lenient_string")]
    company: String,
    #[serde(rename = "Job_Title", default, deserialize_with = "lenient_string")]
    job_title: String,
    #[serde(rename = "Industry", default, deserialize_with = "lenient_string")]
    industry: String,
    #[serde(rename = "Insurance_Type", default, deserialize_with = "lenient_string")]
    insurance_type: String,
    #[serde(rename = "Employee_Count", default, deserialize_with = "lenient_string")]
    employee_count: String,
    #[serde(rename = "Annual_Revenue", default, deserialize_with = "lenient_string")]
    annual_revenue: String,
    #[serde(rename = "Ownership_Type", default, deserialize_with = "lenient_string")]
    ownership_type: String,
    #[serde(rename = "Registration_Date", default, deserialize_with = "lenient_string")]
    registration_date: String,
    #[serde(rename = "Last_Modified_Date", default, deserialize_with = "lenient_string")]
    last_modified_date: String,
    #[serde(flatten)]
    rest: JSMap<String, JSValue>,
}

// Spreadsheet exports sometimes carry numbers (or nothing) in text columns.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JSValue::deserialize(deserializer)?;
    Ok(match value {
        JSValue::Null => String::new(),
        JSValue::String(s) => s,
        other => other.to_string(),
    })
}

fn comment_text(value: &JSValue) -> Option<String> {
    match value {
        JSValue::Null => None,
        JSValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl From<RawRecord> for RespondentRecord {
    fn from(raw: RawRecord) -> RespondentRecord {
        let mut answers: BTreeMap<String, AnswerValue> = BTreeMap::new();
        let mut comments: BTreeMap<String, String> = BTreeMap::new();
        let mut extra: JSMap<String, JSValue> = JSMap::new();
        let mut sectioned: Vec<(String, JSValue)> = Vec::new();

        for (key, value) in raw.rest {
            if ids::is_compact_answer(&key) {
                if let Some(v) = AnswerValue::from_json(&value) {
                    answers.insert(key, v);
                }
            } else if ids::is_compact_comment(&key) {
                if let Some(c) = comment_text(&value) {
                    comments.insert(key, c);
                }
            } else if ids::is_sectioned_answer(&key) || ids::is_sectioned_comment(&key) {
                sectioned.push((key, value));
            } else {
                extra.insert(key, value);
            }
        }

        // Older exports used the catalog spelling. The compact entry wins when
        // both are present.
        for (key, value) in sectioned {
            let compact = ids::to_compact(&key);
            if ids::is_compact_answer(&compact) {
                if let Some(v) = AnswerValue::from_json(&value) {
                    answers.entry(compact).or_insert(v);
                }
            } else if let Some(c) = comment_text(&value) {
                comments.entry(compact).or_insert(c);
            }
        }

        RespondentRecord {
            email: raw.business_email,
            first_name: raw.first_name,
            last_name: raw.last_name,
            company: raw.company,
            job_title: raw.job_title,
            industry: raw.industry,
            insurance_type: raw.insurance_type,
            employee_count: raw.employee_count,
            annual_revenue: raw.annual_revenue,
            ownership_type: raw.ownership_type,
            registration_date: raw.registration_date,
            last_modified_date: raw.last_modified_date,
            answers,
            comments,
            extra,
        }
    }
}

impl From<RespondentRecord> for RawRecord {
    fn from(record: RespondentRecord) -> RawRecord {
        let mut rest = record.extra;
        for (key, value) in record.answers {
            rest.insert(key, value.to_json());
        }
        for (key, text) in record.comments {
            rest.insert(key, JSValue::String(text));
        }
        RawRecord {
            business_email: record.email,
            first_name: record.first_name,
            last_name: record.last_name,
            company: record.company,
            job_title: record.job_title,
            industry: record.industry,
            insurance_type: record.insurance_type,
            employee_count: record.employee_count,
            annual_revenue: record.annual_revenue,
            ownership_type: record.ownership_type,
            registration_date: record.registration_date,
            last_modified_date: record.last_modified_date,
            rest,
        }
    }
}
