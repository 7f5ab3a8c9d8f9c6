// ********* Answer values ***********

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value as JSValue;

/// A stored answer.
///
/// Likert answers are small integers (1 to 5) but free text is tolerated:
/// anything that does not look like a rating is kept as text.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Integer(i64),
    Text(String),
}

impl AnswerValue {
    /// Reads a raw JSON value as it may appear in a record or an update map.
    ///
    /// `null` and structured values carry no answer.
    pub fn from_json(value: &JSValue) -> Option<AnswerValue> {
        match value {
            JSValue::Number(n) => match n.as_i64() {
                Some(i) => Some(AnswerValue::Integer(i)),
                None => Some(AnswerValue::Text(n.to_string())),
            },
            JSValue::String(s) => Some(AnswerValue::Text(s.clone())),
            JSValue::Bool(b) => Some(AnswerValue::Text(b.to_string())),
            JSValue::Null | JSValue::Array(_) | JSValue::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> JSValue {
        match self {
            AnswerValue::Integer(i) => JSValue::from(*i),
            AnswerValue::Text(s) => JSValue::from(s.clone()),
        }
    }

    /// True if this value counts toward completion.
    pub fn counts_as_answered(&self) -> bool {
        match self {
            AnswerValue::Integer(_) => true,
            AnswerValue::Text(s) => is_answer_text(s),
        }
    }
}

impl Display for AnswerValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnswerValue::Integer(i) => write!(f, "{}", i),
            AnswerValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// The "counted complete" predicate on the textual form of an answer.
///
/// Blank text and the literal `undefined` (left behind by older clients) do
/// not count.
pub fn is_answer_text(s: &str) -> bool {
    s != "undefined" && !s.trim().is_empty()
}

// ********* Respondent profile ***********

/// The profile fields of a respondent, as spelled in the stored records.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub enum ProfileField {
    FirstName,
    LastName,
    Company,
    JobTitle,
    Industry,
    InsuranceType,
    EmployeeCount,
    AnnualRevenue,
    OwnershipType,
}

impl ProfileField {
    pub const ALL: [ProfileField; 9] = [
        ProfileField::FirstName,
        ProfileField::LastName,
        ProfileField::Company,
        ProfileField::JobTitle,
        ProfileField::Industry,
        ProfileField::InsuranceType,
        ProfileField::EmployeeCount,
        ProfileField::AnnualRevenue,
        ProfileField::OwnershipType,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            ProfileField::FirstName => "First_Name",
            ProfileField::LastName => "Last_Name",
            ProfileField::Company => "Company",
            ProfileField::JobTitle => "Job_Title",
            ProfileField::Industry => "Industry",
            ProfileField::InsuranceType => "Insurance_Type",
            ProfileField::EmployeeCount => "Employee_Count",
            ProfileField::AnnualRevenue => "Annual_Revenue",
            ProfileField::OwnershipType => "Ownership_Type",
        }
    }

    pub fn from_key(key: &str) -> Option<ProfileField> {
        ProfileField::ALL.iter().find(|f| f.key() == key).cloned()
    }
}

/// What the registration form sends.
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
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
}

impl Profile {
    /// A profile with only the email filled in.
    pub fn blank(email: &str) -> Profile {
        Profile {
            email: email.to_string(),
            ..Profile::default()
        }
    }
}

// ********* Question catalog **********

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Sectioned identifier (`s1_q1`).
    pub id: String,
    pub text: String,
    pub help_text: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub title: String,
    pub questions: Vec<Question>,
    // Derived from the answers, see the completion module.
    pub is_complete: bool,
    pub completion_percentage: u32,
}

// ******** Completion aggregates *********

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionCompletion {
    pub section_id: String,
    pub answered: usize,
    pub total: usize,
    pub completion_percentage: u32,
    pub is_complete: bool,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStats {
    pub total_questions: usize,
    pub completed_questions: usize,
    pub completion_percentage: u32,
    pub is_fully_completed: bool,
    pub sections: Vec<SectionCompletion>,
}

impl CompletionStats {
    pub fn section(&self, section_id: &str) -> Option<&SectionCompletion> {
        self.sections.iter().find(|s| s.section_id == section_id)
    }
}

// ********* Durable cache keys **********

/// The full respondent record set.
pub const RESPONSES_KEY: &str = "surveyResponses";
/// The single in-progress snapshot.
pub const PROGRESS_KEY: &str = "survey_progress";
/// Batch updates waiting to be pushed to the external record.
pub const PENDING_BATCH_KEY: &str = "externalBatchUpdates";
