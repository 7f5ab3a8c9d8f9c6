use std::collections::BTreeMap;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::completion;
use crate::config::*;
use crate::ids;
use crate::progress::ProgressStore;
use crate::store::ResponseStore;
use crate::updates::UpdateMap;

/// One question of the submission payload.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResponse {
    pub question_id: String,
    pub question_text: String,
    pub answer: Option<String>,
    pub comments: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionResponses {
    pub section_id: String,
    pub section_title: String,
    pub questions: Vec<QuestionResponse>,
}

/// Where the draft of a session came from.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum DraftOrigin {
    /// The progress snapshot of an earlier visit.
    Snapshot,
    /// The answers already stored for the respondent.
    Store,
    Empty,
}

/// The form state of one logged-in respondent.
///
/// Answers and comments are held by sectioned id. The completion aggregates
/// and the section flags are recomputed after every change of the answers.
pub struct SurveySession {
    email: String,
    sections: Vec<Section>,
    answers: BTreeMap<String, String>,
    comments: BTreeMap<String, String>,
    active_section: String,
    stats: CompletionStats,
    origin: DraftOrigin,
    progress: ProgressStore,
}

impl SurveySession {
    /// Opens the form for `email`. A progress snapshot for the same
    /// respondent wins over the answers in the store.
    pub fn start(
        catalog: &Catalog,
        email: &str,
        store: &ResponseStore,
        progress: ProgressStore,
    ) -> SurveySession {
        let first_section = catalog.first_section_id().unwrap_or("strategy").to_string();
        let mut session = SurveySession {
            email: email.to_string(),
            sections: catalog.sections().to_vec(),
            answers: BTreeMap::new(),
            comments: BTreeMap::new(),
            active_section: first_section,
            stats: completion::compute(&[], |_| false),
            origin: DraftOrigin::Empty,
            progress,
        };

        if let Some(snapshot) = session.progress.restore(email) {
            session.answers = snapshot.answers;
            session.comments = snapshot.comments;
            if let Some(section) = snapshot.active_section {
                session.active_section = section;
            }
            session.origin = DraftOrigin::Snapshot;
        } else if let Some(record) = store.find_by_email(email) {
            for (id, value) in record.answers.iter() {
                session.answers.insert(ids::to_sectioned(id), value.to_string());
            }
            for (key, text) in record.comments.iter() {
                if let Some(base) = ids::comment_base(key) {
                    session.comments.insert(ids::to_sectioned(base), text.clone());
                }
            }
            if !session.answers.is_empty() || !session.comments.is_empty() {
                session.origin = DraftOrigin::Store;
            }
        }
        info!(
            "Survey session for {}: {} answers, {} comments ({:?})",
            email,
            session.answers.len(),
            session.comments.len(),
            session.origin
        );
        session.recompute();
        session
    }

    fn recompute(&mut self) {
        self.stats = completion::for_draft(&self.sections, &self.answers);
        completion::apply_to_sections(&mut self.sections, &self.stats);
        debug!(
            "Completion: {}/{} questions ({}%)",
            self.stats.completed_questions, self.stats.total_questions, self.stats.completion_percentage
        );
    }

    fn save_progress(&self) {
        self.progress.save(
            &self.email,
            &self.answers,
            &self.comments,
            Some(&self.active_section),
        );
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn origin(&self) -> DraftOrigin {
        self.origin
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn completion(&self) -> &CompletionStats {
        &self.stats
    }

    pub fn active_section(&self) -> &str {
        &self.active_section
    }

    pub fn answer_for(&self, question_id: &str) -> Option<&str> {
        self.answers.get(question_id).map(|s| s.as_str())
    }

    /// Records an answer. Blank values and `undefined` are refused.
    pub fn answer(&mut self, question_id: &str, value: &str) -> bool {
        let value = value.trim();
        if !is_answer_text(value) {
            error!(
                "Invalid value {:?} for question {}. Not saving answer.",
                value, question_id
            );
            return false;
        }
        self.answers
            .insert(question_id.to_string(), value.to_string());
        self.recompute();
        self.save_progress();
        true
    }

    pub fn comment(&mut self, question_id: &str, text: &str) {
        self.comments
            .insert(question_id.to_string(), text.to_string());
        self.save_progress();
    }

    /// The comment on a question, empty if there is none.
    pub fn comment_for(&self, question_id: &str) -> &str {
        self.comments
            .get(question_id)
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    pub fn set_active_section(&mut self, section_id: &str) {
        if !self.sections.iter().any(|s| s.id == section_id) {
            warn!("Unknown section {}", section_id);
        }
        self.active_section = section_id.to_string();
        self.save_progress();
    }

    /// The whole form, section by section, as it is submitted.
    pub fn response_data(&self) -> Vec<SectionResponses> {
        self.sections
            .iter()
            .map(|section| SectionResponses {
                section_id: section.id.clone(),
                section_title: section.title.clone(),
                questions: section
                    .questions
                    .iter()
                    .map(|q| QuestionResponse {
                        question_id: q.id.clone(),
                        question_text: q.text.clone(),
                        answer: self
                            .answers
                            .get(&q.id)
                            .filter(|a| !a.is_empty())
                            .cloned(),
                        comments: self.comment_for(&q.id).to_string(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// The answers and non-blank comments of the form, by compact id.
    pub fn compact_updates(&self) -> UpdateMap {
        let mut res = UpdateMap::new();
        for section in self.response_data() {
            for q in section.questions {
                let id = ids::to_compact(&q.question_id);
                if let Some(answer) = q.answer {
                    res.insert(id.clone(), answer.into());
                }
                if !q.comments.trim().is_empty() {
                    res.insert(ids::comment_key(&id), q.comments.into());
                }
            }
        }
        res
    }

    /// Starts over: empties the form, drops the progress snapshot and the
    /// stored responses of the respondent.
    pub fn reset(&mut self, store: &mut ResponseStore) {
        self.answers.clear();
        self.comments.clear();
        self.progress.clear();
        if let Err(e) = store.reset_responses(&self.email) {
            warn!("Reset: {}", e);
        }
        self.active_section = self
            .sections
            .first()
            .map(|s| s.id.clone())
            .unwrap_or_else(|| "strategy".to_string());
        self.origin = DraftOrigin::Empty;
        self.recompute();
        info!("Survey reset for {}", self.email);
    }

    pub fn logout(self) {
        self.progress.clear();
        info!("{} logged out", self.email);
    }
}
