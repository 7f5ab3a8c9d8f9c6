//! Completion of a questionnaire, per section and overall.
//!
//! Everything here is a pure function of the section list and the answers:
//! the aggregates are rebuilt from scratch on every call.

use std::collections::BTreeMap;

use crate::config::*;
use crate::ids;
use crate::record::RespondentRecord;

fn percentage(answered: usize, total: usize) -> u32 {
    if total == 0 {
        // Nothing to answer.
        100
    } else {
        ((100 * answered) / total) as u32
    }
}

/// Computes completion for `sections`. `is_answered` is called with the
/// sectioned id of every question in the catalog.
pub fn compute<F>(sections: &[Section], is_answered: F) -> CompletionStats
where
    F: Fn(&str) -> bool,
{
    let mut per_section: Vec<SectionCompletion> = Vec::with_capacity(sections.len());
    for section in sections.iter() {
        let total = section.questions.len();
        let answered = section
            .questions
            .iter()
            .filter(|q| is_answered(&q.id))
            .count();
        let completion_percentage = percentage(answered, total);
        per_section.push(SectionCompletion {
            section_id: section.id.clone(),
            answered,
            total,
            completion_percentage,
            is_complete: completion_percentage == 100,
        });
    }

    let total_questions: usize = per_section.iter().map(|s| s.total).sum();
    let completed_questions: usize = per_section.iter().map(|s| s.answered).sum();
    let completion_percentage = percentage(completed_questions, total_questions);
    CompletionStats {
        total_questions,
        completed_questions,
        completion_percentage,
        is_fully_completed: completion_percentage == 100,
        sections: per_section,
    }
}

/// Completion of a draft: answers keyed by sectioned id, as the form holds
/// them.
pub fn for_draft(sections: &[Section], answers: &BTreeMap<String, String>) -> CompletionStats {
    compute(sections, |id| {
        answers
            .get(id)
            .or_else(|| answers.get(&ids::to_compact(id)))
            .map(|s| is_answer_text(s))
            .unwrap_or(false)
    })
}

/// Completion of a stored record, keyed by compact id.
pub fn for_record(sections: &[Section], record: &RespondentRecord) -> CompletionStats {
    compute(sections, |id| {
        record
            .answers
            .get(&ids::to_compact(id))
            .map(|v| v.counts_as_answered())
            .unwrap_or(false)
    })
}

/// Writes the derived section flags back on the section list.
pub fn apply_to_sections(sections: &mut [Section], stats: &CompletionStats) {
    for section in sections.iter_mut() {
        if let Some(s) = stats.section(&section.id) {
            section.completion_percentage = s.completion_percentage;
            section.is_complete = s.is_complete;
        }
    }
}
