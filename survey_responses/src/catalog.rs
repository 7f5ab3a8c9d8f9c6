use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use serde::Deserialize;
use snafu::{prelude::*, Snafu};

use crate::config::*;
use crate::ids;

#[derive(Debug, Snafu)]
pub enum CatalogError {
    #[snafu(display("Error opening question list {path}"))]
    OpeningQuestions {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing question list"))]
    ParsingQuestions { source: serde_json::Error },
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// One row of the question list, as exported from the spreadsheet.
#[derive(Eq, PartialEq, Debug, Clone, Deserialize)]
pub struct QuestionEntry {
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Question", default)]
    pub question: String,
    #[serde(rename = "HelpText1", default)]
    pub help_text: Option<String>,
}

/// Section code, section id, title. The order is the display order.
const SECTION_MAP: [(&str, &str, &str); 7] = [
    ("s1", "strategy", "Strategy & Innovation"),
    ("s2", "customer", "Customer Experience"),
    ("s3", "organization", "Organization & People"),
    ("s4", "operations", "Operations"),
    ("s5", "risk", "Risk & Cybersecurity"),
    ("s6", "finance", "Finance, Tax & Legal"),
    ("s7", "data", "Data & Technology"),
];

/// The ordered list of sections, read once at startup.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct Catalog {
    sections: Vec<Section>,
}

impl Catalog {
    pub fn from_entries(entries: &[QuestionEntry]) -> Catalog {
        let mut groups: Vec<Vec<Question>> = vec![Vec::new(); SECTION_MAP.len()];
        for entry in entries.iter() {
            let code = entry.code.trim();
            let slot = ids::section_code(code)
                .and_then(|s| SECTION_MAP.iter().position(|(c, _, _)| *c == s));
            match slot {
                Some(idx) if ids::is_sectioned_answer(code) => {
                    groups[idx].push(Question {
                        id: code.to_string(),
                        text: entry.question.clone(),
                        help_text: entry.help_text.clone().unwrap_or_default(),
                    });
                }
                _ => {
                    warn!("Skipping question with unknown code {:?}", entry.code);
                }
            }
        }

        let mut sections = Vec::new();
        for ((_, id, title), mut questions) in SECTION_MAP.iter().zip(groups) {
            if questions.is_empty() {
                continue;
            }
            questions.sort_by_key(|q| ids::question_number(&q.id));
            debug!("Catalog: section {} has {} questions", id, questions.len());
            sections.push(Section {
                id: id.to_string(),
                title: title.to_string(),
                questions,
                is_complete: false,
                completion_percentage: 0,
            });
        }
        Catalog { sections }
    }

    pub fn from_json(contents: &str) -> CatalogResult<Catalog> {
        let entries: Vec<QuestionEntry> =
            serde_json::from_str(contents).context(ParsingQuestionsSnafu {})?;
        Ok(Catalog::from_entries(&entries))
    }

    pub fn read(path: &Path) -> CatalogResult<Catalog> {
        let contents = fs::read_to_string(path).context(OpeningQuestionsSnafu {
            path: path.display().to_string(),
        })?;
        let catalog = Catalog::from_json(&contents)?;
        info!(
            "Loaded {} questions in {} sections from {:?}",
            catalog.question_count(),
            catalog.sections.len(),
            path
        );
        Ok(catalog)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    pub fn question(&self, id: &str) -> Option<&Question> {
        self.sections
            .iter()
            .flat_map(|s| s.questions.iter())
            .find(|q| q.id == id)
    }

    pub fn question_count(&self) -> usize {
        self.sections.iter().map(|s| s.questions.len()).sum()
    }

    pub fn first_section_id(&self) -> Option<&str> {
        self.sections.first().map(|s| s.id.as_str())
    }
}
