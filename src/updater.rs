use log::{debug, info, warn};

use snafu::{prelude::*, Snafu};
use survey_responses::catalog::CatalogError;
use survey_responses::completion;
use survey_responses::record::today;
use survey_responses::sync::{update_batch_records, RecordFile};
use survey_responses::*;

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::args::Args;
use crate::updater::config_reader::*;

pub mod config_reader;

#[derive(Debug, Snafu)]
pub enum UpdaterError {
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing JSON"))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("The configuration file has no parent directory"))]
    MissingParentDir {},
    #[snafu(display("Error writing the report to {path}"))]
    WritingReport {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("{source}"))]
    Records { source: SyncError },
    #[snafu(display("{source}"))]
    Questions { source: CatalogError },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type UpdaterResult<T> = Result<T, UpdaterError>;

/// The updates of a single-user invocation.
fn single_updates(question: &str, value: &str, comment: Option<&str>) -> UpdateMap {
    let mut updates = UpdateMap::new();
    updates.insert(question.to_string(), JSValue::String(value.to_string()));
    // A comment key only updates the comment.
    if !question.contains("_comment") {
        if let Some(c) = comment {
            updates.insert(
                survey_responses::ids::comment_key(question),
                JSValue::String(c.to_string()),
            );
        }
    }
    updates
}

fn read_batch(path: &str) -> UpdaterResult<BatchUpdate> {
    info!("Loading batch updates from {}", path);
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let batch: BatchUpdate = serde_json::from_str(&contents).context(ParsingJsonSnafu {})?;
    Ok(batch)
}

fn write_output(out: &str, js: &JSValue) -> UpdaterResult<()> {
    let pretty = serde_json::to_string_pretty(js).context(ParsingJsonSnafu {})?;
    if out == "stdout" {
        println!("{}", pretty);
    } else {
        fs::write(out, pretty).context(WritingReportSnafu { path: out })?;
        info!("Report written to {}", out);
    }
    Ok(())
}

/// Applies a batch to the response file. Returns true if every user succeeded.
fn apply(settings: &Settings, batch: &BatchUpdate, dry_run: bool) -> UpdaterResult<bool> {
    let file = RecordFile::new(&settings.records);
    let mut records = file.load().context(RecordsSnafu {})?;
    let before = RecordFile::render(&records).context(RecordsSnafu {})?;
    let report = update_batch_records(&mut records, batch, &today());
    let after = RecordFile::render(&records).context(RecordsSnafu {})?;

    for (email, outcome) in report.details.iter() {
        if outcome.is_success() {
            info!("{}: {}", email, outcome.message(email));
        } else {
            warn!("{}: {}", email, outcome.message(email));
        }
    }

    if before == after {
        debug!("No change to {:?}", settings.records);
    } else if dry_run {
        info!("Dry run: the changes to {:?} are not saved", settings.records);
        print_diff(before.as_str(), after.as_str(), "\n");
    } else {
        file.save(&records).context(RecordsSnafu {})?;
    }

    if let Some(out) = &settings.out {
        let js = serde_json::to_value(&report).context(ParsingJsonSnafu {})?;
        write_output(out, &js)?;
    }
    info!("{}", report.message);
    Ok(report.all_succeeded())
}

fn report_on_stdout(settings: &Settings) -> bool {
    settings.out.as_deref() == Some("stdout")
}

fn status_table(catalog: &Catalog, record: &RespondentRecord, stats: &CompletionStats) -> String {
    let mut table = format!(
        "{}: {}/{} questions answered ({}%), last modified {}\n",
        record.email,
        stats.completed_questions,
        stats.total_questions,
        stats.completion_percentage,
        record.last_modified_date
    );
    for (section, sc) in catalog.sections().iter().zip(stats.sections.iter()) {
        table.push_str(&format!(
            "  {:<24} {:>3}/{:<3} {:>3}%{}\n",
            section.title,
            sc.answered,
            sc.total,
            sc.completion_percentage,
            if sc.is_complete { "  complete" } else { "" }
        ));
    }
    table
}

/// Prints the completion of one respondent. Returns false if the respondent
/// is unknown.
fn status(settings: &Settings, email: &str) -> UpdaterResult<bool> {
    let questions_p: &Path = match &settings.questions {
        Some(p) => p.as_path(),
        None => whatever!("The question list is required for --status (use --questions)"),
    };
    let catalog = Catalog::read(questions_p).context(QuestionsSnafu {})?;
    let records = RecordFile::new(&settings.records)
        .load()
        .context(RecordsSnafu {})?;
    let record = match records.iter().find(|r| r.matches_email(email)) {
        Some(r) => r,
        None => {
            warn!("No user found with email: {}", email);
            return Ok(false);
        }
    };

    let stats = completion::for_record(catalog.sections(), record);
    let table = status_table(&catalog, record, &stats);
    // The JSON report owns stdout when it is written there.
    if report_on_stdout(settings) {
        eprint!("{}", table);
    } else {
        print!("{}", table);
    }
    if let Some(out) = &settings.out {
        let js = serde_json::to_value(&stats).context(ParsingJsonSnafu {})?;
        write_output(out, &js)?;
    }
    Ok(true)
}

/// Runs one invocation. Returns false when some of the work failed in a way
/// that should be reflected in the exit code.
pub fn run(args: &Args) -> UpdaterResult<bool> {
    let settings = resolve_settings(args)?;
    debug!("settings: {:?}", settings);

    if let Some(email) = &args.status {
        return status(&settings, email);
    }

    let batch: BatchUpdate = if let Some(batch_p) = &args.batch {
        read_batch(batch_p)?
    } else {
        let (email, question, value) = match (&args.email, &args.question, &args.value) {
            (Some(e), Some(q), Some(v)) => (e, q, v),
            _ => whatever!(
                "Not enough arguments for an individual update: <email> <question> <value> [comment]"
            ),
        };
        let mut batch = BatchUpdate::new();
        batch.insert(
            email.clone(),
            single_updates(question, value, args.comment.as_deref()),
        );
        batch
    };
    apply(&settings, &batch, args.dry_run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serde_json::json;

    fn args(argv: &[&str]) -> Args {
        let mut full = vec!["surveysync"];
        full.extend_from_slice(argv);
        Args::parse_from(full)
    }

    fn records_file(dir: &Path) -> String {
        let p = dir.join("SurveyResponse.json");
        let js = json!([
            {"Business_Email": "jane@example.com", "First_Name": "Jane", "s1q1": 2,
             "Registration_Date": "2024-01-01", "Last_Modified_Date": "2024-01-01"},
            {"Business_Email": "joe@example.com", "First_Name": "Joe",
             "Registration_Date": "2024-01-01", "Last_Modified_Date": "2024-01-01"}
        ]);
        fs::write(&p, serde_json::to_string_pretty(&js).unwrap()).unwrap();
        p.display().to_string()
    }

    fn load(path: &str) -> Vec<RespondentRecord> {
        RecordFile::new(Path::new(path)).load().unwrap()
    }

    #[test]
    fn single_update_with_comment() {
        let dir = tempfile::tempdir().unwrap();
        let records = records_file(dir.path());
        let ok = run(&args(&["JANE@example.com", "s1q1", "4", "Getting better", "--records", &records])).unwrap();
        assert!(ok);
        let rs = load(&records);
        assert_eq!(rs[0].answers.get("s1q1"), Some(&AnswerValue::Integer(4)));
        assert_eq!(
            rs[0].comments.get("s1q1_comment").map(|s| s.as_str()),
            Some("Getting better")
        );
        assert_eq!(rs[0].last_modified_date, today());
        assert_eq!(rs[1].last_modified_date, "2024-01-01");
    }

    #[test]
    fn comment_key_only_touches_the_comment() {
        let updates = single_updates("s1q1_comment", "Just the comment", Some("ignored"));
        assert_eq!(
            JSValue::Object(updates),
            json!({"s1q1_comment": "Just the comment"})
        );
        let updates = single_updates("s2q3", "10", None);
        assert_eq!(JSValue::Object(updates), json!({"s2q3": "10"}));
    }

    #[test]
    fn unknown_users_fail_without_creating() {
        let dir = tempfile::tempdir().unwrap();
        let records = records_file(dir.path());
        let before = fs::read_to_string(&records).unwrap();
        let ok = run(&args(&["nobody@example.com", "s1q1", "4", "--records", &records])).unwrap();
        assert!(!ok);
        let ok = run(&args(&["jane@example.com", "bogus", "4", "--records", &records])).unwrap();
        assert!(!ok);
        assert_eq!(fs::read_to_string(&records).unwrap(), before);
    }

    #[test]
    fn batch_writes_a_report() {
        let dir = tempfile::tempdir().unwrap();
        let records = records_file(dir.path());
        let batch_p = dir.path().join("updates.json");
        fs::write(
            &batch_p,
            json!({
                "joe@example.com": {"s1q1": "5", "s1q1_comment": "great", "bogus_key": 1},
                "jane@example.com": {},
                "ghost@example.com": {"s1q1": 3}
            })
            .to_string(),
        )
        .unwrap();
        let report_p = dir.path().join("report.json");
        let ok = run(&args(&[
            "--batch",
            &batch_p.display().to_string(),
            "--records",
            &records,
            "--out",
            &report_p.display().to_string(),
        ]))
        .unwrap();
        assert!(!ok);

        let report: BatchReport =
            serde_json::from_str(&fs::read_to_string(&report_p).unwrap()).unwrap();
        assert!(report.success);
        assert_eq!(report.success_count, 2);
        assert_eq!(report.total_count, 3);
        assert_eq!(report.outcome("jane@example.com"), Some(&UserOutcome::NoChange));
        assert_eq!(report.outcome("ghost@example.com"), Some(&UserOutcome::NotFound));
        assert_eq!(load(&records)[1].answers.get("s1q1"), Some(&AnswerValue::Integer(5)));
    }

    #[test]
    fn empty_batch_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let records = records_file(dir.path());
        let batch_p = dir.path().join("updates.json");
        fs::write(&batch_p, "{}").unwrap();
        assert!(run(&args(&["--batch", &batch_p.display().to_string(), "--records", &records])).unwrap());
    }

    #[test]
    fn dry_run_leaves_the_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let records = records_file(dir.path());
        let before = fs::read_to_string(&records).unwrap();
        let ok = run(&args(&["joe@example.com", "s1q2", "3", "--records", &records, "--dry-run"])).unwrap();
        assert!(ok);
        assert_eq!(fs::read_to_string(&records).unwrap(), before);
    }

    #[test]
    fn configuration_paths_are_relative_to_the_file() {
        let dir = tempfile::tempdir().unwrap();
        records_file(dir.path());
        fs::write(
            dir.path().join("QuestionList.json"),
            json!([{"Code": "s1_q1", "Question": "One"}, {"Code": "s1_q2", "Question": "Two"}]).to_string(),
        )
        .unwrap();
        let config_p = dir.path().join("surveysync.json");
        fs::write(
            &config_p,
            json!({"responseFile": "SurveyResponse.json", "questionFile": "QuestionList.json"}).to_string(),
        )
        .unwrap();
        let config = config_p.display().to_string();

        let a = args(&["--status", "jane@example.com", "--config", &config]);
        let settings = resolve_settings(&a).unwrap();
        assert_eq!(settings.records, dir.path().join("SurveyResponse.json"));
        assert_eq!(settings.questions, Some(dir.path().join("QuestionList.json")));
        assert_eq!(settings.out, None);
        assert!(run(&a).unwrap());
        assert!(!run(&args(&["--status", "ghost@example.com", "--config", &config])).unwrap());

        // Flags win.
        let a = args(&["--config", &config, "--records", "/elsewhere.json"]);
        assert_eq!(
            resolve_settings(&a).unwrap().records,
            PathBuf::from("/elsewhere.json")
        );
    }

    #[test]
    fn status_table_stays_off_a_stdout_report() {
        let dir = tempfile::tempdir().unwrap();
        let records = records_file(dir.path());
        let questions_p = dir.path().join("QuestionList.json");
        fs::write(
            &questions_p,
            json!([{"Code": "s1_q1", "Question": "One"}, {"Code": "s1_q2", "Question": "Two"}]).to_string(),
        )
        .unwrap();
        let questions = questions_p.display().to_string();

        let a = args(&["--status", "jane@example.com", "--records", &records, "--questions", &questions, "--out", "stdout"]);
        let settings = resolve_settings(&a).unwrap();
        assert!(report_on_stdout(&settings));
        assert!(run(&a).unwrap());
        let a = args(&["--status", "jane@example.com", "--records", &records, "--questions", &questions]);
        assert!(!report_on_stdout(&resolve_settings(&a).unwrap()));

        let catalog = Catalog::read(&questions_p).unwrap();
        let jane = &load(&records)[0];
        let table = status_table(&catalog, jane, &completion::for_record(catalog.sections(), jane));
        assert!(table.starts_with("jane@example.com: 1/2 questions answered (50%)"));
        assert!(table.contains("Strategy & Innovation"));
    }

    #[test]
    fn usage_errors() {
        assert!(run(&args(&["jane@example.com", "s1q1"])).is_err());
        let dir = tempfile::tempdir().unwrap();
        let records = records_file(dir.path());
        assert!(run(&args(&["jane@example.com", "s1q1", "--records", &records])).is_err());
        assert!(matches!(
            run(&args(&["--status", "jane@example.com", "--records", &records])),
            Err(UpdaterError::Whatever { .. })
        ));
        assert!(matches!(
            run(&args(&["a@b.com", "s1q1", "1", "--records", "/does/not/exist.json"])),
            Err(UpdaterError::Records { .. })
        ));
    }
}
