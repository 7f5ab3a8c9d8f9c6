use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info, warn};
use snafu::prelude::*;

use crate::sync::*;
use crate::updates::UpdateMap;

/// The external record as owned by the `surveysync` updater: every update
/// spawns it once with a batch file and reads the report it prints.
#[derive(Debug, Clone)]
pub struct UpdaterProcess {
    program: PathBuf,
    records: PathBuf,
}

impl UpdaterProcess {
    pub fn new(program: &Path, records: &Path) -> UpdaterProcess {
        UpdaterProcess {
            program: program.to_path_buf(),
            records: records.to_path_buf(),
        }
    }

    fn run(&self, batch: &BatchUpdate) -> SyncResult<BatchReport> {
        let mut tmp = tempfile::Builder::new()
            .prefix("temp_batch_updates_")
            .suffix(".json")
            .tempfile()
            .context(WritingBatchSnafu {})?;
        let payload = serde_json::to_string_pretty(batch).context(SerializingBatchSnafu {})?;
        tmp.write_all(payload.as_bytes())
            .context(WritingBatchSnafu {})?;
        tmp.flush().context(WritingBatchSnafu {})?;

        let program = self.program.display().to_string();
        debug!(
            "Executing {} --batch {:?} --records {:?}",
            program,
            tmp.path(),
            self.records
        );
        let output = Command::new(&self.program)
            .arg("--batch")
            .arg(tmp.path())
            .arg("--records")
            .arg(&self.records)
            .arg("--out")
            .arg("stdout")
            .output()
            .context(SpawningUpdaterSnafu { program })?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !stderr.trim().is_empty() {
            debug!("updater stderr: {}", stderr.trim());
        }
        // A partial failure exits with 1 but still prints its report.
        match serde_json::from_slice::<BatchReport>(&output.stdout) {
            Ok(report) => {
                info!("updater: {}", report.message);
                Ok(report)
            }
            Err(e) if output.status.success() => Err(SyncError::ReadingReport { source: e }),
            Err(_) => UpdaterFailedSnafu {
                status: output.status.to_string(),
                stderr,
            }
            .fail(),
        }
    }
}

impl ExternalRecord for UpdaterProcess {
    fn update_user(&mut self, email: &str, updates: &UpdateMap) -> SyncResult<UserOutcome> {
        if updates.is_empty() {
            return Ok(UserOutcome::NoChange);
        }
        let mut batch = BatchUpdate::new();
        batch.insert(email.to_string(), updates.clone());
        let report = self.run(&batch)?;
        match report.details.get(email) {
            Some(outcome) => Ok(outcome.clone()),
            None => {
                warn!("updater report has no entry for {}", email);
                UpdaterFailedSnafu {
                    status: "incomplete report".to_string(),
                    stderr: report.message,
                }
                .fail()
            }
        }
    }

    fn update_batch(&mut self, batch: &BatchUpdate) -> SyncResult<BatchReport> {
        self.run(batch)
    }
}
