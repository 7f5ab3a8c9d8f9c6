use crate::updater::*;

use serde::{Deserialize, Serialize};

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    #[serde(rename = "responseFile")]
    pub response_file: String,
    #[serde(rename = "questionFile")]
    pub question_file: Option<String>,
    #[serde(rename = "outputFile")]
    pub output_file: Option<String>,
}

/// The files an invocation works on, once flags and configuration are merged.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Settings {
    pub records: PathBuf,
    pub questions: Option<PathBuf>,
    /// A file path or `stdout`.
    pub out: Option<String>,
}

pub fn read_config(path: &str) -> UpdaterResult<UpdaterConfig> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let config: UpdaterConfig = serde_json::from_str(&contents).context(ParsingJsonSnafu {})?;
    debug!("config: {:?}", config);
    Ok(config)
}

fn resolve_path(root: &Path, p: &str) -> PathBuf {
    // An absolute path replaces the root.
    root.join(p)
}

/// Flags win over the configuration file. Paths from the configuration file
/// are relative to its directory.
pub fn resolve_settings(args: &Args) -> UpdaterResult<Settings> {
    let config = match &args.config {
        Some(path) => {
            let config = read_config(path)?;
            let root = Path::new(path).parent().context(MissingParentDirSnafu {})?;
            Some((config, root.to_path_buf()))
        }
        None => None,
    };

    let records = match (&args.records, &config) {
        (Some(p), _) => PathBuf::from(p),
        (None, Some((c, root))) => resolve_path(root, &c.response_file),
        (None, None) => {
            whatever!("No response file given: use --records or a configuration file")
        }
    };
    let questions = match (&args.questions, &config) {
        (Some(p), _) => Some(PathBuf::from(p)),
        (None, Some((c, root))) => c.question_file.as_ref().map(|p| resolve_path(root, p)),
        (None, None) => None,
    };
    let out = match (&args.out, &config) {
        (Some(o), _) => Some(o.clone()),
        (None, Some((c, root))) => c.output_file.as_ref().map(|p| {
            if p == "stdout" {
                p.clone()
            } else {
                resolve_path(root, p).display().to_string()
            }
        }),
        (None, None) => None,
    };
    Ok(Settings {
        records,
        questions,
        out,
    })
}
