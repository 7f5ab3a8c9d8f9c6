use clap::Parser;

/// Updates survey answers in the shared response file, and reports on them.
///
/// Single update: surveysync <email> <question> <value> [comment] --records <file>
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (email) The respondent to update. Not used with --batch.
    #[clap(value_parser)]
    pub email: Option<String>,
    /// (question id, for example s1q1 or s1q1_comment) The field to update. With a comment key,
    /// only the comment is updated.
    #[clap(value_parser)]
    pub question: Option<String>,
    /// The new value. Ratings from 1 to 5 are stored as numbers.
    #[clap(value_parser)]
    pub value: Option<String>,
    /// (optional) A comment to store along with the answer.
    #[clap(value_parser)]
    pub comment: Option<String>,

    /// (file path) A JSON file mapping emails to updates. All the users are updated in one pass.
    #[clap(short, long, value_parser)]
    pub batch: Option<String>,

    /// (email) Prints the completion of this respondent instead of updating anything.
    /// Requires the question list.
    #[clap(short, long, value_parser)]
    pub status: Option<String>,

    /// (file path) The shared response file. Setting this option overrides the path that may be
    /// specified with the --config option.
    #[clap(short, long, value_parser)]
    pub records: Option<String>,

    /// (file path) The question list, needed by --status.
    #[clap(short, long, value_parser)]
    pub questions: Option<String>,

    /// (file path, 'stdout' or empty) If specified, the report of the update will be written in JSON
    /// format to the given location.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path, optional) A JSON configuration file with the locations of the files.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// If passed as an argument, prints the changes to the response file instead of writing them.
    #[clap(long, takes_value = false)]
    pub dry_run: bool,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
