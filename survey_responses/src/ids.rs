/*!
Question identifiers.

The question catalog and the survey form spell identifiers in the *sectioned*
form `s1_q2`. Stored respondent records and the external record use the
*compact* form `s1q2`. A comment on a question is stored under the compact id
followed by `_comment` (`s1q2_comment`).

This module is the only place that knows these shapes. Everything else goes
through the functions below.

```
use survey_responses::ids;

assert_eq!(ids::to_compact("s1_q2"), "s1q2");
assert_eq!(ids::to_sectioned("s1q2"), "s1_q2");
assert_eq!(ids::to_sectioned("s1_q2"), "s1_q2");
assert_eq!(ids::to_compact("s3_q10_comment"), "s3q10_comment");
```
*/

use once_cell::sync::Lazy;
use regex::Regex;

pub const COMMENT_SUFFIX: &str = "_comment";

static COMPACT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(s\d)(q\d+)$").expect("valid compact id regex"));
static SECTIONED_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(s\d)_(q\d+)$").expect("valid sectioned id regex"));
static ANY_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(s\d)_?q(\d+)$").expect("valid question id regex"));

/// Splits a key into its base id and whether it carried the comment suffix.
/// The suffix is not interpreted any further.
pub fn split_comment(key: &str) -> (&str, bool) {
    match key.strip_suffix(COMMENT_SUFFIX) {
        Some(base) => (base, true),
        None => (key, false),
    }
}

fn with_suffix(base: String, is_comment: bool) -> String {
    if is_comment {
        comment_key(&base)
    } else {
        base
    }
}

/// `s1_q2` -> `s1q2`. Anything else is returned unchanged.
pub fn to_compact(id: &str) -> String {
    let (base, is_comment) = split_comment(id);
    let converted = match SECTIONED_ID.captures(base) {
        Some(caps) => format!("{}{}", &caps[1], &caps[2]),
        None => base.to_string(),
    };
    with_suffix(converted, is_comment)
}

/// `s1q2` -> `s1_q2`. Already sectioned (or unrecognized) ids are returned
/// unchanged.
pub fn to_sectioned(id: &str) -> String {
    let (base, is_comment) = split_comment(id);
    let converted = match COMPACT_ID.captures(base) {
        Some(caps) => format!("{}_{}", &caps[1], &caps[2]),
        None => base.to_string(),
    };
    with_suffix(converted, is_comment)
}

pub fn comment_key(base: &str) -> String {
    format!("{}{}", base, COMMENT_SUFFIX)
}

/// The question id a comment key refers to, if `key` is a comment key.
pub fn comment_base(key: &str) -> Option<&str> {
    match split_comment(key) {
        (base, true) => Some(base),
        _ => None,
    }
}

pub fn is_compact_answer(key: &str) -> bool {
    COMPACT_ID.is_match(key)
}

pub fn is_compact_comment(key: &str) -> bool {
    matches!(split_comment(key), (base, true) if COMPACT_ID.is_match(base))
}

pub fn is_sectioned_answer(key: &str) -> bool {
    SECTIONED_ID.is_match(key)
}

pub fn is_sectioned_comment(key: &str) -> bool {
    matches!(split_comment(key), (base, true) if SECTIONED_ID.is_match(base))
}

/// The section code (`s1`) of a question id in either spelling.
pub fn section_code(id: &str) -> Option<&str> {
    ANY_ID.captures(id).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// The question number within its section (`s1_q12` -> 12), either spelling.
pub fn question_number(id: &str) -> Option<u32> {
    ANY_ID
        .captures(id)
        .and_then(|c| c.get(2))
        .and_then(|m| m.as_str().parse::<u32>().ok())
}
