//! Clean keys used to compare catalog names with media titles.

use std::sync::LazyLock;

use regex::Regex;

static TRAILING_EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.\w+$").expect("valid extension regex"));

static SEPARATOR_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[_\s]+").expect("valid separator regex"));

static SPECIMEN_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"mh\s*\d+\w*").expect("valid specimen code regex"));

const FILE_PREFIX: &str = "File:";

const STOP_WORDS: &[&str] = &["and", "the", "of"];

/// Maps a media title to its clean key.
///
/// `"File:Adrenal_gland.jpg"` becomes `"adrenal gland"`.
#[must_use]
pub fn normalize(title: &str) -> String {
    let title = title.replacen(FILE_PREFIX, "", 1);
    let title = TRAILING_EXTENSION.replace(&title, "");
    collapse(&title.to_lowercase())
}

/// Clean key for a catalog slide name: the specimen code (`MH 016a`) is
/// dropped but the rest of the name is kept as-is, extension-like dots
/// included.
#[must_use]
pub fn clean_entry_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let without_code = SPECIMEN_CODE.replace(&lowered, "");
    collapse(&without_code)
}

/// Words of a clean key that are specific enough to be matched on their own.
#[must_use]
pub fn keywords(clean: &str) -> Vec<&str> {
    clean
        .split(' ')
        .filter(|word| word.chars().count() > 3 && !STOP_WORDS.contains(word))
        .collect()
}

/// Strips the `File:` marker from a media title.
#[must_use]
pub fn file_name(title: &str) -> &str {
    title.strip_prefix(FILE_PREFIX).unwrap_or(title)
}

fn collapse(input: &str) -> String {
    SEPARATOR_RUNS.replace_all(input, " ").trim().to_owned()
}
