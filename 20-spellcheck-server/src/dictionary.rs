//! Static word list consulted by every session.
//!
//! The dictionary is loaded once before the server starts accepting and is
//! never mutated afterwards, so workers share it through an `Arc` without
//! any locking.

use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};

use thiserror::Error;

/// Longest entry kept from a dictionary line; the rest of the line is dropped.
pub const MAX_WORD_CHARS: usize = 29;

const BUNDLED_WORDS: &str = include_str!("../words.txt");

#[derive(Debug, Error)]
pub enum DictionaryError {
    #[error("failed to open dictionary {}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read dictionary {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome of checking one word against the dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    Misspelled,
}

impl Verdict {
    pub fn is_match(self) -> bool {
        matches!(self, Verdict::Ok)
    }

    /// Label used on the wire and in the result log. The spelling of
    /// `MISPELLED` is part of the protocol.
    pub fn label(self) -> &'static str {
        match self {
            Verdict::Ok => "OK",
            Verdict::Misspelled => "MISPELLED",
        }
    }
}

impl From<bool> for Verdict {
    fn from(matched: bool) -> Self {
        if matched {
            Verdict::Ok
        } else {
            Verdict::Misspelled
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    words: Vec<String>,
}

impl Dictionary {
    /// Loads a dictionary file with one word per line.
    ///
    /// Lines are truncated to [`MAX_WORD_CHARS`] characters and blank lines
    /// are skipped. Invalid UTF-8 is replaced rather than rejected.
    ///
    /// # Errors
    ///
    /// Returns [`DictionaryError`] if the file cannot be opened or read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DictionaryError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DictionaryError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file)).map_err(|source| DictionaryError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses a dictionary from any buffered reader using the same rules as
    /// [`load`](Self::load).
    pub fn from_reader<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut words = Vec::new();
        for line in reader.split(b'\n') {
            words.extend(parse_entry(&String::from_utf8_lossy(&line?)));
        }
        Ok(Self { words })
    }

    /// The word list compiled into the binary, used when no dictionary path
    /// is given.
    pub fn bundled() -> Self {
        Self {
            words: BUNDLED_WORDS.split('\n').filter_map(parse_entry).collect(),
        }
    }

    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            words: words.into_iter().map(Into::into).collect(),
        }
    }

    /// Reports whether `candidate` is a leading substring of any entry.
    ///
    /// This is a prefix match bounded by the candidate's length, not an
    /// exact lookup: `"app"` matches an entry `"apple"`, and the empty
    /// string matches any non-empty dictionary. Clients observe this
    /// through the protocol, so it is kept as is.
    pub fn matches(&self, candidate: &str) -> bool {
        self.words.iter().any(|entry| entry.starts_with(candidate))
    }

    pub fn check(&self, candidate: &str) -> Verdict {
        Verdict::from(self.matches(candidate))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

fn parse_entry(line: &str) -> Option<String> {
    let entry: String = line
        .trim_end_matches('\r')
        .chars()
        .take(MAX_WORD_CHARS)
        .collect();
    (!entry.is_empty()).then_some(entry)
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use super::*;

    #[test]
    fn prefix_of_an_entry_matches() {
        let dictionary = Dictionary::from_words(["apple", "application"]);
        assert!(dictionary.matches("app"));
        assert!(dictionary.matches("applic"));
        assert!(!dictionary.matches("zzz"));
    }

    #[test]
    fn exact_entries_always_match() {
        let dictionary = Dictionary::from_words(["apple", "application"]);
        assert_eq!(dictionary.check("apple"), Verdict::Ok);
        assert_eq!(dictionary.check("application"), Verdict::Ok);
    }

    #[test]
    fn candidate_longer_than_entry_does_not_match() {
        let dictionary = Dictionary::from_words(["apple"]);
        assert_eq!(dictionary.check("apples"), Verdict::Misspelled);
        assert_eq!(dictionary.check("pple"), Verdict::Misspelled);
    }

    #[test]
    fn empty_candidate_matches_only_non_empty_dictionary() {
        assert!(Dictionary::from_words(["a"]).matches(""));
        assert!(!Dictionary::default().matches(""));
    }

    #[test]
    fn reader_trims_terminators_and_skips_blank_lines() {
        let input = Cursor::new("apple\r\n\nbanana\ncherry");
        let dictionary = Dictionary::from_reader(input).expect("parse dictionary");
        assert_eq!(dictionary.len(), 3);
        assert!(dictionary.matches("banana"));
        assert!(dictionary.matches("cherry"));
        assert!(!dictionary.matches("apple\r"));
    }

    #[test]
    fn long_lines_are_truncated() {
        let long = "a".repeat(40);
        let dictionary = Dictionary::from_reader(Cursor::new(long.clone())).expect("parse");
        assert!(dictionary.matches(&long[..MAX_WORD_CHARS]));
        assert!(!dictionary.matches(&long[..MAX_WORD_CHARS + 1]));
    }

    #[test]
    fn bundled_list_is_parsed_like_a_file() {
        let bundled = Dictionary::bundled();
        let from_file = Dictionary::from_reader(Cursor::new(BUNDLED_WORDS)).expect("parse");
        assert!(!bundled.is_empty());
        assert_eq!(bundled.len(), from_file.len());
        assert_eq!(bundled.check("kettle"), Verdict::Ok);
        assert_eq!(bundled.check("kettel"), Verdict::Misspelled);
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "kettle").expect("write");
        writeln!(file, "teapot").expect("write");

        let dictionary = Dictionary::load(file.path()).expect("load");
        assert_eq!(dictionary.len(), 2);
        assert!(dictionary.matches("tea"));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("missing.txt");
        let err = Dictionary::load(&missing).expect_err("missing file");
        assert!(matches!(err, DictionaryError::Open { ref path, .. } if path == &missing));
    }
}
