//! Append-only record of every evaluated word.
//!
//! Each entry is a fragment such as `kettle - OK. ` with no newline between
//! entries. Writes are serialized by a mutex that belongs to the log alone,
//! so a slow disk never holds up the connection queue.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::{Mutex, PoisonError},
};

use crate::dictionary::Verdict;

#[derive(Debug)]
pub struct ResultLog<W = File> {
    sink: Mutex<W>,
}

impl ResultLog<File> {
    /// Creates (or truncates) the log file at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::new(file))
    }
}

impl<W: Write> ResultLog<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Appends one fragment and flushes it before releasing the lock.
    pub fn record(&self, word: &str, verdict: Verdict) -> io::Result<()> {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        write!(sink, "{word} - {}. ", verdict.label())?;
        sink.flush()
    }

    pub fn into_inner(self) -> W {
        self.sink.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc, thread};

    use super::*;

    #[test]
    fn fragments_are_space_separated_without_newlines() {
        let log = ResultLog::new(Vec::new());
        log.record("kettle", Verdict::Ok).expect("record");
        log.record("kettel", Verdict::Misspelled).expect("record");

        let written = String::from_utf8(log.into_inner()).expect("utf8");
        assert_eq!(written, "kettle - OK. kettel - MISPELLED. ");
    }

    #[test]
    fn create_truncates_existing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("log.txt");
        fs::write(&path, "stale contents").expect("seed log");

        let log = ResultLog::create(&path).expect("create log");
        log.record("fresh", Verdict::Ok).expect("record");
        drop(log);

        assert_eq!(fs::read_to_string(&path).expect("read log"), "fresh - OK. ");
    }

    #[test]
    fn concurrent_records_never_interleave() {
        let log = Arc::new(ResultLog::new(Vec::new()));
        let writers: Vec<_> = (0..4)
            .map(|writer| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for n in 0..100 {
                        log.record(&format!("w{writer}n{n}"), Verdict::Ok)
                            .expect("record");
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().expect("writer thread");
        }

        let log = Arc::into_inner(log).expect("sole owner");
        let written = String::from_utf8(log.into_inner()).expect("utf8");
        let fragments: Vec<_> = written.split(". ").filter(|f| !f.is_empty()).collect();
        assert_eq!(fragments.len(), 400);
        assert!(fragments.iter().all(|f| f.ends_with(" - OK")));
    }
}
