//! Per-connection line protocol.
//!
//! A session loops through `AwaitingInput -> Evaluating -> Responding` until
//! the client sends the sentinel, closes its end, or the connection fails:
//!
//! ```text
//! S: Enter a word. Type "exitpls" to quit.
//! C: kettle
//! S: kettle - OK.
//! S: Enter a word. Type "exitpls" to quit.
//! C: exitpls
//! (server closes)
//! ```
//!
//! Failures are returned as [`SessionError`] and end this session only.

use std::io::{self, BufRead, BufReader, Read, Write};

use thiserror::Error;
use tracing::warn;

use crate::{
    dictionary::{Dictionary, Verdict},
    result_log::ResultLog,
};

pub const PROMPT: &str = "Enter a word. Type \"exitpls\" to quit.\n";
pub const SENTINEL: &str = "exitpls";
/// Largest request unit accepted from a client, excluding its `\n` or `\r\n`.
pub const MAX_REQUEST_BYTES: usize = 255;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection idle past its deadline")]
    IdleTimeout,
    #[error("request exceeds {} bytes", MAX_REQUEST_BYTES)]
    TokenTooLong,
    #[error("request is not valid UTF-8")]
    InvalidUtf8,
    #[error("connection I/O failed")]
    Io(#[source] io::Error),
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        // Socket read/write timeouts surface as WouldBlock on Unix and TimedOut on Windows.
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => SessionError::IdleTimeout,
            _ => SessionError::Io(err),
        }
    }
}

/// Why a session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Sentinel,
    PeerClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub words: u64,
    pub matched: u64,
    pub reason: CloseReason,
}

enum State {
    AwaitingInput,
    Evaluating(String),
    Responding { word: String, verdict: Verdict },
    Closed(CloseReason),
}

pub struct Session<'a, S, W = std::fs::File> {
    stream: BufReader<S>,
    dictionary: &'a Dictionary,
    log: &'a ResultLog<W>,
    words: u64,
    matched: u64,
}

impl<'a, S, W> Session<'a, S, W>
where
    S: Read + Write,
    W: Write,
{
    pub fn new(stream: S, dictionary: &'a Dictionary, log: &'a ResultLog<W>) -> Self {
        Self {
            stream: BufReader::new(stream),
            dictionary,
            log,
            words: 0,
            matched: 0,
        }
    }

    /// Drives the protocol until the session closes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the connection fails, times out, or
    /// sends a request that is too long or not UTF-8.
    pub fn run(mut self) -> Result<SessionSummary, SessionError> {
        let mut state = State::AwaitingInput;
        loop {
            state = match state {
                State::AwaitingInput => self.await_input()?,
                State::Evaluating(word) => {
                    let verdict = self.dictionary.check(&word);
                    State::Responding { word, verdict }
                }
                State::Responding { word, verdict } => self.respond(word, verdict)?,
                State::Closed(reason) => {
                    return Ok(SessionSummary {
                        words: self.words,
                        matched: self.matched,
                        reason,
                    });
                }
            };
        }
    }

    fn await_input(&mut self) -> Result<State, SessionError> {
        self.send(PROMPT)?;
        let next = match self.read_request()? {
            None => State::Closed(CloseReason::PeerClosed),
            Some(word) if word == SENTINEL => State::Closed(CloseReason::Sentinel),
            Some(word) => State::Evaluating(word),
        };
        Ok(next)
    }

    fn respond(&mut self, word: String, verdict: Verdict) -> Result<State, SessionError> {
        self.send(&format!("{word} - {}.\n", verdict.label()))?;

        self.words += 1;
        if verdict.is_match() {
            self.matched += 1;
        }
        if let Err(err) = self.log.record(&word, verdict) {
            warn!(error = %err, word = %word, "failed to append to result log");
        }
        Ok(State::AwaitingInput)
    }

    /// Reads one newline-terminated request, or the trailing bytes before EOF.
    ///
    /// Returns `None` when the peer has closed the connection.
    fn read_request(&mut self) -> Result<Option<String>, SessionError> {
        let mut raw = Vec::new();
        // Room for the longest request plus a `\r\n` terminator.
        let limit = MAX_REQUEST_BYTES as u64 + 2;
        let read = self.stream.by_ref().take(limit).read_until(b'\n', &mut raw)?;
        if read == 0 {
            return Ok(None);
        }
        if raw.last() == Some(&b'\n') {
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
        }
        if raw.len() > MAX_REQUEST_BYTES {
            return Err(SessionError::TokenTooLong);
        }

        let text = String::from_utf8(raw).map_err(|_| SessionError::InvalidUtf8)?;
        Ok(Some(text.trim_end_matches(LINE_ENDINGS).to_string()))
    }

    fn send(&mut self, text: &str) -> Result<(), SessionError> {
        let stream = self.stream.get_mut();
        stream.write_all(text.as_bytes())?;
        stream.flush()?;
        Ok(())
    }
}
