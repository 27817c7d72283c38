use anyhow::{Context, Result};
use crossbeam_channel::{self, Receiver, Sender, TryRecvError};
use std::borrow::Cow;
use std::io::{self, BufRead, Write};
use std::thread;
use tracing::{error, info, warn};

use crate::components::writer::WriteError;

const RULE: &str = "--------------------------------";

/// Status messages shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Banner,
    Captured { name: String, id: String },
    InvalidFormat,
    BlockFailed(WriteError),
    BlockWritten(u8),
    CardFinished { complete: bool },
    Prompt,
}

pub trait Reporter {
    fn report(&mut self, report: Report);
}

/// Renders reports as human-readable lines.
pub struct ConsoleReporter<W: Write> {
    out: W,
}

impl ConsoleReporter<io::Stdout> {
    pub fn stdout() -> Self {
        ConsoleReporter { out: io::stdout() }
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        ConsoleReporter { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self, report: &Report) -> io::Result<()> {
        let out = &mut self.out;
        match report {
            Report::Banner => {
                writeln!(out, "=== RFID Card Writer ===")?;
                writeln!(out, "Enter name and ID in format:")?;
                writeln!(out, "NAME:ID")?;
                writeln!(out, "Example -> Dr. Smith:EMP001")?;
                writeln!(out, "{}", RULE)?;
            }
            Report::Captured { name, id } => {
                writeln!(out, "✅ Data captured:")?;
                writeln!(out, "  Name: {}", name)?;
                writeln!(out, "  ID  : {}", id)?;
                writeln!(out, "Now place a card on the reader...")?;
            }
            Report::InvalidFormat => writeln!(out, "⚠️ Invalid format! Use NAME:ID")?,
            Report::BlockFailed(err) => writeln!(out, "{}", err)?,
            Report::BlockWritten(block) => writeln!(out, "✔ Block {} written.", block)?,
            Report::CardFinished { complete: true } => {
                writeln!(out, "✅ Data written successfully!")?
            }
            Report::CardFinished { complete: false } => {
                writeln!(out, "⚠️ Card write completed with errors.")?
            }
            Report::Prompt => {
                writeln!(out, "Enter new NAME:ID for another card...")?;
                writeln!(out, "{}", RULE)?;
            }
        }
        out.flush()
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn report(&mut self, report: Report) {
        if let Err(err) = self.render(&report) {
            error!("Failed to print {:?} to console: {}", report, err);
        }
    }
}

/// Non-blocking source of operator input lines.
pub trait LineSource {
    /// Returns the next complete line, if one is available right now.
    fn try_next_line(&mut self) -> Option<String>;
}

impl LineSource for Receiver<String> {
    fn try_next_line(&mut self) -> Option<String> {
        self.try_recv().ok()
    }
}

/// Lines read from stdin by a background thread.
pub struct StdinLines {
    channel: Receiver<String>,
    eof_logged: bool,
}

/// Forwards newline-terminated lines from `input` until EOF or until the receiver is gone.
/// Bytes that are not valid UTF-8 are replaced instead of ending the stream.
pub fn forward_lines<B: BufRead>(mut input: B, tx: &Sender<String>) -> io::Result<()> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match input.read_until(b'\n', &mut buf) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
        let line = String::from_utf8_lossy(&buf);
        if let Cow::Owned(_) = line {
            warn!("Console line is not valid UTF-8, replacing invalid bytes");
        }
        let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
        if tx.send(line.to_string()).is_err() {
            return Ok(());
        }
    }
}

impl StdinLines {
    pub fn spawn() -> Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(10);
        thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                let stdin = io::stdin();
                if let Err(err) = forward_lines(stdin.lock(), &tx) {
                    error!("Failed to read from stdin: {}", err);
                }
                info!("stdin reader terminated");
            })
            .context("Spawning stdin reader")?;
        Ok(StdinLines {
            channel: rx,
            eof_logged: false,
        })
    }
}

impl LineSource for StdinLines {
    fn try_next_line(&mut self) -> Option<String> {
        match self.channel.try_recv() {
            Ok(line) => Some(line),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                if !self.eof_logged {
                    warn!("Console input closed, no further records can be entered");
                    self.eof_logged = true;
                }
                None
            }
        }
    }
}

pub mod testing {
    use super::*;

    /// Forwards every report to a channel.
    pub struct TestReporter {
        tx: Sender<Report>,
    }

    impl TestReporter {
        pub fn new() -> (TestReporter, Receiver<Report>) {
            let (tx, rx) = crossbeam_channel::unbounded();
            (TestReporter { tx }, rx)
        }
    }

    impl Reporter for TestReporter {
        fn report(&mut self, report: Report) {
            self.tx.send(report).unwrap();
        }
    }
}
