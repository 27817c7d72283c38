use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::components::rfid::CardReader;
use crate::components::writer::{CardSession, WriteError};
use crate::console::{LineSource, Report, Reporter};
use crate::model::record::{parse_line, PendingRecord};
use crate::model::tag::{CryptoKey, Uid, ID_BLOCK, NAME_BLOCK};

pub trait Clock {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No record waiting for a card.
    Idle,
    /// A record waits for the next card.
    Pending,
    /// Card detection is paused after a card has been processed.
    Cooldown { until: Instant },
}

/// Outcome of writing one pending record to one card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardOutcome {
    pub uid: Uid,
    pub name: Result<(), WriteError>,
    pub id: Result<(), WriteError>,
}

impl CardOutcome {
    pub fn is_complete(&self) -> bool {
        self.name.is_ok() && self.id.is_ok()
    }
}

/// What a single loop iteration did with the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Idle,
    NoCard,
    CoolingDown,
    Written(CardOutcome),
}

#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub name_block: u8,
    pub id_block: u8,
    pub debounce: Duration,
    pub poll_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            name_block: NAME_BLOCK,
            id_block: ID_BLOCK,
            debounce: Duration::from_secs(2),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Owns everything the write loop touches.
pub struct WriterSession<R, L, P, C> {
    reader: R,
    key: CryptoKey,
    input: L,
    reporter: P,
    clock: C,
    settings: Settings,
    record: Option<PendingRecord>,
    cooldown_until: Option<Instant>,
}

impl<R, L, P, C> WriterSession<R, L, P, C>
where
    R: CardReader,
    L: LineSource,
    P: Reporter,
    C: Clock,
{
    pub fn new(
        reader: R,
        key: CryptoKey,
        input: L,
        reporter: P,
        clock: C,
        settings: Settings,
    ) -> Self {
        WriterSession {
            reader,
            key,
            input,
            reporter,
            clock,
            settings,
            record: None,
            cooldown_until: None,
        }
    }

    pub fn state(&self) -> State {
        match self.cooldown_until {
            Some(until) if self.clock.now() < until => State::Cooldown { until },
            _ => match self.record {
                Some(ref record) if record.ready => State::Pending,
                _ => State::Idle,
            },
        }
    }

    pub fn record(&self) -> Option<&PendingRecord> {
        self.record.as_ref()
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Replaces the pending record if `line` is a valid `NAME:ID` line.
    pub fn handle_line(&mut self, line: &str) {
        match parse_line(line) {
            Ok((name, id)) => {
                info!("Captured record for '{}'", name);
                self.reporter.report(Report::Captured {
                    name: name.clone(),
                    id: id.clone(),
                });
                self.record = Some(PendingRecord::new(name, id));
            }
            Err(err) => {
                warn!("{}", err);
                self.reporter.report(Report::InvalidFormat);
            }
        }
    }

    /// Runs a single loop iteration.
    pub fn step(&mut self) -> Step {
        if let Some(line) = self.input.try_next_line() {
            self.handle_line(&line);
        }

        match self.state() {
            State::Idle => {
                self.cooldown_until = None;
                Step::Idle
            }
            State::Cooldown { .. } => Step::CoolingDown,
            State::Pending => {
                self.cooldown_until = None;
                match self.write_card() {
                    Some(outcome) => Step::Written(outcome),
                    None => Step::NoCard,
                }
            }
        }
    }

    fn write_card(&mut self) -> Option<CardOutcome> {
        let record = match self.record {
            Some(ref mut record) if record.ready => record,
            _ => return None,
        };
        let mut session = CardSession::open(&mut self.reader, &self.key)?;
        let uid = session.uid().clone();
        info!("Writing record for '{}' to PICC {}", record.name, uid);

        let name = session.write(self.settings.name_block, &record.name);
        report_block(&mut self.reporter, name, self.settings.name_block);
        let id = session.write(self.settings.id_block, &record.id);
        report_block(&mut self.reporter, id, self.settings.id_block);

        record.ready = false;
        session.close();

        let outcome = CardOutcome { uid, name, id };
        if outcome.is_complete() {
            info!("PICC {} written", outcome.uid);
        } else {
            warn!("PICC {} only partially written: {:?}", outcome.uid, outcome);
        }
        self.reporter.report(Report::CardFinished {
            complete: outcome.is_complete(),
        });
        self.reporter.report(Report::Prompt);

        let until = self.clock.now() + self.settings.debounce;
        debug!("Card detection paused for {:?}", self.settings.debounce);
        self.cooldown_until = Some(until);
        Some(outcome)
    }

    /// Prints the banner and polls forever.
    pub fn run(mut self) {
        info!("Running card writer loop");
        self.reporter.report(Report::Banner);
        loop {
            let step = self.step();
            trace!("step: {:?}", step);
            thread::sleep(self.settings.poll_interval);
        }
    }
}

fn report_block<P: Reporter>(reporter: &mut P, result: Result<(), WriteError>, block: u8) {
    match result {
        Ok(()) => reporter.report(Report::BlockWritten(block)),
        Err(err) => reporter.report(Report::BlockFailed(err)),
    }
}

pub mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Clock that only moves when advanced.
    #[derive(Clone)]
    pub struct ManualClock {
        now: Arc<Mutex<Instant>>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            ManualClock {
                now: Arc::new(Mutex::new(Instant::now())),
            }
        }

        pub fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }
}
