//! Ingestion glue: decoded messages in, stored jumps out.
//!
//! A [`Session`] owns the engine and the store. Transport runs elsewhere,
//! typically on a reader thread started by [`spawn_reader`], and hands
//! [`Inbound`] messages over an `mpsc` channel.

use std::io::{self, Read};
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::PhysicsEngine;
use crate::error::{ControlError, StoreError};
use crate::modes::{ModeKind, ModeOutput};
use crate::result::JumpResult;
use crate::store::{JumpId, JumpStore, SettingsStore};
use crate::wire::{LineSplitter, Message};

/// Settings key of the persisted scale factor.
pub const RAW_PER_KG_KEY: &str = "raw_per_kg";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Control(#[from] ControlError),
}

/// A decoded message stamped with its host receive time (ms).
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub message: Message,
    pub received_ms: f64,
}

type ResultHook = Box<dyn FnMut(JumpId, &JumpResult)>;

pub struct Session<S> {
    engine: PhysicsEngine,
    store: S,
    /// Called after each result is stored.
    on_result: Option<ResultHook>,
}

impl<S> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("engine", &self.engine)
            .field("on_result", &self.on_result.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: JumpStore + SettingsStore> Session<S> {
    /// Build the engine, restoring a persisted `raw_per_kg` over the configured one.
    pub fn open(config: EngineConfig, store: S) -> Result<Self, SessionError> {
        let mut engine = PhysicsEngine::new(config);
        if let Some(text) = store.load_setting(RAW_PER_KG_KEY)? {
            match text.trim().parse::<f64>() {
                Ok(value) => match engine.set_raw_per_kg(value) {
                    Ok(()) => info!(raw_per_kg = value, "restored scale"),
                    Err(e) => warn!(error = %e, "ignoring stored scale"),
                },
                Err(_) => warn!(value = %text, "stored scale is not a number"),
            }
        }
        Ok(Self {
            engine,
            store,
            on_result: None,
        })
    }

    /// Register a callback invoked with every stored result and its id.
    pub fn set_on_result(&mut self, f: impl FnMut(JumpId, &JumpResult) + 'static) {
        self.on_result = Some(Box::new(f));
    }

    /// Handle one decoded message. Samples return the engine's output.
    pub fn handle(&mut self, message: Message, received_ms: f64) -> Result<Option<ModeOutput>, SessionError> {
        match message {
            Message::Sample { raw, device_clock } => {
                let out = self.engine.process_sample(raw, received_ms, device_clock);
                if let Some(result) = &out.result {
                    let id = self.store.save_jump(result)?;
                    info!(id, mode = %result.mode, "jump stored");
                    if let Some(cb) = self.on_result.as_mut() {
                        cb(id, result);
                    }
                }
                if let Some(raw_per_kg) = self.engine.take_calibration() {
                    self.store
                        .save_setting(RAW_PER_KG_KEY, &raw_per_kg.to_string())?;
                    info!(raw_per_kg, "scale saved");
                }
                Ok(Some(out))
            }
            Message::Rate { hz } => {
                if let Err(e) = self.engine.set_frequency(hz) {
                    warn!(error = %e, "ignoring reported rate");
                }
                Ok(None)
            }
            Message::Zero => {
                info!("device reported zero");
                Ok(None)
            }
            Message::Unknown { event } => {
                debug!(event = %event, "ignoring event");
                Ok(None)
            }
        }
    }

    /// Decode and handle one line; malformed lines are dropped.
    pub fn handle_line(&mut self, line: &str, received_ms: f64) -> Result<Option<ModeOutput>, SessionError> {
        match Message::decode_line(line) {
            Ok(message) => self.handle(message, received_ms),
            Err(e) => {
                debug!(error = %e, "dropped line");
                Ok(None)
            }
        }
    }

    /// Handle everything already queued without blocking. Returns the count.
    pub fn drain(&mut self, rx: &Receiver<Inbound>) -> Result<usize, SessionError> {
        let mut n = 0;
        for inbound in rx.try_iter() {
            self.handle(inbound.message, inbound.received_ms)?;
            n += 1;
        }
        Ok(n)
    }

    /// Handle messages until every sender is gone.
    pub fn run(&mut self, rx: &Receiver<Inbound>) -> Result<(), SessionError> {
        for inbound in rx.iter() {
            self.handle(inbound.message, inbound.received_ms)?;
        }
        Ok(())
    }

    // -- Control ------------------------------------------------------------

    pub fn set_mode(&mut self, kind: ModeKind) {
        self.engine.set_mode(kind);
    }

    pub fn set_mass(&mut self, kg: f64) -> Result<(), SessionError> {
        Ok(self.engine.set_mass(kg)?)
    }

    pub fn set_start_velocity(&mut self, mps: f64) -> Result<(), SessionError> {
        Ok(self.engine.set_start_velocity(mps)?)
    }

    pub fn start_tare(&mut self) {
        self.engine.start_tare();
    }

    pub fn start_calibration(&mut self, known_kg: f64) -> Result<(), SessionError> {
        Ok(self.engine.start_calibration(known_kg)?)
    }

    // -- Accessors ----------------------------------------------------------

    pub fn engine(&self) -> &PhysicsEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut PhysicsEngine {
        &mut self.engine
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

/// Read newline-delimited messages from `reader` on a new thread.
///
/// Lines are stamped with milliseconds since the thread started. The thread
/// ends at EOF, on a read error, or when the receiver hangs up.
pub fn spawn_reader<R>(mut reader: R, tx: Sender<Inbound>) -> JoinHandle<io::Result<()>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let start = Instant::now();
        let mut splitter = LineSplitter::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            let received_ms = start.elapsed().as_secs_f64() * 1000.0;
            for line in splitter.feed(&buf[..n]) {
                let message = match Message::decode_line(&line) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(error = %e, "dropped line");
                        continue;
                    }
                };
                if tx.send(Inbound { message, received_ms }).is_err() {
                    return Ok(());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlateConfig;
    use crate::modes::PlateState;
    use crate::store::MemoryStore;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::mpsc;

    fn config() -> EngineConfig {
        EngineConfig {
            plate: PlateConfig {
                frequency_hz: 1000.0,
                ..PlateConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    /// Feeds 1 kHz sample lines with a running device clock.
    struct Feed {
        i: u32,
    }

    impl Feed {
        fn hold<S: JumpStore + SettingsStore>(&mut self, session: &mut Session<S>, raw: i32, count: u32) {
            for _ in 0..count {
                let line = format!(r#"{{"w": {raw}, "t": {}}}"#, (self.i + 1) * 1_000);
                session.handle_line(&line, f64::from(self.i)).unwrap();
                self.i += 1;
            }
        }
    }

    #[test]
    fn calibration_is_persisted_and_restored() {
        let mut session = Session::open(config(), MemoryStore::new()).unwrap();
        session.start_calibration(20.0).unwrap();
        let mut feed = Feed { i: 0 };
        feed.hold(&mut session, 20 * 9_000, 700);

        assert_eq!(session.engine().config().plate.raw_per_kg, 9_000.0);
        let store = session.into_store();
        assert_eq!(store.load_setting(RAW_PER_KG_KEY).unwrap().as_deref(), Some("9000"));

        let reopened = Session::open(config(), store).unwrap();
        assert_eq!(reopened.engine().config().plate.raw_per_kg, 9_000.0);
    }

    #[test]
    fn bad_stored_scale_is_ignored() {
        let mut store = MemoryStore::new();
        store.save_setting(RAW_PER_KG_KEY, "heavy").unwrap();
        let session = Session::open(config(), store).unwrap();
        assert_eq!(session.engine().config().plate.raw_per_kg, 12_560.0);
    }

    #[test]
    fn results_are_stored_and_reported() {
        let mut session = Session::open(config(), MemoryStore::new()).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        session.set_on_result(move |id, r| sink.borrow_mut().push((id, r.mode)));

        let kg = |kg: f64| (kg * 12_560.0).round() as i32;
        let mut feed = Feed { i: 0 };
        feed.hold(&mut session, kg(75.0), 400);
        feed.hold(&mut session, kg(150.0), 200);
        feed.hold(&mut session, 0, 300);
        feed.hold(&mut session, kg(75.0), 1_000);

        assert_eq!(*seen.borrow(), vec![(1, ModeKind::SingleJump)]);
        let history = session.store().load_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert!((history[0].result.flight_time_ms - 300.0).abs() < 1e-6);
    }

    #[test]
    fn events_and_noise_produce_no_output() {
        let mut session = Session::open(config(), MemoryStore::new()).unwrap();
        assert!(session.handle_line("booting...", 0.0).unwrap().is_none());
        assert!(session.handle_line(r#"{"event":"zero"}"#, 0.0).unwrap().is_none());
        assert!(session.handle_line(r#"{"event":"rate","hz":1280}"#, 0.0).unwrap().is_none());
        assert_eq!(session.engine().config().plate.frequency_hz, 1280.0);

        // Non-positive rates are ignored.
        session.handle(Message::Rate { hz: 0.0 }, 0.0).unwrap();
        assert_eq!(session.engine().config().plate.frequency_hz, 1280.0);
    }

    #[test]
    fn control_errors_surface() {
        let mut session = Session::open(config(), MemoryStore::new()).unwrap();
        assert!(matches!(
            session.set_mass(80.0),
            Err(SessionError::Control(ControlError::Unsupported { .. }))
        ));
        session.set_mode(ModeKind::JumpEstimation);
        session.set_mass(80.0).unwrap();
        assert_eq!(session.engine().jumper_mass_kg(), 80.0);
    }

    #[test]
    fn reader_thread_feeds_session() {
        let capture = b"HX711 ready\n{\"event\":\"rate\",\"hz\":1000}\n{\"w\": 0, \"t\": 1000}\n{\"w\": 0, \"t\": 2000}\n".to_vec();
        let (tx, rx) = mpsc::channel();
        let handle = spawn_reader(io::Cursor::new(capture), tx);
        handle.join().unwrap().unwrap();

        let mut session = Session::open(config(), MemoryStore::new()).unwrap();
        assert_eq!(session.drain(&rx).unwrap(), 3);
        assert_eq!(session.engine().buffer().len(), 2);
        assert!(matches!(session.engine().state(), PlateState::Idle | PlateState::Ready));
    }
}
