pub mod buffer;
pub mod clock;
pub mod config;
pub mod curve;
pub mod engine;
pub mod error;
pub mod modes;
pub mod result;
#[cfg(feature = "json")]
pub mod session;
pub mod store;
pub mod tare;
#[cfg(feature = "json")]
pub mod wire;

#[cfg(test)]
mod testing;

pub use buffer::{Sample, SampleRingBuffer};
pub use config::{EngineConfig, PlateConfig, Thresholds};
pub use curve::ForceCurvePoint;
pub use engine::PhysicsEngine;
pub use error::{ControlError, StoreError, UnknownMode, WireError};
pub use modes::{ModeKind, ModeOutput, PhysicsMode, PlateState};
pub use result::{JumpResult, PhaseTimes};
#[cfg(feature = "json")]
pub use session::{Session, SessionError};
pub use store::{JumpId, JumpStore, MemoryStore, SettingsStore, StoredJump};
#[cfg(feature = "json")]
pub use wire::{LineSplitter, Message};
