//! EventBus - broadcast-based event system for diagnosis sessions.
//!
//! Publishes session lifecycle and step transitions so that CLIs, operator
//! consoles and internal subscribers can follow a diagnosis as it runs.

/// Core event bus implementation (broadcast channel).
pub mod bus;
/// Event type definitions for the diagnosis lifecycle.
pub mod types;

pub use bus::EventBus;
pub use types::DiagnosisEvent;
