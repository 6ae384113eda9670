#![warn(
    missing_docs,
    missing_debug_implementations,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications,
    clippy::uninlined_format_args
)]

//! A crate which implements the CAPI 2.0 message-processing engine for Eicon/Diva style
//! ISDN adapters.
//!
//! The engine sits between CAPI applications and an adapter reached through an opaque
//! asynchronous command/completion transport (XDI). It
//!
//! * parses and validates variable-length CAPI messages ([parse])
//! * maps CAPI requests onto adapter signaling and network-layer primitives ([xdi])
//! * runs the per-call (PLCI) and per-data-connection (NCCI) state machines ([capi])
//! * queues requests per PLCI while the adapter is busy, with explicit back-pressure
//! * layers DTMF, echo cancellation, line interconnect, advanced voice and T.30 fax
//!   on top of the same internal command sequencer
//!
//! ## Execution model
//!
//! Everything is single threaded and cooperative. [engine::CapiEngine::api_put] is the
//! entry for application messages, [engine::CapiEngine::callback] is the entry for
//! adapter completions and indications. Neither blocks; an operation waiting on the
//! adapter is represented by state recorded on the PLCI and resumed on the next
//! completion.
//!
//! ## Example
//!
//! ```no_run
//! use diva_capi::{
//!     config::{AdapterProfile, EngineConfig},
//!     engine::{CapiEngine, RecordingSink},
//!     xdi::simulation::SimulatedXdi,
//! };
//!
//! let xdi = SimulatedXdi::new();
//! let sink = RecordingSink::new();
//! let mut engine = CapiEngine::new(EngineConfig::default(), xdi.clone(), sink.clone());
//! let controller = engine.add_adapter(AdapterProfile::default());
//! engine.register_application(1, Default::default()).unwrap();
//! ```

use info::Info;
use parse::FormatError;

pub mod appl;
pub mod capi;
pub mod config;
pub mod engine;
pub mod ie;
pub mod info;
pub mod message;
pub mod parse;
pub mod queue;
pub mod xdi;

/// CAPI engine result
pub type CapiResult<T> = Result<T, CapiError>;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
/// Error returned to the caller of the engine entry points
pub enum CapiError {
    /// Message header is malformed, the command is unknown or its parameters
    /// could not be parsed
    #[error("Malformed CAPI message")]
    BadMessage,
    /// The PLCI queue cannot take the message right now. Retry later
    #[error("PLCI message queue is full")]
    QueueFull,
    /// The application ID is not registered
    #[error("Application {0} is not registered")]
    IllegalApplication(u16),
    /// The application ID is already registered
    #[error("Application {0} is already registered")]
    ApplicationAlreadyRegistered(u16),
    /// The controller number does not address an attached adapter
    #[error("Controller {0} does not exist")]
    IllegalController(u8),
    /// Parameter area could not be parsed against its format
    #[error("Parameter format error")]
    Format(
        #[from]
        #[source]
        FormatError,
    ),
}

impl CapiError {
    /// Returns the CAPI info value an application sees for this error
    pub fn info(&self) -> Info {
        match self {
            CapiError::BadMessage | CapiError::Format(_) => Info::BadMessage,
            CapiError::QueueFull => Info::QueueFull,
            CapiError::IllegalApplication(_) | CapiError::ApplicationAlreadyRegistered(_) => {
                Info::IllegalApplication
            }
            CapiError::IllegalController(_) => Info::WrongIdentifier,
        }
    }
}

/// Reads a little endian word from the start of a slice. Missing bytes read as 0
pub(crate) fn get_word(b: &[u8]) -> u16 {
    b.first().copied().unwrap_or(0) as u16 | (b.get(1).copied().unwrap_or(0) as u16) << 8
}

/// Reads a little endian dword from the start of a slice. Missing bytes read as 0
pub(crate) fn get_dword(b: &[u8]) -> u32 {
    get_word(b) as u32 | (get_word(b.get(2..).unwrap_or(&[])) as u32) << 16
}
