//! # Etcher Core
//!
//! Core types and error handling for the laser etcher.
//! Provides the session states, result shapes and error enums shared by the
//! communication, settings and session crates.

pub mod data;
pub mod error;

pub use data::{
    reasons, EtchAttemptResult, LaserCommand, LaserOutcome, PrepareOutcome, SessionState,
};

pub use error::{ConnectionError, Error, ProgramError, ProtocolError, Result};
