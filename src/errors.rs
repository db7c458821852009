// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! The first four variants form the lifecycle taxonomy every controller and
//! record store reports in:
//! - `ObjectExists`: the operation needs the absence of a live entity.
//! - `ObjectDoesNotExist`: the operation needs a live entity.
//! - `StrategyError`: an OS / runtime resource operation failed.
//! - `ParameterError`: malformed caller-supplied data.

use std::fmt;

use thiserror::Error;

use crate::types::WorkerState;

#[derive(Error, Debug)]
pub enum ProcworkerError {
    #[error("Object exists: {0}")]
    ObjectExists(String),

    #[error("Object does not exist: {0}")]
    ObjectDoesNotExist(String),

    #[error("Strategy error: {0}")]
    StrategyError(String),

    #[error("Parameter error: {0}")]
    ParameterError(String),

    #[error("Channel closed: peer endpoint has terminated")]
    ChannelClosed,

    #[error("Cannot {operation} while worker is {state}")]
    WrongState {
        operation: &'static str,
        state: WorkerState,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification of a [`ProcworkerError`].
///
/// `StrategyError` is fatal to the controller that reported it; the other
/// lifecycle kinds are usage errors fixed by correcting call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ObjectExists,
    ObjectDoesNotExist,
    StrategyError,
    ParameterError,
    ChannelClosed,
    Usage,
    Config,
}

impl ProcworkerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcworkerError::ObjectExists(_) => ErrorKind::ObjectExists,
            ProcworkerError::ObjectDoesNotExist(_) => ErrorKind::ObjectDoesNotExist,
            ProcworkerError::StrategyError(_)
            | ProcworkerError::IoError(_)
            | ProcworkerError::Other(_) => ErrorKind::StrategyError,
            ProcworkerError::ParameterError(_) => ErrorKind::ParameterError,
            ProcworkerError::ChannelClosed => ErrorKind::ChannelClosed,
            ProcworkerError::WrongState { .. } => ErrorKind::Usage,
            ProcworkerError::ConfigError(_) | ProcworkerError::TomlError(_) => ErrorKind::Config,
        }
    }

    /// Build a `StrategyError` from anything displayable, keeping the chain
    /// of an `anyhow::Error` readable via `{:#}`.
    pub(crate) fn strategy(err: impl fmt::Display) -> Self {
        ProcworkerError::StrategyError(format!("{err:#}"))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ProcworkerError>;
