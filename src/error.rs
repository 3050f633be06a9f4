//! Core error type shared by every component.
//!
//! The CLI and orchestrator wrap these in `anyhow` for top-level reporting;
//! internal callers match on `Error` directly when the error kind changes
//! control flow (fatal-at-startup vs. fatal-for-batch vs. recoverable).

use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("environment error: {0}")]
    Environment(String),

    #[error("parse error on {table}: {reason}")]
    Parse { table: String, reason: String },

    #[error("operational error: {0}")]
    Operational(#[from] sqlx::Error),

    #[error("foreign key lookup failed for {parent}.{child}")]
    ForeignKey { parent: String, child: String },

    #[error("bulk write error: {0}")]
    BulkWrite(String),

    #[error("queue error: {0}")]
    Queue(#[from] redis::RedisError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn configuration(msg: impl fmt::Display) -> Self {
        Error::Configuration(msg.to_string())
    }

    pub fn environment(msg: impl fmt::Display) -> Self {
        Error::Environment(msg.to_string())
    }

    pub fn parse(table: impl Into<String>, reason: impl fmt::Display) -> Self {
        Error::Parse {
            table: table.into(),
            reason: reason.to_string(),
        }
    }

    pub fn foreign_key(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Error::ForeignKey {
            parent: parent.into(),
            child: child.into(),
        }
    }

    /// Whether this error kind is fatal at process startup (`spec.md` §7).
    pub fn is_startup_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::Environment(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
