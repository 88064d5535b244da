use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// EmberDB errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// An IO error.
    IO(String),
    /// Invalid data, typically decoding errors, corruption, or unexpected internal values.
    InvalidData(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
        }
    }
}

impl Error {
    /// Prefixes the error message with the name of the failing subsystem.
    /// Used on close paths where several resources are released and the
    /// first failure is reported.
    pub fn wrap(self, context: &str) -> Error {
        match self {
            Error::IO(msg) => Error::IO(format!("{context}: {msg}")),
            Error::InvalidData(msg) => Error::InvalidData(format!("{context}: {msg}")),
        }
    }
}

/// An EmberDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}
