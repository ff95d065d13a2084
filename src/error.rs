//! Error module for the Rusty Sort library.
use std::error::Error;
use std::fmt;

/// Error types for the library.
#[derive(Debug, PartialEq)]
pub enum SortError {
    /// Error for invalid parameters, e.g., a non-positive spike window or more clusters than spikes.
    InvalidParameter(String),
    /// Error for out of bounds access, e.g., a capture window reaching past the end of the signal.
    OutOfBounds(String),
    /// Error for incompatible signals, e.g., a reference trace whose length differs from the filtered one.
    IncompatibleSignals(String),
    /// Error while decomposing the waveform covariance matrix.
    DecompositionError(String),
    /// Error while parsing a dataset.
    ParseError(String),
    /// Error for I/O operations.
    IOError(String),
}

impl fmt::Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SortError::InvalidParameter(e) => write!(f, "Invalid parameters: {}", e),
            SortError::OutOfBounds(e) => write!(f, "Index out of bounds: {}", e),
            SortError::IncompatibleSignals(e) => write!(f, "Incompatible signals: {}", e),
            SortError::DecompositionError(e) => write!(f, "Eigen-decomposition error: {}", e),
            SortError::ParseError(e) => write!(f, "Parse error: {}", e),
            SortError::IOError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for SortError {}

impl From<std::io::Error> for SortError {
    fn from(e: std::io::Error) -> Self {
        SortError::IOError(e.to_string())
    }
}

impl From<serde_json::Error> for SortError {
    fn from(e: serde_json::Error) -> Self {
        SortError::IOError(e.to_string())
    }
}
