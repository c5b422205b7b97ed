//! Shared utilities: the error taxonomy and the logging bootstrap.

pub mod error;
pub mod logging;

pub use error::{IngestError, LinkError, SinkError};
