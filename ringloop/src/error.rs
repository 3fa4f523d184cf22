use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A [`Config`](crate::Config) that the engine cannot run with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("{0} must be greater than zero")]
  Zero(&'static str),
  #[error("alignment {0} is not a power of two")]
  Alignment(usize),
  #[error(
    "max_in_flight ({max_in_flight}) exceeds queue_depth ({queue_depth})"
  )]
  InFlightAboveDepth { max_in_flight: usize, queue_depth: u32 },
  #[error(
    "max_pending ({max_pending}) is below max_in_flight ({max_in_flight})"
  )]
  PendingBelowInFlight { max_pending: usize, max_in_flight: usize },
}

/// Errors creating an [`Engine`](crate::Engine).
#[derive(Debug, Error)]
pub enum SetupError {
  #[error("invalid configuration: {0}")]
  Config(#[from] ConfigError),
  /// Ring creation or watch registration failed.
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),
}

/// Errors returned synchronously by [`Engine::submit`](crate::Engine::submit).
///
/// None of these are fatal to the engine; the rejected request is dropped
/// and its buffers released.
#[derive(Debug, Error)]
pub enum SubmitError {
  #[error("block size must be greater than zero")]
  ZeroBlockSize,
  #[error("failed to allocate a {size}-byte block aligned to {align}")]
  AllocationFailure { size: usize, align: usize },
  /// The range needs more iovecs than a single vectored read accepts.
  #[error("range needs {blocks} blocks, a vectored read takes at most {max}")]
  RangeTooLarge { blocks: usize, max: usize },
  /// No submission slot and nothing in flight to free one, or too many
  /// pending requests.
  #[error("submission queue full")]
  QueueFull,
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),
}

/// Errors starting a file read with one of the readers in [`crate::read`].
#[derive(Debug, Error)]
pub enum ReadError {
  #[error("failed to open {}: {source}", path.display())]
  Open { path: PathBuf, source: io::Error },
  #[error("failed to determine size of {}: {source}", path.display())]
  SizeLookup { path: PathBuf, source: io::Error },
  #[error("failed to submit read of {}: {source}", path.display())]
  Submit { path: PathBuf, source: SubmitError },
}

impl From<SubmitError> for io::Error {
  fn from(err: SubmitError) -> Self {
    match err {
      SubmitError::Io(err) => err,
      SubmitError::QueueFull => {
        io::Error::new(io::ErrorKind::WouldBlock, SubmitError::QueueFull)
      }
      other => io::Error::other(other),
    }
  }
}
