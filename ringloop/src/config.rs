//! Engine configuration.

use crate::error::ConfigError;

/// Configuration for an [`Engine`](crate::Engine).
///
/// ```
/// let config = ringloop::Config::default()
///   .with_block_size(4096)
///   .with_alignment(4096)
///   .with_queue_depth(32)
///   .with_max_in_flight(32);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  /// Number of submission queue entries requested from the kernel.
  pub queue_depth: u32,
  /// Capacity of every block in a [`BufferSet`](crate::BufferSet).
  pub block_size: usize,
  /// Alignment of every block. Must be a power of two.
  pub alignment: usize,
  /// Bytes requested per step by the sequential reader.
  pub chunk_size: usize,
  /// Requests handed to the kernel at once. Excess submissions wait in a
  /// backlog until a completion frees a slot. At most `queue_depth`, so every
  /// completion fits the completion queue.
  pub max_in_flight: usize,
  /// Requests accepted at once, in flight plus backlog.
  pub max_pending: usize,
  /// Stop the event loop once nothing is in flight or backlogged.
  pub stop_loop_when_idle: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      queue_depth: 8,
      block_size: 1024,
      alignment: 1024,
      chunk_size: 2048,
      max_in_flight: 8,
      max_pending: 1024,
      stop_loop_when_idle: true,
    }
  }
}

impl Config {
  pub fn with_queue_depth(mut self, queue_depth: u32) -> Self {
    self.queue_depth = queue_depth;
    self
  }

  pub fn with_block_size(mut self, block_size: usize) -> Self {
    self.block_size = block_size;
    self
  }

  pub fn with_alignment(mut self, alignment: usize) -> Self {
    self.alignment = alignment;
    self
  }

  pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
    self.max_in_flight = max_in_flight;
    self
  }

  pub fn with_max_pending(mut self, max_pending: usize) -> Self {
    self.max_pending = max_pending;
    self
  }

  pub fn with_stop_loop_when_idle(mut self, stop: bool) -> Self {
    self.stop_loop_when_idle = stop;
    self
  }

  /// Checks the invariants the engine relies on.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.queue_depth == 0 {
      return Err(ConfigError::Zero("queue_depth"));
    }
    if self.block_size == 0 {
      return Err(ConfigError::Zero("block_size"));
    }
    if self.chunk_size == 0 {
      return Err(ConfigError::Zero("chunk_size"));
    }
    if self.max_in_flight == 0 {
      return Err(ConfigError::Zero("max_in_flight"));
    }
    if !self.alignment.is_power_of_two() {
      return Err(ConfigError::Alignment(self.alignment));
    }
    if self.max_in_flight > self.queue_depth as usize {
      return Err(ConfigError::InFlightAboveDepth {
        max_in_flight: self.max_in_flight,
        queue_depth: self.queue_depth,
      });
    }
    if self.max_pending < self.max_in_flight {
      return Err(ConfigError::PendingBelowInFlight {
        max_pending: self.max_pending,
        max_in_flight: self.max_in_flight,
      });
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_is_valid() {
    assert_eq!(Config::default().validate(), Ok(()));
  }

  #[test]
  fn rejects_zero_sizes() {
    let err = Config::default().with_block_size(0).validate().unwrap_err();
    assert_eq!(err, ConfigError::Zero("block_size"));

    let err = Config::default().with_queue_depth(0).validate().unwrap_err();
    assert_eq!(err, ConfigError::Zero("queue_depth"));

    let err = Config::default().with_max_in_flight(0).validate().unwrap_err();
    assert_eq!(err, ConfigError::Zero("max_in_flight"));
  }

  #[test]
  fn rejects_bad_alignment() {
    for alignment in [0, 3, 1000, 4097] {
      let err =
        Config::default().with_alignment(alignment).validate().unwrap_err();
      assert_eq!(err, ConfigError::Alignment(alignment));
    }
    assert!(Config::default().with_alignment(1).validate().is_ok());
  }

  #[test]
  fn pending_must_cover_in_flight() {
    let config = Config::default().with_max_in_flight(8).with_max_pending(4);
    assert!(matches!(
      config.validate(),
      Err(ConfigError::PendingBelowInFlight { .. })
    ));
  }

  #[test]
  fn in_flight_bounded_by_queue_depth() {
    let config = Config::default().with_queue_depth(1);
    assert_eq!(
      config.validate(),
      Err(ConfigError::InFlightAboveDepth { max_in_flight: 8, queue_depth: 1 })
    );

    assert_eq!(config.with_max_in_flight(1).validate(), Ok(()));
    let deep = Config::default().with_queue_depth(64).with_max_in_flight(64);
    assert_eq!(deep.validate(), Ok(()));
  }
}
