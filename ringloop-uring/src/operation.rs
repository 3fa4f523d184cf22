//! io_uring operations
//!
//! Only what a read-oriented engine needs is exposed: vectored reads and a
//! no-op for probing the ring.
//!
//! # Safety
//!
//! Operations carry raw pointers and file descriptors. Once pushed, the
//! caller must keep every pointer valid and the descriptor open until the
//! matching completion has been consumed.

use std::os::fd::RawFd;

use io_uring::{opcode, types};

use crate::submission::Entry;

/// Do not perform any I/O.
#[derive(Debug, Default)]
pub struct Nop;

impl Nop {
  pub fn new() -> Self {
    Self
  }

  pub fn build(self) -> Entry {
    Entry::from_sqe(opcode::Nop::new().build())
  }
}

/// Vectored read, equivalent to `preadv2(2)`.
#[derive(Debug)]
pub struct Readv {
  fd: RawFd,
  iovec: *const libc::iovec,
  len: u32,
  offset: u64,
}

impl Readv {
  /// `iovec` points at `len` entries describing the destination buffers.
  pub fn new(fd: RawFd, iovec: *const libc::iovec, len: u32) -> Self {
    Self { fd, iovec, len, offset: 0 }
  }

  /// File offset to read from.
  pub const fn offset(mut self, offset: u64) -> Self {
    self.offset = offset;
    self
  }

  pub fn build(self) -> Entry {
    let Readv { fd, iovec, len, offset } = self;
    Entry::from_sqe(
      opcode::Readv::new(types::Fd(fd), iovec, len).offset(offset).build(),
    )
  }
}
