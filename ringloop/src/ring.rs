//! The kernel queue seam.
//!
//! [`Engine`](crate::Engine) talks to the kernel only through [`IoRing`]. On
//! Linux [`UringRing`] drives io_uring; tests plug in scripted rings that
//! decide when and in which order completions appear.

use std::fmt;
use std::io;
use std::os::fd::RawFd;

use crate::buffer::BufferSet;

/// A vectored read as handed to the ring.
pub struct Readv<'a> {
  fd: RawFd,
  buffers: &'a BufferSet,
  offset: u64,
}

impl<'a> Readv<'a> {
  pub fn new(fd: RawFd, buffers: &'a BufferSet, offset: u64) -> Self {
    Self { fd, buffers, offset }
  }

  pub fn fd(&self) -> RawFd {
    self.fd
  }

  pub fn buffers(&self) -> &'a BufferSet {
    self.buffers
  }

  pub fn offset(&self) -> u64 {
    self.offset
  }

  pub fn iovecs(&self) -> &'a [libc::iovec] {
    self.buffers.as_iovecs()
  }
}

impl fmt::Debug for Readv<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Readv")
      .field("fd", &self.fd)
      .field("offset", &self.offset)
      .field("iovecs", &self.buffers.block_count())
      .finish()
  }
}

/// A finished operation: the token it was pushed with and its result.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Completion {
  pub token: u64,
  /// Bytes transferred, or a negated errno.
  pub res: i32,
}

impl Completion {
  pub fn new(token: u64, res: i32) -> Self {
    Self { token, res }
  }
}

/// A completion-based kernel queue with a pollable readiness descriptor.
pub trait IoRing {
  /// Queues `op` under `token` without entering the kernel.
  ///
  /// Fails with [`io::ErrorKind::WouldBlock`] when the submission queue has
  /// no free slot.
  ///
  /// # Safety
  /// The iovecs and the memory they describe must stay valid and unmoved
  /// until the completion carrying `token` has been consumed.
  unsafe fn push(&mut self, token: u64, op: &Readv<'_>) -> io::Result<()>;

  /// Hands every queued entry to the kernel, returning how many it took.
  fn flush(&mut self) -> io::Result<usize>;

  /// The oldest unconsumed completion, left in place.
  fn peek(&mut self) -> Option<Completion>;

  /// Consumes `count` completions.
  fn advance(&mut self, count: usize);

  /// Blocks until at least `want` completions are available.
  fn wait(&mut self, want: usize) -> io::Result<()>;

  /// Descriptor that polls readable while completions are pending.
  fn readiness_fd(&self) -> RawFd;
}

impl<R: IoRing + ?Sized> IoRing for Box<R> {
  unsafe fn push(&mut self, token: u64, op: &Readv<'_>) -> io::Result<()> {
    // SAFETY: forwarded contract.
    unsafe { (**self).push(token, op) }
  }

  fn flush(&mut self) -> io::Result<usize> {
    (**self).flush()
  }

  fn peek(&mut self) -> Option<Completion> {
    (**self).peek()
  }

  fn advance(&mut self, count: usize) {
    (**self).advance(count)
  }

  fn wait(&mut self, want: usize) -> io::Result<()> {
    (**self).wait(want)
  }

  fn readiness_fd(&self) -> RawFd {
    (**self).readiness_fd()
  }
}

#[cfg(linux)]
pub use uring::UringRing;

#[cfg(linux)]
mod uring {
  use std::io;
  use std::os::fd::{AsRawFd, RawFd};

  use ringloop_uring::completion::CompletionQueue;
  use ringloop_uring::operation;
  use ringloop_uring::submission::SubmissionQueue;

  use super::{Completion, IoRing, Readv};

  /// [`IoRing`] backed by io_uring.
  ///
  /// The ring descriptor itself is the readiness descriptor: it polls
  /// readable while the completion queue is non-empty.
  pub struct UringRing {
    sq: SubmissionQueue,
    cq: CompletionQueue,
  }

  impl UringRing {
    /// Sets up a ring with `depth` submission entries.
    pub fn new(depth: u32) -> io::Result<Self> {
      let (sq, cq) = ringloop_uring::with_capacity(depth)?;
      Ok(Self { sq, cq })
    }
  }

  impl IoRing for UringRing {
    unsafe fn push(&mut self, token: u64, op: &Readv<'_>) -> io::Result<()> {
      let iovecs = op.iovecs();
      let entry = operation::Readv::new(
        op.fd(),
        iovecs.as_ptr(),
        iovecs.len() as u32,
      )
      .offset(op.offset())
      .build();

      // SAFETY: the caller keeps the iovecs alive until completion.
      unsafe { self.sq.push(entry, token) }
    }

    fn flush(&mut self) -> io::Result<usize> {
      self.sq.submit()
    }

    fn peek(&mut self) -> Option<Completion> {
      let convert = |c: ringloop_uring::completion::Completion| {
        Completion::new(c.user_data(), c.result())
      };

      if let Some(completion) = self.cq.peek() {
        return Some(convert(completion));
      }
      // Overflowed entries keep the ring fd readable but stay invisible
      // until the kernel is entered.
      if !self.cq.overflowed() {
        return None;
      }
      if let Err(err) = self.cq.flush_overflow() {
        tracing::warn!(%err, "failed to flush overflowed completions");
        return None;
      }
      self.cq.peek().map(convert)
    }

    fn advance(&mut self, count: usize) {
      self.cq.advance(count)
    }

    fn wait(&mut self, want: usize) -> io::Result<()> {
      self.cq.wait(want)
    }

    fn readiness_fd(&self) -> RawFd {
      self.cq.as_raw_fd()
    }
  }

}
