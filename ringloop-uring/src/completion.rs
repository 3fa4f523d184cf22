use std::cell::Cell;
use std::io;
use std::marker::PhantomData;
use std::mem;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;

use crate::IoUring;

/// A completed operation with result and metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
  /// User data that was associated with the submission
  user_data: u64,
  /// Operation result (number of bytes transferred, or negative errno)
  res: i32,
  /// Completion flags providing additional context
  flags: u32,
}

impl Completion {
  /// Check if the operation succeeded
  pub fn is_ok(&self) -> bool {
    self.res >= 0
  }

  /// Raw result: bytes transferred, or a negated errno.
  pub fn result(&self) -> i32 {
    self.res
  }

  pub fn user_data(&self) -> u64 {
    self.user_data
  }

  /// `IORING_CQE_F_*` flags.
  pub fn flags(&self) -> u32 {
    self.flags
  }
}

impl From<io_uring::cqueue::Entry> for Completion {
  fn from(cqe: io_uring::cqueue::Entry) -> Self {
    Self { user_data: cqe.user_data(), res: cqe.result(), flags: cqe.flags() }
  }
}

/// Completion queue handle - used to retrieve completed operations
///
/// The ring fd returned by [`AsRawFd`] polls readable while this queue holds
/// unconsumed entries, which is what lets an event loop watch it.
///
/// # Safety
/// This struct only touches the completion side of the queue.
/// It must not be used concurrently with other CompletionQueue instances.
pub struct CompletionQueue {
  uring: Rc<IoUring>,

  _non_sync: PhantomData<Cell<()>>,
}

impl CompletionQueue {
  pub(crate) fn new(uring: Rc<IoUring>) -> Self {
    Self { uring, _non_sync: PhantomData }
  }

  /// Look at the next completion without consuming it.
  ///
  /// Repeated calls return the same entry until [`advance`](Self::advance)
  /// is called.
  pub fn peek(&self) -> Option<Completion> {
    // SAFETY: single-threaded access, no other completion view is alive.
    let mut cq = unsafe { self.uring.ring.completion_shared() };
    let next = cq.next().map(Completion::from);
    // Dropping the view would publish the moved head to the kernel.
    mem::forget(cq);
    next
  }

  /// Mark up to `count` completions as consumed.
  pub fn advance(&mut self, count: usize) {
    // SAFETY: single-threaded access, no other completion view is alive.
    let mut cq = unsafe { self.uring.ring.completion_shared() };
    for _ in 0..count {
      if cq.next().is_none() {
        break;
      }
    }
    cq.sync();
  }

  /// Whether completions spilled into the kernel's overflow list because
  /// this queue was full when they were posted.
  ///
  /// Overflowed entries are not visible to [`peek`](Self::peek) until
  /// [`flush_overflow`](Self::flush_overflow) moves them back, yet the ring
  /// fd keeps polling readable while they exist.
  pub fn overflowed(&self) -> bool {
    // SAFETY: read-only view of the SQ flags, dropped before returning.
    let sq = unsafe { self.uring.ring.submission_shared() };
    sq.cq_overflow()
  }

  /// Enters the kernel to move overflowed completions back into the queue,
  /// as far as there is room.
  ///
  /// Also flushes anything left in the submission queue.
  ///
  /// # Errors
  /// Returns the error from `io_uring_enter(2)`.
  pub fn flush_overflow(&mut self) -> io::Result<()> {
    loop {
      // With the overflow flag set this enters with GETEVENTS, which is what
      // makes the kernel flush its overflow list.
      match self.uring.ring.submit() {
        Ok(_) => return Ok(()),
        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
        Err(err) => return Err(err),
      }
    }
  }

  /// Block until at least `want` completions are available.
  ///
  /// Also flushes anything left in the submission queue.
  ///
  /// # Errors
  /// Returns the error from `io_uring_enter(2)`.
  pub fn wait(&mut self, want: usize) -> io::Result<()> {
    loop {
      match self.uring.ring.submit_and_wait(want) {
        Ok(_) => return Ok(()),
        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
        Err(err) => return Err(err),
      }
    }
  }

  /// Get the number of available completions ready to be consumed
  pub fn available(&self) -> usize {
    // SAFETY: read-only view, dropped before returning.
    let cq = unsafe { self.uring.ring.completion_shared() };
    cq.len()
  }
}

impl AsRawFd for CompletionQueue {
  fn as_raw_fd(&self) -> RawFd {
    self.uring.as_raw_fd()
  }
}
