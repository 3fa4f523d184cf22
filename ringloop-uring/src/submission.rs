use std::cell::Cell;
use std::io;
use std::marker::PhantomData;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;

use crate::IoUring;

/// A prepared submission queue entry, see [`crate::operation`].
pub struct Entry(pub(crate) io_uring::squeue::Entry);

impl Entry {
  pub(crate) fn from_sqe(sqe: io_uring::squeue::Entry) -> Self {
    Self(sqe)
  }

  pub(crate) fn into_sqe(self) -> io_uring::squeue::Entry {
    self.0
  }
}

/// Submission queue handle - used to submit new operations
///
/// # Safety
/// This struct only touches the submission side of the queue.
/// It must not be used concurrently with other SubmissionQueue instances.
pub struct SubmissionQueue {
  uring: Rc<IoUring>,

  _non_sync: PhantomData<Cell<()>>,
}

impl SubmissionQueue {
  pub(crate) fn new(uring: Rc<IoUring>) -> Self {
    Self { uring, _non_sync: PhantomData }
  }

  /// Push an operation to the submission queue
  ///
  /// Nothing reaches the kernel until [`submit`](Self::submit) is called.
  ///
  /// # Safety
  /// Caller guarantees that any pointers within the operation point to
  /// valid data that will remain valid until the operation completes.
  ///
  /// # Errors
  /// Returns [`io::ErrorKind::WouldBlock`] if the submission queue is full.
  /// Call `submit()` to drain the queue and try again.
  pub unsafe fn push(
    &mut self,
    operation: Entry,
    user_data: u64,
  ) -> io::Result<()> {
    let sqe = operation.into_sqe().user_data(user_data);

    // SAFETY: the Rc is never shared across threads and no other submission
    // queue view is alive while this one is.
    let mut sq = unsafe { self.uring.ring.submission_shared() };
    // SAFETY: forwarded to the caller.
    let pushed = unsafe { sq.push(&sqe) };
    sq.sync();

    pushed.map_err(|_| {
      io::Error::new(io::ErrorKind::WouldBlock, "submission queue is full")
    })
  }

  /// Hands every queued entry to the kernel.
  ///
  /// Returns the number of entries consumed by the kernel.
  ///
  /// # Errors
  /// Returns the error from `io_uring_enter(2)`.
  pub fn submit(&mut self) -> io::Result<usize> {
    self.uring.ring.submit()
  }

  /// Get the number of free slots in the submission queue
  pub fn capacity(&self) -> usize {
    // SAFETY: read-only view, dropped before returning.
    let sq = unsafe { self.uring.ring.submission_shared() };
    sq.capacity() - sq.len()
  }
}

impl AsRawFd for SubmissionQueue {
  fn as_raw_fd(&self) -> RawFd {
    self.uring.as_raw_fd()
  }
}
