//! Thin, single-threaded split of an io_uring instance into its submission
//! and completion halves.
//!
//! Both halves share one ring through an [`Rc`], so neither is `Send` nor
//! `Sync`. The ring is torn down (`io_uring_queue_exit`) when the last half is
//! dropped.
//!
//! ```rust,no_run
//! use ringloop_uring::operation::Nop;
//!
//! # fn main() -> std::io::Result<()> {
//! let (mut sq, mut cq) = ringloop_uring::with_capacity(4)?;
//!
//! unsafe { sq.push(Nop::new().build(), 7) }?;
//! sq.submit()?;
//!
//! cq.wait(1)?;
//! let completion = cq.peek().expect("nop completed");
//! assert_eq!(completion.user_data(), 7);
//! cq.advance(1);
//! # Ok(())
//! # }
//! ```

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;

pub mod completion;
pub mod operation;
pub mod submission;

use completion::CompletionQueue;
use submission::SubmissionQueue;

pub(crate) struct IoUring {
  ring: io_uring::IoUring,
}

impl IoUring {
  fn new(entries: u32) -> io::Result<Self> {
    Ok(Self { ring: io_uring::IoUring::new(entries)? })
  }
}

impl AsRawFd for IoUring {
  fn as_raw_fd(&self) -> RawFd {
    self.ring.as_raw_fd()
  }
}

/// Sets up a ring with `entries` submission slots and splits it.
///
/// # Errors
/// Returns the error from `io_uring_setup(2)`, e.g. `EPERM`/`ENOSYS` when the
/// kernel or a seccomp policy refuses io_uring.
pub fn with_capacity(
  entries: u32,
) -> io::Result<(SubmissionQueue, CompletionQueue)> {
  let uring = Rc::new(IoUring::new(entries)?);
  Ok((SubmissionQueue::new(uring.clone()), CompletionQueue::new(uring)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::operation::{Nop, Readv};
  use std::io::Write;

  fn ring_or_skip(
    entries: u32,
  ) -> Option<(SubmissionQueue, CompletionQueue)> {
    match with_capacity(entries) {
      Ok(halves) => Some(halves),
      Err(err) => {
        eprintln!("io_uring unavailable ({err}), skipping");
        None
      }
    }
  }

  #[test]
  fn nop_round_trip() {
    let Some((mut sq, mut cq)) = ring_or_skip(4) else { return };

    unsafe { sq.push(Nop::new().build(), 5) }.unwrap();
    unsafe { sq.push(Nop::new().build(), 6) }.unwrap();
    assert_eq!(sq.submit().unwrap(), 2);

    cq.wait(2).unwrap();
    assert_eq!(cq.available(), 2);

    let first = cq.peek().unwrap();
    // Peeking twice must not consume.
    assert_eq!(cq.peek().unwrap().user_data(), first.user_data());
    cq.advance(1);

    let second = cq.peek().unwrap();
    assert_ne!(first.user_data(), second.user_data());
    cq.advance(1);

    assert!(cq.peek().is_none());
    assert_eq!(cq.available(), 0);
  }

  #[test]
  fn overflowed_completions_are_flushed_back() {
    let Some((mut sq, mut cq)) = ring_or_skip(1) else { return };

    // One SQ slot and two CQ slots, so the third nop overflows.
    for user_data in 1..=3 {
      unsafe { sq.push(Nop::new().build(), user_data) }.unwrap();
      sq.submit().unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..10 {
      match cq.peek() {
        Some(completion) => {
          seen.push(completion.user_data());
          cq.advance(1);
        }
        None if cq.overflowed() => cq.flush_overflow().unwrap(),
        None => break,
      }
    }

    assert_eq!(seen, vec![1, 2, 3]);
    assert!(!cq.overflowed());
    assert_eq!(cq.available(), 0);
  }

  #[test]
  fn push_reports_full_queue() {
    let Some((mut sq, _cq)) = ring_or_skip(1) else { return };

    unsafe { sq.push(Nop::new().build(), 1) }.unwrap();
    let err = unsafe { sq.push(Nop::new().build(), 2) }.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

    sq.submit().unwrap();
    assert_eq!(sq.capacity(), 1);
  }

  #[test]
  fn readv_scatters_into_iovecs() {
    let Some((mut sq, mut cq)) = ring_or_skip(2) else { return };

    let path = std::env::temp_dir()
      .join(format!("ringloop_uring_readv_{}", std::process::id()));
    std::fs::File::create(&path)
      .unwrap()
      .write_all(b"hello vectored world")
      .unwrap();
    let file = std::fs::File::open(&path).unwrap();

    let mut first = [0u8; 6];
    let mut second = [0u8; 14];
    let iovecs = [
      libc::iovec { iov_base: first.as_mut_ptr().cast(), iov_len: 6 },
      libc::iovec { iov_base: second.as_mut_ptr().cast(), iov_len: 14 },
    ];

    let entry = Readv::new(file.as_raw_fd(), iovecs.as_ptr(), 2).build();
    unsafe { sq.push(entry, 42) }.unwrap();
    sq.submit().unwrap();

    cq.wait(1).unwrap();
    let completion = cq.peek().unwrap();
    cq.advance(1);

    assert_eq!(completion.user_data(), 42);
    assert_eq!(completion.result(), 20);
    assert_eq!(&first, b"hello ");
    assert_eq!(&second, b"vectored world");

    std::fs::remove_file(path).unwrap();
  }
}
