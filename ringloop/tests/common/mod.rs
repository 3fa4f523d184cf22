#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ringloop::{Completion, IoRing, Readv};

/// A read the engine pushed into the mock ring.
#[derive(Debug, Clone)]
pub struct Pushed {
  pub token: u64,
  pub fd: RawFd,
  pub offset: u64,
  pub iovecs: Vec<(usize, usize)>,
}

impl Pushed {
  /// Performs the read synchronously, returning bytes read or `-errno`.
  fn perform(&self) -> i32 {
    let iovecs: Vec<libc::iovec> = self
      .iovecs
      .iter()
      .map(|&(base, len)| libc::iovec { iov_base: base as *mut _, iov_len: len })
      .collect();

    let res = unsafe {
      libc::preadv(
        self.fd,
        iovecs.as_ptr(),
        iovecs.len() as libc::c_int,
        self.offset as libc::off_t,
      )
    };
    if res < 0 { -io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO) } else { res as i32 }
  }
}

#[derive(Default)]
pub struct MockState {
  /// Every push, in order.
  pub history: Vec<Pushed>,
  /// Pushed but not yet flushed.
  pub queued: Vec<Pushed>,
  /// Flushed and not yet completed.
  pub submitted: Vec<Pushed>,
  pub completions: VecDeque<Completion>,
  /// Free submission slots; unflushed entries occupy one each.
  pub sq_entries: usize,
  /// Complete reads with `preadv` as soon as they are flushed.
  pub auto: bool,
  pub fail_flush: bool,
  pub fail_wait: bool,
  /// errno returned by every push while set.
  pub push_errno: Option<i32>,
  pub flushes: usize,
  pub waits: usize,
  signaled: bool,
}

/// Scripted [`IoRing`]. Readiness is an eventfd that is readable while
/// completions are queued.
pub struct MockRing {
  state: Rc<RefCell<MockState>>,
  event: Rc<OwnedFd>,
}

/// Test-side handle to a [`MockRing`] that has been moved into an engine.
#[derive(Clone)]
pub struct MockControl {
  state: Rc<RefCell<MockState>>,
  event: Rc<OwnedFd>,
}

fn sync_readiness(state: &mut MockState, event: &OwnedFd) {
  let want = !state.completions.is_empty();
  if want && !state.signaled {
    let one = 1u64;
    let n = unsafe {
      libc::write(event.as_raw_fd(), (&one as *const u64).cast(), 8)
    };
    assert_eq!(n, 8, "eventfd write failed");
    state.signaled = true;
  } else if !want && state.signaled {
    let mut value = 0u64;
    let n = unsafe {
      libc::read(event.as_raw_fd(), (&mut value as *mut u64).cast(), 8)
    };
    assert_eq!(n, 8, "eventfd read failed");
    state.signaled = false;
  }
}

impl MockRing {
  /// Ring completing nothing until told to via [`MockControl`].
  pub fn scripted(sq_entries: usize) -> (Self, MockControl) {
    Self::build(sq_entries, false)
  }

  /// Ring that performs every read with `preadv` when it is flushed.
  pub fn auto(sq_entries: usize) -> (Self, MockControl) {
    Self::build(sq_entries, true)
  }

  fn build(sq_entries: usize, auto: bool) -> (Self, MockControl) {
    let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
    assert!(fd >= 0, "eventfd: {}", io::Error::last_os_error());
    let event = Rc::new(unsafe { OwnedFd::from_raw_fd(fd) });

    let state = Rc::new(RefCell::new(MockState {
      sq_entries,
      auto,
      ..Default::default()
    }));

    let control =
      MockControl { state: Rc::clone(&state), event: Rc::clone(&event) };
    (Self { state, event }, control)
  }
}

impl IoRing for MockRing {
  unsafe fn push(&mut self, token: u64, op: &Readv<'_>) -> io::Result<()> {
    let mut state = self.state.borrow_mut();
    if let Some(errno) = state.push_errno {
      return Err(io::Error::from_raw_os_error(errno));
    }
    if state.queued.len() >= state.sq_entries {
      return Err(io::Error::new(io::ErrorKind::WouldBlock, "mock ring full"));
    }

    let pushed = Pushed {
      token,
      fd: op.fd(),
      offset: op.offset(),
      iovecs: op
        .iovecs()
        .iter()
        .map(|iov| (iov.iov_base as usize, iov.iov_len))
        .collect(),
    };
    state.history.push(pushed.clone());
    state.queued.push(pushed);
    Ok(())
  }

  fn flush(&mut self) -> io::Result<usize> {
    let mut state = self.state.borrow_mut();
    state.flushes += 1;
    if state.fail_flush {
      return Err(io::Error::from_raw_os_error(libc::EAGAIN));
    }

    let flushed: Vec<Pushed> = state.queued.drain(..).collect();
    let n = flushed.len();
    if state.auto {
      for pushed in flushed {
        let res = pushed.perform();
        state.completions.push_back(Completion::new(pushed.token, res));
      }
    } else {
      state.submitted.extend(flushed);
    }
    sync_readiness(&mut state, &self.event);
    Ok(n)
  }

  fn peek(&mut self) -> Option<Completion> {
    let mut state = self.state.borrow_mut();
    let next = state.completions.front().copied();
    sync_readiness(&mut state, &self.event);
    next
  }

  fn advance(&mut self, count: usize) {
    let mut state = self.state.borrow_mut();
    for _ in 0..count {
      state.completions.pop_front();
    }
    sync_readiness(&mut state, &self.event);
  }

  fn wait(&mut self, want: usize) -> io::Result<()> {
    let mut state = self.state.borrow_mut();
    state.waits += 1;
    if state.fail_wait {
      return Err(io::Error::from_raw_os_error(libc::EINTR));
    }

    // Whatever is queued is handed to the "kernel" first.
    let queued: Vec<Pushed> = state.queued.drain(..).collect();
    state.submitted.extend(queued);

    while state.completions.len() < want {
      if state.submitted.is_empty() {
        return Err(io::Error::other("nothing to wait for"));
      }
      let pushed = state.submitted.remove(0);
      let res = pushed.perform();
      state.completions.push_back(Completion::new(pushed.token, res));
    }
    sync_readiness(&mut state, &self.event);
    Ok(())
  }

  fn readiness_fd(&self) -> RawFd {
    self.event.as_raw_fd()
  }
}

impl MockControl {
  pub fn state(&self) -> std::cell::Ref<'_, MockState> {
    self.state.borrow()
  }

  pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
    f(&mut self.state.borrow_mut())
  }

  /// Tokens the kernel holds, in submission order.
  pub fn submitted(&self) -> Vec<u64> {
    self.state.borrow().submitted.iter().map(|p| p.token).collect()
  }

  /// Completes a submitted read with an explicit result.
  pub fn complete(&self, token: u64, res: i32) {
    let mut state = self.state.borrow_mut();
    let idx = state
      .submitted
      .iter()
      .position(|p| p.token == token)
      .unwrap_or_else(|| panic!("token {token} is not submitted"));
    state.submitted.remove(idx);
    state.completions.push_back(Completion::new(token, res));
    sync_readiness(&mut state, &self.event);
  }

  /// Completes a submitted read by actually performing it.
  pub fn perform(&self, token: u64) {
    let res = {
      let state = self.state.borrow();
      let pushed = state
        .submitted
        .iter()
        .find(|p| p.token == token)
        .unwrap_or_else(|| panic!("token {token} is not submitted"));
      pushed.perform()
    };
    self.complete(token, res);
  }

  /// Performs every submitted read, oldest first.
  pub fn perform_all(&self) {
    for token in self.submitted() {
      self.perform(token);
    }
  }

  /// Queues a completion the engine never submitted.
  pub fn inject(&self, completion: Completion) {
    let mut state = self.state.borrow_mut();
    state.completions.push_back(completion);
    sync_readiness(&mut state, &self.event);
  }
}

/// A file in the temp directory, removed on drop.
pub struct TempFile {
  pub path: PathBuf,
  pub contents: Vec<u8>,
}

impl TempFile {
  pub fn with_contents(contents: Vec<u8>) -> Self {
    let path = std::env::temp_dir()
      .join(format!("ringloop-test-{}", fastrand::u64(..)));
    File::create(&path)
      .and_then(|mut f| f.write_all(&contents))
      .unwrap_or_else(|err| panic!("create {}: {err}", path.display()));
    Self { path, contents }
  }

  /// `len` random bytes.
  pub fn random(len: usize) -> Self {
    let mut contents = vec![0u8; len];
    fastrand::fill(&mut contents);
    Self::with_contents(contents)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn open(&self) -> File {
    File::open(&self.path).unwrap()
  }
}

impl Drop for TempFile {
  fn drop(&mut self) {
    let _ = std::fs::remove_file(&self.path);
  }
}

/// Creates a real io_uring ring, or `None` when the kernel refuses.
pub fn uring_or_skip(depth: u32) -> Option<ringloop::UringRing> {
  match ringloop::UringRing::new(depth) {
    Ok(ring) => Some(ring),
    Err(err) => {
      eprintln!("skipping: io_uring unavailable ({err})");
      None
    }
  }
}
