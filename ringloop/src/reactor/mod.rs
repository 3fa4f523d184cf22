//! Single-threaded readiness event loop.
//!
//! An [`EventLoop`] owns an epoll instance. Descriptors are registered as
//! [`Watch`]es which start out disarmed; an armed watch reports its key to
//! the [`ReadyHandler`] passed to [`EventLoop::run`] whenever its descriptor
//! is readable.
//!
//! ```text
//! run(handler)
//!   while !stopped && armed watches > 0
//!     epoll_wait(handler.timeout())
//!       ├─► handler.on_ready(loop, key)   (per ready watch)
//!       └─► handler.on_timeout(loop)      (timed out, nothing ready)
//! ```
//!
//! The loop, and every watch created from it, is `!Send` and `!Sync`.

mod epoll;
mod interest;

pub use interest::Interest;

use std::cell::Cell;
use std::io;
use std::marker::PhantomData;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use epoll::OsPoller;

const EVENTS_PER_WAIT: usize = 64;

/// Receives readiness notifications from [`EventLoop::run`].
pub trait ReadyHandler {
  /// `key` is the [`Watch::key`] of the watch that became ready.
  fn on_ready(&mut self, event_loop: &EventLoop, key: u64);

  /// Longest [`EventLoop::run`] may block before calling
  /// [`on_timeout`](Self::on_timeout). `None` waits for readiness only.
  fn timeout(&self) -> Option<Duration> {
    None
  }

  /// A bounded wait expired without any watch becoming ready.
  fn on_timeout(&mut self, _event_loop: &EventLoop) {}
}

impl<F> ReadyHandler for F
where
  F: FnMut(&EventLoop, u64),
{
  fn on_ready(&mut self, event_loop: &EventLoop, key: u64) {
    self(event_loop, key)
  }
}

struct Inner {
  poller: OsPoller,
  stopped: Cell<bool>,
  armed: Cell<usize>,
  next_key: Cell<u64>,
}

/// Handle to an event loop. Clones share the same loop.
#[derive(Clone)]
pub struct EventLoop {
  inner: Rc<Inner>,
}

impl EventLoop {
  pub fn new() -> io::Result<Self> {
    let inner = Inner {
      poller: OsPoller::new()?,
      stopped: Cell::new(false),
      armed: Cell::new(0),
      next_key: Cell::new(0),
    };
    Ok(Self { inner: Rc::new(inner) })
  }

  /// Registers `fd` for readability. The returned watch is disarmed.
  ///
  /// `fd` must stay open until the watch is dropped.
  pub fn watch_readable(&self, fd: RawFd) -> io::Result<Watch> {
    let key = self.inner.next_key.get();
    self.inner.next_key.set(key + 1);

    self.inner.poller.add(fd, key, Interest::None)?;
    tracing::trace!(fd, key, "watch registered");

    Ok(Watch {
      inner: Rc::clone(&self.inner),
      fd,
      key,
      armed: false,
      _not_send: PhantomData,
    })
  }

  /// Makes [`run`](Self::run) return after the current iteration.
  pub fn stop(&self) {
    self.inner.stopped.set(true);
  }

  pub fn is_stopped(&self) -> bool {
    self.inner.stopped.get()
  }

  /// Number of watches currently armed on this loop.
  pub fn armed_watches(&self) -> usize {
    self.inner.armed.get()
  }

  /// Dispatches readiness to `handler` until [`stop`](Self::stop) is called
  /// or no watch is armed. The stop flag is cleared on return.
  pub fn run<H>(&self, handler: &mut H) -> io::Result<()>
  where
    H: ReadyHandler + ?Sized,
  {
    let result = loop {
      if self.inner.stopped.get() || self.inner.armed.get() == 0 {
        break Ok(());
      }
      let timeout = handler.timeout();
      if let Err(err) = self.run_once(handler, timeout) {
        break Err(err);
      }
    };

    self.inner.stopped.set(false);
    result
  }

  /// Waits at most `timeout` (forever for `None`) for readiness and
  /// dispatches it. Returns the number of notifications delivered.
  ///
  /// A wait that times out with nothing ready calls
  /// [`ReadyHandler::on_timeout`].
  pub fn run_once<H>(
    &self,
    handler: &mut H,
    timeout: Option<Duration>,
  ) -> io::Result<usize>
  where
    H: ReadyHandler + ?Sized,
  {
    let mut events = [libc::epoll_event { events: 0, u64: 0 }; EVENTS_PER_WAIT];
    let n = self.inner.poller.wait(&mut events, timeout)?;

    if n == 0 && timeout.is_some() {
      handler.on_timeout(self);
    }
    for event in &events[..n] {
      handler.on_ready(self, epoll::event_key(event));
    }

    Ok(n)
  }
}

/// A readability registration on an [`EventLoop`].
///
/// Dropping the watch disarms and unregisters it.
pub struct Watch {
  inner: Rc<Inner>,
  fd: RawFd,
  key: u64,
  armed: bool,
  _not_send: PhantomData<Cell<()>>,
}

impl Watch {
  /// Key passed to [`ReadyHandler::on_ready`] for this watch.
  pub fn key(&self) -> u64 {
    self.key
  }

  pub fn fd(&self) -> RawFd {
    self.fd
  }

  pub fn is_armed(&self) -> bool {
    self.armed
  }

  /// Arms the watch. Arming an armed watch does nothing.
  pub fn start(&mut self) -> io::Result<()> {
    if self.armed {
      return Ok(());
    }
    self.inner.poller.modify(self.fd, self.key, Interest::Read)?;
    self.armed = true;
    self.inner.armed.set(self.inner.armed.get() + 1);
    Ok(())
  }

  /// Disarms the watch. Disarming a disarmed watch does nothing.
  pub fn stop(&mut self) -> io::Result<()> {
    if !self.armed {
      return Ok(());
    }
    self.inner.poller.modify(self.fd, self.key, Interest::None)?;
    self.armed = false;
    self.inner.armed.set(self.inner.armed.get() - 1);
    Ok(())
  }
}

impl Drop for Watch {
  fn drop(&mut self) {
    if self.armed {
      self.armed = false;
      self.inner.armed.set(self.inner.armed.get() - 1);
    }
    if let Err(err) = self.inner.poller.delete(self.fd) {
      tracing::debug!(fd = self.fd, %err, "failed to unregister watch");
    }
  }
}
