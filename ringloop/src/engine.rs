//! Submission path and completion bridge.
//!
//! The [`Engine`] owns a ring, the requests handed to it and a watch on the
//! ring's readiness descriptor. The watch is armed exactly while reads are in
//! flight, so an [`EventLoop`] running nothing but engines returns once every
//! read has been delivered.
//!
//! ```text
//! submit ──► store ──► ring ──► kernel
//!                                  │
//!  on_complete ◄── bridge ◄── readiness fd readable
//! ```

use std::collections::VecDeque;
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::buffer::BufferSet;
use crate::config::Config;
use crate::error::{SetupError, SubmitError};
use crate::reactor::{EventLoop, ReadyHandler, Watch};
use crate::request::{OnComplete, Request, RequestHandle};
use crate::ring::{IoRing, Readv};
use crate::store::RequestStore;

/// How long the loop waits before retrying a failed flush.
const FLUSH_RETRY: Duration = Duration::from_millis(10);

/// Drives vectored reads through a ring and delivers their completions from
/// an [`EventLoop`].
///
/// # Example
///
/// ```no_run
/// use std::fs::File;
/// use std::os::fd::AsRawFd;
///
/// use ringloop::{Config, Engine, EventLoop, Request};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let event_loop = EventLoop::new()?;
/// let mut engine = Engine::new(Config::default(), &event_loop)?;
///
/// let file = File::open("/etc/hostname")?;
/// engine.submit(file.as_raw_fd(), 0, 64, |req: Request, _: &mut Engine| {
///   println!("read {:?} bytes", req.bytes_read());
/// })?;
///
/// event_loop.run(&mut engine)?;
/// # Ok(())
/// # }
/// ```
pub struct Engine {
  // Unregistered before the ring closes its descriptor.
  watch: Watch,
  ring: Box<dyn IoRing>,
  store: RequestStore,
  /// Accepted tokens waiting for an in-flight slot, oldest first.
  backlog: VecDeque<u64>,
  in_flight: usize,
  /// A flush failed and pushed entries are still waiting for the kernel.
  unflushed: bool,
  config: Config,
}

impl Engine {
  /// Creates an engine on a fresh io_uring ring of `config.queue_depth`
  /// entries, watched by `event_loop`.
  #[cfg(linux)]
  pub fn new(
    config: Config,
    event_loop: &EventLoop,
  ) -> Result<Self, SetupError> {
    config.validate()?;
    let ring = crate::ring::UringRing::new(config.queue_depth)?;
    Self::with_ring(ring, config, event_loop)
  }

  /// Creates an engine on an existing ring.
  pub fn with_ring<R>(
    ring: R,
    config: Config,
    event_loop: &EventLoop,
  ) -> Result<Self, SetupError>
  where
    R: IoRing + 'static,
  {
    config.validate()?;
    let watch = event_loop.watch_readable(ring.readiness_fd())?;

    tracing::debug!(
      depth = config.queue_depth,
      max_in_flight = config.max_in_flight,
      "engine created"
    );

    Ok(Self {
      watch,
      ring: Box::new(ring),
      store: RequestStore::with_capacity(config.max_pending),
      backlog: VecDeque::new(),
      in_flight: 0,
      unflushed: false,
      config,
    })
  }

  /// Reads `len` bytes of `fd` at `offset` into a fresh [`BufferSet`] and
  /// hands the result to `on_complete`.
  ///
  /// `fd` must stay open until the completion has been delivered.
  pub fn submit<C>(
    &mut self,
    fd: RawFd,
    offset: u64,
    len: usize,
    on_complete: C,
  ) -> Result<RequestHandle, SubmitError>
  where
    C: OnComplete + 'static,
  {
    self.submit_boxed(fd, offset, len, Box::new(on_complete))
  }

  /// [`submit`](Self::submit) with an already boxed callback.
  pub fn submit_boxed(
    &mut self,
    fd: RawFd,
    offset: u64,
    len: usize,
    on_complete: Box<dyn OnComplete>,
  ) -> Result<RequestHandle, SubmitError> {
    let buffers =
      BufferSet::new(len, self.config.block_size, self.config.alignment)?;
    let request = Request::new(fd, offset, buffers, Some(on_complete));

    let token =
      self.store.insert(request).map_err(|_| SubmitError::QueueFull)?;
    let handle = RequestHandle(token);

    if self.in_flight >= self.config.max_in_flight || !self.backlog.is_empty()
    {
      self.backlog.push_back(token);
      tracing::debug!(token, fd, offset, len, "read backlogged");
      return Ok(handle);
    }

    match self.push(token) {
      Ok(()) => {}
      Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
        if self.in_flight == 0 {
          self.store.remove(token);
          return Err(SubmitError::QueueFull);
        }
        self.backlog.push_back(token);
        tracing::debug!(token, fd, offset, "ring full, read backlogged");
        return Ok(handle);
      }
      Err(err) => {
        self.store.remove(token);
        return Err(SubmitError::Io(err));
      }
    }

    self.track_in_flight();
    self.flush();

    tracing::debug!(token, fd, offset, len, "read submitted");
    Ok(handle)
  }

  /// Drains every available completion, delivering each to its request's
  /// callback. Returns how many callbacks ran.
  ///
  /// This is the handler for the ring's readiness watch.
  pub fn on_readable(&mut self, event_loop: &EventLoop) -> usize {
    let mut delivered = 0;

    if self.unflushed {
      self.flush();
    }

    while let Some(completion) = self.ring.peek() {
      let Some(mut request) = self.store.remove(completion.token) else {
        // Not one of ours, so it never counted as in flight.
        tracing::warn!(token = completion.token, "unknown completion token");
        self.ring.advance(1);
        continue;
      };

      self.in_flight -= 1;
      request.set_result(completion.res);
      self.ring.advance(1);

      let failed = self.promote_backlog();
      if self.in_flight == 0 {
        self.disarm();
      }

      tracing::debug!(
        token = completion.token,
        res = completion.res,
        "read completed"
      );
      delivered += self.deliver(request);

      for (token, errno) in failed {
        if let Some(mut request) = self.store.remove(token) {
          request.set_result(-errno);
          delivered += self.deliver(request);
        }
      }
    }

    if self.is_idle() && self.config.stop_loop_when_idle {
      tracing::trace!("engine idle, stopping loop");
      event_loop.stop();
    }

    delivered
  }

  /// Reads handed to the kernel and not yet completed.
  pub fn in_flight(&self) -> usize {
    self.in_flight
  }

  /// Accepted reads waiting for an in-flight slot.
  pub fn queued(&self) -> usize {
    self.backlog.len()
  }

  /// Accepted reads whose completion has not been delivered.
  pub fn pending(&self) -> usize {
    self.store.len()
  }

  /// Whether pushed reads are waiting for a flush to be retried.
  pub fn has_unflushed(&self) -> bool {
    self.unflushed
  }

  pub fn is_idle(&self) -> bool {
    self.in_flight == 0 && self.backlog.is_empty()
  }

  /// Whether the readiness watch is armed.
  pub fn is_armed(&self) -> bool {
    self.watch.is_armed()
  }

  /// Key of this engine's readiness watch on its event loop.
  pub fn watch_key(&self) -> u64 {
    self.watch.key()
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Looks up a request that has not completed yet.
  pub fn request(&self, handle: RequestHandle) -> Option<&Request> {
    self.store.get(handle.0)
  }

  fn push(&mut self, token: u64) -> io::Result<()> {
    let request = self
      .store
      .get(token)
      .ok_or_else(|| io::Error::other("request missing from store"))?;
    let op = Readv::new(request.fd(), request.buffers(), request.offset());

    // SAFETY: the request, and with it the buffers, stays in the store until
    // the completion carrying `token` has been consumed. Blocks are separate
    // heap allocations, so moving the request does not move them.
    unsafe { self.ring.push(token, &op) }
  }

  fn flush(&mut self) {
    match self.ring.flush() {
      Ok(_) => {
        if self.unflushed {
          tracing::debug!("flush retry succeeded");
        }
        self.unflushed = false;
      }
      Err(err) => {
        tracing::warn!(%err, "failed to flush submission queue");
        self.unflushed = true;
      }
    }
  }

  fn track_in_flight(&mut self) {
    self.in_flight += 1;
    if self.in_flight == 1 {
      if let Err(err) = self.watch.start() {
        tracing::error!(%err, "failed to arm readiness watch");
      }
    }
  }

  fn disarm(&mut self) {
    if let Err(err) = self.watch.stop() {
      tracing::error!(%err, "failed to disarm readiness watch");
    }
  }

  /// Moves backlogged requests into the ring while the in-flight bound
  /// allows. Returns the tokens that failed to enter it, with their errno.
  fn promote_backlog(&mut self) -> Vec<(u64, i32)> {
    let mut failed = Vec::new();
    let mut pushed = false;

    while self.in_flight < self.config.max_in_flight {
      let Some(&token) = self.backlog.front() else {
        break;
      };

      match self.push(token) {
        Ok(()) => {
          self.backlog.pop_front();
          self.track_in_flight();
          pushed = true;
          tracing::debug!(token, "backlogged read submitted");
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
          if self.in_flight > 0 {
            break;
          }
          // Nothing in flight will ever make room.
          self.backlog.pop_front();
          failed.push((token, libc::EAGAIN));
        }
        Err(err) => {
          tracing::error!(token, %err, "failed to submit backlogged read");
          self.backlog.pop_front();
          failed.push((token, err.raw_os_error().unwrap_or(libc::EIO)));
        }
      }
    }

    if pushed || self.unflushed {
      self.flush();
    }
    failed
  }

  fn deliver(&mut self, mut request: Request) -> usize {
    match request.take_callback() {
      Some(callback) => {
        callback.on_complete(request, self);
        1
      }
      None => 0,
    }
  }
}

impl ReadyHandler for Engine {
  fn on_ready(&mut self, event_loop: &EventLoop, key: u64) {
    if key == self.watch.key() {
      self.on_readable(event_loop);
    }
  }

  /// Bounded only while a failed flush left reads the kernel has not seen;
  /// no completion can wake the loop for those.
  fn timeout(&self) -> Option<Duration> {
    self.unflushed.then_some(FLUSH_RETRY)
  }

  fn on_timeout(&mut self, _event_loop: &EventLoop) {
    if self.unflushed {
      self.flush();
    }
  }
}

impl Drop for Engine {
  fn drop(&mut self) {
    // Backlogged reads never reached the kernel.
    for token in mem::take(&mut self.backlog) {
      self.store.remove(token);
    }

    if self.in_flight == 0 {
      return;
    }

    tracing::warn!(
      in_flight = self.in_flight,
      "engine dropped with reads in flight, waiting for them"
    );

    while self.in_flight > 0 {
      match self.ring.peek() {
        Some(completion) => {
          if self.store.remove(completion.token).is_some() {
            self.in_flight -= 1;
          }
          self.ring.advance(1);
        }
        None => {
          if let Err(err) = self.ring.wait(1) {
            tracing::error!(
              %err,
              in_flight = self.in_flight,
              "failed waiting for in-flight reads, leaking their buffers"
            );
            for request in self.store.drain() {
              mem::forget(request);
            }
            return;
          }
        }
      }
    }
  }
}
