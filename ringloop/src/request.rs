use std::fmt;
use std::io;
use std::os::fd::RawFd;

use crate::buffer::BufferSet;
use crate::engine::Engine;

/// Identifies an accepted request until its completion is delivered.
///
/// The wrapped value is the token the kernel carries as user data.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RequestHandle(pub(crate) u64);

impl RequestHandle {
  pub fn token(&self) -> u64 {
    self.0
  }
}

/// Called exactly once, with the completed request, when its read finishes.
///
/// The callback owns the request and may submit further reads through the
/// engine it is handed. Closures taking `(Request, &mut Engine)` implement
/// this trait.
pub trait OnComplete {
  fn on_complete(self: Box<Self>, request: Request, engine: &mut Engine);
}

impl<F> OnComplete for F
where
  F: FnOnce(Request, &mut Engine),
{
  fn on_complete(self: Box<Self>, request: Request, engine: &mut Engine) {
    (*self)(request, engine)
  }
}

/// One vectored read: where to read from, where to put it, and who to tell.
pub struct Request {
  fd: RawFd,
  offset: u64,
  buffers: BufferSet,
  result: Option<i32>,
  callback: Option<Box<dyn OnComplete>>,
}

impl Request {
  pub(crate) fn new(
    fd: RawFd,
    offset: u64,
    buffers: BufferSet,
    callback: Option<Box<dyn OnComplete>>,
  ) -> Self {
    Self { fd, offset, buffers, result: None, callback }
  }

  pub fn fd(&self) -> RawFd {
    self.fd
  }

  /// Offset the read was submitted at.
  pub fn offset(&self) -> u64 {
    self.offset
  }

  pub fn buffers(&self) -> &BufferSet {
    &self.buffers
  }

  /// Raw completion result: bytes read, or a negated errno.
  ///
  /// `None` until the completion has been processed.
  pub fn res(&self) -> Option<i32> {
    self.result
  }

  /// Bytes the kernel read into the buffers.
  ///
  /// # Errors
  /// The OS error of a failed read, or [`io::ErrorKind::Other`] if the
  /// request has not completed.
  pub fn bytes_read(&self) -> io::Result<usize> {
    match self.result {
      Some(res) if res < 0 => Err(io::Error::from_raw_os_error(-res)),
      Some(res) => Ok(res as usize),
      None => Err(io::Error::other("request has not completed")),
    }
  }

  /// The filled prefix of the buffers, empty for failed or pending reads.
  pub fn data(&self) -> impl Iterator<Item = &[u8]> {
    let n = self.bytes_read().unwrap_or(0);
    self.buffers.filled(n)
  }

  /// The filled prefix of the buffers copied into one vector.
  pub fn to_vec(&self) -> Vec<u8> {
    self.buffers.to_vec(self.bytes_read().unwrap_or(0))
  }

  pub fn into_buffers(self) -> BufferSet {
    self.buffers
  }

  pub(crate) fn set_result(&mut self, res: i32) {
    self.result = Some(res);
  }

  pub(crate) fn take_callback(&mut self) -> Option<Box<dyn OnComplete>> {
    self.callback.take()
  }
}

impl fmt::Debug for Request {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Request")
      .field("fd", &self.fd)
      .field("offset", &self.offset)
      .field("buffers", &self.buffers)
      .field("result", &self.result)
      .finish_non_exhaustive()
  }
}
