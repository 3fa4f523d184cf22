//! File readers built on [`Engine`].
//!
//! - [`WholeFileRead`] reads a whole file with one request covering it.
//! - [`SequentialRead`] walks a file in fixed-size chunks, submitting the
//!   next chunk from the completion of the previous one until a read returns
//!   end of file.
//!
//! Both report to a shared [`ReadSink`].

use std::cell::RefCell;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::rc::Rc;

use crate::buffer::MAX_BLOCKS;
use crate::engine::Engine;
use crate::error::{ReadError, SubmitError};
use crate::file::file_size;
use crate::request::{OnComplete, Request, RequestHandle};

/// Outcome of a finished file read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSummary {
  /// Bytes delivered through [`ReadSink::on_data`].
  pub bytes_read: u64,
  /// File size at submission, when the reader looked it up.
  pub size: Option<u64>,
}

/// Receives the data and outcome of file reads.
pub trait ReadSink {
  /// `data` was read from `path` at `offset`. Called in offset order.
  fn on_data(&mut self, path: &Path, offset: u64, data: &[u8]);

  /// The read of `path` finished. Called exactly once per file.
  fn on_done(&mut self, path: &Path, result: io::Result<ReadSummary>);
}

fn deliver<K: ReadSink>(
  sink: &mut K,
  path: &Path,
  start: u64,
  request: &Request,
) {
  let mut offset = start;
  for chunk in request.data() {
    sink.on_data(path, offset, chunk);
    offset += chunk.len() as u64;
  }
}

fn open(path: &Path) -> Result<File, ReadError> {
  File::open(path)
    .map_err(|source| ReadError::Open { path: path.to_path_buf(), source })
}

/// Reads a whole file with a single request.
pub struct WholeFileRead<K> {
  file: File,
  path: Rc<Path>,
  size: u64,
  sink: Rc<RefCell<K>>,
}

impl<K: ReadSink + 'static> WholeFileRead<K> {
  /// Opens `path`, looks up its size and submits one read covering it.
  pub fn submit(
    engine: &mut Engine,
    path: impl AsRef<Path>,
    sink: Rc<RefCell<K>>,
  ) -> Result<RequestHandle, ReadError> {
    let path = path.as_ref();
    let file = open(path)?;
    let size = file_size(&file).map_err(|source| ReadError::SizeLookup {
      path: path.to_path_buf(),
      source,
    })?;

    let submit_err = |source: SubmitError| ReadError::Submit {
      path: path.to_path_buf(),
      source,
    };

    let len = usize::try_from(size).map_err(|_| {
      submit_err(SubmitError::RangeTooLarge {
        blocks: usize::MAX,
        max: MAX_BLOCKS,
      })
    })?;

    let fd = file.as_raw_fd();
    let read = Self { file, path: Rc::from(path), size, sink };

    tracing::debug!(path = %path.display(), size, "submitting file read");
    engine.submit(fd, 0, len, read).map_err(submit_err)
  }
}

impl<K: ReadSink> OnComplete for WholeFileRead<K> {
  fn on_complete(self: Box<Self>, request: Request, _: &mut Engine) {
    let mut sink = self.sink.borrow_mut();

    let result = request.bytes_read().map(|n| {
      deliver(&mut *sink, &self.path, 0, &request);
      ReadSummary { bytes_read: n as u64, size: Some(self.size) }
    });
    drop(request);

    sink.on_done(&self.path, result);
  }
}

/// Position of a [`SequentialRead`] in its file.
#[derive(Debug)]
pub struct FileContext {
  file: File,
  path: Rc<Path>,
  offset: u64,
  chunk_size: usize,
  total: u64,
}

impl FileContext {
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Offset the next chunk is read from.
  pub fn offset(&self) -> u64 {
    self.offset
  }

  pub fn chunk_size(&self) -> usize {
    self.chunk_size
  }

  /// Bytes delivered so far.
  pub fn total(&self) -> u64 {
    self.total
  }
}

/// Reads a file chunk by chunk, chaining each read from the completion of
/// the previous one.
pub struct SequentialRead<K> {
  context: FileContext,
  sink: Rc<RefCell<K>>,
}

impl<K: ReadSink + 'static> SequentialRead<K> {
  /// Opens `path` and submits its first chunk of `engine.config().chunk_size`
  /// bytes.
  pub fn start(
    engine: &mut Engine,
    path: impl AsRef<Path>,
    sink: Rc<RefCell<K>>,
  ) -> Result<RequestHandle, ReadError> {
    let path = path.as_ref();
    let file = open(path)?;

    let context = FileContext {
      file,
      path: Rc::from(path),
      offset: 0,
      chunk_size: engine.config().chunk_size,
      total: 0,
    };
    let fd = context.file.as_raw_fd();
    let chunk_size = context.chunk_size;

    tracing::debug!(path = %path.display(), chunk_size, "reading in chunks");
    engine
      .submit(fd, 0, chunk_size, Self { context, sink })
      .map_err(|source| ReadError::Submit { path: path.to_path_buf(), source })
  }

  fn finish(self, result: io::Result<()>) {
    let total = self.context.total;
    let summary =
      result.map(|()| ReadSummary { bytes_read: total, size: None });
    self.sink.borrow_mut().on_done(&self.context.path, summary);
  }
}

impl<K: ReadSink + 'static> OnComplete for SequentialRead<K> {
  fn on_complete(mut self: Box<Self>, request: Request, engine: &mut Engine) {
    let n = match request.bytes_read() {
      Ok(0) => {
        drop(request);
        tracing::debug!(
          path = %self.context.path.display(),
          total = self.context.total,
          "reached end of file"
        );
        return (*self).finish(Ok(()));
      }
      Ok(n) => n,
      Err(err) => {
        drop(request);
        return (*self).finish(Err(err));
      }
    };

    deliver(
      &mut *self.sink.borrow_mut(),
      &self.context.path,
      self.context.offset,
      &request,
    );
    drop(request);

    self.context.offset += n as u64;
    self.context.total += n as u64;

    let fd = self.context.file.as_raw_fd();
    let (offset, chunk_size) = (self.context.offset, self.context.chunk_size);
    let sink = Rc::clone(&self.sink);
    let path = Rc::clone(&self.context.path);

    if let Err(err) = engine.submit_boxed(fd, offset, chunk_size, self) {
      tracing::error!(
        path = %path.display(),
        offset,
        %err,
        "failed to submit next chunk"
      );
      sink.borrow_mut().on_done(&path, Err(err.into()));
    }
  }
}
