#![cfg_attr(docsrs, feature(doc_cfg))]

//! # ringloop - batched vectored file reads on io_uring
//!
//! ringloop submits fixed-size vectored reads to io_uring and delivers their
//! completions from a single-threaded readiness [`EventLoop`]. The ring's
//! descriptor is watched by the loop only while reads are in flight, so a
//! loop running nothing else returns as soon as the last read is delivered.
//!
//! ## Features
//! - **Owned requests**: buffers live in the engine until their completion
//!   is handed to the callback, never behind raw pointers in user data.
//! - **Backpressure**: at most [`Config::max_in_flight`] reads reach the
//!   kernel at once, the rest wait in a FIFO backlog.
//! - **Readers**: whole-file batch reads and sequential chunked reads that
//!   chain each chunk from the completion of the previous one.
//!
//! ## Platform support
//!
//! | Platform   | I/O Mechanism            | Status                  |
//! |------------|--------------------------|-------------------------|
//! | Linux      | io_uring + epoll         | Yes                     |
//! | Other      |                          | No                      |
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::cell::RefCell;
//! use std::io;
//! use std::path::Path;
//! use std::rc::Rc;
//!
//! use ringloop::read::{ReadSink, ReadSummary, WholeFileRead};
//! use ringloop::{Config, Engine, EventLoop};
//!
//! struct Print;
//!
//! impl ReadSink for Print {
//!   fn on_data(&mut self, _: &Path, _: u64, _: &[u8]) {}
//!
//!   fn on_done(&mut self, path: &Path, result: io::Result<ReadSummary>) {
//!     println!("{}: {result:?}", path.display());
//!   }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let event_loop = EventLoop::new()?;
//! let mut engine = Engine::new(Config::default(), &event_loop)?;
//!
//! let sink = Rc::new(RefCell::new(Print));
//! WholeFileRead::submit(&mut engine, "/etc/hostname", Rc::clone(&sink))?;
//!
//! event_loop.run(&mut engine)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Safety and Threading
//!
//! Everything here is single-threaded: [`Engine`], [`EventLoop`] and
//! [`Watch`] are neither `Send` nor `Sync`. A dropped engine blocks until the
//! kernel has finished with every buffer it was given.

#[cfg(not(target_os = "linux"))]
compile_error!("ringloop requires Linux (io_uring and epoll)");

#[macro_use]
mod macros;

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod file;
pub mod reactor;
pub mod read;
pub mod request;
pub mod ring;
mod store;

pub use buffer::BufferSet;
pub use config::Config;
pub use engine::Engine;
pub use error::{ConfigError, ReadError, SetupError, SubmitError};
pub use reactor::{EventLoop, ReadyHandler, Watch};
pub use request::{OnComplete, Request, RequestHandle};
pub use ring::{Completion, IoRing, Readv};

#[cfg(linux)]
pub use ring::UringRing;
