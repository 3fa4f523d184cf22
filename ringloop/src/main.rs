use std::cell::RefCell;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use ringloop::read::{ReadSink, ReadSummary, SequentialRead, WholeFileRead};
use ringloop::{Config, Engine, EventLoop, ReadError, SetupError};
use tracing::Level;

const USAGE: &str = "\
usage: ringloop [-s|--sequential] [--block-size N] [--chunk-size N] \
[--depth N] [-v]... FILE...

  -s, --sequential   stream each file to stdout in chunks
      --block-size N buffer block size in bytes (default 1024)
      --chunk-size N bytes per sequential read (default 2048)
      --depth N      io_uring submission queue entries (default 8)
  -v                 more logging, repeatable";

#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
  sequential: bool,
  block_size: Option<usize>,
  chunk_size: Option<usize>,
  depth: Option<u32>,
  verbosity: u8,
  files: Vec<PathBuf>,
}

impl Args {
  fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
      match arg.as_str() {
        "-s" | "--sequential" => parsed.sequential = true,
        "--block-size" => {
          parsed.block_size = Some(number(&arg, args.next())?);
        }
        "--chunk-size" => {
          parsed.chunk_size = Some(number(&arg, args.next())?);
        }
        "--depth" => parsed.depth = Some(number(&arg, args.next())?),
        "--" => {
          parsed.files.extend(args.by_ref().map(PathBuf::from));
        }
        flag if is_verbose(flag) => {
          let count = (flag.len() - 1) as u8;
          parsed.verbosity = parsed.verbosity.saturating_add(count);
        }
        flag if flag.starts_with('-') && flag != "-" => {
          return Err(format!("unknown argument: {flag}"));
        }
        _ => parsed.files.push(PathBuf::from(&arg)),
      }
    }

    if parsed.files.is_empty() {
      return Err("no files given".into());
    }
    Ok(parsed)
  }

  fn config(&self) -> Config {
    let mut config = Config::default();
    if let Some(depth) = self.depth {
      let max_in_flight = config.max_in_flight.min(depth as usize);
      config = config.with_queue_depth(depth).with_max_in_flight(max_in_flight);
    }
    if let Some(block_size) = self.block_size {
      config = config.with_block_size(block_size);
    }
    if let Some(chunk_size) = self.chunk_size {
      config = config.with_chunk_size(chunk_size);
    }
    config
  }

  fn level(&self) -> Level {
    match self.verbosity {
      0 => Level::WARN,
      1 => Level::INFO,
      2 => Level::DEBUG,
      _ => Level::TRACE,
    }
  }
}

fn is_verbose(flag: &str) -> bool {
  flag
    .strip_prefix('-')
    .is_some_and(|vs| !vs.is_empty() && vs.bytes().all(|c| c == b'v'))
}

fn number<T: std::str::FromStr>(
  flag: &str,
  value: Option<String>,
) -> Result<T, String> {
  let value = value.ok_or_else(|| format!("{flag} needs a value"))?;
  value.parse().map_err(|_| format!("{flag}: invalid number {value:?}"))
}

/// Prints one summary line per file.
struct Report;

impl ReadSink for Report {
  fn on_data(&mut self, _: &Path, _: u64, _: &[u8]) {}

  fn on_done(&mut self, path: &Path, result: io::Result<ReadSummary>) {
    match result {
      Ok(summary) => println!(
        "{}: read {} of {} bytes",
        path.display(),
        summary.bytes_read,
        summary.size.unwrap_or(summary.bytes_read)
      ),
      Err(err) => tracing::error!(path = %path.display(), %err, "read failed"),
    }
  }
}

/// Copies file contents to stdout.
struct Stream<W> {
  out: W,
}

impl<W: Write> ReadSink for Stream<W> {
  fn on_data(&mut self, path: &Path, offset: u64, data: &[u8]) {
    if let Err(err) = self.out.write_all(data) {
      tracing::error!(path = %path.display(), offset, %err, "write failed");
    }
  }

  fn on_done(&mut self, path: &Path, result: io::Result<ReadSummary>) {
    if let Err(err) = self.out.flush() {
      tracing::error!(%err, "flush failed");
    }
    match result {
      Ok(summary) => {
        let bytes = summary.bytes_read;
        tracing::info!(path = %path.display(), bytes, "done")
      }
      Err(err) => tracing::error!(path = %path.display(), %err, "read failed"),
    }
  }
}

fn skip(err: ReadError) {
  tracing::error!(%err, "skipping file");
}

fn run(args: &Args) -> Result<(), SetupError> {
  let event_loop = EventLoop::new()?;
  let mut engine = Engine::new(args.config(), &event_loop)?;

  if args.sequential {
    let sink = Rc::new(RefCell::new(Stream { out: io::stdout().lock() }));
    // One file at a time, so contents are not interleaved.
    for path in &args.files {
      match SequentialRead::start(&mut engine, path, Rc::clone(&sink)) {
        Ok(_) => event_loop.run(&mut engine)?,
        Err(err) => skip(err),
      }
    }
  } else {
    let sink = Rc::new(RefCell::new(Report));
    for path in &args.files {
      let submitted =
        WholeFileRead::submit(&mut engine, path, Rc::clone(&sink));
      if let Err(err) = submitted {
        skip(err);
      }
    }
    event_loop.run(&mut engine)?;
  }

  Ok(())
}

fn main() -> ExitCode {
  let args = match Args::parse(std::env::args().skip(1)) {
    Ok(args) => args,
    Err(msg) => {
      eprintln!("ringloop: {msg}\n\n{USAGE}");
      return ExitCode::FAILURE;
    }
  };

  tracing_subscriber::fmt()
    .with_max_level(args.level())
    .with_writer(io::stderr)
    .init();

  match run(&args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      tracing::error!(%err, "setup failed");
      ExitCode::FAILURE
    }
  }
}
