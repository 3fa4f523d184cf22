//! Vectored file read example using io_uring
//!
//! This example demonstrates:
//! - Splitting a read into fixed-size iovecs
//! - Waiting on the completion queue
//! - Peeking and advancing completions explicitly
//!
//! Usage: `cargo run -p ringloop-uring --example readv_file -- <path>`

use ringloop_uring::operation::Readv;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::AsRawFd;

const BLOCK: usize = 16;

fn main() -> io::Result<()> {
  let Some(path) = std::env::args().nth(1) else {
    eprintln!("usage: readv_file <path>");
    std::process::exit(1);
  };

  let file = File::open(&path)?;
  let size = file.metadata()?.len() as usize;

  let (mut sq, mut cq) = ringloop_uring::with_capacity(4)?;

  let mut blocks: Vec<Vec<u8>> = (0..size.div_ceil(BLOCK))
    .map(|i| vec![0u8; BLOCK.min(size - i * BLOCK)])
    .collect();
  let iovecs: Vec<libc::iovec> = blocks
    .iter_mut()
    .map(|b| libc::iovec { iov_base: b.as_mut_ptr().cast(), iov_len: b.len() })
    .collect();

  let op = Readv::new(file.as_raw_fd(), iovecs.as_ptr(), iovecs.len() as u32);
  // SAFETY: `blocks` and `iovecs` outlive the completion consumed below.
  unsafe { sq.push(op.build(), 1) }?;
  sq.submit()?;

  cq.wait(1)?;
  let completion = cq.peek().expect("one completion after wait");
  cq.advance(1);

  if !completion.is_ok() {
    return Err(io::Error::from_raw_os_error(-completion.result()));
  }

  println!("read {} bytes into {} iovecs", completion.result(), blocks.len());
  let mut stdout = io::stdout().lock();
  for block in &blocks {
    stdout.write_all(block)?;
  }
  Ok(())
}
