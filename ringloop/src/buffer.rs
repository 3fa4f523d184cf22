//! Aligned destination buffers for vectored reads.
//!
//! A [`BufferSet`] covers one requested byte range with fixed-capacity blocks:
//!
//! ```text
//! range = 2500, block_size = 1024
//!
//! block 0   block 1   block 2
//! [1024]    [1024]    [452 of 1024]
//! ```
//!
//! Every block is a separate heap allocation aligned to the configured
//! alignment, and the `iovec` array describing them is allocated once and
//! never resized. Moving a `BufferSet` (or the request owning it) therefore
//! never moves the memory the kernel was told to fill.
//!
//! # Lifecycle
//!
//! 1. **Build**: [`BufferSet::new`] allocates and zeroes every block.
//! 2. **Fill**: the kernel writes through [`BufferSet::as_iovecs`].
//! 3. **Consume**: [`BufferSet::filled`] yields the prefix a read of `n` bytes
//!    produced. Dropping the set releases each block individually.

use std::alloc::{self, Layout};
#[cfg(test)]
use std::cell::Cell;
use std::fmt;
use std::ptr::NonNull;
use std::slice;

use crate::error::SubmitError;

/// Most iovecs a single vectored read accepts.
pub const MAX_BLOCKS: usize = libc::UIO_MAXIOV as usize;

/// Number of `block_size` blocks needed to cover `range` bytes.
pub fn block_count(range: usize, block_size: usize) -> usize {
  range.div_ceil(block_size)
}

#[cfg(test)]
thread_local! {
  /// Allocations left before `Block::alloc` starts failing.
  static ALLOCS_LEFT: Cell<Option<usize>> = const { Cell::new(None) };
  static LIVE_BLOCKS: Cell<usize> = const { Cell::new(0) };
}

struct Block {
  ptr: NonNull<u8>,
  layout: Layout,
  len: usize,
}

impl Block {
  fn alloc(
    capacity: usize,
    align: usize,
    len: usize,
  ) -> Result<Self, SubmitError> {
    debug_assert!(len <= capacity);
    let failure = SubmitError::AllocationFailure { size: capacity, align };

    let layout = Layout::from_size_align(capacity, align)
      .map_err(|_| SubmitError::AllocationFailure { size: capacity, align })?;
    if layout.size() == 0 {
      return Err(failure);
    }

    #[cfg(test)]
    if ALLOCS_LEFT.with(|left| match left.get() {
      Some(0) => true,
      Some(n) => {
        left.set(Some(n - 1));
        false
      }
      None => false,
    }) {
      return Err(failure);
    }

    // SAFETY: layout has a non-zero size.
    let ptr = unsafe { alloc::alloc_zeroed(layout) };
    let ptr = NonNull::new(ptr).ok_or(failure)?;

    #[cfg(test)]
    LIVE_BLOCKS.with(|live| live.set(live.get() + 1));

    Ok(Self { ptr, layout, len })
  }

  fn as_slice(&self) -> &[u8] {
    // SAFETY: ptr is valid and initialised for layout.size() >= len bytes.
    unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
  }

  fn iovec(&self) -> libc::iovec {
    libc::iovec { iov_base: self.ptr.as_ptr().cast(), iov_len: self.len }
  }
}

impl Drop for Block {
  fn drop(&mut self) {
    #[cfg(feature = "zeroize")]
    {
      use zeroize::Zeroize;
      // SAFETY: the block is exclusively owned and still allocated.
      unsafe {
        slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size())
      }
      .zeroize();
    }

    // SAFETY: allocated in Block::alloc with this exact layout.
    unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };

    #[cfg(test)]
    LIVE_BLOCKS.with(|live| live.set(live.get() - 1));
  }
}

/// Ordered, fixed set of aligned blocks covering one byte range.
pub struct BufferSet {
  blocks: Vec<Block>,
  iovecs: Box<[libc::iovec]>,
  len: usize,
  block_size: usize,
}

impl BufferSet {
  /// Allocates `ceil(range / block_size)` blocks of `block_size` bytes each,
  /// aligned to `alignment`. The last block records a shorter length when
  /// `range` is not a multiple of `block_size`.
  ///
  /// # Errors
  /// - [`SubmitError::ZeroBlockSize`] if `block_size` is zero.
  /// - [`SubmitError::RangeTooLarge`] if more than [`MAX_BLOCKS`] blocks would
  ///   be needed.
  /// - [`SubmitError::AllocationFailure`] if any block cannot be allocated.
  ///   Blocks allocated before the failure are released.
  pub fn new(
    range: usize,
    block_size: usize,
    alignment: usize,
  ) -> Result<Self, SubmitError> {
    if block_size == 0 {
      return Err(SubmitError::ZeroBlockSize);
    }

    let count = block_count(range, block_size);
    if count > MAX_BLOCKS {
      return Err(SubmitError::RangeTooLarge {
        blocks: count,
        max: MAX_BLOCKS,
      });
    }

    let mut blocks = Vec::with_capacity(count);
    let mut remaining = range;
    while remaining > 0 {
      let len = remaining.min(block_size);
      blocks.push(Block::alloc(block_size, alignment, len)?);
      remaining -= len;
    }

    let iovecs = blocks.iter().map(Block::iovec).collect();

    Ok(Self { blocks, iovecs, len: range, block_size })
  }

  /// Total bytes covered, the sum of all block lengths.
  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn block_count(&self) -> usize {
    self.blocks.len()
  }

  /// Capacity of each block.
  pub fn block_size(&self) -> usize {
    self.block_size
  }

  /// Every block, at its recorded length.
  pub fn blocks(&self) -> impl Iterator<Item = &[u8]> {
    self.blocks.iter().map(Block::as_slice)
  }

  /// The blocks the kernel fills, in order.
  ///
  /// The returned addresses stay valid and fixed for the lifetime of `self`.
  pub fn as_iovecs(&self) -> &[libc::iovec] {
    &self.iovecs
  }

  /// The leading `n` bytes across the blocks, as produced by a read that
  /// returned `n`. `n` is clamped to [`len`](Self::len).
  pub fn filled(&self, n: usize) -> impl Iterator<Item = &[u8]> {
    let mut remaining = n.min(self.len);
    self.blocks().map_while(move |block| {
      if remaining == 0 {
        return None;
      }
      let take = block.len().min(remaining);
      remaining -= take;
      Some(&block[..take])
    })
  }

  /// Copies the leading `n` bytes into one contiguous vector.
  pub fn to_vec(&self, n: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(n.min(self.len));
    for chunk in self.filled(n) {
      out.extend_from_slice(chunk);
    }
    out
  }

  /// Copies the leading `n` bytes into a [`bytes::Bytes`].
  #[cfg(feature = "bytes")]
  #[cfg_attr(docsrs, doc(cfg(feature = "bytes")))]
  pub fn to_bytes(&self, n: usize) -> bytes::Bytes {
    bytes::Bytes::from(self.to_vec(n))
  }
}

impl fmt::Debug for BufferSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BufferSet")
      .field("len", &self.len)
      .field("block_size", &self.block_size)
      .field("blocks", &self.blocks.len())
      .finish()
  }
}
