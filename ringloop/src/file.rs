use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;

// _IOR(0x12, 114, size_t)
#[cfg(target_pointer_width = "64")]
const BLKGETSIZE64: libc::c_ulong = 0x8008_1272;
#[cfg(target_pointer_width = "32")]
const BLKGETSIZE64: libc::c_ulong = 0x8004_1272;

/// Size in bytes of a regular file or block device.
///
/// Other file types (pipes, sockets, directories, ...) are rejected with
/// [`io::ErrorKind::Unsupported`].
pub fn file_size(file: &File) -> io::Result<u64> {
  let metadata = file.metadata()?;
  let file_type = metadata.file_type();

  if file_type.is_file() {
    Ok(metadata.len())
  } else if file_type.is_block_device() {
    let mut size: u64 = 0;
    let fd = file.as_raw_fd();
    syscall!(ioctl(fd, BLKGETSIZE64 as _, &mut size as *mut u64))?;
    Ok(size)
  } else {
    Err(io::Error::new(
      io::ErrorKind::Unsupported,
      "not a regular file or block device",
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn regular_file_size() {
    let path = std::env::temp_dir()
      .join(format!("ringloop-size-{}", fastrand::u64(..)));
    File::create(&path).unwrap().write_all(&[7u8; 2500]).unwrap();

    let file = File::open(&path).unwrap();
    assert_eq!(file_size(&file).unwrap(), 2500);
    std::fs::remove_file(path).unwrap();
  }

  #[test]
  fn directory_is_unsupported() {
    let dir = File::open(std::env::temp_dir()).unwrap();
    let err = file_size(&dir).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::Unsupported);
  }
}
