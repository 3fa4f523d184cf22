use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use std::{io, ptr};

use super::interest::Interest;

/// Wrapper around an epoll file descriptor.
///
/// Registrations are level-triggered: a descriptor with read interest is
/// reported on every wait for as long as it stays readable.
pub struct OsPoller {
  epoll_fd: OwnedFd,
}

impl OsPoller {
  pub fn new() -> io::Result<Self> {
    let epoll_fd = unsafe {
      let fd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
      OwnedFd::from_raw_fd(fd)
    };

    Ok(Self { epoll_fd })
  }

  /// Registers `fd` under `key`. Not idempotent.
  pub fn add(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
    self.ctl(libc::EPOLL_CTL_ADD, fd, key, interest)
  }

  /// Replaces the interest of a registered `fd`.
  pub fn modify(
    &self,
    fd: RawFd,
    key: u64,
    interest: Interest,
  ) -> io::Result<()> {
    self.ctl(libc::EPOLL_CTL_MOD, fd, key, interest)
  }

  pub fn delete(&self, fd: RawFd) -> io::Result<()> {
    // For EPOLL_CTL_DEL, event pointer can be NULL in Linux 2.6.9+
    match syscall!(epoll_ctl(
      self.epoll_fd.as_raw_fd(),
      libc::EPOLL_CTL_DEL,
      fd,
      ptr::null_mut(),
    )) {
      Ok(_) => Ok(()),
      Err(err) => Err(match err.raw_os_error() {
        Some(libc::EBADF) => io::Error::from_raw_os_error(libc::ENOENT),
        _ => err,
      }),
    }
  }

  fn ctl(
    &self,
    op: libc::c_int,
    fd: RawFd,
    key: u64,
    interest: Interest,
  ) -> io::Result<()> {
    let mut event =
      libc::epoll_event { events: interest.epoll_events(), u64: key };

    syscall!(epoll_ctl(
      self.epoll_fd.as_raw_fd(),
      op,
      fd,
      &mut event as *mut libc::epoll_event,
    ))?;

    Ok(())
  }

  /// Waits for events, filling `events` and returning how many arrived.
  ///
  /// An interrupted wait reports zero events.
  pub fn wait(
    &self,
    events: &mut [libc::epoll_event],
    timeout: Option<Duration>,
  ) -> io::Result<usize> {
    // -1 waits forever
    let timeout_ms = match timeout {
      Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
      None => -1,
    };

    let ret = match syscall!(epoll_wait(
      self.epoll_fd.as_raw_fd(),
      events.as_mut_ptr(),
      events.len() as i32,
      timeout_ms,
    )) {
      Ok(n) => n,
      Err(err) if err.kind() == io::ErrorKind::Interrupted => 0,
      Err(err) => return Err(err),
    };

    let n = ret as usize;
    debug_assert!(n <= events.len());

    Ok(n)
  }
}

pub(crate) fn event_key(event: &libc::epoll_event) -> u64 {
  event.u64
}

#[cfg(test)]
mod tests {
  use super::*;

  struct OwnedSocket(RawFd);

  impl Drop for OwnedSocket {
    fn drop(&mut self) {
      let _ = syscall!(close(self.0));
    }
  }

  fn socket_pair() -> io::Result<(OwnedSocket, OwnedSocket)> {
    let mut fds = [0i32; 2];
    syscall!(socketpair(
      libc::AF_UNIX,
      libc::SOCK_STREAM | libc::SOCK_NONBLOCK,
      0,
      fds.as_mut_ptr()
    ))?;
    Ok((OwnedSocket(fds[0]), OwnedSocket(fds[1])))
  }

  fn write_byte(sock: &OwnedSocket) {
    let byte = 1u8;
    syscall!(write(sock.0, (&byte as *const u8).cast(), 1)).unwrap();
  }

  fn events() -> Vec<libc::epoll_event> {
    vec![libc::epoll_event { events: 0, u64: 0 }; 16]
  }

  #[test]
  fn no_data_no_events() {
    let poller = OsPoller::new().unwrap();
    let (a, _b) = socket_pair().unwrap();
    poller.add(a.0, 1, Interest::Read).unwrap();

    let n = poller.wait(&mut events(), Some(Duration::from_millis(10))).unwrap();
    assert_eq!(n, 0);
  }

  #[test]
  fn readable_reported_with_key() {
    let poller = OsPoller::new().unwrap();
    let (a, b) = socket_pair().unwrap();
    poller.add(a.0, 42, Interest::Read).unwrap();
    write_byte(&b);

    let mut events = events();
    let n = poller.wait(&mut events, Some(Duration::from_millis(100))).unwrap();
    assert_eq!(n, 1);
    assert_eq!(event_key(&events[0]), 42);
  }

  #[test]
  fn level_triggered_until_drained() {
    let poller = OsPoller::new().unwrap();
    let (a, b) = socket_pair().unwrap();
    poller.add(a.0, 7, Interest::Read).unwrap();
    write_byte(&b);

    for _ in 0..3 {
      let n = poller.wait(&mut events(), Some(Duration::ZERO)).unwrap();
      assert_eq!(n, 1);
    }
  }

  #[test]
  fn no_interest_suppresses_events() {
    let poller = OsPoller::new().unwrap();
    let (a, b) = socket_pair().unwrap();
    poller.add(a.0, 3, Interest::None).unwrap();
    write_byte(&b);

    let n = poller.wait(&mut events(), Some(Duration::ZERO)).unwrap();
    assert_eq!(n, 0);

    poller.modify(a.0, 3, Interest::Read).unwrap();
    let n = poller.wait(&mut events(), Some(Duration::ZERO)).unwrap();
    assert_eq!(n, 1);

    poller.modify(a.0, 3, Interest::None).unwrap();
    let n = poller.wait(&mut events(), Some(Duration::ZERO)).unwrap();
    assert_eq!(n, 0);
  }

  #[test]
  fn delete_unregistered_fails() {
    let poller = OsPoller::new().unwrap();
    let (a, _b) = socket_pair().unwrap();
    assert!(poller.delete(a.0).is_err());

    poller.add(a.0, 1, Interest::Read).unwrap();
    poller.delete(a.0).unwrap();
  }
}
