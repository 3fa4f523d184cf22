/// What a watch asks the poller to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
  /// Registered, but nothing is reported.
  None,
  Read,
}

impl Interest {
  pub fn is_readable(&self) -> bool {
    matches!(self, Self::Read)
  }

  #[cfg(linux)]
  pub(crate) fn epoll_events(&self) -> u32 {
    match self {
      Self::None => 0,
      Self::Read => libc::EPOLLIN as u32,
    }
  }
}
