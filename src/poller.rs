//! Thin wrapper over Linux epoll plus an eventfd-based waker.
//!
//! Every registration carries a caller-chosen 64-bit token that comes back
//! with the readiness event. `add`/`modify`/`delete` only take `&self`, so
//! worker threads can re-arm a one-shot descriptor while the reactor thread
//! is blocked in [`Epoller::wait`].

use std::io;
use std::ops::{BitOr, BitOrAssign};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Interest / readiness bit set, a direct image of the epoll event mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u32);

impl Interest {
    pub const READABLE: Interest = Interest(libc::EPOLLIN as u32);
    pub const WRITABLE: Interest = Interest(libc::EPOLLOUT as u32);
    /// Peer shut down its writing half.
    pub const PEER_CLOSED: Interest = Interest(libc::EPOLLRDHUP as u32);
    /// Disable the registration after one delivery until re-armed with `modify`.
    pub const ONESHOT: Interest = Interest(libc::EPOLLONESHOT as u32);
    pub const EDGE: Interest = Interest(libc::EPOLLET as u32);

    pub const fn empty() -> Self {
        Interest(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

/// One ready descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    token: u64,
    mask: u32,
}

impl Event {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn is_readable(&self) -> bool {
        self.mask & libc::EPOLLIN as u32 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.mask & libc::EPOLLOUT as u32 != 0
    }

    /// Error, hangup, or peer half-close.
    pub fn is_hangup(&self) -> bool {
        self.mask & (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0
    }
}

/// Caller-owned batch filled by [`Epoller::wait`].
pub struct Events {
    raw: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            raw: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.raw[..self.len].iter().map(|raw| {
            // epoll_event is packed on some targets; copy the fields out.
            let token = raw.u64;
            let mask = raw.events;
            Event { token, mask }
        })
    }
}

pub struct Epoller {
    fd: OwnedFd,
}

impl Epoller {
    pub fn new() -> io::Result<Self> {
        // SAFETY: no pointers are passed; failure is reported as -1.
        let fd = cvt(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        // SAFETY: epoll_create1 just returned a descriptor nobody else owns.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub fn add(&self, source: &impl AsRawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, source.as_raw_fd(), token, interest)
    }

    pub fn modify(&self, source: &impl AsRawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, source.as_raw_fd(), token, interest)
    }

    pub fn delete(&self, source: &impl AsRawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, source.as_raw_fd(), 0, Interest::empty())
    }

    /// Blocks for up to `timeout_ms` (-1 = forever). An interrupted wait
    /// reports zero events rather than an error.
    pub fn wait(&self, events: &mut Events, timeout_ms: i32) -> io::Result<usize> {
        // SAFETY: the pointer and length describe `events.raw`, which is
        // exclusively borrowed for the call; the kernel fills at most that many.
        let n = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                events.raw.as_mut_ptr(),
                events.raw.len() as i32,
                timeout_ms,
            )
        };
        match cvt(n) {
            Ok(n) => {
                events.len = n as usize;
                Ok(events.len)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                events.len = 0;
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn ctl(&self, op: i32, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest.bits(),
            u64: token,
        };
        // SAFETY: `event` outlives the call and the kernel copies it; for
        // EPOLL_CTL_DEL it is ignored.
        cvt(unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut event) })?;
        Ok(())
    }
}

/// Nonblocking eventfd used to interrupt a blocked [`Epoller::wait`] from another thread.
pub struct Waker {
    fd: OwnedFd,
}

impl Waker {
    pub fn new() -> io::Result<Self> {
        // SAFETY: no pointers are passed; failure is reported as -1.
        let fd = cvt(unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) })?;
        // SAFETY: freshly created descriptor, owned from here on.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub fn wake(&self) -> io::Result<()> {
        let one: u64 = 1;
        // SAFETY: eventfd writes are exactly one u64, read from a live local.
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                (&one as *const u64).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        match cvt(ret as i32) {
            Ok(_) => Ok(()),
            // Counter saturated: a wake-up is already pending.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Clears pending wake-ups so a level-triggered registration goes quiet.
    pub fn drain(&self) {
        let mut counter: u64 = 0;
        // SAFETY: eventfd reads are exactly one u64, written into a live local.
        let ret = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                (&mut counter as *mut u64).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        match cvt(ret as i32) {
            Ok(_) => {}
            // Nothing pending.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => tracing::trace!(error = %e, "Waker drain failed"),
        }
    }
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

fn cvt(ret: i32) -> io::Result<i32> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}
