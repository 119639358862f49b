//! Descriptor readiness and timer events.
//!
//! A [`WatchedEvent`] pairs one registration on an [`EventLoop`] with a
//! callback. Registration happens at construction; nothing is delivered until
//! the event is armed. Each arming delivers at most one callback unless the
//! interest includes [`EventFlags::PERSIST`].

use std::fmt;
use std::io;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, OrFatal, Result};
use crate::event_loop::EventLoop;

/// Interest and outcome flags for a [`WatchedEvent`].
///
/// The same type describes what an event waits for and what it observed when
/// its callback fires.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventFlags(u16);

impl EventFlags {
    /// The event's timeout expired before the interest condition was met.
    pub const TIMEOUT: Self = Self(0x01);
    /// The descriptor is readable (or hung up).
    pub const READ: Self = Self(0x02);
    /// The descriptor is writable.
    pub const WRITE: Self = Self(0x04);
    /// Keep the event armed after it fires.
    pub const PERSIST: Self = Self(0x10);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn io_interest(self) -> Option<Interest> {
        match (self.contains(Self::READ), self.contains(Self::WRITE)) {
            (true, true) => Some(Interest::READABLE.add(Interest::WRITABLE)),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

impl BitOr for EventFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for EventFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(EventFlags, &str); 4] = [
            (EventFlags::TIMEOUT, "TIMEOUT"),
            (EventFlags::READ, "READ"),
            (EventFlags::WRITE, "WRITE"),
            (EventFlags::PERSIST, "PERSIST"),
        ];

        if self.is_empty() {
            return f.write_str("(empty)");
        }
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Callback invoked with the watched descriptor and the observed flags.
pub type EventCallback = Box<dyn FnMut(RawFd, EventFlags) + Send + 'static>;

/// One registration on a loop: the descriptor's interest and its callback.
///
/// Holds a duplicate of the caller's descriptor so several events may watch
/// the same descriptor independently.
pub(crate) struct Registration {
    fd: RawFd,
    interest: EventFlags,
    io: Option<AsyncFd<OwnedFd>>,
    callback: Mutex<EventCallback>,
}

impl Registration {
    /// Must run inside the loop's runtime context.
    pub(crate) fn new(fd: RawFd, interest: EventFlags, callback: EventCallback) -> Result<Self> {
        let io = match interest.io_interest() {
            Some(io_interest) if fd >= 0 => {
                let register = |source| Error::Register { fd, source };
                // SAFETY: the descriptor is only borrowed for the duration of
                // the dup; the caller keeps it open while the event exists.
                let owned = unsafe { BorrowedFd::borrow_raw(fd) }
                    .try_clone_to_owned()
                    .map_err(register)?;
                Some(AsyncFd::with_interest(owned, io_interest).map_err(register)?)
            }
            _ => None,
        };

        Ok(Self {
            fd,
            interest,
            io,
            callback: Mutex::new(callback),
        })
    }

    /// Trampoline from the loop back into the owner's callback.
    fn dispatch(&self, fired: EventFlags) {
        let mut callback = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        (callback)(self.fd, fired);
    }

    /// Waits until the descriptor is ready for any of the interest flags.
    ///
    /// Readiness is level-triggered: a descriptor that is still ready when the
    /// event is re-armed reports again immediately.
    async fn readiness(&self) -> io::Result<EventFlags> {
        let (Some(io), Some(io_interest)) = (&self.io, self.interest.io_interest()) else {
            return std::future::pending().await;
        };

        loop {
            let ready = probe(io.get_ref().as_raw_fd(), self.interest);
            if !ready.is_empty() {
                return Ok(ready);
            }
            let mut guard = io.ready(io_interest).await?;
            guard.clear_ready();
        }
    }

    /// One armed round: readiness, timeout, or neither, then the callback.
    async fn watch(self: Arc<Self>, timeout: Option<Duration>) {
        loop {
            let waited = match timeout {
                Some(limit) => tokio::time::timeout(limit, self.readiness())
                    .await
                    .unwrap_or(Ok(EventFlags::TIMEOUT)),
                None => self.readiness().await,
            };

            let fired = match waited {
                Ok(fired) => fired,
                Err(e) => {
                    warn!(fd = self.fd, error = %e, "readiness wait failed; event disarmed");
                    return;
                }
            };

            debug!(fd = self.fd, ?fired, "event fired");
            self.dispatch(fired);

            if !self.interest.contains(EventFlags::PERSIST) {
                return;
            }
        }
    }
}

/// Zero-timeout poll(2) of `fd` for the interest flags.
fn probe(fd: RawFd, interest: EventFlags) -> EventFlags {
    let mut events = 0;
    if interest.contains(EventFlags::READ) {
        events |= libc::POLLIN;
    }
    if interest.contains(EventFlags::WRITE) {
        events |= libc::POLLOUT;
    }

    let mut pollfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    // SAFETY: a single valid pollfd and a zero timeout; poll does not retain it.
    let n = unsafe { libc::poll(&mut pollfd, 1, 0) };
    if n <= 0 {
        return EventFlags::empty();
    }

    let hangup = pollfd.revents & (libc::POLLHUP | libc::POLLERR) != 0;
    let mut fired = EventFlags::empty();
    if interest.contains(EventFlags::READ) && (pollfd.revents & libc::POLLIN != 0 || hangup) {
        fired |= EventFlags::READ;
    }
    if interest.contains(EventFlags::WRITE) && (pollfd.revents & libc::POLLOUT != 0 || hangup) {
        fired |= EventFlags::WRITE;
    }
    fired
}

/// Splits a timeout in seconds into whole seconds and microseconds.
///
/// Negative (and NaN) timeouts mean "wait indefinitely" and yield `None`.
fn timeout_from_secs(seconds: f64) -> Result<Option<Duration>> {
    if seconds.is_nan() || seconds < 0.0 {
        return Ok(None);
    }
    if !seconds.is_finite() || seconds >= u64::MAX as f64 {
        return Err(Error::InvalidTimeout { seconds });
    }

    let whole = seconds.trunc();
    let micros = ((seconds - whole) * 1_000_000.0) as u32;
    Ok(Some(Duration::new(whole as u64, micros * 1_000)))
}

/// A registered interest in a descriptor and/or a timeout, with its callback.
///
/// Borrows its [`EventLoop`], which therefore outlives it. Dropping the event
/// unregisters it whether or not it was ever armed; once `drop` returns (outside
/// a loop callback) the callback will not run again.
///
/// # Examples
///
/// ```rust,no_run
/// use std::os::fd::AsRawFd;
/// use std::os::unix::net::UnixStream;
///
/// use evbridge::{EventFlags, EventLoop, WatchedEvent};
///
/// let (reader, _writer) = UnixStream::pair().unwrap();
/// let event_loop = EventLoop::new();
/// let readable = WatchedEvent::new(
///     &event_loop,
///     reader.as_raw_fd(),
///     EventFlags::READ,
///     |fd, flags| println!("fd {fd}: {flags:?}"),
/// );
/// // Wait up to one and a half seconds for data.
/// readable.arm(1.5);
/// event_loop.run_once();
/// ```
pub struct WatchedEvent<'a> {
    event_loop: &'a EventLoop,
    registration: Arc<Registration>,
    armed: Mutex<Option<JoinHandle<()>>>,
}

impl<'a> WatchedEvent<'a> {
    /// Registers `interest` on `fd` with `event_loop`. Does not arm the event.
    ///
    /// Pass a negative `fd`, or no [`READ`](EventFlags::READ) /
    /// [`WRITE`](EventFlags::WRITE) interest, for a pure timer.
    ///
    /// # Panics
    ///
    /// Fatal if the descriptor cannot be registered (closed, or of a kind the
    /// platform cannot poll, such as a regular file).
    pub fn new<F>(event_loop: &'a EventLoop, fd: RawFd, interest: EventFlags, callback: F) -> Self
    where
        F: FnMut(RawFd, EventFlags) + Send + 'static,
    {
        let registration = event_loop.new_event_registration(fd, interest, Box::new(callback));
        Self {
            event_loop,
            registration,
            armed: Mutex::new(None),
        }
    }

    /// A timer: no descriptor, fires only with [`EventFlags::TIMEOUT`].
    pub fn timer<F>(event_loop: &'a EventLoop, callback: F) -> Self
    where
        F: FnMut(RawFd, EventFlags) + Send + 'static,
    {
        Self::new(event_loop, -1, EventFlags::empty(), callback)
    }

    /// A timer that re-fires every timeout period until dropped or disarmed.
    pub fn interval<F>(event_loop: &'a EventLoop, callback: F) -> Self
    where
        F: FnMut(RawFd, EventFlags) + Send + 'static,
    {
        Self::new(event_loop, -1, EventFlags::PERSIST, callback)
    }

    /// Arms the event. A negative `timeout_seconds` waits indefinitely for the
    /// interest condition; otherwise the event also fires with
    /// [`EventFlags::TIMEOUT`] once the timeout elapses.
    ///
    /// Arming an already-armed event restarts it with the new timeout.
    ///
    /// # Panics
    ///
    /// Fatal if the timeout is not representable (infinite or too large).
    pub fn arm(&self, timeout_seconds: f64) {
        let timeout = timeout_from_secs(timeout_seconds).or_fatal();
        let task = self
            .event_loop
            .spawn(Arc::clone(&self.registration).watch(timeout));

        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = armed.replace(task) {
            previous.abort();
        }
    }

    /// Disarms the event without unregistering it. It may be armed again.
    pub fn disarm(&self) {
        let previous = self
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = previous {
            task.abort();
        }
    }

    /// Returns `true` while the event is armed and has not yet fired (or, with
    /// [`EventFlags::PERSIST`], until it is disarmed).
    pub fn is_armed(&self) -> bool {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// The descriptor this event watches (negative for timers).
    pub fn fd(&self) -> RawFd {
        self.registration.fd
    }

    /// The interest flags the event was registered with.
    pub fn interest(&self) -> EventFlags {
        self.registration.interest
    }
}

impl Drop for WatchedEvent<'_> {
    fn drop(&mut self) {
        let armed = self
            .armed
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.event_loop.drain(armed.into_iter().collect());
        debug!(fd = self.registration.fd, "event unregistered");
    }
}
