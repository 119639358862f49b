//! The loop context every other object is registered against.
//!
//! An [`EventLoop`] owns a current-thread tokio runtime. Registered events,
//! HTTP listeners and client exchanges are tasks on that runtime, so they only
//! make progress while some thread is inside [`EventLoop::run_forever`] or
//! [`EventLoop::run_once`], and all of their callbacks run serialized on that
//! thread.

use std::future::Future;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::{Builder, Runtime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::connection::HttpConnection;
use crate::dns::DnsResolver;
use crate::error::{Error, OrFatal, Result};
use crate::event::{EventCallback, EventFlags, Registration};
use crate::server::HttpEndpoint;
use crate::signal::ExitSignals;

/// Cloneable token that asks a loop to stop.
///
/// Requests are level-based: one issued while the loop is idle is honored by
/// the next [`EventLoop::run_forever`] call, which consumes it on return.
#[derive(Debug, Clone)]
pub struct ExitHandle {
    requested: Arc<watch::Sender<bool>>,
}

impl ExitHandle {
    /// Asks the loop to stop after its current dispatch pass. Callable from
    /// any thread, including from inside a loop callback.
    pub fn request_exit(&self) {
        self.requested.send_replace(true);
    }

    /// Returns `true` while an exit request is outstanding.
    pub fn is_requested(&self) -> bool {
        *self.requested.borrow()
    }
}

/// Owns one loop context.
///
/// The loop must outlive every object registered against it.
/// [`WatchedEvent`](crate::WatchedEvent) and [`HttpServer`](crate::HttpServer)
/// borrow it, so the compiler enforces that;
/// [`OutboundConnection`](crate::OutboundConnection) keeps it alive through
/// an [`Arc`]. Dropping the last owner from inside one of the loop's own
/// callbacks is not supported.
///
/// # Examples
///
/// ```rust,no_run
/// use evbridge::{EventFlags, EventLoop, WatchedEvent};
///
/// let event_loop = EventLoop::new();
/// let exit = event_loop.exit_handle();
/// let tick = WatchedEvent::timer(&event_loop, move |_fd, flags| {
///     assert!(flags.contains(EventFlags::TIMEOUT));
///     exit.request_exit();
/// });
/// tick.arm(0.25);
/// event_loop.run_forever();
/// ```
pub struct EventLoop {
    // Dropped before the runtime.
    dns: Mutex<Option<Arc<DnsResolver>>>,
    exit: ExitHandle,
    runtime: Runtime,
}

impl EventLoop {
    /// Creates the loop context. The loop accepts work from any thread.
    ///
    /// # Panics
    ///
    /// Fatal if the runtime cannot be created.
    pub fn new() -> Self {
        Self::build().or_fatal()
    }

    fn build() -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .thread_name("evbridge-loop")
            .build()
            .map_err(Error::Runtime)?;

        let (requested, _) = watch::channel(false);
        Ok(Self {
            dns: Mutex::new(None),
            exit: ExitHandle {
                requested: Arc::new(requested),
            },
            runtime,
        })
    }

    /// Runs the loop until an exit is requested through an [`ExitHandle`] or
    /// the process receives SIGHUP, SIGINT or SIGTERM.
    ///
    /// A pending exit request is consumed when this returns.
    ///
    /// # Panics
    ///
    /// Fatal if the signal handlers cannot be installed, or when called from
    /// inside a loop callback.
    pub fn run_forever(&self) {
        let mut requested = self.exit.requested.subscribe();
        let exit = self.exit.clone();

        self.runtime.block_on(async move {
            let mut signals = ExitSignals::install().or_fatal();
            info!("event loop running");
            tokio::select! {
                _ = requested.wait_for(|requested| *requested) => {
                    debug!("exit requested");
                }
                signal = signals.recv() => {
                    info!(signal, "exit signal received");
                    exit.request_exit();
                }
            }
        });

        self.exit.requested.send_replace(false);
        info!("event loop stopped");
    }

    /// Runs one non-blocking pass: everything already runnable, then whatever
    /// the I/O and timer drivers report ready right now.
    pub fn run_once(&self) {
        self.runtime.block_on(async {
            // First pass polls the drivers, second runs what they woke.
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
        });
    }

    /// Returns a token that stops [`run_forever`](Self::run_forever).
    pub fn exit_handle(&self) -> ExitHandle {
        self.exit.clone()
    }

    /// Shorthand for `self.exit_handle().request_exit()`.
    pub fn request_exit(&self) {
        self.exit.request_exit();
    }

    /// Schedules `f` to run on the loop thread during its next pass.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.runtime.spawn(async move { f() });
    }

    /// Returns the loop's resolver, creating it on first use.
    ///
    /// Safe to call from several threads at once; all callers get the same
    /// instance.
    pub fn dns(&self) -> Arc<DnsResolver> {
        let mut dns = self.dns.lock().unwrap_or_else(PoisonError::into_inner);
        let resolver =
            dns.get_or_insert_with(|| Arc::new(DnsResolver::new(self.runtime.handle().clone())));
        Arc::clone(resolver)
    }

    /// Registers interest in `fd` and binds it to `callback`. Nothing is
    /// delivered until the returned registration is armed.
    pub(crate) fn new_event_registration(
        &self,
        fd: RawFd,
        interest: EventFlags,
        callback: EventCallback,
    ) -> Arc<Registration> {
        let _context = self.runtime.enter();
        Arc::new(Registration::new(fd, interest, callback).or_fatal())
    }

    pub(crate) fn new_http_endpoint(&self) -> HttpEndpoint {
        HttpEndpoint::new()
    }

    pub(crate) fn new_http_connection(&self, host: &str, port: u16) -> HttpConnection {
        HttpConnection::new(self.runtime.handle().clone(), self.dns(), host, port)
    }

    pub(crate) fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(task)
    }

    /// Runs `f` inside the loop's runtime context.
    pub(crate) fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        let _context = self.runtime.enter();
        f()
    }

    /// Cancels `tasks` and, unless called from inside the loop, waits until
    /// every one of them has been dropped.
    pub(crate) fn drain(&self, tasks: Vec<JoinHandle<()>>) {
        for task in &tasks {
            task.abort();
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            return;
        }
        self.runtime.block_on(async move {
            for task in tasks {
                let _ = task.await;
            }
            // Lets children aborted by the drop of those tasks go too.
            tokio::task::yield_now().await;
        });
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let dns = self.dns.get_mut().unwrap_or_else(PoisonError::into_inner);
        if dns.take().is_some() {
            debug!("resolver released");
        }
    }
}
