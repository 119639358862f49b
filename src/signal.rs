//! Termination signals as loop-exit triggers.
//!
//! tokio installs a single process-wide handler per signal and fans each
//! delivery out to every listener, so any number of loops can wait on the
//! same signals without touching the process signal disposition themselves.

use tokio::signal::unix::{Signal, SignalKind, signal};

use crate::error::{Error, Result};

/// Listeners for SIGHUP, SIGINT and SIGTERM.
///
/// Must be created inside the loop's runtime context.
pub(crate) struct ExitSignals {
    hangup: Signal,
    interrupt: Signal,
    terminate: Signal,
}

impl ExitSignals {
    pub(crate) fn install() -> Result<Self> {
        Ok(Self {
            hangup: listen(SignalKind::hangup(), "SIGHUP")?,
            interrupt: listen(SignalKind::interrupt(), "SIGINT")?,
            terminate: listen(SignalKind::terminate(), "SIGTERM")?,
        })
    }

    /// Waits for the next signal and returns its name.
    pub(crate) async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

fn listen(kind: SignalKind, name: &'static str) -> Result<Signal> {
    signal(kind).map_err(|source| Error::Signal {
        signal: name,
        source,
    })
}
