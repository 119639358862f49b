//! Termination signals stop a running loop.
//!
//! Kept in its own test binary: the signals are process-wide and would stop
//! loops belonging to unrelated tests running in parallel.

use std::thread;

use evbridge::EventLoop;

fn raise(signal: libc::c_int) {
    // SAFETY: raise only queues a signal for the calling thread. tokio's
    // handler for it is installed by the time a posted callback runs.
    let rc = unsafe { libc::raise(signal) };
    assert_eq!(rc, 0);
}

#[test]
fn exit_signals_stop_run_forever() {
    let event_loop = EventLoop::new();
    let exit = event_loop.exit_handle();

    for signal in [libc::SIGHUP, libc::SIGINT, libc::SIGTERM] {
        event_loop.post(move || {
            thread::spawn(move || raise(signal)).join().unwrap();
        });
        event_loop.run_forever();
        assert!(!exit.is_requested());
    }
}
