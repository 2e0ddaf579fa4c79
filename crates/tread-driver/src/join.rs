//! 带超时的线程 join

use crate::error::DriverError;
use std::thread::{JoinHandle, spawn};
use std::time::Duration;

/// Extension trait for timeout-capable thread joins
pub trait JoinTimeout {
    /// Returns `Ok(true)` if the thread finished normally, `Ok(false)` if it panicked,
    /// `Err(())` if it is still running after `timeout`.
    fn join_timeout(self, timeout: Duration) -> Result<bool, ()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> Result<bool, ()> {
        let (tx, rx) = crossbeam_channel::bounded(1);

        // Watchdog thread joins the target so the caller can wait with a deadline
        spawn(move || {
            let finished_ok = self.join().is_ok();
            // Receiver may already have timed out
            let _ = tx.send(finished_ok);
        });

        match rx.recv_timeout(timeout) {
            Ok(finished_ok) => Ok(finished_ok),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(()),
            // Watchdog dropped the sender without sending: the join itself panicked
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Ok(false),
        }
    }
}

/// join 工作线程并把结果映射为 [`DriverError`]
pub fn join_worker<T: Send + 'static>(
    handle: JoinHandle<T>,
    name: &str,
    timeout: Duration,
) -> Result<(), DriverError> {
    match handle.join_timeout(timeout) {
        Ok(true) => Ok(()),
        Ok(false) => Err(DriverError::ThreadPanicked {
            name: name.to_string(),
        }),
        Err(()) => Err(DriverError::JoinTimeout {
            name: name.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
