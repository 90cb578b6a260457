//! The suspend/resume bridge.
//!
//! A syscall whose result depends on an external event runs as a future;
//! the caller's single logical thread parks on the inline waker while the
//! host runtime drives transports, timers and process I/O. Exactly one
//! suspension may be in flight per kernel: a second one is an invariant
//! violation (the caller is single-threaded by construction) and aborts
//! loudly instead of corrupting state.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sandos_vio::InlineWaker;

use crate::Errno;

pub struct Bridge {
    handle: tokio::runtime::Handle,
    in_flight: AtomicBool,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Bridge {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> &tokio::runtime::Handle {
        &self.handle
    }

    /// Suspend the caller on `fut` and resume with its output. The future's
    /// registered timers and listeners are released when it is dropped,
    /// whether it completed or not.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        let was_in_flight = self.in_flight.swap(true, Ordering::SeqCst);
        assert!(
            !was_in_flight,
            "two overlapping suspensions for one logical caller thread",
        );
        let _reset = InFlightGuard(&self.in_flight);

        // Entering the runtime context lets the future create timers; the
        // inline waker parks this thread, not a runtime worker.
        let _enter = self.handle.enter();
        InlineWaker::block_on(fut)
    }

    /// Like [`Self::block_on`] but bounded: when `deadline` elapses first,
    /// the suspension resolves to `ETIMEDOUT` and the abandoned future is
    /// dropped.
    pub fn block_on_deadline<F: Future>(
        &self,
        deadline: Duration,
        fut: F,
    ) -> Result<F::Output, Errno> {
        self.block_on(async { tokio::time::timeout(deadline, fut).await })
            .map_err(|_| Errno::ETIMEDOUT)
    }

    pub fn sleep(&self, duration: Duration) {
        self.block_on(tokio::time::sleep(duration));
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish()
    }
}
