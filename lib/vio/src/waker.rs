use std::{
    sync::{Arc, Condvar, Mutex},
    task::{Context, Poll, RawWaker, RawWakerVTable, Waker},
};

use futures::Future;

/// Blocks a native thread on a future without an executor.
///
/// This is the suspension primitive of the whole system: the sandboxed
/// caller's single logical thread parks here while the host event loop drives
/// the transports and timers that eventually wake it.
pub struct InlineWaker {
    lock: Mutex<()>,
    condvar: Condvar,
}

impl InlineWaker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        })
    }

    fn wake_now(&self) {
        let _guard = self.lock.lock().unwrap();
        self.condvar.notify_all();
    }

    pub fn as_waker(self: &Arc<Self>) -> Waker {
        let s: *const Self = Arc::into_raw(Arc::clone(self));
        let raw_waker = RawWaker::new(s as *const (), &VTABLE);
        unsafe { Waker::from_raw(raw_waker) }
    }

    pub fn block_on<'a, A>(task: impl Future<Output = A> + 'a) -> A {
        // Create the waker
        let inline_waker = Self::new();
        let waker = inline_waker.as_waker();
        let mut cx = Context::from_waker(&waker);

        // We loop waiting for the waker to be woken, then we poll again
        let mut task = Box::pin(task);
        loop {
            let lock = inline_waker.lock.lock().unwrap();
            match task.as_mut().poll(&mut cx) {
                Poll::Pending => {
                    let _lock = inline_waker.condvar.wait(lock).unwrap();
                }
                Poll::Ready(ret) => {
                    return ret;
                }
            }
        }
    }
}

fn inline_waker_wake(s: &InlineWaker) {
    let waker_arc = unsafe { Arc::from_raw(s) };
    waker_arc.wake_now();
}

fn inline_waker_clone(s: &InlineWaker) -> RawWaker {
    let arc = unsafe { Arc::from_raw(s) };
    std::mem::forget(arc.clone());
    RawWaker::new(Arc::into_raw(arc) as *const (), &VTABLE)
}

const VTABLE: RawWakerVTable = unsafe {
    RawWakerVTable::new(
        |s| inline_waker_clone(&*(s as *const InlineWaker)), // clone
        |s| inline_waker_wake(&*(s as *const InlineWaker)),  // wake
        |s| (*(s as *const InlineWaker)).wake_now(), // wake by ref (don't decrease refcount)
        |s| drop(Arc::from_raw(s as *const InlineWaker)), // decrease refcount
    )
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InterestSet, InterestType};

    #[test]
    fn block_on_ready_future() {
        assert_eq!(InlineWaker::block_on(async { 40 + 2 }), 42);
    }

    #[test]
    fn block_on_wakes_from_another_thread() {
        let set = InterestSet::new();
        let pusher = set.clone();
        let thread = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            pusher.push(InterestType::Closed);
        });

        let fired = InlineWaker::block_on(set.wait_any(&[InterestType::Closed]));
        assert_eq!(fired, InterestType::Closed);
        thread.join().unwrap();
    }
}
