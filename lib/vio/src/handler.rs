use std::{
    collections::HashSet,
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll, Waker},
};

/// The kind of readiness a stream or transport can signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterestType {
    Readable,
    Writable,
    Closed,
    Error,
}

impl InterestType {
    pub const ALL: [InterestType; 4] = [
        InterestType::Readable,
        InterestType::Writable,
        InterestType::Closed,
        InterestType::Error,
    ];
}

/// Receives readiness events pushed by host-side callbacks (transport
/// messages, pipe writes, process exits).
///
/// Handlers must queue their effects; they are invoked on the host's event
/// loop and must not mutate caller-owned state directly.
pub trait InterestHandler: Send + Sync {
    fn push_interest(&mut self, interest: InterestType);
    fn pop_interest(&mut self, interest: InterestType) -> bool;
    fn has_interest(&self, interest: InterestType) -> bool;
}

#[derive(Default)]
struct InterestSetState {
    triggered: HashSet<InterestType>,
    wakers: Vec<Waker>,
}

/// A shared set of triggered interests.
///
/// The producer half lives inside a resource (socket peer, pipe, process
/// record) and is fed from host callbacks; the consumer half is awaited by a
/// suspended syscall through [`InterestSet::wait_any`].
#[derive(Clone, Default)]
pub struct InterestSet {
    state: Arc<Mutex<InterestSetState>>,
}

impl InterestSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an interest and wake every pending waiter.
    pub fn push(&self, interest: InterestType) {
        let mut state = self.state.lock().unwrap();
        state.triggered.insert(interest);
        for waker in state.wakers.drain(..) {
            waker.wake();
        }
    }

    /// Consume an interest if it has been triggered.
    pub fn pop(&self, interest: InterestType) -> bool {
        self.state.lock().unwrap().triggered.remove(&interest)
    }

    pub fn contains(&self, interest: InterestType) -> bool {
        self.state.lock().unwrap().triggered.contains(&interest)
    }

    /// Resolves as soon as any of `interests` has been triggered, consuming
    /// the triggering interest.
    ///
    /// Dropping the future abandons its waker slot, so a timed-out wait
    /// leaks nothing.
    pub fn wait_any(&self, interests: &[InterestType]) -> WaitAny {
        WaitAny {
            set: self.clone(),
            interests: interests.to_vec(),
        }
    }
}

impl InterestHandler for InterestSet {
    fn push_interest(&mut self, interest: InterestType) {
        InterestSet::push(self, interest)
    }

    fn pop_interest(&mut self, interest: InterestType) -> bool {
        InterestSet::pop(self, interest)
    }

    fn has_interest(&self, interest: InterestType) -> bool {
        self.contains(interest)
    }
}

impl fmt::Debug for InterestSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("InterestSet")
            .field("triggered", &state.triggered)
            .field("waiters", &state.wakers.len())
            .finish()
    }
}

pub struct WaitAny {
    set: InterestSet,
    interests: Vec<InterestType>,
}

impl Future for WaitAny {
    type Output = InterestType;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.set.state.lock().unwrap();
        for interest in self.interests.iter() {
            if state.triggered.remove(interest) {
                return Poll::Ready(*interest);
            }
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Adapter that forwards one interest into a task waker.
pub struct InterestWaker {
    waker: Waker,
    fired: HashSet<InterestType>,
}

impl InterestHandler for InterestWaker {
    fn push_interest(&mut self, interest: InterestType) {
        self.fired.insert(interest);
        self.waker.wake_by_ref();
    }

    fn pop_interest(&mut self, interest: InterestType) -> bool {
        self.fired.remove(&interest)
    }

    fn has_interest(&self, interest: InterestType) -> bool {
        self.fired.contains(&interest)
    }
}

pub fn handler_into_waker(waker: Waker) -> Box<dyn InterestHandler + Send + Sync> {
    Box::new(InterestWaker {
        waker,
        fired: HashSet::new(),
    })
}
