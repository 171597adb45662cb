use std::sync::OnceLock;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio::sync::oneshot;

use crate::error::PanicError;
use crate::group::Registry;

/// How a call ended.
#[derive(Debug)]
pub(crate) enum Outcome<V, E> {
    /// The supplier returned.
    Returned(Result<V, E>),
    /// The supplier panicked.
    Panicked(PanicError),
    /// The supplier called [`exit`](crate::exit).
    Exited,
}

/// Response holds the result of a call so it can be passed on a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response<V, E> {
    /// What the supplier returned.
    pub result: Result<V, E>,
    /// Whether the result was given to more than one caller.
    pub shared: bool,
}

pub(crate) struct Waiters<V, E> {
    pub(crate) dups: usize,
    pub(crate) chans: Vec<oneshot::Sender<Response<V, E>>>,
}

/// An in-flight or completed call.
///
/// `outcome` is written once, before the waiters are woken, and only read
/// afterwards. `waiters` is only locked with the group's registry lock held
/// and is frozen once the call completes.
pub(crate) struct Call<V, E> {
    outcome: OnceLock<Outcome<V, E>>,
    done: Mutex<()>,
    cvar: Condvar,
    waiters: Mutex<Waiters<V, E>>,
}

impl<V, E> Call<V, E> {
    pub(crate) fn new(chans: Vec<oneshot::Sender<Response<V, E>>>) -> Call<V, E> {
        Call {
            outcome: OnceLock::new(),
            done: Mutex::new(()),
            cvar: Condvar::new(),
            waiters: Mutex::new(Waiters { dups: 0, chans }),
        }
    }

    /// Borrowing the registry proves its lock is held.
    pub(crate) fn waiters<'a, K>(
        &'a self,
        _registry: &'a Registry<K, V, E>,
    ) -> MutexGuard<'a, Waiters<V, E>> {
        self.waiters.lock()
    }

    /// Stores the outcome and wakes every blocked duplicate.
    pub(crate) fn complete(&self, outcome: Outcome<V, E>) -> &Outcome<V, E> {
        let outcome = self.outcome.get_or_init(|| outcome);
        let _done = self.done.lock();
        self.cvar.notify_all();
        outcome
    }

    /// Blocks until the call completes.
    pub(crate) fn wait(&self) -> &Outcome<V, E> {
        let mut done = self.done.lock();
        loop {
            if let Some(outcome) = self.outcome.get() {
                return outcome;
            }
            self.cvar.wait(&mut done);
        }
    }
}
