use core::borrow::Borrow;
use core::fmt;
use core::hash::Hash;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic;
use std::sync::Arc;
use std::{mem, process, thread};
use tokio::sync::oneshot;
use tracing::{error, instrument, trace};

use crate::call::{Call, Outcome, Response};
use crate::error::{exit, ConfigError, PanicError};
use crate::options::Options;
use crate::unwind::catch_supplier;

/// In-flight calls by key.
pub(crate) type Registry<K, V, E> = HashMap<K, Arc<Call<V, E>>>;

struct Inner<K, V, E> {
    registry: Mutex<Option<Registry<K, V, E>>>,
    options: Options,
}

/// Group represents a class of work and creates a space in which units of work
/// can be executed with duplicate suppression.
///
/// Cloning a group is cheap; clones share the same in-flight calls.
pub struct Group<K, V, E>(Arc<Inner<K, V, E>>);

impl<K, V, E> Clone for Group<K, V, E> {
    fn clone(&self) -> Self {
        Group(self.0.clone())
    }
}

impl<K, V, E> Default for Group<K, V, E> {
    fn default() -> Self {
        Group::new()
    }
}

impl<K, V, E> fmt::Debug for Group<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let in_flight = self.0.registry.lock().as_ref().map_or(0, HashMap::len);
        f.debug_struct("Group")
            .field("in_flight", &in_flight)
            .field("options", &self.0.options)
            .finish()
    }
}

impl<K, V, E> Group<K, V, E> {
    pub fn new() -> Group<K, V, E> {
        Group::from_options(Options::default())
    }

    /// Builds a group whose asynchronous calls run on threads shaped by
    /// `options`.
    pub fn with_options(options: Options) -> Result<Group<K, V, E>, ConfigError> {
        options.validate()?;
        Ok(Group::from_options(options))
    }

    fn from_options(options: Options) -> Group<K, V, E> {
        Group(Arc::new(Inner {
            registry: Mutex::new(None),
            options,
        }))
    }

    /// forget tells the group to forget about a key. Future calls for this
    /// key will run their supplier rather than wait for an earlier call to
    /// complete. Callers already waiting on that earlier call still receive
    /// its result.
    pub fn forget<Q>(&self, key: &Q)
    where
        K: Borrow<Q> + Hash + Eq,
        Q: Hash + Eq + ?Sized,
    {
        if let Some(registry) = self.0.registry.lock().as_mut() {
            if registry.remove(key).is_some() {
                trace!("Forgot in-flight call");
            }
        }
    }
}

impl<K, V, E> Group<K, V, E>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
    E: Clone,
{
    /// work executes and returns the results of the given function, making
    /// sure that only one execution is in-flight for a given key at a
    /// time. If a duplicate comes in, the duplicate caller waits for the
    /// original to complete and receives the same results.
    /// The returned flag indicates whether the result was given to multiple callers.
    ///
    /// The first caller runs `f` on its own thread. If `f` panics, every
    /// caller panics with the same [`PanicError`]; if `f` calls
    /// [`exit`](crate::exit), every caller exits.
    #[instrument(level = "trace", skip(self, f))]
    pub fn work<F>(&self, key: K, f: F) -> (Result<V, E>, bool)
    where
        F: FnOnce() -> Result<V, E>,
    {
        let mut guard = self.0.registry.lock();
        let registry = guard.get_or_insert_with(HashMap::new);
        if let Some(call) = registry.get(&key) {
            let call = call.clone();
            call.waiters(registry).dups += 1;
            drop(guard);

            trace!("Duplicate call, waiting...");
            return match call.wait() {
                Outcome::Returned(result) => {
                    trace!("Shared result returned");
                    (result.clone(), true)
                }
                Outcome::Panicked(err) => {
                    error!("Shared call panicked");
                    panic::panic_any(err.clone())
                }
                Outcome::Exited => {
                    trace!("Shared call exited");
                    exit()
                }
            };
        }

        let call = Arc::new(Call::new(Vec::new()));
        registry.insert(key.clone(), call.clone());
        drop(guard);

        self.execute(&call, key, f)
    }

    /// work_chan is like work but returns a channel that will receive the
    /// results when they are ready.
    ///
    /// It never blocks: the first caller's `f` runs on a thread of its own.
    /// The channel yields exactly one [`Response`]; its sender is dropped
    /// without a value if `f` called [`exit`](crate::exit). If `f` panics
    /// while a channel is waiting, the process aborts.
    #[instrument(level = "trace", skip(self, f))]
    pub fn work_chan<F>(&self, key: K, f: F) -> oneshot::Receiver<Response<V, E>>
    where
        F: FnOnce() -> Result<V, E> + Send + 'static,
        K: Send + 'static,
        V: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut guard = self.0.registry.lock();
        let registry = guard.get_or_insert_with(HashMap::new);
        if let Some(call) = registry.get(&key) {
            let mut waiters = call.waiters(registry);
            waiters.dups += 1;
            waiters.chans.push(tx);
            trace!("Duplicate call, channel registered");
            return rx;
        }

        let call = Arc::new(Call::new(vec![tx]));
        registry.insert(key.clone(), call.clone());
        drop(guard);

        let group = self.clone();
        self.spawn(move || {
            group.execute(&call, key, f);
        });
        rx
    }

    // A call that cannot start would leave its waiters hanging forever.
    fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        match self.0.options.spawn(job) {
            Ok(_) => trace!("Call started on background thread"),
            Err(err) => {
                error!(error = %err, "Failed to start background thread, aborting");
                eprintln!("singleflight: failed to start background thread: {err}");
                process::abort();
            }
        }
    }

    /// Runs the single call for a key and publishes how it ended.
    fn execute<F>(&self, call: &Arc<Call<V, E>>, key: K, f: F) -> (Result<V, E>, bool)
    where
        F: FnOnce() -> Result<V, E>,
    {
        trace!("working...");
        let outcome = catch_supplier(f);

        let mut guard = self.0.registry.lock();
        let registry = guard.get_or_insert_with(HashMap::new);
        // After a forget the key may belong to a newer call.
        if registry
            .get(&key)
            .is_some_and(|active| Arc::ptr_eq(active, call))
        {
            registry.remove(&key);
            trace!("Entry removed");
        }
        let outcome = call.complete(outcome);
        let (shared, chans) = {
            let mut waiters = call.waiters(registry);
            (waiters.dups > 0, mem::take(&mut waiters.chans))
        };

        match outcome {
            Outcome::Returned(result) => {
                for tx in chans {
                    // The receiver may already be gone.
                    let _ = tx.send(Response {
                        result: result.clone(),
                        shared,
                    });
                }
                drop(guard);
                trace!("Work done");
                (result.clone(), shared)
            }
            Outcome::Exited => {
                drop(guard);
                drop(chans);
                trace!("Supplier exited, continuing exit");
                exit()
            }
            Outcome::Panicked(err) => {
                drop(guard);
                if chans.is_empty() {
                    error!("Supplier panicked");
                    panic::panic_any(err.clone())
                }
                // A panic here could be caught by whoever owns this thread,
                // leaving the channel waiters without a result and the
                // process running.
                drop(chans);
                abort_detached(err.clone());
                loop {
                    thread::park();
                }
            }
        }
    }
}

/// Aborts the process from a fresh thread so that nothing on the calling
/// thread can intercept it.
fn abort_detached(err: PanicError) {
    let spawned = thread::Builder::new()
        .name("singleflight-abort".into())
        .spawn(move || {
            error!(error = %err, "Supplier panicked with channel waiters, aborting");
            eprintln!("panic: {err}");
            process::abort()
        });
    if spawned.is_err() {
        process::abort();
    }
}

#[cfg(test)]
impl<K, V, E> Group<K, V, E>
where
    K: Hash + Eq,
{
    /// Duplicates attached to the active call for `key`, if any.
    fn duplicates(&self, key: &K) -> Option<usize> {
        let guard = self.0.registry.lock();
        let registry = guard.as_ref()?;
        let call = registry.get(key)?;
        let dups = call.waiters(registry).dups;
        Some(dups)
    }
}
