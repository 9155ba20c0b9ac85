//! The memoizing task engine.
//!
//! A [`Task`] is a reusable, pure computation from an input value to an
//! output. Tasks are defined once (typically at process start) and shared
//! across requests; a [`Ctx`] is created fresh per request and guarantees
//! that each distinct `(task, input)` pair executes at most once within it,
//! no matter how many concurrent callers ask for it.
use std::any::Any;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::TaskError;

pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// Task identities are never reused within a process, so a cache entry can
/// outlive the task that created it without ever aliasing another task.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

type TaskFn<I, O> = Box<dyn Fn(&Ctx, I) -> anyhow::Result<O> + Send + Sync>;

/// A typed unit of computation, memoized per `(task, input)` within a [`Ctx`].
///
/// Identity is the task instance itself, not the function it wraps: two
/// tasks constructed from the same closure cache independently.
pub struct Task<I, O> {
    id: u64,
    func: TaskFn<I, O>,
}

impl<I, O> Task<I, O>
where
    I: Hash + Eq + Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    pub fn new(func: impl Fn(&Ctx, I) -> anyhow::Result<O> + Send + Sync + 'static) -> Self {
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            func: Box::new(func),
        }
    }

    /// Run the task under `ctx`, memoized.
    ///
    /// The first caller for a given `(task, input)` executes the function
    /// body; concurrent callers block only on that execution, not on the
    /// cache lock, and every caller receives the identical output or error.
    /// If the context is already cancelled, returns [`TaskError::Cancelled`]
    /// without touching the cache.
    pub fn run(&self, ctx: &Ctx, input: I) -> Result<O, TaskError> {
        ctx.check()?;

        let cell = ctx.entry_cell(self.id, input.clone());
        let result = cell.get_or_init(|| {
            let value = (self.func)(ctx, input).map_err(TaskError::from)?;
            // A cancellation that fired mid-execution wins over the value.
            ctx.check()?;
            Ok(Arc::new(value) as Dynamic)
        });

        match result {
            // The cache key embeds this task's unique id, so the stored
            // value is always this task's output type.
            Ok(data) => Ok(data.downcast_ref::<O>().unwrap().clone()),
            Err(e) => Err(e.clone()),
        }
    }
}

/// Result cell for one cache entry. `OnceLock` is the run-once guard: the
/// first caller initializes it while later callers wait, then read.
type ResultCell = OnceLock<Result<Dynamic, TaskError>>;

struct CacheEntry {
    cell: Arc<ResultCell>,
    /// Meaningful only when the context has a TTL.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_valid(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }
}

/// Object-safe stand-in for `Hash + Eq` inputs, so heterogeneous tasks can
/// share one cache map.
trait KeyValue: Send + Sync {
    fn dyn_eq(&self, other: &dyn KeyValue) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
    fn as_any(&self) -> &dyn Any;
}

impl<T> KeyValue for T
where
    T: Hash + Eq + Send + Sync + 'static,
{
    fn dyn_eq(&self, other: &dyn KeyValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        self.hash(&mut state);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct TaskKey {
    task: u64,
    input: Box<dyn KeyValue>,
}

impl PartialEq for TaskKey {
    fn eq(&self, other: &Self) -> bool {
        self.task == other.task && self.input.dyn_eq(&*other.input)
    }
}

impl Eq for TaskKey {}

impl Hash for TaskKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.task.hash(state);
        self.input.dyn_hash(state);
    }
}

struct CtxShared {
    cache: RwLock<HashMap<TaskKey, CacheEntry>>,
    ttl: Option<Duration>,
    last_sweep: RwLock<Instant>,
}

/// Per-request execution context: memoization cache plus cancellation scope.
///
/// A `Ctx` with no TTL caches results indefinitely and grows unboundedly, so
/// it must be created fresh per request and discarded at request end. With a
/// TTL it may deliberately be kept across requests to deduplicate expensive,
/// repeatable lookups; expired entries are lazily swept during cache access,
/// at most once per TTL window.
pub struct Ctx {
    shared: Arc<CtxShared>,
    cancel: CancelToken,
}

impl Default for Ctx {
    fn default() -> Self {
        Self::new()
    }
}

impl Ctx {
    pub fn new() -> Self {
        Self::build(None, CancelToken::new())
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::build(Some(ttl), CancelToken::new())
    }

    /// A context whose lifetime is tied to `parent`, typically the request
    /// timeout owned by the HTTP layer.
    pub fn attached(parent: &CancelToken) -> Self {
        Self::build(None, parent.child())
    }

    fn build(ttl: Option<Duration>, cancel: CancelToken) -> Self {
        Self {
            shared: Arc::new(CtxShared {
                cache: RwLock::new(HashMap::new()),
                ttl,
                last_sweep: RwLock::new(Instant::now()),
            }),
            cancel,
        }
    }

    /// Derive a context sharing the same cache map but carrying a
    /// cancellation scope of its own, for a parallel fan-out.
    pub(crate) fn derived(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            cancel: self.cancel.child(),
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Err with [`TaskError::Cancelled`] once this scope has been cancelled.
    pub fn check(&self) -> Result<(), TaskError> {
        if self.cancel.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Fetch the run-once cell for `(task_id, input)`, inserting a fresh one
    /// when the entry is absent or expired. Fast path is a read lock; the
    /// write lock is taken only to insert, with a double check under it.
    fn entry_cell<I>(&self, task_id: u64, input: I) -> Arc<ResultCell>
    where
        I: Hash + Eq + Send + Sync + 'static,
    {
        self.maybe_sweep();

        let key = TaskKey {
            task: task_id,
            input: Box::new(input),
        };

        {
            let cache = self.shared.cache.read().unwrap();
            if let Some(entry) = cache.get(&key) {
                if entry.is_valid(Instant::now()) {
                    return entry.cell.clone();
                }
                // Expired between sweeps; fall through to recreate rather
                // than serve stale data.
            }
        }

        let mut cache = self.shared.cache.write().unwrap();
        let now = Instant::now();

        if let Some(entry) = cache.get(&key) {
            if entry.is_valid(now) {
                return entry.cell.clone();
            }
        }

        let cell = Arc::new(ResultCell::new());
        cache.insert(
            key,
            CacheEntry {
                cell: cell.clone(),
                expires_at: self.shared.ttl.map(|ttl| now + ttl),
            },
        );
        cell
    }

    /// Delete all expired entries, at most once per TTL window. Triggered by
    /// access, not a background timer, so the cost is amortized over reads.
    fn maybe_sweep(&self) {
        let Some(ttl) = self.shared.ttl else { return };

        let now = Instant::now();
        {
            let last = self.shared.last_sweep.read().unwrap();
            if now.duration_since(*last) < ttl {
                return;
            }
        }

        let mut last = self.shared.last_sweep.write().unwrap();
        if now.duration_since(*last) < ttl {
            return;
        }

        let mut cache = self.shared.cache.write().unwrap();
        cache.retain(|_, entry| entry.is_valid(now));
        *last = now;
    }

    #[cfg(test)]
    fn cache_len(&self) -> usize {
        self.shared.cache.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn counting_task(counter: Arc<AtomicUsize>) -> Task<u32, u32> {
        Task::new(move |_, input| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(input * 2)
        })
    }

    #[test]
    fn test_memoizes_per_input() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = counting_task(counter.clone());
        let ctx = Ctx::new();

        assert_eq!(task.run(&ctx, 21).unwrap(), 42);
        assert_eq!(task.run(&ctx, 21).unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert_eq!(task.run(&ctx, 5).unwrap(), 10);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.cache_len(), 2);
    }

    #[test]
    fn test_concurrent_callers_execute_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = Arc::new(Task::new({
            let counter = counter.clone();
            move |_, input: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                Ok(input + 1)
            }
        }));
        let ctx = Arc::new(Ctx::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let task = task.clone();
                let ctx = ctx.clone();
                thread::spawn(move || task.run(&ctx, 7).unwrap())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 8);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tasks_cache_independently() {
        let a = Task::new(|_, input: u32| Ok(input));
        let b = Task::new(|_, input: u32| Ok(input + 100));
        let ctx = Ctx::new();

        assert_eq!(a.run(&ctx, 1).unwrap(), 1);
        assert_eq!(b.run(&ctx, 1).unwrap(), 101);
    }

    #[test]
    fn test_errors_are_cached() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = Task::new({
            let counter = counter.clone();
            move |_, _: u32| -> anyhow::Result<u32> {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("boom"))
            }
        });
        let ctx = Ctx::new();

        let first = task.run(&ctx, 0).unwrap_err();
        let second = task.run(&ctx, 0).unwrap_err();
        assert_eq!(first.to_string(), "boom");
        assert_eq!(second.to_string(), "boom");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_ctx_short_circuits() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = counting_task(counter.clone());
        let ctx = Ctx::new();

        ctx.cancel_token().cancel();
        let err = task.run(&ctx, 1).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ttl_recomputes_after_expiry() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = counting_task(counter.clone());
        let ctx = Ctx::with_ttl(Duration::from_millis(40));

        assert_eq!(task.run(&ctx, 3).unwrap(), 6);
        assert_eq!(task.run(&ctx, 3).unwrap(), 6);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        thread::sleep(Duration::from_millis(80));

        assert_eq!(task.run(&ctx, 3).unwrap(), 6);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_expired_entry_recomputes_between_sweeps() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = counting_task(counter.clone());
        let ctx = Ctx::with_ttl(Duration::from_millis(150));

        thread::sleep(Duration::from_millis(40));
        task.run(&ctx, 1).unwrap();

        // Trigger a sweep while the first entry is still valid, stamping the
        // sweep window fresh.
        thread::sleep(Duration::from_millis(120));
        task.run(&ctx, 2).unwrap();
        assert_eq!(ctx.cache_len(), 2);

        // The first entry is now expired but the sweep window hasn't elapsed
        // again, so the cache read itself must refuse the stale entry.
        thread::sleep(Duration::from_millis(80));
        assert_eq!(task.run(&ctx, 1).unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.cache_len(), 2);
    }

    #[test]
    fn test_sweep_evicts_expired_entries() {
        let task = Task::new(|_, input: u32| Ok(input));
        let ctx = Ctx::with_ttl(Duration::from_millis(30));

        task.run(&ctx, 1).unwrap();
        task.run(&ctx, 2).unwrap();
        assert_eq!(ctx.cache_len(), 2);

        thread::sleep(Duration::from_millis(60));

        // Next access sweeps both dead entries before inserting the new one.
        task.run(&ctx, 3).unwrap();
        assert_eq!(ctx.cache_len(), 1);
    }
}
