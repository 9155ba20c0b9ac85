//! Parallel fan-out for heterogeneous bound tasks.
use std::hash::Hash;
use std::sync::Mutex;

use crate::error::TaskError;
use crate::task::{Ctx, Task};

/// A task pre-paired with one input and an output destination, so tasks of
/// different types can be fanned out through a single [`run_parallel`] call.
/// Ephemeral, build a fresh set for every invocation.
pub struct BoundTask<'a> {
    func: Box<dyn FnOnce(&Ctx) -> Result<(), TaskError> + Send + 'a>,
}

impl<'a> BoundTask<'a> {
    /// Bind an arbitrary closure. The loader orchestrator uses this to write
    /// richer per-segment state than a bare output slot.
    pub fn from_fn(func: impl FnOnce(&Ctx) -> Result<(), TaskError> + Send + 'a) -> Self {
        Self {
            func: Box::new(func),
        }
    }

    fn run(self, ctx: &Ctx) -> Result<(), TaskError> {
        (self.func)(ctx)
    }
}

impl<I, O> Task<I, O>
where
    I: Hash + Eq + Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Pair this task with an input and a destination slot. The slot is
    /// written only on success, only by the worker that owns it.
    pub fn bind<'a>(&'a self, input: I, dest: &'a mut Option<O>) -> BoundTask<'a> {
        BoundTask::from_fn(move |ctx| {
            *dest = Some(self.run(ctx, input)?);
            Ok(())
        })
    }
}

/// Run a set of bound tasks concurrently under a context derived from `ctx`.
///
/// Zero tasks is a no-op and one task runs synchronously in the caller. With
/// two or more, each task gets a rayon-scoped worker; all workers share the
/// same cache map (memoized reads across the fan-out still deduplicate) but
/// a child cancellation scope. The first failure cancels that scope and
/// becomes the overall result; siblings observe the cancellation at their
/// next [`Task::run`] boundary.
pub fn run_parallel(ctx: &Ctx, mut tasks: Vec<BoundTask<'_>>) -> Result<(), TaskError> {
    ctx.check()?;

    match tasks.len() {
        0 => return Ok(()),
        1 => return tasks.pop().unwrap().run(ctx),
        _ => {}
    }

    let shared = ctx.derived();
    let first_err: Mutex<Option<TaskError>> = Mutex::new(None);

    rayon::scope(|s| {
        for task in tasks {
            let shared = &shared;
            let first_err = &first_err;
            s.spawn(move |_| {
                let result = task.run(shared).and_then(|_| shared.check());
                if let Err(err) = result {
                    shared.cancel_token().cancel();
                    let mut slot = first_err.lock().unwrap();
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                }
            });
        }
    });

    match first_err.into_inner().unwrap() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_empty_set_is_noop() {
        let ctx = Ctx::new();
        assert!(run_parallel(&ctx, vec![]).is_ok());
    }

    #[test]
    fn test_single_task_runs_in_caller() {
        let task = Task::new(|_, input: u32| Ok(input + 1));
        let ctx = Ctx::new();
        let mut dest = None;

        run_parallel(&ctx, vec![task.bind(1, &mut dest)]).unwrap();
        assert_eq!(dest, Some(2));
    }

    #[test]
    fn test_fan_out_fills_all_destinations() {
        let double = Task::new(|_, input: u32| Ok(input * 2));
        let shout = Task::new(|_, input: String| Ok(input.to_uppercase()));
        let ctx = Ctx::new();

        let mut a = None;
        let mut b = None;
        let mut c = None;

        let bound = vec![
            double.bind(4, &mut a),
            double.bind(8, &mut b),
            shout.bind("hey".to_string(), &mut c),
        ];
        run_parallel(&ctx, bound).unwrap();

        assert_eq!(a, Some(8));
        assert_eq!(b, Some(16));
        assert_eq!(c.as_deref(), Some("HEY"));
    }

    #[test]
    fn test_first_failure_cancels_siblings() {
        let failing = Task::new(|_, _: u32| -> anyhow::Result<u32> {
            Err(anyhow::anyhow!("fast failure"))
        });
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let slow = Task::new({
            let saw_cancel = saw_cancel.clone();
            move |ctx: &Ctx, input: u32| {
                thread::sleep(Duration::from_millis(60));
                saw_cancel.store(ctx.check().is_err(), Ordering::SeqCst);
                Ok(input)
            }
        });

        let ctx = Ctx::new();
        let mut a = None;
        let mut b = None;

        let err = run_parallel(&ctx, vec![failing.bind(0, &mut a), slow.bind(1, &mut b)]).unwrap_err();
        assert_eq!(err.to_string(), "fast failure");
        assert!(saw_cancel.load(Ordering::SeqCst));
        assert!(a.is_none());
        // The fan-out scope was cancelled, but the caller's own context is
        // untouched.
        assert!(ctx.check().is_ok());
    }

    #[test]
    fn test_fan_out_shares_memoization() {
        let counter = Arc::new(AtomicUsize::new(0));
        let shared = Arc::new(Task::new({
            let counter = counter.clone();
            move |_, input: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                Ok(input + 1)
            }
        }));

        let left = Task::new({
            let shared = shared.clone();
            move |ctx: &Ctx, input: u32| Ok(shared.run(ctx, input)?)
        });
        let right = Task::new({
            let shared = shared.clone();
            move |ctx: &Ctx, input: u32| Ok(shared.run(ctx, input)? * 10)
        });

        let ctx = Ctx::new();
        let mut a = None;
        let mut b = None;

        run_parallel(&ctx, vec![left.bind(5, &mut a), right.bind(5, &mut b)]).unwrap();

        assert_eq!(a, Some(6));
        assert_eq!(b, Some(60));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
