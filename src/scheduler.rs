//! Job scheduler.
//!
//! A process-wide, single-threaded queue pair: the main queue holds render
//! and pre-flush watcher jobs ordered by ascending id (parents before
//! children — parent effects are created first and carry smaller ids), the
//! post-flush queue holds mounted/updated hooks and post watchers.
//!
//! There is no host microtask queue in this runtime, so the tick boundary
//! is explicit: enqueuing marks the queue pending and the host loop (or a
//! test) calls [`flush_jobs`] to drain one tick. [`next_tick`] rides the
//! post-flush queue of the current or next flush.

use std::cell::RefCell;
use std::rc::Rc;

use std::collections::HashMap;

/// A unit of scheduled work. Identity (for de-dup and invalidation) is the
/// `Rc` pointer of the closure.
#[derive(Clone)]
pub struct Job {
    /// Sort key; `None` sorts last.
    pub id: Option<u64>,
    func: Rc<dyn Fn()>,
}

impl Job {
    pub fn new(id: Option<u64>, f: impl Fn() + 'static) -> Self {
        Self { id, func: Rc::new(f) }
    }

    fn ptr_eq(&self, other: &Job) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }

    fn key(&self) -> usize {
        Rc::as_ptr(&self.func) as *const () as usize
    }
}

#[derive(Default)]
struct SchedulerState {
    queue: Vec<Option<Job>>,
    post_flush_cbs: Vec<Job>,
    is_flushing: bool,
    is_flush_pending: bool,
}

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

/// Jobs exceeding this many runs within one flush are runaway updates.
pub const RECURSION_LIMIT: usize = 100;

/// Enqueue a job; duplicate enqueue of the same job is a no-op.
pub fn queue_job(job: Job) {
    SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        let duplicate = s
            .queue
            .iter()
            .flatten()
            .any(|existing| existing.ptr_eq(&job));
        if !duplicate {
            s.queue.push(Some(job));
            s.is_flush_pending = true;
        }
    });
}

/// Enqueue a post-flush callback.
pub fn queue_post_flush_cb(job: Job) {
    SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        s.post_flush_cbs.push(job);
        s.is_flush_pending = true;
    });
}

/// Null-out a queued job without shifting the queue.
pub fn invalidate_job(job: &Job) {
    SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        for slot in s.queue.iter_mut() {
            if slot.as_ref().is_some_and(|j| j.ptr_eq(job)) {
                *slot = None;
            }
        }
    });
}

/// Run `f` after the current (or next) flush drains.
pub fn next_tick(f: impl Fn() + 'static) {
    queue_post_flush_cb(Job::new(None, f));
}

/// True if work is queued and no flush has drained it yet.
pub fn is_flush_pending() -> bool {
    SCHEDULER.with(|s| s.borrow().is_flush_pending)
}

/// Drain one tick: sort the queue by id, run each job (recursion-limited),
/// then drain post-flush callbacks. If jobs enqueued more work, keep
/// draining before returning, so one call is one settled tick.
pub fn flush_jobs() {
    let already_flushing = SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        if s.is_flushing {
            true
        } else {
            s.is_flushing = true;
            s.is_flush_pending = false;
            false
        }
    });
    if already_flushing {
        // Re-entrant flush: the outer drain loop picks new work up.
        return;
    }

    let mut counts: HashMap<usize, usize> = HashMap::new();
    loop {
        // Sort ascending by id; holes (invalidated) and None ids last. The
        // queue stays in place so jobs can invalidate later jobs mid-drain.
        let drain_len = SCHEDULER.with(|s| {
            let mut s = s.borrow_mut();
            s.queue.sort_by_key(|slot| match slot {
                Some(job) => job.id.unwrap_or(u64::MAX),
                None => u64::MAX,
            });
            s.queue.len()
        });

        for index in 0..drain_len {
            let job = SCHEDULER.with(|s| s.borrow_mut().queue[index].take());
            let Some(job) = job else { continue };

            let count = counts.entry(job.key()).or_insert(0);
            *count += 1;
            if *count > RECURSION_LIMIT {
                SCHEDULER.with(|s| {
                    let mut s = s.borrow_mut();
                    s.is_flushing = false;
                    s.queue.clear();
                    s.post_flush_cbs.clear();
                });
                panic!("Maximum recursive updates exceeded");
            }
            (job.func)();
        }
        SCHEDULER.with(|s| {
            s.borrow_mut().queue.drain(0..drain_len);
        });

        flush_post_flush_cbs();

        let has_more = SCHEDULER.with(|s| {
            let mut s = s.borrow_mut();
            let more = !s.queue.is_empty() || !s.post_flush_cbs.is_empty();
            if !more {
                s.is_flushing = false;
                s.is_flush_pending = false;
            }
            more
        });
        if !has_more {
            break;
        }
    }
}

fn flush_post_flush_cbs() {
    // Copy first, then clear: callbacks may enqueue more, and those belong
    // to the next drain iteration.
    let cbs = SCHEDULER.with(|s| std::mem::take(&mut s.borrow_mut().post_flush_cbs));
    let mut seen = Vec::new();
    for job in cbs {
        if seen.iter().any(|k| *k == job.key()) {
            continue;
        }
        seen.push(job.key());
        (job.func)();
    }
}

/// Drop all queued work (test isolation / app teardown).
pub fn reset_scheduler() {
    SCHEDULER.with(|s| {
        *s.borrow_mut() = SchedulerState::default();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_queue_and_flush() {
        reset_scheduler();
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        queue_job(Job::new(Some(1), move || r.set(r.get() + 1)));
        assert!(is_flush_pending());
        assert_eq!(runs.get(), 0);

        flush_jobs();
        assert_eq!(runs.get(), 1);
        assert!(!is_flush_pending());
    }

    #[test]
    fn test_duplicate_enqueue_is_idempotent() {
        reset_scheduler();
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let job = Job::new(Some(1), move || r.set(r.get() + 1));
        queue_job(job.clone());
        queue_job(job);
        flush_jobs();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_sorted_by_id() {
        reset_scheduler();
        let order = Rc::new(RefCell::new(Vec::new()));
        for id in [3u64, 1, 2] {
            let o = order.clone();
            queue_job(Job::new(Some(id), move || o.borrow_mut().push(id)));
        }
        // A job with no id runs last.
        let o = order.clone();
        queue_job(Job::new(None, move || o.borrow_mut().push(99)));
        flush_jobs();
        assert_eq!(*order.borrow(), vec![1, 2, 3, 99]);
    }

    #[test]
    fn test_invalidate_job() {
        reset_scheduler();
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let job = Job::new(Some(1), move || r.set(r.get() + 1));
        queue_job(job.clone());
        invalidate_job(&job);
        flush_jobs();
        assert_eq!(runs.get(), 0);
    }

    #[test]
    fn test_post_flush_after_jobs() {
        reset_scheduler();
        let order = Rc::new(RefCell::new(Vec::new()));
        let o = order.clone();
        queue_post_flush_cb(Job::new(None, move || o.borrow_mut().push("post")));
        let o = order.clone();
        queue_job(Job::new(Some(1), move || o.borrow_mut().push("job")));
        flush_jobs();
        assert_eq!(*order.borrow(), vec!["job", "post"]);
    }

    #[test]
    fn test_jobs_enqueued_during_flush_drain_same_call() {
        reset_scheduler();
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        queue_job(Job::new(Some(1), move || {
            let r2 = r.clone();
            if r.get() == 0 {
                queue_job(Job::new(Some(2), move || r2.set(r2.get() + 10)));
            }
            r.set(r.get() + 1);
        }));
        flush_jobs();
        assert_eq!(runs.get(), 11);
    }

    #[test]
    #[should_panic(expected = "Maximum recursive updates exceeded")]
    fn test_recursion_limit() {
        reset_scheduler();
        // A job that requeues itself forever.
        let slot: Rc<RefCell<Option<Job>>> = Rc::new(RefCell::new(None));
        let s = slot.clone();
        let job = Job::new(Some(1), move || {
            let job = s.borrow().clone();
            if let Some(job) = job {
                queue_job(job);
            }
        });
        *slot.borrow_mut() = Some(job.clone());
        queue_job(job);
        flush_jobs();
    }

    #[test]
    fn test_next_tick_runs_after_flush() {
        reset_scheduler();
        let order = Rc::new(RefCell::new(Vec::new()));
        let o = order.clone();
        queue_job(Job::new(Some(1), move || o.borrow_mut().push("render")));
        let o = order.clone();
        next_tick(move || o.borrow_mut().push("tick"));
        flush_jobs();
        assert_eq!(*order.borrow(), vec!["render", "tick"]);
    }
}
