use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Grace window given to in-flight workers to finish on their own after
/// cancellation before they're forcibly aborted (SPEC_FULL.md §4.3).
const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Bounded concurrent fan-out over a list of arguments: starts up to
/// `concurrency` workers, replaces each as it completes with the next
/// pending argument, and yields `(arg, result)` pairs in completion
/// order. Mirrors `webcap.helpers.task_pool`'s generator semantics,
/// re-expressed with `tokio::task::JoinSet` the way `snapvrt`'s capture
/// runner structures its worker pool.
pub struct WorkerPool<A> {
    queue: Arc<Mutex<VecDeque<A>>>,
}

impl<A> WorkerPool<A>
where
    A: Clone + Send + 'static,
{
    pub fn new(args: impl IntoIterator<Item = A>) -> Self {
        WorkerPool {
            queue: Arc::new(Mutex::new(args.into_iter().collect())),
        }
    }

    /// Runs `f` over every queued argument with at most `concurrency`
    /// invocations in flight, returning results as they complete. Each
    /// worker pulls its next argument from the shared queue as soon as it
    /// finishes the previous one, so the pool never sits idle with work
    /// left to do.
    pub async fn run<F, Fut, R>(self, concurrency: usize, f: F) -> Vec<(A, R)>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        self.run_cancellable(concurrency, f, std::future::pending())
            .await
    }

    /// Like `run`, but races every remaining round against `cancel`. Once
    /// `cancel` resolves, in-flight workers are given a short grace window
    /// to finish on their own, then any still running are aborted; results
    /// gathered up to that point are returned rather than discarded. Wired
    /// to `tokio::signal::ctrl_c()` by the CLI (`src/bin/webshot.rs`).
    pub async fn run_cancellable<F, Fut, R>(
        self,
        concurrency: usize,
        f: F,
        cancel: impl Future<Output = ()>,
    ) -> Vec<(A, R)>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let concurrency = concurrency.max(1);
        let f = Arc::new(f);
        let mut set: JoinSet<(A, R)> = JoinSet::new();
        let mut results = Vec::new();

        for _ in 0..concurrency {
            if !self.try_spawn(&mut set, &f).await {
                break;
            }
        }

        tokio::pin!(cancel);
        loop {
            tokio::select! {
                joined = set.join_next() => {
                    match joined {
                        Some(Ok(pair)) => {
                            results.push(pair);
                            self.try_spawn(&mut set, &f).await;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "worker task panicked");
                        }
                        None => break,
                    }
                }
                _ = &mut cancel => {
                    tracing::warn!("cancelled, draining in-flight workers with a grace window");
                    let grace = tokio::time::sleep(CANCEL_GRACE);
                    tokio::pin!(grace);
                    loop {
                        tokio::select! {
                            joined = set.join_next() => {
                                match joined {
                                    Some(Ok(pair)) => results.push(pair),
                                    Some(Err(e)) => tracing::warn!(error = %e, "worker task panicked"),
                                    None => break,
                                }
                            }
                            _ = &mut grace => {
                                set.abort_all();
                                break;
                            }
                        }
                    }
                    break;
                }
            }
        }

        results
    }

    async fn try_spawn<F, Fut, R>(&self, set: &mut JoinSet<(A, R)>, f: &Arc<F>) -> bool
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let Some(arg) = self.queue.lock().await.pop_front() else {
            return false;
        };
        let f = f.clone();
        let arg_for_result = arg.clone();
        set.spawn(async move {
            let result = f(arg).await;
            (arg_for_result, result)
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn runs_all_items_with_bounded_concurrency() {
        let pool = WorkerPool::new(0..30);
        let start = tokio::time::Instant::now();
        let results = pool
            .run(10, |n: i32| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                n * 2
            })
            .await;
        let elapsed = start.elapsed();

        assert_eq!(results.len(), 30);
        // ceil(30/10) * 200ms = 600ms, generous upper bound for CI jitter.
        assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");
        for (arg, result) in &results {
            assert_eq!(*result, arg * 2);
        }
    }

    #[tokio::test]
    async fn empty_input_yields_no_results() {
        let pool: WorkerPool<i32> = WorkerPool::new(std::iter::empty());
        let results = pool.run(5, |n: i32| async move { n }).await;
        assert!(results.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancellation_returns_completed_work_and_drops_the_rest() {
        let pool = WorkerPool::new(0..20);
        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let _ = cancel_tx.send(());
        });

        let start = tokio::time::Instant::now();
        let results = pool
            .run_cancellable(4, |n: i32| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                n
            }, async { let _ = cancel_rx.await; })
            .await;
        let elapsed = start.elapsed();

        assert!(results.len() < 20, "cancellation should leave some work undone");
        // cancel fires at ~150ms, grace window is 2s, but every in-flight
        // worker finishes well inside that window, so the abort branch of
        // the inner select never needs to trigger.
        assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");
    }
}
