use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use futures::future::join_all;
use tokio::sync::watch;
use log::debug;

/// Operator-requested abort, shared by every worker of a run
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called on any clone
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                // sender is owned by us, so this only happens during teardown
                std::future::pending::<()>().await;
            }
        }
    }
}

/// What became of one queued item
#[derive(Debug)]
pub enum PoolOutcome<T, R> {
    Completed(R),
    /// Never started because the run was cancelled
    Abandoned(T),
}

impl<T, R> PoolOutcome<T, R> {
    pub fn completed(self) -> Option<R> {
        match self {
            PoolOutcome::Completed(r) => Some(r),
            PoolOutcome::Abandoned(_) => None,
        }
    }
}

/// Fixed number of workers draining one shared queue.
///
/// Each item is handed to exactly one worker, so the work function owns the
/// item outright; the queue lock is the only synchronisation point.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `work` over every item, at most `workers` at a time.
    ///
    /// Outcomes come back in input order. Once `cancel` fires no further
    /// item is dequeued; items still queued are returned as
    /// [`PoolOutcome::Abandoned`]. Items already in flight get the token
    /// and decide for themselves how to stop.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, cancel: &CancelToken, work: F) -> Vec<PoolOutcome<T, R>>
    where
        F: Fn(T, CancelToken) -> Fut,
        Fut: Future<Output = R>,
    {
        let total = items.len();
        let queue = Mutex::new(items.into_iter().enumerate().collect::<VecDeque<_>>());
        let results = Mutex::new((0..total).map(|_| None).collect::<Vec<Option<PoolOutcome<T, R>>>>());

        let queue_ref = &queue;
        let results_ref = &results;
        let work_ref = &work;

        let workers = (0..self.workers.min(total)).map(move |worker_id| async move {
            let mut handled = 0usize;
            loop {
                let Some((index, item)) = dequeue(queue_ref, cancel) else {
                    break;
                };
                let result = work_ref(item, cancel.clone()).await;
                results_ref.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(PoolOutcome::Completed(result));
                handled += 1;
            }
            debug!("Worker {} finished after {} item(s)", worker_id, handled);
        });
        join_all(workers).await;

        let mut results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        for (index, item) in queue.into_inner().unwrap_or_else(PoisonError::into_inner) {
            results[index] = Some(PoolOutcome::Abandoned(item));
        }
        results.into_iter().flatten().collect()
    }
}

/// Next item, unless the run is cancelled. A cancel that lands while the
/// item is being taken puts it back, so it is reported as abandoned.
fn dequeue<T>(queue: &Mutex<VecDeque<T>>, cancel: &CancelToken) -> Option<T> {
    let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
    if cancel.is_cancelled() {
        return None;
    }
    let next = queue.pop_front()?;
    if cancel.is_cancelled() {
        queue.push_front(next);
        return None;
    }
    Some(next)
}
