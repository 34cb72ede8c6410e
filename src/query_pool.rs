// Fixed-size worker pool isolating blocking durable-store reads from the
// request loop. Requests are id-tagged and queued; workers report ready
// and a dispatcher hands the next request to the first idle worker.
// Pending requests carry a timeout that rejects the waiter and leaves the
// slot reusable once the worker finishes. Hot memory-index lookups never
// come here.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::error::{ApiError, StoreError};
use crate::store::Store;

type JobFn = Box<dyn FnOnce(&mut Connection) + Send>;

struct Job {
    id: u64,
    run: JobFn,
}

pub struct QueryPool {
    jobs_tx: Mutex<Option<mpsc::Sender<Job>>>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl QueryPool {
    pub fn new(
        store: Arc<Store>,
        size: usize,
        queue_limit: usize,
        timeout: Duration,
    ) -> Result<Arc<Self>> {
        let size = size.max(1);
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>(queue_limit.max(1));
        let (ready_tx, ready_rx) = mpsc::channel::<usize>(size * 2);

        let mut inboxes = Vec::with_capacity(size);
        for worker_id in 0..size {
            let inbox = spawn_worker(worker_id, store.clone(), ready_tx.clone())
                .with_context(|| format!("spawning query worker {worker_id}"))?;
            inboxes.push(inbox);
            // every worker starts idle
            let _ = ready_tx.try_send(worker_id);
        }
        tokio::spawn(dispatch_loop(store, jobs_rx, ready_rx, ready_tx, inboxes));

        Ok(Arc::new(Self {
            jobs_tx: Mutex::new(Some(jobs_tx)),
            timeout,
            next_id: AtomicU64::new(1),
        }))
    }

    /// Run a read closure on a pool worker's connection. Over-queue is
    /// `Unavailable`; exceeding the per-request budget is `QueryTimeout`.
    pub async fn run<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel::<Result<T, StoreError>>();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            id,
            run: Box::new(move |conn| {
                let _ = result_tx.send(f(conn));
            }),
        };
        {
            let guard = self.jobs_tx.lock().await;
            let Some(tx) = guard.as_ref() else {
                return Err(ApiError::Unavailable("query pool is shut down".into()));
            };
            tx.try_send(job).map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => {
                    ApiError::Unavailable("query pool saturated".into())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    ApiError::Unavailable("query pool is shut down".into())
                }
            })?;
        }
        match tokio::time::timeout(self.timeout, result_rx).await {
            Err(_) => Err(ApiError::QueryTimeout),
            Ok(Err(_)) => Err(ApiError::Internal("query worker dropped the request".into())),
            Ok(Ok(result)) => result.map_err(Into::into),
        }
    }

    /// Cancel all pending requests and let workers exit.
    pub async fn shutdown(&self) {
        self.jobs_tx.lock().await.take();
    }
}

fn spawn_worker(
    worker_id: usize,
    store: Arc<Store>,
    ready_tx: mpsc::Sender<usize>,
) -> std::io::Result<std::sync::mpsc::Sender<Job>> {
    let (inbox_tx, inbox_rx) = std::sync::mpsc::channel::<Job>();
    std::thread::Builder::new()
        .name(format!("query-worker-{worker_id}"))
        .spawn(move || {
            let mut conn: Option<Connection> = None;
            while let Ok(job) = inbox_rx.recv() {
                if conn.is_none() {
                    match store.open_read_connection() {
                        Ok(c) => conn = Some(c),
                        Err(err) => {
                            // dropping the job resolves the waiter with an
                            // internal error
                            warn!(worker = worker_id, error = %err, "worker has no connection");
                        }
                    }
                }
                let job_id = job.id;
                let mut poisoned = false;
                if let Some(c) = conn.as_mut() {
                    let run = job.run;
                    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| run(c)));
                    if outcome.is_err() {
                        error!(worker = worker_id, job = job_id, "query job panicked");
                        poisoned = true;
                    }
                } else {
                    drop(job.run);
                }
                if poisoned {
                    // a panic may have left the connection mid-statement
                    conn = None;
                }
                if ready_tx.blocking_send(worker_id).is_err() {
                    break;
                }
            }
            debug!(worker = worker_id, "query worker exiting");
        })?;
    Ok(inbox_tx)
}

async fn dispatch_loop(
    store: Arc<Store>,
    mut jobs_rx: mpsc::Receiver<Job>,
    mut ready_rx: mpsc::Receiver<usize>,
    ready_tx: mpsc::Sender<usize>,
    mut inboxes: Vec<std::sync::mpsc::Sender<Job>>,
) {
    while let Some(job) = jobs_rx.recv().await {
        let Some(worker_id) = ready_rx.recv().await else {
            break;
        };
        let mut job = job;
        loop {
            match inboxes[worker_id].send(job) {
                Ok(()) => break,
                Err(std::sync::mpsc::SendError(returned)) => {
                    // worker died: respawn it and retry on the fresh one
                    warn!(worker = worker_id, "respawning dead query worker");
                    match spawn_worker(worker_id, store.clone(), ready_tx.clone()) {
                        Ok(inbox) => {
                            inboxes[worker_id] = inbox;
                            job = returned;
                        }
                        Err(err) => {
                            // dropping the job resolves its waiter with an
                            // internal error; the slot stays out of the
                            // ready rotation until a spawn succeeds
                            error!(
                                worker = worker_id,
                                error = %err,
                                "query worker respawn failed, dropping job"
                            );
                            drop(returned);
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!("query pool dispatcher exiting");
}
