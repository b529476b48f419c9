//! Fixed-size worker pool over a shared FIFO queue.
//!
//! Submissions never reject: the queue is unbounded and workers drain it in
//! submission order. Each worker picks up the next job as soon as it is
//! free, so jobs from different submissions run concurrently up to the
//! worker count.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct WorkerPool {
    sender: std::sync::Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn a pool with `size` workers (minimum one). Must be called from
    /// within a tokio runtime.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let receiver = Arc::new(AsyncMutex::new(receiver));

        let workers = (0..size)
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        // Hold the queue lock only while waiting for the
                        // next job, never while running one.
                        let job = {
                            let mut receiver = receiver.lock().await;
                            receiver.recv().await
                        };
                        match job {
                            Some(job) => job.await,
                            None => return,
                        }
                    }
                })
            })
            .collect();

        WorkerPool {
            sender: std::sync::Mutex::new(Some(sender)),
            workers: std::sync::Mutex::new(workers),
        }
    }

    /// Queue a job. Jobs submitted after [`release`] are dropped.
    ///
    /// [`release`]: WorkerPool::release
    pub fn submit(&self, job: impl Future<Output = ()> + Send + 'static) {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = sender.as_ref() {
            let _ = sender.send(Box::pin(job));
        }
    }

    /// Close the queue and wait for the workers to drain it. Idempotent.
    pub async fn release(&self) {
        let sender = {
            let mut sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
            sender.take()
        };
        drop(sender);

        let workers = {
            let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *workers)
        };
        for worker in workers {
            let _ = worker.await;
        }
    }
}
