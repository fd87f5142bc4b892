//! Fixed-size worker pool over a bounded queue
//!
//! Inputs are delivered at most once and processed in no particular order. The first task
//! failure stops workers from taking new inputs; tasks already running finish before
//! [`ParallelProcessor::finish`] reports the failure.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ParallelSection;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct ParallelConfig {
    pub workers: usize,
    pub queue_size: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self::from(&ParallelSection::default())
    }
}

impl From<&ParallelSection> for ParallelConfig {
    fn from(section: &ParallelSection) -> Self {
        Self {
            workers: section.effective_workers(),
            queue_size: section.queue_size.max(1),
        }
    }
}

pub type OutputHandler<O> = Box<dyn FnMut(O) -> Result<()> + Send>;

pub struct ParallelProcessor<I> {
    sender: mpsc::Sender<I>,
    workers: Vec<JoinHandle<()>>,
    output: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    failure: Arc<Mutex<Option<Error>>>,
}

async fn record_failure(failure: &Mutex<Option<Error>>, cancel: &CancellationToken, err: Error) {
    let mut slot = failure.lock().await;
    if slot.is_none() {
        tracing::warn!(error = %err, "Parallel task failed; stopping workers");
        *slot = Some(err);
    }
    cancel.cancel();
}

impl<I: Send + 'static> ParallelProcessor<I> {
    /// Spawn `config.workers` workers running `task`; outputs go to `output` if given, on a
    /// single consumer task.
    pub fn start<O, F, Fut>(
        config: ParallelConfig,
        cancel: CancellationToken,
        task: F,
        output: Option<OutputHandler<O>>,
    ) -> Result<Self>
    where
        O: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        if config.workers == 0 || config.queue_size == 0 {
            return Err(Error::parameter("workers and queue_size must be at least 1"));
        }

        let cancel = cancel.child_token();
        let failure: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
        let (sender, receiver) = mpsc::channel::<I>(config.queue_size);
        let receiver = Arc::new(Mutex::new(receiver));
        let (out_tx, mut out_rx) = mpsc::channel::<O>(config.queue_size);
        let task = Arc::new(task);

        let output = output.map(|mut handler| {
            let failure = failure.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                while let Some(item) = out_rx.recv().await {
                    if let Err(err) = handler(item) {
                        record_failure(&failure, &cancel, err).await;
                        break;
                    }
                }
            })
        });

        let workers = (0..config.workers)
            .map(|worker| {
                let receiver = receiver.clone();
                let task = task.clone();
                let cancel = cancel.clone();
                let failure = failure.clone();
                let out_tx = output.as_ref().map(|_| out_tx.clone());
                tokio::spawn(async move {
                    let mut processed = 0usize;
                    loop {
                        let next = {
                            let mut receiver = receiver.lock().await;
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => None,
                                item = receiver.recv() => item,
                            }
                        };
                        let Some(input) = next else { break };
                        match task(input).await {
                            Ok(value) => {
                                if let Some(out_tx) = &out_tx {
                                    if out_tx.send(value).await.is_err() {
                                        break;
                                    }
                                }
                                processed += 1;
                            }
                            Err(err) => {
                                record_failure(&failure, &cancel, err).await;
                                break;
                            }
                        }
                    }
                    tracing::debug!(worker, processed, "Worker stopped");
                })
            })
            .collect();
        drop(out_tx);

        Ok(Self {
            sender,
            workers,
            output,
            cancel,
            failure,
        })
    }

    /// Enqueue one input, waiting while the queue is full. Nothing is accepted once the token
    /// is cancelled.
    pub async fn submit(&self, input: I) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            sent = self.sender.send(input) => sent.map_err(|_| Error::Cancelled),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Close the queue, wait for workers and the output consumer, and report the first failure.
    pub async fn finish(self) -> Result<()> {
        drop(self.sender);
        for worker in self.workers {
            worker
                .await
                .map_err(|e| Error::internal(format!("worker panicked: {}", e)))?;
        }
        if let Some(output) = self.output {
            output
                .await
                .map_err(|e| Error::internal(format!("output handler panicked: {}", e)))?;
        }

        if let Some(err) = self.failure.lock().await.take() {
            return Err(err);
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn config(workers: usize) -> ParallelConfig {
        ParallelConfig {
            workers,
            queue_size: 4,
        }
    }

    #[tokio::test]
    async fn test_fan_out_and_fan_in() {
        let collected = Arc::new(StdMutex::new(Vec::new()));
        let sink = collected.clone();
        let processor = ParallelProcessor::start(
            config(3),
            CancellationToken::new(),
            |n: u64| async move { Ok(n * n) },
            Some(Box::new(move |v: u64| {
                sink.lock().unwrap().push(v);
                Ok(())
            })),
        )
        .unwrap();

        for n in 0..20 {
            processor.submit(n).await.unwrap();
        }
        processor.finish().await.unwrap();

        let mut values = collected.lock().unwrap().clone();
        values.sort();
        assert_eq!(values, (0..20).map(|n| n * n).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_failure_is_surfaced() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let processor = ParallelProcessor::start(
            config(2),
            CancellationToken::new(),
            move |n: u32| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if n == 3 {
                        Err(Error::internal("boom"))
                    } else {
                        Ok(())
                    }
                }
            },
            None,
        )
        .unwrap();

        for n in 0..50 {
            if processor.submit(n).await.is_err() {
                break;
            }
        }
        let err = processor.finish().await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(calls.load(Ordering::SeqCst) < 50);
    }

    #[tokio::test]
    async fn test_external_cancellation() {
        let cancel = CancellationToken::new();
        let processor = ParallelProcessor::start(
            config(1),
            cancel.clone(),
            |_: u32| async { Ok(()) },
            None::<OutputHandler<()>>,
        )
        .unwrap();
        cancel.cancel();
        assert!(matches!(processor.submit(1).await, Err(Error::Cancelled)));
        assert!(matches!(processor.finish().await, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_no_input_accepted_after_cancel() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let processor = ParallelProcessor::start(
            ParallelConfig {
                workers: 2,
                queue_size: 64,
            },
            CancellationToken::new(),
            move |_: u32| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            None::<OutputHandler<()>>,
        )
        .unwrap();
        processor.cancel_token().cancel();
        // the queue has room, so only the cancel check can refuse these
        for i in 0..32 {
            assert!(matches!(processor.submit(i).await, Err(Error::Cancelled)));
        }
        assert!(matches!(processor.finish().await, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = ParallelProcessor::<u32>::start(
            config(0),
            CancellationToken::new(),
            |_: u32| async { Ok(()) },
            None::<OutputHandler<()>>,
        );
        assert!(result.is_err());
    }
}
