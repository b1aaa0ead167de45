//! Bounded worker pool that polls submitted transactions until they confirm,
//! fail, or the process shuts down.

use std::sync::Arc;

use async_trait::async_trait;
use ethers_core::types::H256;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::chain::dest_client::{ConfirmError, DestinationClient};

/// Requeue-on-callback-error is bounded; requeue on `NotFound`/`ConfirmPending`
/// is not, since liveness there depends on the chain, not a retry budget.
const MAX_CALLBACK_RETRIES: u32 = 3;

#[derive(Debug)]
pub struct CallbackError(pub String);

impl std::fmt::Display for CallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "confirmer callback error: {}", self.0)
    }
}

impl std::error::Error for CallbackError {}

/// Hooks the Bridge Core installs so the confirmer can report outcomes
/// without knowing anything about events, ledgers, or pairs.
#[async_trait]
pub trait ConfirmerCallbacks: Send + Sync {
    async fn on_confirmed(&self, hash: H256) -> Result<(), CallbackError>;
    async fn on_error(&self, hash: H256, err: ConfirmError);
}

struct PendingTx {
    hash: H256,
    callback_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct ConfirmerConfig {
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub confirmation_blocks: u64,
    pub queue_capacity: usize,
}

impl Default for ConfirmerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval_ms: 10_000,
            confirmation_blocks: 2,
            queue_capacity: 1024,
        }
    }
}

/// Shared context every worker needs; cloned cheaply (all fields are `Arc`
/// or `Copy`) into each worker's task.
struct WorkerCtx<C, CB> {
    tx: mpsc::Sender<PendingTx>,
    rx: Arc<Mutex<mpsc::Receiver<PendingTx>>>,
    client: Arc<C>,
    callbacks: Arc<CB>,
    cancel: CancellationToken,
    poll_interval_ms: u64,
    confirmation_blocks: u64,
}

impl<C, CB> Clone for WorkerCtx<C, CB> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            client: self.client.clone(),
            callbacks: self.callbacks.clone(),
            cancel: self.cancel.clone(),
            poll_interval_ms: self.poll_interval_ms,
            confirmation_blocks: self.confirmation_blocks,
        }
    }
}

/// Owns the pending-transaction queue and the pool of workers draining it.
/// `enqueue` is the only public entry point; workers run until `shutdown`'s
/// token fires, at which point in-flight polls are abandoned promptly.
pub struct Confirmer {
    tx: mpsc::Sender<PendingTx>,
    cancel: CancellationToken,
}

impl Confirmer {
    /// Spawns the worker pool and returns a handle. `client` and `callbacks`
    /// are shared across every worker.
    pub fn start<C, CB>(config: ConfirmerConfig, client: Arc<C>, callbacks: Arc<CB>) -> Self
    where
        C: DestinationClient + 'static,
        CB: ConfirmerCallbacks + 'static,
    {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let ctx = WorkerCtx {
            tx: tx.clone(),
            rx: Arc::new(Mutex::new(rx)),
            client,
            callbacks,
            cancel: CancellationToken::new(),
            poll_interval_ms: config.poll_interval_ms,
            confirmation_blocks: config.confirmation_blocks,
        };

        for worker_id in 0..config.workers {
            let ctx = ctx.clone();
            tokio::spawn(Self::worker_loop(worker_id, ctx));
        }

        Self {
            tx,
            cancel: ctx.cancel,
        }
    }

    async fn worker_loop<C, CB>(worker_id: usize, ctx: WorkerCtx<C, CB>)
    where
        C: DestinationClient + 'static,
        CB: ConfirmerCallbacks + 'static,
    {
        loop {
            let pending = tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                item = async {
                    let mut guard = ctx.rx.lock().await;
                    guard.recv().await
                } => item,
            };
            let Some(pending) = pending else {
                break;
            };
            Self::poll_one(worker_id, pending, &ctx).await;
        }
        debug!(worker_id, "confirmer worker shut down");
    }

    async fn poll_one<C, CB>(worker_id: usize, mut pending: PendingTx, ctx: &WorkerCtx<C, CB>)
    where
        C: DestinationClient + 'static,
        CB: ConfirmerCallbacks + 'static,
    {
        match ctx
            .client
            .confirm_tx(pending.hash, ctx.confirmation_blocks)
            .await
        {
            Ok(()) => match ctx.callbacks.on_confirmed(pending.hash).await {
                Ok(()) => debug!(worker_id, hash = ?pending.hash, "transaction confirmed"),
                Err(e) => {
                    pending.callback_attempts += 1;
                    if pending.callback_attempts >= MAX_CALLBACK_RETRIES {
                        error!(
                            worker_id,
                            hash = ?pending.hash,
                            attempts = pending.callback_attempts,
                            error = %e,
                            "on_confirmed callback failed repeatedly, dropping"
                        );
                    } else {
                        warn!(worker_id, hash = ?pending.hash, error = %e, "on_confirmed callback failed, requeueing");
                        let _ = ctx.tx.send(pending).await;
                    }
                }
            },
            Err(ConfirmError::NotFound) | Err(ConfirmError::ConfirmPending) => {
                let tx = ctx.tx.clone();
                let poll_interval_ms = ctx.poll_interval_ms;
                let cancel = ctx.cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(std::time::Duration::from_millis(poll_interval_ms)) => {
                            let _ = tx.send(pending).await;
                        }
                    }
                });
            }
            Err(e @ ConfirmError::TxFailed) | Err(e @ ConfirmError::Transport(_)) => {
                ctx.callbacks.on_error(pending.hash, e).await;
            }
        }
    }

    /// Enqueues a freshly submitted transaction hash for confirmation polling.
    pub async fn enqueue(&self, hash: H256) -> Result<(), H256> {
        self.tx
            .send(PendingTx {
                hash,
                callback_attempts: 0,
            })
            .await
            .map_err(|e| e.0.hash)
    }

    /// Signals every worker to abandon in-progress polls and exit.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::dest_client::MockDestinationClient;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCallbacks {
        confirmed: AtomicUsize,
        errored: AtomicUsize,
    }

    impl CountingCallbacks {
        fn new() -> Self {
            Self {
                confirmed: AtomicUsize::new(0),
                errored: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ConfirmerCallbacks for CountingCallbacks {
        async fn on_confirmed(&self, _hash: H256) -> Result<(), CallbackError> {
            self.confirmed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_error(&self, _hash: H256, _err: ConfirmError) {
            self.errored.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_confirmer_drops_confirmed_tx_after_callback_success() {
        let client = Arc::new(MockDestinationClient::new());
        let callbacks = Arc::new(CountingCallbacks::new());
        let confirmer = Confirmer::start(
            ConfirmerConfig {
                workers: 1,
                poll_interval_ms: 10,
                confirmation_blocks: 1,
                queue_capacity: 8,
            },
            client.clone(),
            callbacks.clone(),
        );

        let hash = H256::from_low_u64_be(1);
        confirmer.enqueue(hash).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(callbacks.confirmed.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.errored.load(Ordering::SeqCst), 0);
        confirmer.shutdown();
    }

    #[tokio::test]
    async fn test_confirmer_reports_terminal_failure_to_on_error() {
        let client = Arc::new(MockDestinationClient::new());
        let hash = H256::from_low_u64_be(2);
        client.script_failed(hash);
        let callbacks = Arc::new(CountingCallbacks::new());
        let confirmer = Confirmer::start(
            ConfirmerConfig {
                workers: 1,
                poll_interval_ms: 10,
                confirmation_blocks: 1,
                queue_capacity: 8,
            },
            client.clone(),
            callbacks.clone(),
        );

        confirmer.enqueue(hash).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(callbacks.errored.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.confirmed.load(Ordering::SeqCst), 0);
        confirmer.shutdown();
    }
}
