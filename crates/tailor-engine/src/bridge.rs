use std::future::Future;
use std::pin::Pin;
use std::thread;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge task failed before completing")]
    TaskFailed,
    #[error("bridge is shut down")]
    ShutDown,
    #[error("failed to start bridge thread: {0}")]
    Startup(String),
}

enum BridgeState {
    Idle,
    Running {
        tx: mpsc::UnboundedSender<Task>,
        thread: thread::JoinHandle<()>,
    },
    ShutDown,
}

/// Serializes synchronous callers onto one asynchronous execution context.
///
/// Owns a single OS thread running a current-thread tokio runtime, created
/// lazily on the first submission. Submitted futures are spawned as tasks so
/// work against different worker sessions interleaves even though each caller
/// blocks for its own result.
///
/// `run_blocking` must never be called from inside an async runtime; async
/// callers go through `spawn_blocking` first.
pub struct ExecutionBridge {
    state: Mutex<BridgeState>,
}

impl ExecutionBridge {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BridgeState::Idle),
        }
    }

    /// Submit a future and block until it completes.
    ///
    /// A task that panics or is dropped before completing surfaces as
    /// `TaskFailed` to this caller only; the bridge itself keeps running.
    pub fn run_blocking<T, F>(&self, fut: F) -> Result<T, BridgeError>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel::<T>();
        let task: Task = Box::pin(async move {
            let value = fut.await;
            let _ = done_tx.send(value);
        });

        {
            let mut state = self.state.lock();
            if let BridgeState::Idle = *state {
                *state = Self::start_thread()?;
            }
            match &*state {
                BridgeState::Running { tx, .. } => {
                    tx.send(task).map_err(|_| BridgeError::ShutDown)?;
                }
                BridgeState::ShutDown => return Err(BridgeError::ShutDown),
                BridgeState::Idle => unreachable!("bridge started above"),
            }
        }

        done_rx.blocking_recv().map_err(|_| BridgeError::TaskFailed)
    }

    fn start_thread() -> Result<BridgeState, BridgeError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let thread = thread::Builder::new()
            .name("tailor-bridge".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        debug!(error = %e, "bridge runtime failed to start");
                        return;
                    }
                };
                rt.block_on(async move {
                    while let Some(task) = rx.recv().await {
                        tokio::spawn(task);
                    }
                });
                debug!("bridge thread exiting");
            })
            .map_err(|e| BridgeError::Startup(e.to_string()))?;

        Ok(BridgeState::Running { tx, thread })
    }

    /// Tear down the runtime thread. Idempotent; later submissions fail with
    /// `ShutDown`. In-flight tasks are dropped, which their callers observe
    /// as `TaskFailed`.
    pub fn shutdown(&self) {
        let prev = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, BridgeState::ShutDown)
        };
        if let BridgeState::Running { tx, thread } = prev {
            drop(tx);
            if thread.join().is_err() {
                debug!("bridge thread panicked during shutdown");
            }
        }
    }
}

impl Default for ExecutionBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExecutionBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
