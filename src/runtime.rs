//! Runtime for executing turns
//!
//! A single actor task owns every thread-scoped operation. HTTP handlers hold
//! a cloneable [`ExecutionBridge`] and talk to the actor over channels.

pub mod events;
mod executor;
#[cfg(test)]
pub mod testing;
pub mod traits;

pub use events::{EventSink, ExecutionEvent};
pub use executor::{TurnError, TurnExecutor};
pub use traits::*;

use crate::db::{DbError, Message, ThreadSummary};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::{CancellationToken, DropGuard};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
    #[error("Execution bridge stopped")]
    Closed,
}

type Reply<T> = oneshot::Sender<Result<T, BridgeError>>;

/// Commands accepted by the bridge actor
#[derive(Debug)]
pub enum BridgeCommand {
    ListThreads {
        reply: Reply<Vec<ThreadSummary>>,
    },
    History {
        thread_id: String,
        reply: Reply<Vec<Message>>,
    },
    DeleteThread {
        thread_id: String,
        reply: Reply<()>,
    },
    SendMessage {
        thread_id: String,
        text: String,
        events: EventSink,
        cancel: CancellationToken,
    },
}

impl BridgeCommand {
    fn thread_id(&self) -> Option<&str> {
        match self {
            BridgeCommand::ListThreads { .. } => None,
            BridgeCommand::History { thread_id, .. }
            | BridgeCommand::DeleteThread { thread_id, .. }
            | BridgeCommand::SendMessage { thread_id, .. } => Some(thread_id),
        }
    }

    /// Token that abandons the command; only turns carry one
    fn cancel_token(&self) -> CancellationToken {
        match self {
            BridgeCommand::SendMessage { cancel, .. } => cancel.clone(),
            _ => CancellationToken::new(),
        }
    }
}

/// Handle to the execution actor
#[derive(Clone)]
pub struct ExecutionBridge {
    tx: mpsc::UnboundedSender<BridgeCommand>,
}

impl ExecutionBridge {
    /// Spawn the actor. It exits once every handle is dropped and in-flight
    /// operations have finished.
    pub fn spawn<S, T>(executor: TurnExecutor<S, T>) -> Self
    where
        S: Storage + 'static,
        T: ToolExecutor + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = BridgeActor {
            executor: Arc::new(executor),
            locks: HashMap::new(),
            rx,
        };
        tokio::spawn(actor.run());
        Self { tx }
    }

    async fn call<R>(
        &self,
        build: impl FnOnce(Reply<R>) -> BridgeCommand,
    ) -> Result<R, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).map_err(|_| BridgeError::Closed)?;
        rx.await.map_err(|_| BridgeError::Closed)?
    }

    pub async fn list_threads(&self) -> Result<Vec<ThreadSummary>, BridgeError> {
        self.call(|reply| BridgeCommand::ListThreads { reply }).await
    }

    /// Messages of the latest checkpoint; empty for an unknown thread
    pub async fn history(&self, thread_id: &str) -> Result<Vec<Message>, BridgeError> {
        let thread_id = thread_id.to_string();
        self.call(|reply| BridgeCommand::History { thread_id, reply })
            .await
    }

    pub async fn delete_thread(&self, thread_id: &str) -> Result<(), BridgeError> {
        let thread_id = thread_id.to_string();
        self.call(|reply| BridgeCommand::DeleteThread { thread_id, reply })
            .await
    }

    /// Start a turn. Dropping the returned stream cancels it.
    pub fn send_message(&self, thread_id: &str, text: &str) -> Result<TurnStream, BridgeError> {
        let (events, rx) = events::channel();
        let cancel = CancellationToken::new();
        self.tx
            .send(BridgeCommand::SendMessage {
                thread_id: thread_id.to_string(),
                text: text.to_string(),
                events,
                cancel: cancel.clone(),
            })
            .map_err(|_| BridgeError::Closed)?;
        Ok(TurnStream {
            rx,
            _cancel: cancel.drop_guard(),
        })
    }
}

/// Events of one turn, in production order. Ends when the turn finishes.
pub struct TurnStream {
    rx: mpsc::UnboundedReceiver<ExecutionEvent>,
    _cancel: DropGuard,
}

impl Stream for TurnStream {
    type Item = ExecutionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

struct BridgeActor<S, T>
where
    S: Storage + 'static,
    T: ToolExecutor + 'static,
{
    executor: Arc<TurnExecutor<S, T>>,
    /// Per-thread locks; entries nobody holds are pruned
    locks: HashMap<String, Arc<Mutex<()>>>,
    rx: mpsc::UnboundedReceiver<BridgeCommand>,
}

impl<S, T> BridgeActor<S, T>
where
    S: Storage + 'static,
    T: ToolExecutor + 'static,
{
    async fn run(mut self) {
        tracing::info!("Execution bridge started");
        let mut inflight: FuturesUnordered<BoxFuture<'static, ()>> = FuturesUnordered::new();

        loop {
            let command = tokio::select! {
                command = self.rx.recv() => command,
                Some(()) = inflight.next(), if !inflight.is_empty() => continue,
            };
            let Some(command) = command else { break };
            inflight.push(self.dispatch(command));
        }

        tracing::info!(inflight = inflight.len(), "Execution bridge draining");
        while inflight.next().await.is_some() {}
        tracing::info!("Execution bridge stopped");
    }

    fn lock_for(&mut self, thread_id: &str) -> Arc<Mutex<()>> {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        self.locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn dispatch(&mut self, command: BridgeCommand) -> BoxFuture<'static, ()> {
        let lock = command.thread_id().map(|id| self.lock_for(id));
        let cancel = command.cancel_token();
        let executor = self.executor.clone();

        Box::pin(async move {
            // A turn abandoned while queued never runs
            let _guard = match &lock {
                Some(lock) => tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        tracing::debug!(thread_id = ?command.thread_id(), "Queued turn cancelled");
                        return;
                    }
                    guard = lock.lock() => Some(guard),
                },
                None => None,
            };
            handle(&executor, command).await;
        })
    }
}

async fn handle<S, T>(executor: &TurnExecutor<S, T>, command: BridgeCommand)
where
    S: Storage + 'static,
    T: ToolExecutor + 'static,
{
    let storage = executor.storage();
    match command {
        BridgeCommand::ListThreads { reply } => {
            let result = async {
                let ids = storage.checkpoint_threads().await?;
                Ok::<_, BridgeError>(storage.thread_summaries(&ids).await?)
            }
            .await;
            let _ = reply.send(result);
        }
        BridgeCommand::History { thread_id, reply } => {
            let result = storage
                .latest_checkpoint(&thread_id)
                .await
                .map(|c| c.map(|c| c.messages).unwrap_or_default())
                .map_err(BridgeError::from);
            let _ = reply.send(result);
        }
        BridgeCommand::DeleteThread { thread_id, reply } => {
            let result = async {
                let titles = storage.delete_title(&thread_id).await?;
                let checkpoints = storage.delete_checkpoints(&thread_id).await?;
                tracing::info!(thread_id = %thread_id, titles, checkpoints, "Thread deleted");
                Ok::<_, BridgeError>(())
            }
            .await;
            let _ = reply.send(result);
        }
        BridgeCommand::SendMessage {
            thread_id,
            text,
            events,
            cancel,
        } => {
            executor.execute(&thread_id, &text, events, cancel).await;
        }
    }
}
