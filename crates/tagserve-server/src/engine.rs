//! The run loop.
//!
//! A single task owns the monitored-item registry and the sampler; nothing
//! else touches them, so they need no locking. Each iteration observes the
//! cancellation flag, drains the bounded command queue (writes and item
//! management submitted by transports), runs one sampler tick, then sleeps
//! the tick quantum. Cancellation takes effect within one quantum, never
//! mid-tick.
//!
//! The address space sits behind an `Arc<RwLock>` so read-side collaborators
//! (HTTP API, access checks) can read it concurrently; all mutation goes
//! through the command queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info};

use tagserve_core::{AddressSpace, NodeId, SpaceError, Value};

use crate::monitor::{CreatedItem, ItemId, MonitorError, MonitorRegistry, NotificationSink};
use crate::sampler::Sampler;

/// Depth of the pending-command queue shared by all transports.
const COMMAND_QUEUE_DEPTH: usize = 1024;

/// Numeric settings of the engine. This is the whole configuration surface
/// of the core.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Floor below which requested sampling intervals are clamped.
    pub min_sampling_interval: Duration,

    /// Sleep between run-loop iterations. Upper bound on notification
    /// latency and on how long cancellation takes to be observed.
    pub tick_quantum: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_sampling_interval: Duration::from_millis(100),
            tick_quantum: Duration::from_millis(10),
        }
    }
}

/// Errors reported through an [`EngineHandle`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine is gone or cancelled; the command was not taken.
    #[error("engine is not running")]
    Stopped,

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Space(#[from] SpaceError),
}

/// Work submitted to the engine by transports and value sources.
enum EngineCommand {
    Write {
        node: NodeId,
        value: Value,
        reply: oneshot::Sender<Result<(), SpaceError>>,
    },
    CreateItem {
        node: NodeId,
        interval: Option<Duration>,
        sink: Box<dyn NotificationSink>,
        reply: oneshot::Sender<Result<CreatedItem, MonitorError>>,
    },
    DeleteItem {
        id: ItemId,
        reply: oneshot::Sender<Result<(), MonitorError>>,
    },
    /// Bulk cleanup on client disconnect; no reply, unknown ids ignored.
    DeleteItems { ids: Vec<ItemId> },
}

/// Cloneable handle for submitting work to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    cancel: Arc<AtomicBool>,
}

impl EngineHandle {
    /// Write a node value. Resolved on the engine's next iteration.
    pub async fn write(&self, node: NodeId, value: Value) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Write {
                node,
                value,
                reply: tx,
            })
            .await
            .map_err(|_| EngineError::Stopped)?;
        Ok(rx.await.map_err(|_| EngineError::Stopped)??)
    }

    /// Create a monitored item on `node`. A missing interval means the
    /// server default; the granted interval comes back in the result.
    pub async fn create_item(
        &self,
        node: NodeId,
        interval: Option<Duration>,
        sink: Box<dyn NotificationSink>,
    ) -> Result<CreatedItem, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::CreateItem {
                node,
                interval,
                sink,
                reply: tx,
            })
            .await
            .map_err(|_| EngineError::Stopped)?;
        Ok(rx.await.map_err(|_| EngineError::Stopped)??)
    }

    /// Delete a monitored item.
    pub async fn delete_item(&self, id: ItemId) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::DeleteItem { id, reply: tx })
            .await
            .map_err(|_| EngineError::Stopped)?;
        Ok(rx.await.map_err(|_| EngineError::Stopped)??)
    }

    /// Best-effort bulk delete, used when a connection goes away.
    pub async fn delete_items(&self, ids: Vec<ItemId>) {
        let _ = self.commands.send(EngineCommand::DeleteItems { ids }).await;
    }

    /// Request cooperative shutdown; observed at the top of the next
    /// iteration.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// The run loop: ticks the sampler and drains pending commands.
pub struct Engine {
    config: EngineConfig,
    space: Arc<RwLock<AddressSpace>>,
    registry: MonitorRegistry,
    sampler: Sampler,
    commands: mpsc::Receiver<EngineCommand>,
    cancel: Arc<AtomicBool>,
}

impl Engine {
    /// Build an engine over an already-bootstrapped address space.
    pub fn new(config: EngineConfig, space: AddressSpace) -> (Engine, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let cancel = Arc::new(AtomicBool::new(false));
        let registry = MonitorRegistry::new(config.min_sampling_interval);

        let engine = Engine {
            config,
            space: Arc::new(RwLock::new(space)),
            registry,
            sampler: Sampler::new(),
            commands: command_rx,
            cancel: cancel.clone(),
        };
        let handle = EngineHandle {
            commands: command_tx,
            cancel,
        };

        (engine, handle)
    }

    /// Shared view of the address space, for read-side collaborators.
    pub fn space(&self) -> Arc<RwLock<AddressSpace>> {
        self.space.clone()
    }

    /// Run until cancelled.
    pub async fn run(mut self) {
        info!(
            min_sampling_interval = ?self.config.min_sampling_interval,
            tick_quantum = ?self.config.tick_quantum,
            "engine running"
        );

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }

            self.process_commands().await;

            let now = Instant::now();
            {
                let space = self.space.read().await;
                self.sampler.tick(now, &mut self.registry, &space);
            }

            tokio::time::sleep(self.config.tick_quantum).await;
        }

        info!(
            ticks = self.sampler.ticks(),
            notifications = self.sampler.notifications(),
            "engine stopped"
        );
    }

    /// Drain everything queued since the last iteration.
    async fn process_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                EngineCommand::Write { node, value, reply } => {
                    let result = {
                        let mut space = self.space.write().await;
                        space.write(&node, value)
                    };
                    if let Err(err) = &result {
                        debug!(%node, %err, "write rejected");
                    }
                    let _ = reply.send(result);
                }
                EngineCommand::CreateItem {
                    node,
                    interval,
                    sink,
                    reply,
                } => {
                    let result = {
                        let space = self.space.read().await;
                        self.registry
                            .create(&space, node, interval, sink, Instant::now())
                    };
                    let _ = reply.send(result);
                }
                EngineCommand::DeleteItem { id, reply } => {
                    let _ = reply.send(self.registry.delete(id));
                }
                EngineCommand::DeleteItems { ids } => {
                    for id in ids {
                        let _ = self.registry.delete(id);
                    }
                }
            }
        }
    }
}
