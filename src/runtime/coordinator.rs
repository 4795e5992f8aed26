use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinSet,
    time::{Duration, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    engine::{
        queue::{DrainReport, OperationQueue, QueueError},
        traits::RemoteApply,
    },
    persist::OperationStore,
};

/// Errors returned through a [`CoordinatorHandle`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The drain itself failed.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// Force sync was requested while offline.
    #[error("cannot sync while offline")]
    Offline,
    /// The coordinator task has stopped.
    #[error("coordinator channel closed")]
    ChannelClosed,
}

/// Trigger timing for [`spawn_coordinator`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Connectivity assumed before the first signal arrives.
    pub start_online: bool,
    /// Delay before the start-up drain.
    pub startup_delay_ms: u64,
    /// Period of the retry timer; `0` disables it.
    pub retry_interval_ms: u64,
    /// Capacity of the command channel.
    pub command_bound: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            start_online: true,
            startup_delay_ms: 1000,
            retry_interval_ms: 5000,
            command_bound: 64,
        }
    }
}

/// Why a drain was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Delayed drain after the coordinator starts online.
    Startup,
    /// Connectivity went from offline to online.
    Reconnected,
    /// A user signed in while online.
    SignedIn,
    /// A producer queued new work.
    Enqueued,
    /// Explicit request through [`CoordinatorHandle::force_sync`].
    ForceSync,
    /// Periodic retry while work is pending.
    RetryTimer,
}

/// Cloneable sender side of a running coordinator.
pub struct CoordinatorHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl Clone for CoordinatorHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
        }
    }
}

enum Command {
    SetOnline {
        online: bool,
    },
    AuthChanged {
        signed_in: bool,
    },
    Enqueued,
    ForceSync {
        resp: oneshot::Sender<Result<DrainReport, RuntimeError>>,
    },
    IsOnline {
        resp: oneshot::Sender<bool>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Spawns the reactive dispatcher that decides when `queue` is drained.
///
/// Holds no persistent state. Drains run as separate tasks and may overlap.
pub fn spawn_coordinator<S, R>(
    queue: OperationQueue<S>,
    remote: Arc<R>,
    config: CoordinatorConfig,
) -> CoordinatorHandle
where
    S: OperationStore + 'static,
    R: RemoteApply,
{
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_bound.max(1));

    tokio::spawn(async move {
        let mut coordinator = Coordinator {
            queue,
            remote,
            online: config.start_online,
            drains: JoinSet::new(),
        };

        let startup = tokio::time::sleep(Duration::from_millis(config.startup_delay_ms));
        tokio::pin!(startup);
        let mut startup_pending = config.start_online;
        let mut retry_timer = retry_interval(config.retry_interval_ms);
        let mut shutdown_resp = None;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    if let Some(resp) = coordinator.handle_command(cmd) {
                        shutdown_resp = Some(resp);
                        break;
                    }
                }
                () = &mut startup, if startup_pending => {
                    startup_pending = false;
                    if coordinator.online {
                        coordinator.spawn_drain(Trigger::Startup, None);
                    }
                }
                () = next_tick(&mut retry_timer) => {
                    if coordinator.online {
                        coordinator.spawn_drain(Trigger::RetryTimer, None);
                    }
                }
                Some(joined) = coordinator.drains.join_next(), if !coordinator.drains.is_empty() => {
                    if let Err(err) = joined {
                        warn!(%err, "drain task ended abnormally");
                    }
                }
            }
        }

        while let Some(joined) = coordinator.drains.join_next().await {
            if let Err(err) = joined {
                warn!(%err, "drain task ended abnormally");
            }
        }
        debug!("coordinator stopped");
        if let Some(resp) = shutdown_resp {
            let _ = resp.send(());
        }
    });

    CoordinatorHandle { cmd_tx }
}

impl CoordinatorHandle {
    /// Reports a connectivity change. Offline to online starts a drain.
    pub async fn set_online(&self, online: bool) -> Result<(), RuntimeError> {
        self.send(Command::SetOnline { online }).await
    }

    /// Reports an authentication change. Signing in while online starts a drain.
    pub async fn auth_changed(&self, signed_in: bool) -> Result<(), RuntimeError> {
        self.send(Command::AuthChanged { signed_in }).await
    }

    /// Asks for a drain after a producer enqueued work; ignored while offline.
    pub async fn notify_enqueued(&self) -> Result<(), RuntimeError> {
        self.send(Command::Enqueued).await
    }

    /// Drains now and waits for the pass to finish.
    pub async fn force_sync(&self) -> Result<DrainReport, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ForceSync { resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Current connectivity as last reported.
    pub async fn is_online(&self) -> Result<bool, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::IsOnline { resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Stops accepting triggers and waits for in-flight drains.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown { resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    async fn send(&self, cmd: Command) -> Result<(), RuntimeError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| RuntimeError::ChannelClosed)
    }
}

struct Coordinator<S, R> {
    queue: OperationQueue<S>,
    remote: Arc<R>,
    online: bool,
    drains: JoinSet<()>,
}

impl<S, R> Coordinator<S, R>
where
    S: OperationStore + 'static,
    R: RemoteApply,
{
    /// Returns the responder when the command asks the loop to stop.
    fn handle_command(&mut self, cmd: Command) -> Option<oneshot::Sender<()>> {
        match cmd {
            Command::SetOnline { online } => {
                let reconnected = online && !self.online;
                self.online = online;
                if reconnected {
                    info!("connectivity regained, processing queue");
                    self.spawn_drain(Trigger::Reconnected, None);
                } else if !online {
                    debug!("connectivity lost");
                }
            }
            Command::AuthChanged { signed_in } => {
                if signed_in && self.online {
                    self.spawn_drain(Trigger::SignedIn, None);
                }
            }
            Command::Enqueued => {
                if self.online {
                    self.spawn_drain(Trigger::Enqueued, None);
                }
            }
            Command::ForceSync { resp } => {
                if self.online {
                    self.spawn_drain(Trigger::ForceSync, Some(resp));
                } else {
                    let _ = resp.send(Err(RuntimeError::Offline));
                }
            }
            Command::IsOnline { resp } => {
                let _ = resp.send(self.online);
            }
            Command::Shutdown { resp } => return Some(resp),
        }
        None
    }

    fn spawn_drain(
        &mut self,
        trigger: Trigger,
        resp: Option<oneshot::Sender<Result<DrainReport, RuntimeError>>>,
    ) {
        debug!(?trigger, "drain triggered");
        let queue = self.queue.clone();
        let remote = Arc::clone(&self.remote);

        self.drains.spawn(async move {
            if trigger == Trigger::RetryTimer {
                match queue.pending_count().await {
                    Ok(0) => return,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "retry timer could not read pending count");
                        return;
                    }
                }
            }

            let result = queue.drain(&*remote).await.map_err(RuntimeError::from);
            if let Some(resp) = resp {
                let _ = resp.send(result);
            }
        });
    }
}

fn retry_interval(period_ms: u64) -> Option<Interval> {
    if period_ms == 0 {
        return None;
    }
    let period = Duration::from_millis(period_ms);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
