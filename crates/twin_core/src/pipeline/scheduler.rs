//! Fixed-rate tick loop
//!
//! The loop task owns the [`PipelineContext`] while it runs, so it is the only
//! writer. Snapshots are published through a `watch` channel only after a tick
//! completes. Control commands queue up and are applied at the next tick
//! boundary. Stopping is cooperative: the running flag is checked once per
//! boundary and the loop hands the context back when it exits.

use super::{ControlCommand, PipelineContext, TickSnapshot};
use crate::config::SchedulerConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub type SnapshotReceiver = watch::Receiver<Option<Arc<TickSnapshot>>>;

type LoopResult = (PipelineContext, mpsc::UnboundedReceiver<ControlCommand>);

/// Exponential delay after degraded ticks
struct Backoff {
    base: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    fn new(config: &SchedulerConfig) -> Self {
        Self {
            base: Duration::from_millis(config.error_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms.max(config.error_backoff_ms)),
            current: None,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            Some(previous) => (previous * 2).min(self.max),
            None => self.base,
        };
        self.current = Some(delay);
        delay
    }

    fn reset(&mut self) {
        self.current = None;
    }
}

pub struct PipelineService {
    period: Duration,
    scheduler: SchedulerConfig,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    commands: mpsc::UnboundedSender<ControlCommand>,
    snapshots: watch::Sender<Option<Arc<TickSnapshot>>>,
    /// Present while stopped
    idle: Option<LoopResult>,
    handle: Option<JoinHandle<LoopResult>>,
}

impl PipelineService {
    pub fn new(context: PipelineContext) -> Self {
        let period = Duration::from_secs_f64(context.config().simulation.dt())
            .max(Duration::from_millis(1));
        let scheduler = context.config().scheduler.clone();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (snapshots, _) = watch::channel(None);
        Self {
            period,
            scheduler,
            running: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            commands,
            snapshots,
            idle: Some((context, command_rx)),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn a fresh loop instance; false if already running
    pub fn start(&mut self) -> bool {
        if self.handle.is_some() {
            warn!("Tick loop already running");
            return false;
        }
        let Some((context, command_rx)) = self.idle.take() else {
            error!("Pipeline context lost, cannot start tick loop");
            return false;
        };

        self.running.store(true, Ordering::SeqCst);
        let tick_loop = TickLoop {
            period: self.period,
            backoff: Backoff::new(&self.scheduler),
            running: self.running.clone(),
            wake: self.wake.clone(),
            snapshots: self.snapshots.clone(),
        };
        self.handle = Some(tokio::spawn(tick_loop.run(context, command_rx)));
        info!("Tick loop started ({:?} period)", self.period);
        true
    }

    /// Clear the running flag and wait for the loop to hand back the context
    pub async fn stop(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();

        match handle.await {
            Ok(result) => {
                self.idle = Some(result);
                info!("Tick loop stopped");
                true
            }
            Err(e) => {
                error!("Tick loop terminated abnormally: {}", e);
                false
            }
        }
    }

    /// Queue a command for the next tick boundary, or apply it now while stopped
    pub fn send(&mut self, command: ControlCommand) {
        if let Some((context, _)) = self.idle.as_mut() {
            context.apply(command);
            return;
        }
        if self.commands.send(command).is_err() {
            warn!("Tick loop gone, command dropped");
        }
    }

    pub fn subscribe(&self) -> SnapshotReceiver {
        self.snapshots.subscribe()
    }

    /// Last fully published snapshot
    pub fn latest(&self) -> Option<Arc<TickSnapshot>> {
        self.snapshots.borrow().clone()
    }

    /// The context, while the loop is stopped
    pub fn context(&self) -> Option<&PipelineContext> {
        self.idle.as_ref().map(|(context, _)| context)
    }

    pub fn context_mut(&mut self) -> Option<&mut PipelineContext> {
        self.idle.as_mut().map(|(context, _)| context)
    }
}

struct TickLoop {
    period: Duration,
    backoff: Backoff,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    snapshots: watch::Sender<Option<Arc<TickSnapshot>>>,
}

impl TickLoop {
    async fn run(
        mut self,
        mut context: PipelineContext,
        mut commands: mpsc::UnboundedReceiver<ControlCommand>,
    ) -> LoopResult {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.wake.notified() => {}
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            while let Ok(command) = commands.try_recv() {
                debug!("Applying {:?}", command);
                context.apply(command);
            }

            let snapshot = context.tick();
            let degraded = snapshot.is_degraded();
            self.snapshots.send_replace(Some(Arc::new(snapshot)));

            if degraded {
                let delay = self.backoff.next_delay();
                warn!("Degraded tick, backing off {:?}", delay);
                // woken early by stop()
                let _ = tokio::time::timeout(delay, self.wake.notified()).await;
            } else {
                self.backoff.reset();
            }
        }

        (context, commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let config = SchedulerConfig {
            error_backoff_ms: 1000,
            max_backoff_ms: 8000,
        };
        let mut backoff = Backoff::new(&config);
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 8000]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
    }
}
