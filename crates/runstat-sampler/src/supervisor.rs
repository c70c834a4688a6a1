//! Sampler supervisor — one background task per sampler.
//!
//! Each task drives its sampler on a tokio interval. The tick itself runs
//! on the blocking pool and is awaited before the next tick is considered,
//! so ticks of one sampler never overlap; ticks missed meanwhile are
//! skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{SamplerError, SamplerResult};
use crate::sampler::{Sampler, SamplerState};

/// Background task of a started sampler.
struct TaskSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

struct SamplerSlot {
    sampler: Arc<Sampler>,
    task: Option<TaskSlot>,
}

/// Owns the registered samplers and their background tasks.
#[derive(Default)]
pub struct SamplerSupervisor {
    samplers: Arc<RwLock<HashMap<String, SamplerSlot>>>,
}

impl SamplerSupervisor {
    /// Create a supervisor with no samplers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an idle sampler under its name.
    pub async fn register(&self, sampler: Sampler) -> SamplerResult<Arc<Sampler>> {
        let mut samplers = self.samplers.write().await;
        let name = sampler.name().to_string();
        if samplers.contains_key(&name) {
            return Err(SamplerError::AlreadyRegistered(name));
        }
        let sampler = Arc::new(sampler);
        samplers.insert(
            name,
            SamplerSlot {
                sampler: sampler.clone(),
                task: None,
            },
        );
        Ok(sampler)
    }

    /// Start the named sampler. The first tick runs immediately.
    pub async fn start(&self, name: &str) -> SamplerResult<()> {
        let mut samplers = self.samplers.write().await;
        let slot = samplers
            .get_mut(name)
            .ok_or_else(|| SamplerError::NotFound(name.to_string()))?;
        slot.sampler.start()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sampler = slot.sampler.clone();
        let handle = tokio::spawn(async move {
            run_sampler_loop(sampler, shutdown_rx).await;
        });
        slot.task = Some(TaskSlot {
            handle,
            shutdown_tx,
        });
        Ok(())
    }

    /// Start every registered sampler that is still idle.
    pub async fn start_all(&self) -> SamplerResult<()> {
        let idle: Vec<String> = {
            let samplers = self.samplers.read().await;
            samplers
                .iter()
                .filter(|(_, slot)| slot.sampler.state() == SamplerState::Idle)
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in idle {
            self.start(&name).await?;
        }
        Ok(())
    }

    /// Stop one sampler, waiting up to `grace` for an in-flight tick.
    pub async fn stop_sampler(&self, name: &str, grace: Duration) -> SamplerResult<()> {
        let task = {
            let mut samplers = self.samplers.write().await;
            let slot = samplers
                .get_mut(name)
                .ok_or_else(|| SamplerError::NotFound(name.to_string()))?;
            if slot.sampler.state() == SamplerState::Idle {
                return Ok(());
            }
            slot.sampler.stop()?;
            slot.task.take()
        };
        if let Some(task) = task {
            shutdown_task(name, task, grace).await;
        }
        Ok(())
    }

    /// Stop every sampler (for graceful shutdown).
    ///
    /// Each sampler gets `grace` to finish its in-flight tick before its
    /// task is aborted.
    pub async fn stop(&self, grace: Duration) {
        let tasks: Vec<(String, TaskSlot)> = {
            let mut samplers = self.samplers.write().await;
            samplers
                .iter_mut()
                .filter_map(|(name, slot)| {
                    if slot.sampler.state() != SamplerState::Idle {
                        let _ = slot.sampler.stop();
                    }
                    slot.task.take().map(|task| (name.clone(), task))
                })
                .collect()
        };

        // Grace periods run concurrently.
        let waits: Vec<JoinHandle<()>> = tasks
            .into_iter()
            .map(|(name, task)| tokio::spawn(async move { shutdown_task(&name, task, grace).await }))
            .collect();
        for wait in waits {
            let _ = wait.await;
        }
        info!("all samplers stopped");
    }

    /// Names of samplers currently running, sorted.
    pub async fn active_samplers(&self) -> Vec<String> {
        let samplers = self.samplers.read().await;
        let mut names: Vec<String> = samplers
            .iter()
            .filter(|(_, slot)| slot.sampler.is_running())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Check if the named sampler is registered and running.
    pub async fn is_running(&self, name: &str) -> bool {
        let samplers = self.samplers.read().await;
        samplers.get(name).is_some_and(|slot| slot.sampler.is_running())
    }

    /// Look up a registered sampler.
    pub async fn get(&self, name: &str) -> Option<Arc<Sampler>> {
        let samplers = self.samplers.read().await;
        samplers.get(name).map(|slot| slot.sampler.clone())
    }
}

async fn shutdown_task(name: &str, task: TaskSlot, grace: Duration) {
    let _ = task.shutdown_tx.send(true);
    let mut handle = task.handle;
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(Ok(())) => debug!(sampler = %name, "sampler task finished"),
        Ok(Err(e)) if e.is_panic() => {
            error!(sampler = %name, "sampler task had panicked");
        }
        Ok(Err(_)) => debug!(sampler = %name, "sampler task cancelled"),
        Err(_) => {
            warn!(
                sampler = %name,
                grace_ms = grace.as_millis() as u64,
                "sampler tick still running after grace period, aborting task"
            );
            handle.abort();
        }
    }
}

/// Stops the sampler if its loop unwinds.
struct LoopGuard {
    sampler: Arc<Sampler>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.sampler.halt();
            error!(sampler = %self.sampler.name(), "sampler loop panicked, sampler stopped");
        }
    }
}

/// The tick loop for a single sampler.
async fn run_sampler_loop(sampler: Arc<Sampler>, mut shutdown: watch::Receiver<bool>) {
    let _guard = LoopGuard {
        sampler: sampler.clone(),
    };
    let mut ticker = tokio::time::interval(sampler.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(sampler = %sampler.name(), "sampler loop starting");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!(sampler = %sampler.name(), "sampler loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                if !sampler.is_running() {
                    break;
                }
                let tick = sampler.clone();
                let ok = match tokio::task::spawn_blocking(move || tick.sample()).await {
                    Ok(report) => !report.failed(),
                    Err(e) if e.is_panic() => {
                        error!(sampler = %sampler.name(), "sampler tick panicked");
                        false
                    }
                    Err(_) => break,
                };
                if sampler.note_tick(ok) == SamplerState::Stopped {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    use runstat_core::config::SamplerConfig;
    use runstat_metrics::MetricRegistry;

    use crate::testing::ScriptedProbe;

    fn config(interval_ms: u64) -> SamplerConfig {
        SamplerConfig {
            interval: Duration::from_millis(interval_ms),
            ..SamplerConfig::default()
        }
    }

    fn sampler(name: &str, probe: Arc<ScriptedProbe>, config: SamplerConfig) -> Sampler {
        Sampler::new(name, probe, Arc::new(MetricRegistry::new()), config).unwrap()
    }

    #[tokio::test]
    async fn ticks_periodically_until_stopped() {
        let supervisor = SamplerSupervisor::new();
        let probe = Arc::new(ScriptedProbe::healthy());
        let sampler = supervisor
            .register(sampler("process", probe.clone(), config(20)))
            .await
            .unwrap();

        supervisor.start("process").await.unwrap();
        assert!(supervisor.is_running("process").await);
        assert_eq!(supervisor.active_samplers().await, vec!["process".to_string()]);

        tokio::time::sleep(Duration::from_millis(150)).await;
        supervisor.stop(Duration::from_secs(1)).await;

        let ticks = sampler.ticks();
        assert!(ticks >= 3, "expected at least 3 ticks, got {ticks}");
        assert_eq!(sampler.state(), SamplerState::Stopped);
        assert!(supervisor.active_samplers().await.is_empty());

        // No ticks after stop.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(sampler.ticks(), ticks);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_ticks_never_overlap() {
        let supervisor = SamplerSupervisor::new();
        let probe = Arc::new(ScriptedProbe::slow(Duration::from_millis(50)));
        supervisor
            .register(sampler("slow", probe.clone(), config(10)))
            .await
            .unwrap();

        supervisor.start("slow").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        supervisor.stop(Duration::from_secs(1)).await;

        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
        let snapshots = probe.snapshots.load(Ordering::SeqCst);
        assert!(snapshots >= 2);
        assert!(snapshots <= 8, "ticks piled up: {snapshots}");
    }

    #[tokio::test]
    async fn panicking_tick_does_not_end_the_loop() {
        let supervisor = SamplerSupervisor::new();
        let probe = Arc::new(ScriptedProbe {
            panic_on: Some(2),
            ..ScriptedProbe::healthy()
        });
        let sampler = supervisor
            .register(sampler("panicky", probe.clone(), config(15)))
            .await
            .unwrap();

        supervisor.start("panicky").await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(supervisor.is_running("panicky").await);
        assert!(probe.completed.load(Ordering::SeqCst) >= 3);
        supervisor.stop(Duration::from_secs(1)).await;
        assert_eq!(sampler.state(), SamplerState::Stopped);

        // The profiler was cleared for the panicked tick as well.
        assert_eq!(
            probe.cleared.load(Ordering::SeqCst),
            probe.snapshots.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn failing_sampler_stops_alone() {
        let supervisor = SamplerSupervisor::new();
        let failing = supervisor
            .register(sampler(
                "failing",
                Arc::new(ScriptedProbe::failing()),
                SamplerConfig {
                    max_consecutive_failures: 3,
                    ..config(10)
                },
            ))
            .await
            .unwrap();
        supervisor
            .register(sampler("healthy", Arc::new(ScriptedProbe::healthy()), config(10)))
            .await
            .unwrap();

        supervisor.start_all().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(failing.state(), SamplerState::Stopped);
        assert_eq!(failing.ticks(), 3);
        assert_eq!(supervisor.active_samplers().await, vec!["healthy".to_string()]);
        supervisor.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_tick() {
        let supervisor = SamplerSupervisor::new();
        let probe = Arc::new(ScriptedProbe::slow(Duration::from_millis(150)));
        supervisor
            .register(sampler("slow", probe.clone(), config(1000)))
            .await
            .unwrap();

        supervisor.start("slow").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(probe.in_flight.load(Ordering::SeqCst), 1);

        supervisor.stop(Duration::from_secs(2)).await;
        assert_eq!(probe.in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(probe.completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn short_grace_aborts_the_task() {
        let supervisor = SamplerSupervisor::new();
        let probe = Arc::new(ScriptedProbe::slow(Duration::from_millis(400)));
        let sampler = supervisor
            .register(sampler("stuck", probe.clone(), config(1000)))
            .await
            .unwrap();

        supervisor.start("stuck").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let started = Instant::now();
        supervisor.stop(Duration::from_millis(30)).await;
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(sampler.state(), SamplerState::Stopped);
    }

    #[tokio::test]
    async fn stop_one_sampler_leaves_others_running() {
        let supervisor = SamplerSupervisor::new();
        for name in ["a", "b"] {
            supervisor
                .register(sampler(name, Arc::new(ScriptedProbe::healthy()), config(20)))
                .await
                .unwrap();
        }
        supervisor.start_all().await.unwrap();

        supervisor.stop_sampler("a", Duration::from_secs(1)).await.unwrap();
        assert!(!supervisor.is_running("a").await);
        assert!(supervisor.is_running("b").await);

        // A stopped sampler cannot be restarted.
        assert!(matches!(
            supervisor.start("a").await,
            Err(SamplerError::InvalidTransition { .. })
        ));
        supervisor.stop(Duration::from_secs(1)).await;
    }

    #[test]
    fn unwinding_loop_stops_its_sampler() {
        let sampler = Arc::new(sampler("doomed", Arc::new(ScriptedProbe::healthy()), config(20)));
        sampler.start().unwrap();

        let guarded = sampler.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = LoopGuard { sampler: guarded };
            panic!("tick loop died");
        }));
        assert!(result.is_err());
        assert_eq!(sampler.state(), SamplerState::Stopped);
    }

    #[test]
    fn guard_leaves_a_cleanly_exited_sampler_alone() {
        let sampler = Arc::new(sampler("clean", Arc::new(ScriptedProbe::healthy()), config(20)));
        sampler.start().unwrap();
        drop(LoopGuard {
            sampler: sampler.clone(),
        });
        assert!(sampler.is_running());
    }

    #[tokio::test]
    async fn registration_errors() {
        let supervisor = SamplerSupervisor::new();
        supervisor
            .register(sampler("process", Arc::new(ScriptedProbe::healthy()), config(20)))
            .await
            .unwrap();

        let duplicate = supervisor
            .register(sampler("process", Arc::new(ScriptedProbe::healthy()), config(20)))
            .await;
        assert!(matches!(duplicate, Err(SamplerError::AlreadyRegistered(name)) if name == "process"));

        assert!(matches!(
            supervisor.start("missing").await,
            Err(SamplerError::NotFound(_))
        ));
        // Stopping a sampler that never started is a no-op.
        supervisor
            .stop_sampler("process", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(supervisor.get("process").await.is_some());
        assert!(!supervisor.is_running("process").await);
    }
}
