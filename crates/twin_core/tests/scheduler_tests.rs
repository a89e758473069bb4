//! Tick loop lifecycle: start, publish, command, stop, restart.

use std::time::Duration;
use twin_core::{
    ControlCommand, FaultKind, JointSpec, MachineDescription, PipelineContext, PipelineService,
    TwinConfig,
};

fn service() -> PipelineService {
    let mut config = TwinConfig::default();
    config.simulation.frequency_hz = 200.0;
    config.simulation.seed = Some(4);
    // untrained models degrade every tick; keep the backoff short
    config.scheduler.error_backoff_ms = 2;
    config.scheduler.max_backoff_ms = 8;
    let description = MachineDescription::from_joints(
        "loop_arm",
        vec![
            JointSpec::revolute("a", -1.0, 1.0),
            JointSpec::revolute("b", -1.0, 1.0),
        ],
    )
    .unwrap();
    PipelineService::new(PipelineContext::new(config, description))
}

/// Wait until a snapshot with at least `tick` ticks is published
async fn wait_for_tick(service: &PipelineService, tick: u64) -> u64 {
    let mut updates = service.subscribe();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(snapshot) = updates.borrow_and_update().clone() {
                if snapshot.tick >= tick {
                    return snapshot.tick;
                }
            }
            if updates.changed().await.is_err() {
                return 0;
            }
        }
    })
    .await
    .unwrap_or(0)
}

#[tokio::test]
async fn test_start_publishes_snapshots() {
    let mut service = service();
    assert!(service.latest().is_none());
    assert!(service.start());
    assert!(service.is_running());
    assert!(!service.start());

    assert!(wait_for_tick(&service, 5).await >= 5);
    let latest = service.latest().unwrap();
    assert_eq!(latest.joints.len(), 2);
    // untrained models fall back to neutral values
    assert_eq!(latest.verdict.prediction.rul_hours, 1000.0);

    assert!(service.stop().await);
    assert!(!service.is_running());
    assert!(service.context().is_some());
}

#[tokio::test]
async fn test_stop_returns_context_and_restart_continues() {
    let mut service = service();
    service.start();
    wait_for_tick(&service, 3).await;
    service.stop().await;

    let ticks = service.context().unwrap().ticks();
    assert!(ticks >= 3);
    // no tick runs while stopped
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(service.context().unwrap().ticks(), ticks);

    assert!(service.start());
    assert!(wait_for_tick(&service, ticks + 2).await >= ticks + 2);
    service.stop().await;
}

#[tokio::test]
async fn test_commands_apply_at_tick_boundary() {
    let mut service = service();
    service.start();
    wait_for_tick(&service, 2).await;

    service.send(ControlCommand::InjectFault {
        kind: FaultKind::Vibration,
        severity: 1.0,
    });
    let mut updates = service.subscribe();
    let worn = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if updates.changed().await.is_err() {
                return false;
            }
            let saturated = updates
                .borrow_and_update()
                .as_ref()
                .map_or(false, |s| s.degradation_factor == 1.0);
            if saturated {
                return true;
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(worn);

    service.stop().await;
    let context = service.context().unwrap();
    assert_eq!(context.synthesizer().degradation_factor(), 1.0);
}

#[tokio::test]
async fn test_commands_apply_immediately_while_stopped() {
    let mut service = service();
    service.send(ControlCommand::InjectFault {
        kind: FaultKind::Drift,
        severity: 0.5,
    });
    let context = service.context().unwrap();
    assert!(context.synthesizer().degradation_factor() > 0.2);

    service.send(ControlCommand::Reset);
    let context = service.context().unwrap();
    assert_eq!(context.synthesizer().degradation_factor(), 0.0);
    assert_eq!(context.ticks(), 0);
}

#[tokio::test]
async fn test_stop_without_start() {
    let mut service = service();
    assert!(!service.stop().await);
    assert!(service.context().is_some());
}
