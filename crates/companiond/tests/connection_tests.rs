//! Connection lifecycle: handshake, death, crash-loop mitigation and
//! registry pushes against a fake stats daemon.

mod common;

use common::harness;
use companion_common::{
    AlarmSlot, PackageAction, PackageEvent, ShutdownAction, ShutdownEvent, UserAction, UserEvent,
};
use companiond::broadcasts::OutboundIntent;
use companiond::clock::Clock;
use companiond::HandshakeOutcome;
use std::fs;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

fn package(action: PackageAction, replacing: bool) -> PackageEvent {
    PackageEvent {
        action,
        package: "com.example.mail".to_string(),
        uid: 10_001,
        replacing,
    }
}

fn config_dir_with(names: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for name in names {
        fs::write(dir.path().join(name), b"config").unwrap();
    }
    dir
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_handshake_connects_and_pushes_snapshot() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());

    assert_eq!(h.manager.handshake(), HandshakeOutcome::Connected);
    assert!(h.manager.is_connected());
    assert_eq!(h.daemon.calls(), vec!["ready", "link", "all_uid_data:2"]);
    assert_eq!(h.manager.subscription_count(), 3);
    assert_eq!(
        h.bus.sent.lock().unwrap().as_slice(),
        &[OutboundIntent::StatsdStarted]
    );
}

#[tokio::test]
async fn test_second_handshake_is_rejected() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());

    assert_eq!(h.manager.handshake(), HandshakeOutcome::Connected);
    let calls_before = h.daemon.calls().len();

    assert_eq!(h.manager.handshake(), HandshakeOutcome::AlreadyConnected);
    assert!(h.manager.is_connected());
    assert_eq!(h.manager.subscription_count(), 3);
    assert_eq!(h.daemon.calls().len(), calls_before);
}

#[tokio::test]
async fn test_daemon_not_found_stays_disconnected() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    h.locator.present.store(false, Ordering::SeqCst);

    assert_eq!(h.manager.handshake(), HandshakeOutcome::DaemonNotFound);
    assert!(!h.manager.is_connected());
    assert!(h.daemon.calls().is_empty());
}

#[tokio::test]
async fn test_link_failure_forgets_without_crash_bookkeeping() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    h.daemon.fail_link.store(true, Ordering::SeqCst);
    h.alarms.set_exact(AlarmSlot::Periodic, 10_000_000);

    assert_eq!(h.manager.handshake(), HandshakeOutcome::Failed);
    assert!(!h.manager.is_connected());
    assert_eq!(h.manager.subscription_count(), 0);
    assert_eq!(h.alarms.pending_wake_time(AlarmSlot::Periodic), None);
    assert!(h.manager.dump().contains("recent daemon deaths: 0"));
}

#[tokio::test]
async fn test_initial_push_failure_counts_as_death() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    h.daemon.fail_pushes.store(true, Ordering::SeqCst);

    assert_eq!(h.manager.handshake(), HandshakeOutcome::Failed);
    assert!(!h.manager.is_connected());
    assert!(h.manager.dump().contains("recent daemon deaths: 1"));
    assert!(h.bus.sent.lock().unwrap().is_empty());
    assert_eq!(h.daemon.unlinks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_handshakes_release_death_links() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    h.daemon.fail_pushes.store(true, Ordering::SeqCst);

    for _ in 0..5 {
        assert_eq!(h.manager.handshake(), HandshakeOutcome::Failed);
    }
    assert_eq!(h.daemon.unlinks.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_connected_daemon_keeps_death_link() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());

    h.manager.handshake();
    assert_eq!(h.daemon.unlinks.load(Ordering::SeqCst), 0);

    h.daemon.kill();
    assert_eq!(h.daemon.unlinks.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Death and crash-loop mitigation
// ============================================================================

#[tokio::test]
async fn test_death_forgets_everything() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    h.manager.handshake();
    for slot in AlarmSlot::ALL {
        h.alarms.set_exact(slot, 10_000_000);
    }

    h.daemon.kill();

    assert!(!h.manager.is_connected());
    assert_eq!(h.manager.subscription_count(), 0);
    for slot in AlarmSlot::ALL {
        assert_eq!(h.alarms.pending_wake_time(slot), None, "{} still armed", slot);
    }
}

#[tokio::test]
async fn test_ten_deaths_delete_one_config() {
    let dir = config_dir_with(&["a.cfg", "b.cfg"]);
    let h = harness(dir.path());

    for _ in 0..10 {
        assert_eq!(h.manager.handshake(), HandshakeOutcome::Connected);
        h.daemon.kill();
        h.clock.advance_ms(1_000);
    }

    assert!(!dir.path().join("a.cfg").exists());
    assert!(dir.path().join("b.cfg").exists());
    let deleted = h.manager.deleted_configs();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].1, "a.cfg");
    assert!(h
        .manager
        .dump()
        .contains("Number of configuration files deleted: 1"));
}

#[tokio::test]
async fn test_crash_window_follows_boot_time_not_wall_time() {
    let dir = config_dir_with(&["bad.cfg"]);
    let h = harness(dir.path());
    let wall_start = h.clock.wall_ms();

    for i in 0..10 {
        if i == 9 {
            // Time sync pushes the wall clock two days ahead.
            h.clock.set_wall_ms(wall_start + 2 * 24 * 60 * 60 * 1000);
        }
        assert_eq!(h.manager.handshake(), HandshakeOutcome::Connected);
        h.daemon.kill();
        h.clock.advance_ms(1_000);
    }

    assert!(!dir.path().join("bad.cfg").exists());
    assert_eq!(h.manager.deleted_configs().len(), 1);
}

#[tokio::test]
async fn test_wall_clock_set_back_does_not_revive_old_deaths() {
    let dir = config_dir_with(&["a.cfg"]);
    let h = harness(dir.path());
    let wall_start = h.clock.wall_ms();

    for _ in 0..9 {
        h.manager.handshake();
        h.daemon.kill();
        h.clock.advance_ms(1_000);
    }
    // A day and an hour of boot time pass, then the wall clock is set back.
    h.clock.advance_ms(25 * 60 * 60 * 1000);
    h.clock.set_wall_ms(wall_start);
    h.manager.handshake();
    h.daemon.kill();

    assert!(dir.path().join("a.cfg").exists());
    assert!(h.manager.dump().contains("recent daemon deaths: 1"));
}

#[tokio::test]
async fn test_nine_deaths_delete_nothing() {
    let dir = config_dir_with(&["a.cfg"]);
    let h = harness(dir.path());

    for _ in 0..9 {
        h.manager.handshake();
        h.daemon.kill();
        h.clock.advance_ms(1_000);
    }

    assert!(dir.path().join("a.cfg").exists());
    assert!(h.manager.deleted_configs().is_empty());
}

#[tokio::test]
async fn test_deaths_outside_window_do_not_count() {
    let dir = config_dir_with(&["a.cfg"]);
    let h = harness(dir.path());

    for _ in 0..9 {
        h.manager.handshake();
        h.daemon.kill();
        h.clock.advance_ms(1_000);
    }
    h.clock.advance_ms(25 * 60 * 60 * 1000);
    h.manager.handshake();
    h.daemon.kill();

    assert!(dir.path().join("a.cfg").exists());
    assert!(h.manager.dump().contains("recent daemon deaths: 1"));
}

#[tokio::test]
async fn test_stale_death_notice_ignored() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());

    h.manager.handshake();
    h.daemon.kill();
    h.manager.handshake();

    // A notice for the first connection arriving late must not tear down the second.
    h.manager.on_daemon_death(1);
    assert!(h.manager.is_connected());
    assert!(h.manager.dump().contains("recent daemon deaths: 1"));
}

// ============================================================================
// Registry pushes
// ============================================================================

#[tokio::test]
async fn test_upgrade_burst_reports_once() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    h.manager.handshake();

    h.manager.on_package_event(&package(PackageAction::Removed, true));
    h.manager.on_package_event(&package(PackageAction::Added, true));
    h.manager.on_package_event(&package(PackageAction::Replaced, true));

    assert_eq!(h.daemon.count("one_package:"), 1);
    assert_eq!(h.daemon.count("package_removed:"), 0);
    assert!(h.daemon.calls().contains(&"one_package:com.example.mail:10001:7".to_string()));
}

#[tokio::test]
async fn test_plain_install_and_uninstall() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    h.manager.handshake();

    h.manager.on_package_event(&package(PackageAction::Added, false));
    h.manager.on_package_event(&package(PackageAction::Removed, false));

    assert_eq!(h.daemon.count("one_package:"), 1);
    assert_eq!(h.daemon.count("package_removed:"), 1);
}

#[tokio::test]
async fn test_package_events_ignored_when_disconnected() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());

    h.manager.on_package_event(&package(PackageAction::Added, false));
    assert!(h.daemon.calls().is_empty());
}

#[tokio::test]
async fn test_push_failure_tears_down() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    h.manager.handshake();
    h.daemon.fail_pushes.store(true, Ordering::SeqCst);

    h.manager.on_package_event(&package(PackageAction::Added, false));

    assert!(!h.manager.is_connected());
    assert!(h.manager.dump().contains("recent daemon deaths: 1"));
}

#[tokio::test]
async fn test_user_events_push_full_snapshot() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    h.manager.handshake();

    h.manager.on_user_event(&UserEvent {
        action: UserAction::Initialize,
        user_id: 10,
    });
    h.manager.on_user_event(&UserEvent {
        action: UserAction::Removed,
        user_id: 10,
    });

    assert_eq!(h.daemon.count("all_uid_data:"), 3);
}

#[tokio::test]
async fn test_background_shutdown_not_reported() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    h.manager.handshake();

    h.manager.on_shutdown_event(&ShutdownEvent {
        action: ShutdownAction::Shutdown,
        foreground: false,
    });
    assert_eq!(h.daemon.count("shutdown"), 0);

    h.manager.on_shutdown_event(&ShutdownEvent {
        action: ShutdownAction::Reboot,
        foreground: false,
    });
    assert_eq!(h.daemon.count("shutdown"), 1);
}

// ============================================================================
// Alarms
// ============================================================================

#[tokio::test]
async fn test_alarm_notifies_connected_daemon() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    h.manager.handshake();

    // Wake time already passed on the manual clock.
    h.alarms.set_exact(AlarmSlot::Anomaly, 1_000);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.daemon.count("anomaly_alarm"), 1);
    assert_eq!(h.alarms.pending_wake_time(AlarmSlot::Anomaly), None);
}

#[tokio::test]
async fn test_alarm_after_death_is_dropped() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path());
    h.manager.handshake();
    h.daemon.kill();

    h.alarms.set_exact(AlarmSlot::Anomaly, 1_000);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.daemon.count("anomaly_alarm"), 0);
    assert_eq!(h.alarms.pending_wake_time(AlarmSlot::Anomaly), None);
}
