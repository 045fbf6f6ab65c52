//! Tests for snapshot publication, reload and config directory watching.

use lumen::config::{
    ConfigPaths, Environment, Generation, ReloadCoordinator, ReloadError, ReloadState,
    SnapshotBuilder,
};
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn coordinator(dir: &TempDir, contents: &str) -> ReloadCoordinator {
    fs::write(dir.path().join("config.yaml"), contents).expect("write config");
    let builder = SnapshotBuilder::standard(&ConfigPaths::new(dir.path()))
        .expect("bundled schemas compile")
        .with_environment(Environment::empty());
    ReloadCoordinator::start(builder).expect("initial load")
}

#[test]
fn test_reader_keeps_its_snapshot_across_reload() {
    let dir = TempDir::new().expect("temp dir");
    let coordinator = coordinator(&dir, "theme: dark\n");
    let held = coordinator.current().expect("snapshot");

    fs::write(dir.path().join("config.yaml"), "theme: light\n").expect("write config");
    assert_eq!(coordinator.request_reload().expect("reloads"), 2);

    assert_eq!(held.generation(), 1);
    assert_eq!(held.theme().name(), "dark");
    let current = coordinator.current().expect("snapshot");
    assert_eq!(current.generation(), 2);
    assert_eq!(current.theme().name(), "light");
    assert!(current.loaded_at() >= held.loaded_at());
}

#[test]
fn test_failed_reload_keeps_serving_previous_snapshot() {
    let dir = TempDir::new().expect("temp dir");
    let coordinator = coordinator(&dir, "theme: dark\n");

    fs::write(
        dir.path().join("config.yaml"),
        "theme: ghost\ninput-info: loud\n",
    )
    .expect("write config");
    let err = coordinator.request_reload().unwrap_err();
    match &err {
        ReloadError::Rejected { kept, failure } => {
            assert_eq!(*kept, 1);
            assert_eq!(failure.len(), 2, "{failure}");
        }
        other => panic!("expected a rejected reload, got {other}"),
    }
    assert!(err.to_string().contains("keeping generation 1"));
    assert_eq!(coordinator.state(), ReloadState::Ready);
    assert_eq!(coordinator.current().expect("snapshot").theme().name(), "dark");
}

#[test]
fn test_concurrent_reloads_get_distinct_generations() {
    let dir = TempDir::new().expect("temp dir");
    let coordinator = Arc::new(coordinator(&dir, "theme: nord\n"));

    let workers: Vec<_> = (0..6)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || coordinator.request_reload().expect("reloads"))
        })
        .collect();
    let mut generations: Vec<Generation> = workers
        .into_iter()
        .map(|w| w.join().expect("worker thread"))
        .collect();
    generations.sort_unstable();

    assert_eq!(generations, [2, 3, 4, 5, 6, 7]);
    assert_eq!(coordinator.generation(), Some(7));
}

#[test]
fn test_subscribers_see_only_successful_reloads() {
    let dir = TempDir::new().expect("temp dir");
    let coordinator = coordinator(&dir, "theme: dark\n");
    let subscription = coordinator.subscribe();

    fs::write(dir.path().join("config.yaml"), "theme: [broken]\n").expect("write config");
    assert!(coordinator.request_reload().is_err());
    fs::write(dir.path().join("config.yaml"), "theme: light\n").expect("write config");
    coordinator.request_reload().expect("reloads");

    let snapshot = subscription.try_recv().expect("one snapshot");
    assert_eq!(snapshot.generation(), 2);
    assert_eq!(snapshot.theme().name(), "light");
    assert!(subscription.try_recv().is_none());
}

#[test]
fn test_file_change_triggers_debounced_reload() {
    let dir = TempDir::new().expect("temp dir");
    let coordinator = Arc::new(coordinator(&dir, "theme: dark\n"));
    let subscription = coordinator.subscribe();
    let handle = coordinator
        .watch(Duration::from_millis(100))
        .expect("watch starts");
    assert!(handle.dirs().iter().any(|d| d == dir.path()));

    // Give the watcher time to initialise
    thread::sleep(Duration::from_millis(200));
    fs::write(dir.path().join("config.yaml"), "theme: light\n").expect("write config");

    // A reload may observe a half-written file; wait for the final content
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = None;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match subscription.recv_timeout(remaining) {
            Some(snapshot) if snapshot.theme().name() == "light" => {
                seen = Some(snapshot);
                break;
            }
            Some(_) => continue,
            None => break,
        }
    }
    let snapshot = seen.expect("reload after change");
    assert!(snapshot.generation() >= 2);
    assert_eq!(coordinator.current().expect("snapshot").theme().name(), "light");

    drop(handle);
}

#[test]
fn test_drop_in_dir_created_while_watching() {
    let dir = TempDir::new().expect("temp dir");
    let coordinator = Arc::new(coordinator(&dir, "theme: dark\n"));
    let subscription = coordinator.subscribe();
    let handle = coordinator
        .watch(Duration::from_millis(100))
        .expect("watch starts");
    let dropin = dir.path().join("config.d");
    assert!(handle.pending().contains(&dropin));

    thread::sleep(Duration::from_millis(200));
    fs::create_dir(&dropin).expect("create drop-in dir");
    thread::sleep(Duration::from_millis(300));
    fs::write(dropin.join("50-theme.yaml"), "theme: light\n").expect("write drop-in");

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = None;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match subscription.recv_timeout(remaining) {
            Some(snapshot) if snapshot.theme().name() == "light" => {
                seen = Some(snapshot);
                break;
            }
            Some(_) => continue,
            None => break,
        }
    }
    seen.expect("reload after drop-in change");
    assert!(handle.dirs().contains(&dropin));
    assert!(!handle.pending().contains(&dropin));

    drop(handle);
}
