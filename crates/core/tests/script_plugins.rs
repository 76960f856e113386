//! End-to-end tests of the script backend and the resolver, driven by
//! real executable scripts in a temporary plugin directory.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serial_test::serial;
use tempfile::TempDir;

use vlock_core::errors::{PluginError, ProcessError, ResolveError};
use vlock_core::plugin::{DependencyKind, Hook, Plugin, PluginDirs};
use vlock_core::registry::PluginRegistry;

struct Fixture {
    _dir: TempDir,
    dirs: PluginDirs,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let dirs = PluginDirs {
            // No modules; everything falls through to the script backend.
            module_dir: dir.path().join("modules"),
            script_dir: dir.path().join("scripts"),
        };
        fs::create_dir(&dirs.module_dir).unwrap();
        fs::create_dir(&dirs.script_dir).unwrap();
        Self { _dir: dir, dirs }
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dirs.script_dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn log_path(&self) -> PathBuf {
        self.dirs.script_dir.join("hook.log")
    }
}

/// A script that answers one dependency query and logs delivered hooks.
fn hook_logger(dependency_answers: &str, log: &Path) -> String {
    format!(
        r#"case "$1" in
{dependency_answers}
hooks)
    while read hook; do
        echo "$(basename "$0") $hook" >> "{log}"
    done
    ;;
esac"#,
        log = log.display()
    )
}

fn wait_for_line_count(log: &Path, count: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let lines: Vec<String> = fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect();
        if lines.len() >= count || Instant::now() > deadline {
            return lines;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
#[serial]
fn dependency_queries_fill_all_six_lists() {
    let fixture = Fixture::new();
    fixture.script(
        "verbose",
        r#"case "$1" in
succeeds) echo "s1 s2" ;;
preceeds) echo "p1" ;;
requires) ;;
needs) printf 'n1\r\nn2\n' ;;
depends) ;;
conflicts) echo "c1" ;;
esac"#,
    );

    let plugin = Plugin::load("verbose", &fixture.dirs).unwrap();

    assert_eq!(plugin.dependencies(DependencyKind::Succeeds), ["s1", "s2"]);
    assert_eq!(plugin.dependencies(DependencyKind::Preceeds), ["p1"]);
    assert!(plugin.dependencies(DependencyKind::Requires).is_empty());
    assert_eq!(plugin.dependencies(DependencyKind::Needs), ["n1", "n2"]);
    assert!(plugin.dependencies(DependencyKind::Depends).is_empty());
    assert_eq!(plugin.dependencies(DependencyKind::Conflicts), ["c1"]);
}

#[test]
#[serial]
fn missing_scripts_are_not_found() {
    let fixture = Fixture::new();
    match PluginRegistry::new(fixture.dirs.clone()).load("ghost") {
        Err(PluginError::NotFound { name }) => assert_eq!(name, "ghost"),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
#[serial]
fn plugin_names_are_stripped_of_paths() {
    let fixture = Fixture::new();
    fixture.script("plain", ":");

    let mut registry = PluginRegistry::new(fixture.dirs.clone());
    registry.load("../scripts/plain").unwrap();
    assert_eq!(registry.names(), ["plain"]);

    // Loading it again under its bare name is a no-op.
    registry.load("plain").unwrap();
    assert_eq!(registry.len(), 1);
}

#[test]
#[serial]
fn requires_loads_transitively() {
    let fixture = Fixture::new();
    fixture.script(
        "top",
        r#"case "$1" in requires) echo middle ;; esac"#,
    );
    fixture.script(
        "middle",
        r#"case "$1" in requires) echo bottom ;; esac"#,
    );
    fixture.script("bottom", ":");

    let mut registry = PluginRegistry::new(fixture.dirs.clone());
    registry.load("top").unwrap();
    registry.resolve().unwrap();

    assert_eq!(registry.len(), 3);
    for name in ["top", "middle", "bottom"] {
        assert!(registry.names().contains(&name));
    }
}

#[test]
#[serial]
fn requires_on_an_unloadable_plugin_is_fatal() {
    let fixture = Fixture::new();
    fixture.script(
        "top",
        r#"case "$1" in requires) echo missing ;; esac"#,
    );

    let mut registry = PluginRegistry::new(fixture.dirs.clone());
    registry.load("top").unwrap();

    match registry.resolve() {
        Err(ResolveError::RequiresFailed {
            plugin, dependency, ..
        }) => {
            assert_eq!(plugin, "top");
            assert_eq!(dependency, "missing");
        }
        other => panic!("expected RequiresFailed, got {other:?}"),
    }
}

#[test]
#[serial]
fn hooks_travel_the_stdin_pipe_in_resolved_order() {
    let fixture = Fixture::new();
    let early_log = fixture.dirs.script_dir.join("early.log");
    let late_log = fixture.dirs.script_dir.join("late.log");
    fixture.script(
        "early",
        &hook_logger(r#"preceeds) echo late ;;"#, &early_log),
    );
    fixture.script("late", &hook_logger("", &late_log));

    let mut registry = PluginRegistry::new(fixture.dirs.clone());
    // Deliberately loaded in the wrong order; resolve flips them.
    registry.load("late").unwrap();
    registry.load("early").unwrap();
    registry.resolve().unwrap();
    assert_eq!(registry.names(), ["early", "late"]);

    registry.call_hook(Hook::Start).unwrap();
    registry.call_hook(Hook::End).unwrap();
    // Closing the pipes lets the scripts drain and exit.
    drop(registry);

    // The scripts run concurrently, so only the per-script order is
    // deterministic.
    assert_eq!(
        wait_for_line_count(&early_log, 2),
        ["early vlock_start", "early vlock_end"]
    );
    assert_eq!(
        wait_for_line_count(&late_log, 2),
        ["late vlock_start", "late vlock_end"]
    );
}

#[test]
#[serial]
fn slow_dependency_queries_time_out() {
    let fixture = Fixture::new();
    fixture.script("sleepy", "sleep 5");

    let started = Instant::now();
    let result = PluginRegistry::new(fixture.dirs.clone()).load("sleepy");

    match result {
        Err(PluginError::Query {
            source: ProcessError::Timeout,
            ..
        }) => {}
        other => panic!("expected a query timeout, got {other:?}"),
    }
    // One second of budget plus the kill grace period, not five.
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[test]
#[serial]
fn oversized_dependency_output_is_rejected() {
    let fixture = Fixture::new();
    fixture.script("chatty", "dd if=/dev/zero bs=4096 count=1 2>/dev/null | tr '\\0' 'x'");

    match PluginRegistry::new(fixture.dirs.clone()).load("chatty") {
        Err(PluginError::Query {
            source: ProcessError::OutputTooLarge,
            ..
        }) => {}
        other => panic!("expected oversized output rejection, got {other:?}"),
    }
}

#[test]
#[serial]
fn conflicting_scripts_cannot_be_loaded_together() {
    let fixture = Fixture::new();
    fixture.script(
        "jealous",
        r#"case "$1" in conflicts) echo rival ;; esac"#,
    );
    fixture.script("rival", ":");

    let mut registry = PluginRegistry::new(fixture.dirs.clone());
    registry.load("jealous").unwrap();
    registry.load("rival").unwrap();

    match registry.resolve() {
        Err(ResolveError::Conflict { plugin, conflict }) => {
            assert_eq!(plugin, "jealous");
            assert_eq!(conflict, "rival");
        }
        other => panic!("expected Conflict, got {other:?}"),
    }
}

#[test]
#[serial]
fn a_dead_script_latches_out_of_save_dispatch() {
    let fixture = Fixture::new();
    let log = fixture.log_path();
    // Exits as soon as the first hook arrives; the next write hits a
    // closed pipe.
    fixture.script(
        "quitter",
        &format!(
            r#"case "$1" in
hooks)
    read hook
    echo "quitter $hook" >> "{}"
    ;;
esac"#,
            log.display()
        ),
    );

    let mut registry = PluginRegistry::new(fixture.dirs.clone());
    registry.load("quitter").unwrap();
    registry.resolve().unwrap();

    registry.call_hook(Hook::Save).unwrap();
    let lines = wait_for_line_count(&log, 1);
    assert_eq!(lines, ["quitter vlock_save"]);

    // Give the script a moment to exit, then write into the broken pipe.
    std::thread::sleep(Duration::from_millis(200));
    registry.call_hook(Hook::Save).unwrap();
    registry.call_hook(Hook::SaveAbort).unwrap();
    drop(registry);

    assert_eq!(wait_for_line_count(&log, 1), ["quitter vlock_save"]);
}
