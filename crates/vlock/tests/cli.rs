//! CLI behaviour that can be verified without a virtual console.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_mentions_plugins() {
    Command::cargo_bin("vlock")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("PLUGIN"));
}

#[test]
fn version_prints_the_package_version() {
    Command::cargo_bin("vlock")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn refuses_to_lock_a_non_terminal() {
    // Plugin resolution with no plugins succeeds; the tty check is what
    // must reject a piped stdin.
    Command::cargo_bin("vlock")
        .unwrap()
        .write_stdin("")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("vlock: stdin is not a terminal"));
}

#[test]
fn unknown_plugins_are_fatal() {
    Command::cargo_bin("vlock")
        .unwrap()
        .arg("surely-not-a-real-plugin")
        .write_stdin("")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains(
            "loading plugin 'surely-not-a-real-plugin' failed",
        ));
}
