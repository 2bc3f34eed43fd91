//! Termination of a running job. Kept in its own test binary because the
//! signal is delivered to the whole test process.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use autobuild::commands::run_job;

mod common;

use common::{TestEnv, OWNER};

/// Poll until `check` holds or `limit` elapses
async fn wait_for(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}

/// A pid counts as gone once it has exited, even if it is still a zombie
fn process_gone(pid: i32) -> bool {
    match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .map_or(true, |state| state == "Z" || state == "X"),
        Err(_) => true,
    }
}

fn read_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[tokio::test]
async fn test_sigterm_finalizes_and_kills_process_group() {
    let env = TestEnv::new();
    env.write_job(
        "1",
        json!({"owner": OWNER, "mode": "full", "codebase_id": "demo"}),
        Some("clone_block: ['true']\nbuild_block:\n  - 'sleep 30 & echo $! > sleeper.pid; wait'\n"),
    );
    let pid_file = env.workspace("demo").join("sleeper.pid");

    let config = env.config.clone();
    let job = tokio::spawn(async move { run_job(&config, "1").await });

    assert!(
        wait_for(Duration::from_secs(10), || read_pid(&pid_file).is_some()).await,
        "build line never started"
    );
    let sleeper = read_pid(&pid_file).unwrap();
    assert!(!process_gone(sleeper));

    kill(Pid::this(), Signal::SIGTERM).unwrap();
    let code = tokio::time::timeout(Duration::from_secs(10), job)
        .await
        .expect("runner did not stop")
        .unwrap();

    assert_eq!(code, 143);
    let status = env.status("1");
    assert_eq!(status["status"], "failed");
    assert_eq!(status["exit_code"], 143);
    assert!(
        wait_for(Duration::from_secs(5), || process_gone(sleeper)).await,
        "build process group survived"
    );
}
