mod setup;

use crate::setup::{DEFAULT_TIMEOUT, make_cli};

#[test]
fn test_scatter_uneven_rows() {
    let mut cmd = make_cli();
    let output = cmd
        .timeout(DEFAULT_TIMEOUT)
        .arg("scatter")
        .arg("--workers")
        .arg("2")
        .arg("--rows")
        .arg("5")
        .output()
        .expect("Failed to run command");

    assert!(output.status.success());
    let stdout_str = String::from_utf8(output.stdout).expect("Failed to read stdout");
    assert_eq!("rank 0: 3 rows\nrank 1: 2 rows\n", stdout_str);
}

#[test]
fn test_scatter_more_workers_than_rows() {
    let mut cmd = make_cli();
    let output = cmd
        .timeout(DEFAULT_TIMEOUT)
        .args(["scatter", "-w", "3", "-r", "1"])
        .output()
        .expect("Failed to run command");

    assert!(output.status.success());
    let stdout_str = String::from_utf8(output.stdout).expect("Failed to read stdout");
    assert_eq!(
        "rank 0: 1 rows\nrank 1: 0 rows\nrank 2: 0 rows\n",
        stdout_str
    );
}

#[test]
fn test_worker_requires_launcher_env() {
    let mut cmd = make_cli();
    cmd.timeout(DEFAULT_TIMEOUT)
        .arg("worker")
        .env_remove("LAZYDIST_WORKER_RANK")
        .env_remove("LAZYDIST_WORKER_SIZE")
        .assert()
        .failure();
}
