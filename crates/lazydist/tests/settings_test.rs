mod setup;

use crate::setup::{DEFAULT_TIMEOUT, make_cli};

#[test]
fn test_settings_listing() {
    let mut cmd = make_cli();
    let output = cmd
        .timeout(DEFAULT_TIMEOUT)
        .arg("settings")
        .env("LAZYDIST_PROFILE", "1")
        .env_remove("LAZYDIST_RUN_PARALLEL")
        .env_remove("LAZYDIST_DUMP_PLANS")
        .output()
        .expect("Failed to run command");

    assert!(output.status.success());
    let stdout_str = String::from_utf8(output.stdout).expect("Failed to read stdout");
    let expected = r#"
dump_plans = false  # Log plans before and after optimization
profile = true  # Log timings of each execution step
run_parallel = false  # Execute plans on the process group
"#
    .trim_start();
    assert_eq!(expected, stdout_str);
}
