//! Snapshot tests for rendered template output

use std::process::Command;
use tempfile::TempDir;

/// Helper to run rudder and capture output
fn rudder_output(args: &[&str]) -> (String, String, bool) {
    let store = TempDir::new().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_rudder"))
        .args(args)
        .arg("--store")
        .arg(store.path())
        .env_remove("RUDDER_CONFIG")
        .env_remove("RUDDER_STORE")
        .output()
        .expect("Failed to execute rudder");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();

    (stdout, stderr, success)
}

fn demo_chart() -> String {
    concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures/demo-chart").to_string()
}

/// Source headers and notes, independent of mapping key order
fn outline(output: &str) -> String {
    let mut lines = Vec::new();
    let mut in_notes = false;
    for line in output.lines() {
        if line.starts_with("# Source:") {
            lines.push(line);
        } else if line == "# NOTES:" {
            in_notes = true;
            lines.push(line);
        } else if in_notes && !line.is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}

mod template_snapshots {
    use super::*;

    #[test]
    fn test_demo_chart_outline() {
        let (stdout, stderr, success) = rudder_output(&["template", "web", &demo_chart()]);
        assert!(success, "stderr: {}", stderr);

        insta::assert_snapshot!(outline(&stdout), @r"
        # Source: ConfigMap/web-config
        # Source: Deployment/web
        # Source: Service/web
        # NOTES:
        web runs 1 replica(s) of nginx:1.25.
        ");
    }

    #[test]
    fn test_demo_chart_outline_with_overrides() {
        let (stdout, stderr, success) = rudder_output(&[
            "template",
            "shop",
            &demo_chart(),
            "--set",
            "replicaCount=3",
            "--set",
            "image.tag=1.27",
        ]);
        assert!(success, "stderr: {}", stderr);

        insta::assert_snapshot!(outline(&stdout), @r"
        # Source: ConfigMap/shop-config
        # Source: Deployment/shop
        # Source: Service/shop
        # NOTES:
        shop runs 3 replica(s) of nginx:1.27.
        ");
    }
}
