use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn rudder(work_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("rudder").unwrap();
    cmd.arg("--working-dir").arg(work_dir.path());
    cmd
}

#[test]
fn help_describes_the_plane() {
    Command::cargo_bin("rudder")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("control plane"));
}

#[test]
fn apply_get_delete_roundtrip() {
    let work_dir = TempDir::new().unwrap();
    let doc_path = work_dir.path().join("cache0.json");
    std::fs::write(
        &doc_path,
        serde_json::to_string_pretty(&serde_json::json!({
            "location": "global",
            "properties": {
                "environment": "/planes/rudder/resourceGroups/rg0/providers/Rudder.Resources/environments/env0",
                "managed": true,
            }
        }))
        .unwrap(),
    )
    .unwrap();

    let id = "/planes/rudder/resourceGroups/rg0/providers/Rudder.Resources/caches/cache0";

    rudder(&work_dir)
        .args(["apply", "--id", id, "--file"])
        .arg(&doc_path)
        .args(["--if-none-match"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Succeeded"))
        .stdout(predicate::str::contains("etag:"));

    rudder(&work_dir)
        .args(["get", "--id", id])
        .assert()
        .success()
        .stdout(predicate::str::contains("provisioningState"));

    rudder(&work_dir)
        .args(["resources"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rudder.Resources/caches"));

    rudder(&work_dir)
        .args(["delete", "--id", id])
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted"));

    rudder(&work_dir)
        .args(["get", "--id", id])
        .assert()
        .failure();
}

#[test]
fn replayed_create_only_apply_fails() {
    let work_dir = TempDir::new().unwrap();
    let doc_path = work_dir.path().join("cache0.yaml");
    std::fs::write(
        &doc_path,
        "location: global\nproperties:\n  environment: env0-not-validated-here\n  managed: true\n",
    )
    .unwrap();

    let id = "/planes/rudder/resourceGroups/rg0/providers/Rudder.Resources/caches/cache0";

    rudder(&work_dir)
        .args(["apply", "--id", id, "--file"])
        .arg(&doc_path)
        .args(["--if-none-match"])
        .assert()
        .success();

    rudder(&work_dir)
        .args(["apply", "--id", id, "--file"])
        .arg(&doc_path)
        .args(["--if-none-match"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("precondition failed"));
}
