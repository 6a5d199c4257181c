use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_symsync"))
}

fn demo(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join("sanjay")
        .join(name)
}

#[test]
fn test_replay_writes_test_cases() {
    let out = tempfile::tempdir().unwrap();

    let output = Command::new(binary())
        .arg("replay")
        .arg("--input")
        .arg(demo("input"))
        .arg("--trace")
        .arg(demo("trace"))
        .arg("--output-dir")
        .arg(out.path())
        .output()
        .expect("Failed to execute symsync");

    if !output.status.success() {
        panic!(
            "Command failed with status: {:?}\nstderr: {}\nstdout: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr),
            String::from_utf8_lossy(&output.stdout)
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("generated 3 test cases"),
        "unexpected output: {}",
        stdout
    );

    let input = fs::read(demo("input")).unwrap();
    for (name, index) in [("000001", 18), ("000002", 20)] {
        let case = fs::read(out.path().join(name)).unwrap();
        let changed: Vec<usize> = (0..input.len()).filter(|i| case[*i] != input[*i]).collect();
        assert_eq!(changed, vec![index], "test case {}", name);
    }
    assert_eq!(fs::read(out.path().join("000002")).unwrap()[20], b'?');
}

#[test]
fn test_replay_with_bitmap_saves_coverage() {
    let dir = tempfile::tempdir().unwrap();
    let bitmap = dir.path().join("bitmap");

    let output = Command::new(binary())
        .arg("replay")
        .arg("--input")
        .arg(demo("input"))
        .arg("--trace")
        .arg(demo("trace"))
        .arg("--bitmap")
        .arg(&bitmap)
        .arg("--sync-mode")
        .arg("rewrite")
        .output()
        .expect("Failed to execute symsync");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let saved = fs::read(&bitmap).unwrap();
    assert_eq!(saved.len(), 1 << 16);
    assert_eq!(saved.iter().filter(|b| **b != 0xff).count(), 3);
}

#[test]
fn test_forest_dump() {
    let output = Command::new(binary())
        .arg("forest")
        .arg("--input")
        .arg(demo("input"))
        .arg("--trace")
        .arg(demo("trace"))
        .output()
        .expect("Failed to execute symsync");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    // Bytes 7, 15, 18, 20 share one tree, byte 0 has its own
    assert!(stdout.contains("unique trees: 2"), "dump: {}", stdout);
    assert!(stdout.contains("deps={7, 15, 18, 20}"), "dump: {}", stdout);
    assert!(stdout.contains("deps={0}"), "dump: {}", stdout);
}

#[test]
fn test_missing_output_dir_is_fatal() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(binary())
        .arg("replay")
        .arg("--input")
        .arg(demo("input"))
        .arg("--trace")
        .arg(demo("trace"))
        .arg("--output-dir")
        .arg(dir.path().join("missing"))
        .output()
        .expect("Failed to execute symsync");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("configuration error"), "stderr: {}", stderr);
}

#[test]
fn test_malformed_trace_reports_line() {
    let dir = tempfile::tempdir().unwrap();
    let trace = dir.path().join("trace");
    fs::write(&trace, "branch 0x10 1 (eq (read 0) (const 0x61 8))\nbranch 0x20 1 (eq (read 0)\n")
        .unwrap();

    let output = Command::new(binary())
        .arg("replay")
        .arg("--input")
        .arg(demo("input"))
        .arg("--trace")
        .arg(&trace)
        .output()
        .expect("Failed to execute symsync");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("line 2"), "stderr: {}", stderr);
}
