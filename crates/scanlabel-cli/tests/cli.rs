use assert_cmd::Command;
use serde_json::Value;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// Two 720-sample frames, each with a three-point cluster in front of the
/// sensor and another behind and to the side.
fn write_scan(path: &Path) {
    let mut text = String::from("# x y\n");
    for _frame in 0..2 {
        for i in 0..720 {
            let (x, y) = match i {
                0..=2 => (1.0 + 0.01 * i as f64, 0.5),
                10..=12 => (3.0 + 0.01 * (i - 10) as f64, -1.0),
                _ => (0.0, 0.0),
            };
            writeln!(text, "{x} {y}").unwrap();
        }
    }
    fs::write(path, text).unwrap();
}

fn scanlabel(root: &Path, args: &[&str]) -> Value {
    let out = Command::cargo_bin("scanlabel")
        .unwrap()
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "scanlabel {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).unwrap()
}

fn ingest(root: &Path) -> Value {
    let raw = root.join("scan.txt");
    write_scan(&raw);
    scanlabel(root, &["ingest", "--raw", raw.to_str().unwrap()])
}

#[test]
fn ingest_label_export() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    let status = ingest(root);
    assert_eq!(status["frame_count"], 2);
    assert_eq!(status["hz"], 720);
    assert_eq!(status["segments"], 2);
    assert!(root.join("scanlabel.toml").exists());

    let labeled = scanlabel(root, &["label", "--frame", "1", "--labels", "0,1"]);
    assert_eq!(labeled["labels"], serde_json::json!([0, 1]));
    assert_eq!(labeled["frames_written"], 1);
    assert_eq!(labeled["written_max_frame"], 1);

    let status = scanlabel(root, &["status", "--frame", "1"]);
    assert_eq!(status["labels"], serde_json::json!([0, 1]));
    assert_eq!(status["last_saved_frame"], 1);

    let summary = scanlabel(root, &["export"]);
    assert_eq!(summary["feature_lines"], 2);
    assert_eq!(summary["label_lines"], 2);
    assert_eq!(fs::read_to_string(root.join("label_data.txt")).unwrap(), "0\n1\n");
    let features = fs::read_to_string(root.join("feature_data.txt")).unwrap();
    let first: Vec<&str> = features.lines().next().unwrap().split(' ').collect();
    assert_eq!(first.len(), 10);
    assert_eq!(first[0], "3");
}

#[test]
fn nearest_then_rect_accumulate() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    ingest(root);
    let nearest = scanlabel(root, &["label", "--frame", "0", "--nearest"]);
    assert_eq!(nearest["labels"], serde_json::json!([1, 0]));
    let rect = scanlabel(
        root,
        &["label", "--frame", "0", "--rect", "2.5,-1.5,3.5,-0.5"],
    );
    assert_eq!(rect["labels"], serde_json::json!([1, 1]));
    assert_eq!(rect["frames_written"], 1);
}

#[test]
fn show_lists_segments() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    ingest(root);
    scanlabel(root, &["label", "--frame", "0", "--set", "1=1"]);
    let shown = scanlabel(root, &["show", "--frame", "0"]);
    let segments = shown.as_array().unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0]["points"], 3);
    assert_eq!(segments[0]["label"], 0);
    assert_eq!(segments[1]["label"], 1);
}

#[test]
fn clean_drops_records() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    ingest(root);
    scanlabel(root, &["label", "--frame", "0", "--labels", "1,1"]);
    scanlabel(root, &["export"]);
    let cleaned = scanlabel(root, &["clean"]);
    assert_eq!(cleaned["frames_written"], 0);
    assert_eq!(cleaned["labels"], serde_json::json!([0, 0]));
    assert_eq!(fs::metadata(root.join("label_bin")).unwrap().len(), 0);
    assert_eq!(fs::metadata(root.join("label_data.txt")).unwrap().len(), 0);
}

#[test]
fn hz_switch_changes_frame_count() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    ingest(root);
    scanlabel(root, &["label", "--frame", "1", "--labels", "1,0"]);
    let switched = scanlabel(root, &["hz", "360"]);
    assert_eq!(switched["frame_count"], 4);
    assert_eq!(switched["hz"], 360);

    let status = scanlabel(root, &["status", "--frame", "1"]);
    assert_eq!(status["hz"], 360);
    assert_eq!(status["segments"], 0);
    assert_eq!(status["frames_written"], 1);
}

#[test]
fn rejects_bad_input() {
    let temp = tempdir().unwrap();
    let root = temp.path();
    Command::cargo_bin("scanlabel")
        .unwrap()
        .arg("--root")
        .arg(root)
        .args(["ingest", "--raw", "missing.txt"])
        .assert()
        .failure();

    ingest(root);
    Command::cargo_bin("scanlabel")
        .unwrap()
        .arg("--root")
        .arg(root)
        .args(["label", "--frame", "0", "--labels", "1,0,1"])
        .assert()
        .failure();
    Command::cargo_bin("scanlabel")
        .unwrap()
        .arg("--root")
        .arg(root)
        .args(["label", "--frame", "0", "--labels", "2,0"])
        .assert()
        .failure();
    Command::cargo_bin("scanlabel")
        .unwrap()
        .arg("--root")
        .arg(root)
        .args(["label", "--frame", "0", "--set", "0=-1"])
        .assert()
        .failure();
    let status = scanlabel(root, &["status", "--frame", "0"]);
    assert_eq!(status["frames_written"], 0);
    Command::cargo_bin("scanlabel")
        .unwrap()
        .arg("--root")
        .arg(root)
        .args(["hz", "500"])
        .assert()
        .failure();
}
