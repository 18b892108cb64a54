use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const READING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<LidcReadMessage uid="1.3.6.1.4.1.14519.5.2.1.6279.6001.9" xmlns="http://www.nih.gov">
  <ResponseHeader>
    <Version>1.8.1</Version>
    <DateService>2005-11-07</DateService>
    <SeriesInstanceUid>1.3.6.1.4.1.14519.5.2.1.6279.6001.100</SeriesInstanceUid>
  </ResponseHeader>
  <readingSession>
    <servicingRadiologistID>reader-a</servicingRadiologistID>
    <unblindedReadNodule>
      <noduleID>Nodule 001</noduleID>
      <characteristics><malignancy>3</malignancy></characteristics>
      <roi>
        <imageZposition>-80.5</imageZposition>
        <edgeMap><xCoord>210</xCoord><yCoord>300</yCoord></edgeMap>
      </roi>
    </unblindedReadNodule>
  </readingSession>
  <readingSession>
    <servicingRadiologistID>reader-b</servicingRadiologistID>
    <unblindedReadNodule>
      <noduleID>IL057_1</noduleID>
      <characteristics><malignancy>5</malignancy></characteristics>
      <roi>
        <imageZposition>-80.5</imageZposition>
        <edgeMap><xCoord>212</xCoord><yCoord>301</yCoord></edgeMap>
      </roi>
    </unblindedReadNodule>
  </readingSession>
</LidcReadMessage>"#;

fn readnorm() -> Command {
    let mut cmd = Command::cargo_bin("readnorm").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn stdout_lines(cmd: &mut Command) -> Vec<serde_json::Value> {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

// --- Binary startup ---

#[test]
fn binary_runs() {
    readnorm()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("readnorm"));
}

#[test]
fn requires_files() {
    readnorm().assert().failure();
}

// --- Records ---

#[test]
fn emits_one_json_line_per_reading() {
    let tmp = TempDir::new().unwrap();
    let file = write(tmp.path(), "0001.xml", READING);

    let lines = stdout_lines(readnorm().arg(&file));
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["annotator_id"], "reader-a");
    assert_eq!(lines[0]["cluster_id"], lines[1]["cluster_id"]);
    assert_eq!(lines[1]["cells"]["reading.characteristics.malignancy"], "5");
    assert_eq!(lines[1]["cells"]["reading.characteristics.texture"], "MISSING");
}

#[test]
fn final_only_emits_last_reader() {
    let tmp = TempDir::new().unwrap();
    let file = write(tmp.path(), "0001.xml", READING);

    let lines = stdout_lines(readnorm().arg("--final-only").arg(&file));
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["annotator_id"], "reader-b");
}

#[test]
fn schema_fixes_columns() {
    let tmp = TempDir::new().unwrap();
    let file = write(tmp.path(), "0001.xml", READING);
    let schema = write(
        tmp.path(),
        "schema.json",
        r#"{"metadata": ["series_instance_uid"], "reading": ["region_id", "reason"]}"#,
    );

    let lines = stdout_lines(readnorm().arg("--schema").arg(&schema).arg(&file));
    let cells = lines[0]["cells"].as_object().unwrap();
    assert_eq!(cells.len(), 3);
    assert_eq!(cells["reading.region_id"], "Nodule 001");
    assert_eq!(cells["reading.reason"], "#N/A");
}

#[test]
fn config_changes_markers() {
    let tmp = TempDir::new().unwrap();
    let file = write(tmp.path(), "0001.xml", READING);
    let config = write(
        tmp.path(),
        "readnorm.toml",
        "[projection]\nabsent_marker = \"ABSENT\"\nempty_marker = \"\"\n",
    );

    readnorm()
        .arg("--config")
        .arg(&config)
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("loading config"));

    fs::write(
        &config,
        "[projection]\nabsent_marker = \"ABSENT\"\nempty_marker = \"BLANK\"\n",
    )
    .unwrap();
    let lines = stdout_lines(readnorm().arg("--config").arg(&config).arg(&file));
    assert_eq!(lines[0]["cells"]["reading.characteristics.texture"], "BLANK");
}

// --- Failures ---

#[test]
fn partial_failure_still_succeeds() {
    let tmp = TempDir::new().unwrap();
    let good = write(tmp.path(), "good.xml", READING);
    let bad = write(tmp.path(), "bad.xml", "<LidcReadMessage><readingSession>");

    readnorm()
        .arg(&good)
        .arg(&bad)
        .assert()
        .success()
        .stderr(predicate::str::contains("failed: ").and(predicate::str::contains("bad.xml")))
        .stderr(predicate::str::contains("1 processed"));
}

#[test]
fn all_failed_exits_non_zero() {
    let tmp = TempDir::new().unwrap();
    let bad = write(tmp.path(), "bad.xml", "not xml");
    let missing = tmp.path().join("missing.xml");

    readnorm()
        .arg(&bad)
        .arg(&missing)
        .assert()
        .failure()
        .stderr(predicate::str::contains("all 2 documents failed"));
}

#[test]
fn no_data_document_is_not_a_failure() {
    let tmp = TempDir::new().unwrap();
    let empty = write(
        tmp.path(),
        "empty.xml",
        "<LidcReadMessage><ResponseHeader/></LidcReadMessage>",
    );

    readnorm()
        .arg(&empty)
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("1 without data"));
}

// --- Profiles ---

#[test]
fn profile_dir_overrides_builtin() {
    let tmp = TempDir::new().unwrap();
    let file = write(tmp.path(), "0001.xml", READING);
    let profiles = tmp.path().join("profiles");
    fs::create_dir(&profiles).unwrap();
    write(
        &profiles,
        "minimal.json",
        r#"{
          "name": "lidc_minimal",
          "version": 2,
          "dialect": "lidc_minimal_attributes",
          "mappings": [
            {"source_path": "ResponseHeader/SeriesInstanceUid",
             "target_path": "metadata.series_instance_uid",
             "data_type": "string"},
            {"source_path": "readingSession", "target_path": "sessions", "data_type": "array",
             "nested_mappings": [
               {"source_path": "servicingRadiologistID", "target_path": "reader",
                "data_type": "string"},
               {"source_path": "unblindedReadNodule", "target_path": "readings",
                "data_type": "array",
                "nested_mappings": [
                  {"source_path": "characteristics/malignancy", "target_path": "malignancy",
                   "data_type": "integer"}
                ]}
             ]}
          ],
          "entity_rules": {
            "sessions_path": "sessions",
            "readings_path": "readings",
            "annotator_key": "reader",
            "grouping": "proximity",
            "position": {"x": "malignancy", "y": "malignancy"},
            "tolerance": 0.5
          }
        }"#,
    );

    let lines = stdout_lines(readnorm().arg("--profiles").arg(&profiles).arg(&file));
    assert_eq!(lines.len(), 2);
    assert_ne!(lines[0]["cluster_id"], lines[1]["cluster_id"]);
    let cells = lines[0]["cells"].as_object().unwrap();
    assert!(cells.contains_key("reading.malignancy"));
    assert_eq!(cells["reading.region_id"], "#N/A");
}

#[test]
fn report_file_is_written() {
    let tmp = TempDir::new().unwrap();
    let file = write(
        tmp.path(),
        "0001.xml",
        &READING.replace("<xCoord>210</xCoord>", "<xCoord>n/a</xCoord>"),
    );
    let report = tmp.path().join("report.json");

    readnorm()
        .arg("--report")
        .arg(&report)
        .arg(&file)
        .assert()
        .success();

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(report).unwrap()).unwrap();
    assert_eq!(report["documents"], 1);
    assert_eq!(report["by_path"]["sessions.readings.rois.edges.x"], 1);
}
