//! The `opencircuit` binary against project files on disk.

use std::fs;
use std::io::Write;
use std::process::{Command, Output};
use tempfile::{tempdir, NamedTempFile};

const INVERTER: &str = r#"{
    "format": "OpenCircuit",
    "main": {
        "components": [
            {"id": "in1", "type": "INPUT", "pos": {"x": 1, "y": 1}, "properties": {"value": 1}},
            {"id": "inv1", "type": "NOT", "pos": {"x": 3, "y": 1}},
            {"id": "wide", "type": "CONST", "pos": {"x": 1, "y": 3}, "properties": {"bitWidth": 8, "value": 171}},
            {"id": "out1", "type": "OUTPUT", "pos": {"x": 5, "y": 1}},
            {"id": "out2", "type": "OUTPUT", "pos": {"x": 5, "y": 3}, "properties": {"bitWidth": 8}}
        ],
        "wires": [
            {"from": {"comp": "in1", "port": "out"}, "to": {"comp": "inv1", "port": "in"}},
            {"from": {"comp": "inv1", "port": "out"}, "to": {"comp": "out1", "port": "in"}},
            {"from": {"comp": "wide", "port": "out"}, "to": {"comp": "out2", "port": "in"}, "bitWidth": 8}
        ]
    }
}"#;

fn project(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

fn opencircuit(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_opencircuit"))
        .args(args)
        .output()
        .unwrap()
}

#[test]
fn test_prints_outputs_in_hex() {
    let file = project(INVERTER);
    let out = opencircuit(&[file.path().to_str().unwrap(), "--ticks", "1"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stdout), "out1: 0\nout2: ab\n");
}

#[test]
fn test_json_output() {
    let file = project(INVERTER);
    let out = opencircuit(&[file.path().to_str().unwrap(), "--ticks", "2", "--format", "json"]);
    assert!(out.status.success());
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["ticks"], 2);
    assert_eq!(report["outputs"][1]["id"], "out2");
    assert_eq!(report["outputs"][1]["value"], "ab");
}

#[test]
fn test_no_outputs() {
    let file = project(r#"{"main": {"components": [{"id": "a", "type": "INPUT"}]}}"#);
    let out = opencircuit(&[file.path().to_str().unwrap()]);
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "No OUTPUT components found.\n");
}

#[test]
fn test_trace_file() {
    let file = project(INVERTER);
    let dir = tempdir().unwrap();
    let trace = dir.path().join("trace.csv");
    let out = opencircuit(&[
        file.path().to_str().unwrap(),
        "--ticks",
        "3",
        "--trace",
        trace.to_str().unwrap(),
    ]);
    assert!(out.status.success());
    let text = fs::read_to_string(&trace).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec!["tick,out1,out2", "1,0,ab", "2,0,ab", "3,0,ab"]);
}

#[test]
fn test_missing_argument_is_usage_error() {
    let out = opencircuit(&[]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Usage"));
}

#[test]
fn test_missing_file_fails() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope.json");
    let out = opencircuit(&[missing.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("not found"));
}

#[test]
fn test_malformed_project_fails() {
    let file = project(r#"{"main": {"components": [{"id": "x", "type": "FLUX"}]}}"#);
    let out = opencircuit(&[file.path().to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("main.components[0]"));
}
