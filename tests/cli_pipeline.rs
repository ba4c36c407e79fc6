mod common;

use common::Workspace;
use predicates::prelude::*;
use serde_json::json;

const LABEL_MAP: &str = r#"{
    "label_to_idx": {"person": 1, "horse": 2, "hat": 3},
    "attribute_to_idx": {"white": 1, "brown": 2},
    "predicate_to_idx": {"riding": 1, "wearing": 2}
}"#;

const DETECTIONS: &str = r#"{
    "objects": [
        {"rect": [0, 0, 50, 100], "class": 1, "conf": 0.95, "attr": [1], "attr_conf": [0.4]},
        {"rect": [10, 40, 120, 160], "class": 2, "conf": 0.85, "attr": [2], "attr_conf": [0.7]},
        {"rect": [5, 0, 20, 10], "class": 3, "conf": 0.2}
    ],
    "relations": [
        {"subj_id": 0, "obj_id": 1, "class": 1, "conf": 0.7},
        {"subj_id": 0, "obj_id": 2, "class": 2, "conf": 0.6}
    ]
}"#;

fn dataset(ws: &Workspace) {
    ws.write("labelmap.json", LABEL_MAP);
    ws.write(
        "annots/val_prepross.json",
        r#"[
            {"idx": "movie/1.jpg", "events": [], "captions": []},
            {"idx": "movie/2.jpg", "events": [], "captions": []}
        ]"#,
    );
    ws.write("dets/movie/1.json", DETECTIONS);
    ws.write("dets/movie/2.json", DETECTIONS);
}

fn build_args() -> Vec<&'static str> {
    vec![
        "build",
        "--ids",
        "annots/val_prepross.json",
        "--detections-dir",
        "dets",
        "--out-dir",
        "sg",
        "--labelmap",
        "labelmap.json",
    ]
}

#[test]
fn build_writes_one_document_per_image() {
    let ws = Workspace::new();
    dataset(&ws);

    let mut args = build_args();
    args.extend(["--min-obj-score", "0.3", "--attributes"]);
    ws.cmd()
        .args(&args)
        .assert()
        .success()
        .stdout(predicate::str::contains("built = 2"))
        .stdout(predicate::str::contains("failed = 0"));

    let doc = ws.read_json("sg/movie/1.causal_tde.json");
    assert_eq!(doc["frame"], "movie/1.jpg");
    assert_eq!(doc["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(doc["nodes"][0]["class"], json!(["white person"]));
    assert_eq!(doc["nodes"][1]["class"], json!(["brown horse"]));
    assert_eq!(doc["edges"].as_array().unwrap().len(), 1);
    assert_eq!(doc["edges"][0]["dest"], 1);
    assert_eq!(doc["edges"][0]["bb"], json!([]));
    assert_eq!(doc["lighthouse"], json!([]));

    // built documents feed straight into validation
    ws.cmd()
        .args(["validate", "sg/movie/1.causal_tde.json", "sg/movie/2.causal_tde.json"])
        .assert()
        .success();
}

#[test]
fn build_skips_existing_and_reports_failures() {
    let ws = Workspace::new();
    dataset(&ws);
    ws.write("sg/movie/1.causal_tde.json", r#"{"frame": "movie/1.jpg", "nodes": [], "edges": []}"#);
    ws.write("dets/movie/2.json", "{ not json");

    ws.cmd()
        .args(build_args())
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("built = 0"))
        .stdout(predicate::str::contains("existing = 1"))
        .stdout(predicate::str::contains("failed = 1"))
        .stdout(predicate::str::contains("movie/2.jpg"))
        .stderr(predicate::str::contains("failed to build scene graph"));

    // the existing output is left as it was
    let doc = ws.read_json("sg/movie/1.causal_tde.json");
    assert_eq!(doc["nodes"], json!([]));
}

#[test]
fn build_thresholds_come_from_config() {
    let ws = Workspace::new();
    dataset(&ws);
    ws.write("sgfusion.toml", "[build]\nmin_obj_score = 0.9\n");

    ws.cmd().args(build_args()).assert().success();

    let doc = ws.read_json("sg/movie/2.causal_tde.json");
    assert_eq!(doc["nodes"].as_array().unwrap().len(), 1);
    assert_eq!(doc["nodes"][0]["class"], json!(["person"]));
    assert_eq!(doc["edges"], json!([]));
}

#[test]
fn build_rejects_out_of_range_threshold() {
    let ws = Workspace::new();
    dataset(&ws);

    let mut args = build_args();
    args.extend(["--min-rel-score", "2"]);
    ws.cmd()
        .args(&args)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("min_rel_score 2 not in range"));
    assert!(!ws.path("sg").exists());
}

#[test]
fn captions_convert_each_split() {
    let ws = Workspace::new();
    ws.write(
        "annots/train_annots.json",
        r#"[
            {"img_fn": "m/1.jpg", "event": "1 hands a cup to 2", "movie": "m"},
            {"img_fn": "m/1.jpg", "event": "2 thanks 1"}
        ]"#,
    );
    ws.write("annots/val_annots.json", r#"[{"img_fn": "m/9.jpg", "event": "3 leaves the room"}]"#);

    ws.cmd()
        .args(["captions", "--dir", "annots", "--splits", "train,val"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Captions:"))
        .stdout(predicate::str::contains("train_prepross.json"));

    let train = ws.read_json("annots/train_prepross.json");
    assert_eq!(
        train,
        json!([{
            "idx": "m/1.jpg",
            "events": ["1 hands a cup to 2", "2 thanks 1"],
            "captions": ["a person hands a cup to another person", "a person thanks another person"]
        }])
    );
    let val = ws.read_json("annots/val_prepross.json");
    assert_eq!(val[0]["captions"], json!(["a person leaves the room"]));
}

#[test]
fn captions_fail_on_missing_split() {
    let ws = Workspace::new();
    ws.write("annots/train_annots.json", "[]");

    ws.cmd()
        .args(["captions", "--dir", "annots"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("processing split val"));
}
