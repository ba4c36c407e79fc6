#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::Value;
use std::path::PathBuf;
use tempfile::TempDir;

/// Cup on a table, one causal relation between them.
pub const CUP_AND_TABLE: &str = r#"{
    "frame": "kitchen/0001.jpg",
    "nodes": [
        {"id": 0, "bb": [0, 0, 10, 10], "kg_mapping": [],
         "class": ["cup"], "confidence": [0.9], "expert": ["causal_tde"]},
        {"id": 1, "bb": [0, 0, 20, 20], "kg_mapping": [],
         "class": ["table"], "confidence": [0.8], "expert": ["causal_tde"]}
    ],
    "edges": [
        {"source": 0, "dest": 1, "bb": [],
         "class": ["on"], "confidence": [0.7], "expert": ["causal_tde"]}
    ],
    "lighthouse": []
}"#;

/// One detection over the table, one far outside the frame content.
pub const STEP_ANNOTATION: &str = r#"{
    "detection_classes": ["on", "fly"],
    "detection_boxes": [[10, 10, 16, 16], [100, 100, 4, 4]]
}"#;

pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let ws = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        ws.write("sgfusion.toml", "");
        ws
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn read_json(&self, name: &str) -> Value {
        let content = std::fs::read_to_string(self.path(name)).unwrap();
        serde_json::from_str(&content).unwrap()
    }

    /// `sgfusion` running inside the workspace with an empty config file.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("sgfusion").unwrap();
        cmd.current_dir(self.dir.path())
            .env("SGFUSION_CONFIG", self.path("sgfusion.toml"))
            .env("NO_COLOR", "1")
            .env_remove("RUST_LOG");
        cmd
    }
}
