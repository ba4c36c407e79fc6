//! Caption cleanup and per-image id extraction for the captioning dataset.

use crate::error::Result;
use crate::io::{read_json, write_json};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::info;

static PERSON_INDEX: LazyLock<Regex> = LazyLock::new(|| Regex::new("[0-9]+").unwrap());

/// Typographic characters normalized in captions.
const REPLACEMENTS: &[(char, &str)] = &[
    ('\u{2019}', "'"),
    ('\u{e0}', "a"),
    ('\u{201c}', "'"),
    ('\u{201d}', "'"),
];

pub const DEFAULT_SPLITS: &[&str] = &["train", "val", "test"];

/// Turn an annotated event into a caption.
///
/// Events name people by index (`"1 is pouring tea for 2"`). The first index
/// becomes "a person", the next one "another person"; any further indices are
/// left alone.
pub fn process_caption(event: &str) -> String {
    let caption = PERSON_INDEX.replacen(event, 1, "a person");
    let mut caption = PERSON_INDEX.replacen(&caption, 1, "another person").into_owned();
    for (from, to) in REPLACEMENTS {
        caption = caption.replace(*from, to);
    }
    caption
}

/// One entry of a split's annotation file; other fields are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnnotationEntry {
    pub img_fn: String,
    pub event: String,
}

/// Grouped events of one image, the `<split>_prepross.json` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdsRecord {
    pub idx: String,
    pub events: Vec<String>,
    pub captions: Vec<String>,
}

/// Group entries by image in first-seen order.
pub fn build_ids_records(entries: &[AnnotationEntry]) -> Vec<IdsRecord> {
    let mut grouped: IndexMap<&str, (Vec<String>, Vec<String>)> = IndexMap::new();
    for entry in entries {
        let (events, captions) = grouped.entry(entry.img_fn.as_str()).or_default();
        events.push(entry.event.clone());
        captions.push(process_caption(&entry.event));
    }
    grouped
        .into_iter()
        .map(|(idx, (events, captions))| IdsRecord {
            idx: idx.to_string(),
            events,
            captions,
        })
        .collect()
}

/// Convert `<dir>/<split>_annots.json` into `<dir>/<split>_prepross.json`.
pub fn save_ids_file(dir: &Path, split: &str) -> Result<PathBuf> {
    let input = dir.join(format!("{}_annots.json", split));
    let output = dir.join(format!("{}_prepross.json", split));

    let entries: Vec<AnnotationEntry> = read_json(&input)?;
    let records = build_ids_records(&entries);
    write_json(&output, &records)?;

    info!(split, entries = entries.len(), images = records.len(), "saved visual ids");
    Ok(output)
}
