//! Structured run report.
//!
//! Every stage registers its empirical distributions here under a title;
//! the report is serialized as a single JSON document at the end of the run
//! (and on the failure path, before the process exits), mapping title to
//! axis labels, a visualization hint, the write position and the bin data.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use ahash::AHashMap;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{SimError, SimResult};

#[derive(Serialize)]
pub struct ReportEntry {
    pub x_label: String,
    pub y_label: String,
    pub visualization: String,
    pub position: usize,
    pub data: BTreeMap<String, Value>,
}

pub struct Report {
    path: PathBuf,
    entries: BTreeMap<String, ReportEntry>,
    next_position: usize,
}

impl Report {
    pub fn new(path: impl Into<PathBuf>) -> Report {
        Report {
            path: path.into(),
            entries: BTreeMap::new(),
            next_position: 0,
        }
    }

    fn push(&mut self, title: &str, xl: &str, yl: &str, vis: &str, data: BTreeMap<String, Value>) {
        let entry = ReportEntry {
            x_label: xl.to_string(),
            y_label: yl.to_string(),
            visualization: vis.to_string(),
            position: self.next_position,
            data,
        };
        self.next_position += 1;
        self.entries.insert(title.to_string(), entry);
    }

    pub fn map_u32_u64(
        &mut self,
        m: &AHashMap<u32, u64>,
        xl: &str,
        yl: &str,
        title: &str,
        vis: &str,
    ) {
        let data = m
            .iter()
            .map(|(x, y)| (x.to_string(), json!(y)))
            .collect();
        self.push(title, xl, yl, vis, data);
    }

    pub fn slice_u32_u64(
        &mut self,
        x: &[u32],
        y: &[u64],
        xl: &str,
        yl: &str,
        title: &str,
        vis: &str,
    ) {
        let data = x
            .iter()
            .zip(y)
            .map(|(x, y)| (x.to_string(), json!(y)))
            .collect();
        self.push(title, xl, yl, vis, data);
    }

    pub fn slice_u32_f64(
        &mut self,
        x: &[u32],
        y: &[f64],
        xl: &str,
        yl: &str,
        title: &str,
        vis: &str,
    ) {
        let data = x
            .iter()
            .zip(y)
            .map(|(x, y)| (x.to_string(), json!(y)))
            .collect();
        self.push(title, xl, yl, vis, data);
    }

    pub fn slice_f64_f64(
        &mut self,
        x: &[f64],
        y: &[f64],
        xl: &str,
        yl: &str,
        title: &str,
        vis: &str,
    ) {
        let data = x
            .iter()
            .zip(y)
            .map(|(x, y)| (x.to_string(), json!(y)))
            .collect();
        self.push(title, xl, yl, vis, data);
    }

    /// Single-value record, e.g. the sampled/requested ratio.
    pub fn point_f64(&mut self, label: &str, value: f64, xl: &str, yl: &str, title: &str) {
        let mut data = BTreeMap::new();
        data.insert(label.to_string(), json!(value));
        self.push(title, xl, yl, "point", data);
    }

    /// Serialize all entries to the report file.
    pub fn write(&self) -> SimResult<()> {
        let file = File::create(&self.path).map_err(|e| {
            SimError::Resource(format!(
                "could not create report file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.entries).map_err(|e| {
            SimError::Resource(format!("could not serialize report: {}", e))
        })?;
        Ok(())
    }

    #[cfg(test)]
    pub fn entry_position(&self, title: &str) -> Option<usize> {
        self.entries.get(title).map(|e| e.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn positions_follow_write_order() {
        let mut rep = Report::new("unused.json");
        rep.slice_u32_u64(&[1, 2], &[10, 20], "Length", "Count", "first", "bar");
        rep.point_f64("ratio", 0.5, "x", "y", "second");
        assert_eq!(rep.entry_position("first"), Some(0));
        assert_eq!(rep.entry_position("second"), Some(1));
    }

    #[test]
    fn writes_valid_json() {
        let file = NamedTempFile::new().unwrap();
        let mut rep = Report::new(file.path());
        let mut m = AHashMap::new();
        m.insert(100u32, 7u64);
        rep.map_u32_u64(&m, "Length", "Count", "hist", "bar");
        rep.write().unwrap();

        let parsed: serde_json::Value =
            serde_json::from_reader(File::open(file.path()).unwrap()).unwrap();
        assert_eq!(parsed["hist"]["x_label"], "Length");
        assert_eq!(parsed["hist"]["data"]["100"], 7);
        assert_eq!(parsed["hist"]["visualization"], "bar");
    }
}
