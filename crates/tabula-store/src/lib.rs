pub mod dataset;

pub use dataset::{DatasetSource, load_items, parse_item};

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tabula_core::{ResultRecord, dataset_short_name};
use tempfile::NamedTempFile;

/// `<output_dir>/<ds>_output/<ds>_<split>_<model>_output.jsonl`, where `ds`
/// is the last path segment of the dataset name.
pub fn output_path(output_dir: &Path, dataset_name: &str, split: &str, model: &str) -> PathBuf {
    let ds = dataset_short_name(dataset_name);
    let model = model.replace(['/', '\\'], "_");
    output_dir
        .join(format!("{ds}_output"))
        .join(format!("{ds}_{split}_{model}_output.jsonl"))
}

/// Outcome of dropping `"error"` records from a result file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub kept: usize,
    pub removed: usize,
    /// Ids of the records that survived, i.e. items already answered.
    pub done: HashSet<String>,
}

/// Append-only JSONL file of per-item results.
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating output directory {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the file without error records and returns the ids that
    /// remain. Lines that are not valid records are dropped with a warning.
    /// A missing file is an empty result set.
    pub fn clean_error_entries(&self) -> Result<CleanReport> {
        if !self.path.exists() {
            return Ok(CleanReport::default());
        }
        let mut report = CleanReport::default();
        let mut kept_lines = Vec::new();
        for (line_no, line) in read_lines(&self.path)?.into_iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ResultRecord>(&line) {
                Ok(record) if record.is_error() => report.removed += 1,
                Ok(record) => {
                    report.done.insert(record.example_id);
                    report.kept += 1;
                    kept_lines.push(line);
                }
                Err(err) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = line_no + 1,
                        error = %err,
                        "dropping unreadable result line"
                    );
                    report.removed += 1;
                }
            }
        }

        let mut body = kept_lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        self.replace_contents(body.as_bytes())
            .with_context(|| format!("rewriting {}", self.path.display()))?;
        Ok(report)
    }

    /// Writes a sibling temp file and renames it over the store, so an
    /// interrupted clean leaves either the old file or the new one.
    fn replace_contents(&self, body: &[u8]) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(body)?;
        tmp.flush()?;
        tmp.as_file().sync_data()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    /// Appends one record and forces it to disk before returning.
    pub fn append(&self, record: &ResultRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    pub fn records(&self) -> Result<Vec<ResultRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for line in read_lines(&self.path)? {
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        lines.push(line?);
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::{QueryItem, Table};

    fn item(id: &str) -> QueryItem {
        QueryItem {
            example_id: id.to_string(),
            query: "q".to_string(),
            ground_truth: "gt".to_string(),
            table: Table::default(),
        }
    }

    #[test]
    fn output_path_uses_short_dataset_name() {
        let path = output_path(Path::new("outputs"), "yale-nlp/QTSumm", "test", "gpt-35-turbo");
        assert_eq!(
            path,
            Path::new("outputs/QTSumm_output/QTSumm_test_gpt-35-turbo_output.jsonl")
        );
    }

    #[test]
    fn clean_drops_error_records_and_reports_done_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ResultStore::open(dir.path().join("nested/out.jsonl")).expect("open");
        store
            .append(&ResultRecord::success(&item("a"), "A".to_string(), Vec::new()))
            .expect("append a");
        store.append(&ResultRecord::failure(&item("b"))).expect("append b");
        store
            .append(&ResultRecord::success(&item("c"), "C".to_string(), Vec::new()))
            .expect("append c");

        let report = store.clean_error_entries().expect("clean");
        assert_eq!(report.kept, 2);
        assert_eq!(report.removed, 1);
        assert!(report.done.contains("a") && report.done.contains("c"));
        assert!(!report.done.contains("b"));

        let ids: Vec<String> = store
            .records()
            .expect("records")
            .into_iter()
            .map(|r| r.example_id)
            .collect();
        assert_eq!(ids, ["a", "c"]);
    }

    #[test]
    fn clean_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ResultStore::open(dir.path().join("none.jsonl")).expect("open");
        assert_eq!(store.clean_error_entries().expect("clean"), CleanReport::default());
        assert!(!store.path().exists());
    }

    #[test]
    fn unreadable_lines_are_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.jsonl");
        fs::write(
            &path,
            "{\"example_id\":\"a\",\"query\":\"q\",\"prediction\":\"p\"}\n{not json\n\n",
        )
        .expect("seed");
        let store = ResultStore::open(&path).expect("open");
        let report = store.clean_error_entries().expect("clean");
        assert_eq!((report.kept, report.removed), (1, 1));
        assert_eq!(fs::read_to_string(&path).expect("read").lines().count(), 1);
    }

    #[test]
    fn clean_replaces_the_file_without_leaving_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ResultStore::open(dir.path().join("out.jsonl")).expect("open");
        store.append(&ResultRecord::failure(&item("a"))).expect("append a");
        store
            .append(&ResultRecord::success(&item("b"), "B".to_string(), Vec::new()))
            .expect("append b");

        store.clean_error_entries().expect("clean");
        store.clean_error_entries().expect("clean twice");

        let names: Vec<String> = fs::read_dir(dir.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["out.jsonl"]);

        store
            .append(&ResultRecord::success(&item("c"), "C".to_string(), Vec::new()))
            .expect("append after clean");
        let ids: Vec<String> = store
            .records()
            .expect("records")
            .into_iter()
            .map(|r| r.example_id)
            .collect();
        assert_eq!(ids, ["b", "c"]);
    }
}
