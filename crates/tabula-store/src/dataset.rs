//! Query items from local files or the Hugging Face datasets-server.

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Url;
use reqwest::blocking::Client;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tabula_core::{QueryItem, Table};

/// Largest page the rows API serves.
const HUB_MAX_PAGE: usize = 100;
const HUB_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    /// A `.json` array or `.jsonl` file.
    File(PathBuf),
    Hub {
        endpoint: String,
        dataset: String,
        split: String,
        page_size: usize,
    },
}

impl std::fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Hub { dataset, split, .. } => write!(f, "{dataset} [{split}]"),
        }
    }
}

pub fn load_items(source: &DatasetSource) -> Result<Vec<QueryItem>> {
    let raw = match source {
        DatasetSource::File(path) => read_file(path)?,
        DatasetSource::Hub {
            endpoint,
            dataset,
            split,
            page_size,
        } => fetch_hub_rows(endpoint, dataset, split, *page_size)?,
    };
    raw.into_iter()
        .enumerate()
        .map(|(idx, value)| parse_item(value).with_context(|| format!("dataset record {idx}")))
        .collect()
}

fn read_file(path: &Path) -> Result<Vec<Value>> {
    let body =
        fs::read_to_string(path).with_context(|| format!("reading dataset {}", path.display()))?;
    let is_jsonl = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"));
    if is_jsonl {
        return body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect();
    }
    match serde_json::from_str(&body)? {
        Value::Array(items) => Ok(items),
        _ => bail!("{} is not a JSON array of records", path.display()),
    }
}

fn fetch_hub_rows(
    endpoint: &str,
    dataset: &str,
    split: &str,
    page_size: usize,
) -> Result<Vec<Value>> {
    let client = Client::builder()
        .timeout(Duration::from_secs(HUB_TIMEOUT_SECS))
        .build()?;
    let length = page_size.clamp(1, HUB_MAX_PAGE);
    let mut rows = Vec::new();
    loop {
        let offset = rows.len().to_string();
        let length_param = length.to_string();
        let url = Url::parse_with_params(
            endpoint,
            &[
                ("dataset", dataset),
                ("config", "default"),
                ("split", split),
                ("offset", offset.as_str()),
                ("length", length_param.as_str()),
            ],
        )
        .with_context(|| format!("invalid datasets-server endpoint `{endpoint}`"))?;
        let resp = client
            .get(url)
            .send()
            .with_context(|| format!("fetching {dataset} rows at offset {offset}"))?;
        let status = resp.status();
        let body = resp.text()?;
        if !status.is_success() {
            bail!("datasets-server returned {status} for {dataset}: {body}");
        }
        let (page, total) = parse_hub_page(&body)?;
        let fetched = page.len();
        rows.extend(page);
        tracing::debug!(dataset, fetched = rows.len(), total = ?total, "fetched dataset page");
        let finished = match total {
            Some(total) => rows.len() >= total,
            None => fetched < length,
        };
        if fetched == 0 || finished {
            break;
        }
    }
    Ok(rows)
}

/// Rows of one datasets-server page plus the reported total, if any.
pub fn parse_hub_page(body: &str) -> Result<(Vec<Value>, Option<usize>)> {
    let payload: Value = serde_json::from_str(body)?;
    let rows = payload
        .get("rows")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("datasets-server response has no rows"))?
        .iter()
        .map(|entry| entry.get("row").cloned().unwrap_or_else(|| entry.clone()))
        .collect();
    let total = payload
        .get("num_rows_total")
        .and_then(Value::as_u64)
        .map(|n| n as usize);
    Ok((rows, total))
}

/// Accepts native records and FeTaQA records. A FeTaQA table's first row is
/// the header and its title is `"<page title>, <section title>"`.
pub fn parse_item(value: Value) -> Result<QueryItem> {
    if value.get("feta_id").is_some() {
        return parse_fetaqa(&value);
    }
    let table = value
        .get("table")
        .ok_or_else(|| anyhow!("record has no table"))?;
    Ok(QueryItem {
        example_id: scalar_field(&value, "example_id")?,
        query: scalar_field(&value, "query")?,
        ground_truth: optional_text(&value, "summary"),
        table: Table::new(
            optional_text(table, "title"),
            cells(table.get("header"))?,
            rows(table.get("rows"))?,
        ),
    })
}

fn parse_fetaqa(value: &Value) -> Result<QueryItem> {
    let mut array = rows(value.get("table_array"))?.into_iter();
    let header = array.next().unwrap_or_default();
    Ok(QueryItem {
        example_id: scalar_field(value, "feta_id")?,
        query: scalar_field(value, "question")?,
        ground_truth: optional_text(value, "answer"),
        table: Table::new(
            format!(
                "{}, {}",
                optional_text(value, "table_page_title"),
                optional_text(value, "table_section_title")
            ),
            header,
            array.collect(),
        ),
    })
}

fn scalar_field(value: &Value, key: &str) -> Result<String> {
    match value.get(key) {
        Some(Value::Null) | None => bail!("record is missing `{key}`"),
        Some(v) => Ok(cell_text(v)),
    }
}

fn optional_text(value: &Value, key: &str) -> String {
    value.get(key).map(cell_text).unwrap_or_default()
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn cells(value: Option<&Value>) -> Result<Vec<String>> {
    match value {
        Some(Value::Array(items)) => Ok(items.iter().map(cell_text).collect()),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(other) => bail!("expected a list of cells, found {other}"),
    }
}

fn rows(value: Option<&Value>) -> Result<Vec<Vec<String>>> {
    match value {
        Some(Value::Array(items)) => items.iter().map(|row| cells(Some(row))).collect(),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(other) => bail!("expected a list of rows, found {other}"),
    }
}
