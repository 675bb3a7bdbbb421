use serde_json::{Map as JsonMap, Number as JsonNumber, Value as Json};
use tabula_core::Table;

/// Runtime value. Rows and the table are handles into the borrowed [`Table`]
/// so the interpreter never copies table data unless a routine asks for it.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
    Row(usize),
    Table,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Row(_) => "row",
            Self::Table => "table",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(entries) => !entries.is_empty(),
            Self::Row(_) | Self::Table => true,
        }
    }

    /// Approximate memory footprint: bytes for strings, one unit per scalar
    /// or container slot.
    pub fn weight(&self) -> usize {
        match self {
            Self::Str(s) => s.len().max(1),
            Self::List(items) => items.iter().fold(1, |acc, v| acc.saturating_add(v.weight())),
            Self::Map(entries) => entries.iter().fold(1, |acc, (k, v)| {
                acc.saturating_add(k.len()).saturating_add(v.weight())
            }),
            _ => 1,
        }
    }

    /// Numeric view: numbers as-is, strings through [`parse_number`].
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Str(s) => parse_number(s),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Text used by `str()`, `join()` and string concatenation.
    pub fn display(&self, table: &Table) -> String {
        match self {
            Self::None => "none".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::Str(s) => s.clone(),
            other => other.to_json(table).to_string(),
        }
    }

    pub fn to_json(&self, table: &Table) -> Json {
        match self {
            Self::None => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::Str(s) => Json::String(s.clone()),
            Self::List(items) => Json::Array(items.iter().map(|v| v.to_json(table)).collect()),
            Self::Map(entries) => {
                let mut map = JsonMap::new();
                for (key, value) in entries {
                    map.insert(key.clone(), value.to_json(table));
                }
                Json::Object(map)
            }
            Self::Row(idx) => Self::Map(row_record(table, *idx)).to_json(table),
            Self::Table => {
                let mut map = JsonMap::new();
                map.insert("title".to_string(), Json::String(table.title.clone()));
                map.insert(
                    "header".to_string(),
                    Json::Array(table.header.iter().cloned().map(Json::String).collect()),
                );
                map.insert(
                    "rows".to_string(),
                    Json::Array(
                        (0..table.rows.len())
                            .map(|i| Self::Row(i).to_json(table))
                            .collect(),
                    ),
                );
                Json::Object(map)
            }
        }
    }
}

/// Header-keyed view of one row; ragged rows read missing cells as "".
pub fn row_record(table: &Table, row: usize) -> Vec<(String, Value)> {
    table
        .header
        .iter()
        .enumerate()
        .map(|(col, name)| (name.clone(), Value::Str(table.cell(row, col).to_string())))
        .collect()
}

pub fn row_cells(table: &Table, row: usize) -> Vec<Value> {
    table
        .rows
        .get(row)
        .map(|cells| cells.iter().cloned().map(Value::Str).collect())
        .unwrap_or_default()
}

pub fn map_get<'a>(entries: &'a [(String, Value)], key: &str) -> Option<&'a Value> {
    entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

pub fn map_set(entries: &mut Vec<(String, Value)>, key: String, value: Value) {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some(slot) => slot.1 = value,
        None => entries.push((key, value)),
    }
}

/// Parses table-style numbers: thousands separators, currency and percent
/// signs are ignored.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '%' | '€' | '£' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn number_to_json(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        Json::Number(JsonNumber::from(n as i64))
    } else {
        JsonNumber::from_f64(n).map_or(Json::Null, Json::Number)
    }
}
