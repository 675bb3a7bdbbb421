//! Functions callable from routine bodies.
//!
//! `push`/`append` mutate a variable and live in the interpreter; everything
//! here is a pure function of its arguments and the table.

use crate::error::RoutineError;
use crate::interp::{MAX_ALLOCATION, compare, resolve_index};
use crate::value::{Value, map_get, row_cells, row_record};
use std::cmp::Ordering;
use tabula_core::Table;

type BuiltinResult = std::result::Result<Value, RoutineError>;

pub fn call(name: &str, args: Vec<Value>, table: &Table) -> BuiltinResult {
    match name {
        "len" => {
            let [value] = exact::<1>(name, args)?;
            let len = match &value {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.len(),
                Value::Map(entries) => entries.len(),
                Value::Row(idx) => row_cells(table, *idx).len(),
                Value::Table => table.rows.len(),
                other => return Err(type_mismatch(name, "a string, list, map, row or table", other)),
            };
            Ok(Value::Number(len as f64))
        }
        "str" => {
            let [value] = exact::<1>(name, args)?;
            Ok(Value::Str(value.display(table)))
        }
        "number" => {
            let [value] = exact::<1>(name, args)?;
            to_number(name, &value).map(Value::Number)
        }
        "int" => {
            let [value] = exact::<1>(name, args)?;
            to_number(name, &value).map(|n| Value::Number(n.trunc()))
        }
        "abs" => {
            let [value] = exact::<1>(name, args)?;
            to_number(name, &value).map(|n| Value::Number(n.abs()))
        }
        "round" => {
            check_arity(name, &args, 1, 2)?;
            let n = to_number(name, &args[0])?;
            let digits = match args.get(1) {
                Some(d) => to_number(name, d)? as i32,
                None => 0,
            };
            let factor = 10f64.powi(digits);
            Ok(Value::Number((n * factor).round() / factor))
        }
        "lower" | "upper" | "trim" => {
            let [value] = exact::<1>(name, args)?;
            let text = expect_str(name, &value)?;
            Ok(Value::Str(match name {
                "lower" => text.to_lowercase(),
                "upper" => text.to_uppercase(),
                _ => text.trim().to_string(),
            }))
        }
        "contains" | "starts_with" | "ends_with" => {
            let [haystack, needle] = exact::<2>(name, args)?;
            if let (Value::List(items), "contains") = (&haystack, name) {
                return Ok(Value::Bool(items.contains(&needle)));
            }
            let text = expect_str(name, &haystack)?;
            let part = expect_str(name, &needle)?;
            Ok(Value::Bool(match name {
                "contains" => text.contains(part),
                "starts_with" => text.starts_with(part),
                _ => text.ends_with(part),
            }))
        }
        "replace" => {
            let [text, from, to] = exact::<3>(name, args)?;
            let (text, from, to) = (
                expect_str(name, &text)?,
                expect_str(name, &from)?,
                expect_str(name, &to)?,
            );
            let hits = if from.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(from).count()
            };
            within_budget(text.len().saturating_add(hits.saturating_mul(to.len())))?;
            Ok(Value::Str(text.replace(from, to)))
        }
        "split" => {
            check_arity(name, &args, 1, 2)?;
            let text = expect_str(name, &args[0])?;
            let parts: Vec<Value> = match args.get(1) {
                Some(sep) => text
                    .split(expect_str(name, sep)?)
                    .map(|p| Value::Str(p.to_string()))
                    .collect(),
                None => text
                    .split_whitespace()
                    .map(|p| Value::Str(p.to_string()))
                    .collect(),
            };
            Ok(Value::List(parts))
        }
        "join" => {
            let [items, sep] = exact::<2>(name, args)?;
            let items = expect_list(name, items)?;
            let sep = expect_str(name, &sep)?;
            let mut out = String::new();
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push_str(sep);
                }
                out.push_str(&item.display(table));
                within_budget(out.len())?;
            }
            Ok(Value::Str(out))
        }
        "range" => {
            check_arity(name, &args, 1, 2)?;
            let (start, end) = match args.as_slice() {
                [end] => (0.0, to_number(name, end)?),
                [start, end, ..] => (to_number(name, start)?, to_number(name, end)?),
                [] => (0.0, 0.0),
            };
            let (start, end) = (start as i64, end as i64);
            within_budget(usize::try_from(end.saturating_sub(start)).unwrap_or(0))?;
            Ok(Value::List(
                (start..end.max(start)).map(|i| Value::Number(i as f64)).collect(),
            ))
        }
        "column" => {
            let [source, column] = exact::<2>(name, args)?;
            let column = expect_str(name, &column)?;
            let col = table
                .column_index(column)
                .ok_or_else(|| RoutineError::UnknownColumn(column.to_string()))?;
            let rows = rows_of(name, source, table)?;
            Ok(Value::List(
                rows.into_iter()
                    .map(|row| Value::Str(table.cell(row, col).to_string()))
                    .collect(),
            ))
        }
        "filter" => {
            let [source, column, wanted] = exact::<3>(name, args)?;
            let column = expect_str(name, &column)?;
            let col = table
                .column_index(column)
                .ok_or_else(|| RoutineError::UnknownColumn(column.to_string()))?;
            let wanted = wanted.display(table);
            let wanted = wanted.trim();
            let rows = rows_of(name, source, table)?;
            Ok(Value::List(
                rows.into_iter()
                    .filter(|row| table.cell(*row, col).trim().eq_ignore_ascii_case(wanted))
                    .map(Value::Row)
                    .collect(),
            ))
        }
        "record" => {
            let [row] = exact::<1>(name, args)?;
            match row {
                Value::Row(idx) => Ok(Value::Map(row_record(table, idx))),
                other => Err(type_mismatch(name, "a row", &other)),
            }
        }
        "select" => {
            let [source, columns] = exact::<2>(name, args)?;
            let columns = expect_list(name, columns)?
                .iter()
                .map(|c| {
                    let label = expect_str(name, c)?;
                    table
                        .column_index(label)
                        .map(|idx| (table.header[idx].clone(), idx))
                        .ok_or_else(|| RoutineError::UnknownColumn(label.to_string()))
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let project = |row: usize| {
                Value::Map(
                    columns
                        .iter()
                        .map(|(label, col)| (label.clone(), Value::Str(table.cell(row, *col).to_string())))
                        .collect(),
                )
            };
            match source {
                Value::Row(idx) => Ok(project(idx)),
                other => Ok(Value::List(
                    rows_of(name, other, table)?.into_iter().map(project).collect(),
                )),
            }
        }
        "get" => {
            check_arity(name, &args, 2, 3)?;
            let default = args.get(2).cloned().unwrap_or(Value::None);
            let found = match (&args[0], &args[1]) {
                (Value::Map(entries), Value::Str(key)) => map_get(entries, key).cloned(),
                (Value::Row(row), Value::Str(column)) => table
                    .column_index(column)
                    .map(|col| Value::Str(table.cell(*row, col).to_string())),
                (Value::List(items), Value::Number(n)) => resolve_index(*n, items.len())
                    .ok()
                    .map(|idx| items[idx].clone()),
                (container, _) => {
                    return Err(type_mismatch(name, "a map, row or list", container));
                }
            };
            Ok(found.unwrap_or(default))
        }
        "keys" | "values" => {
            let [map] = exact::<1>(name, args)?;
            let entries = match map {
                Value::Map(entries) => entries,
                Value::Row(idx) => row_record(table, idx),
                other => return Err(type_mismatch(name, "a map", &other)),
            };
            Ok(Value::List(
                entries
                    .into_iter()
                    .map(|(k, v)| if name == "keys" { Value::Str(k) } else { v })
                    .collect(),
            ))
        }
        "sum" | "avg" => {
            let [items] = exact::<1>(name, args)?;
            let numbers = expect_list(name, items)?
                .iter()
                .map(|v| to_number(name, v))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let total: f64 = numbers.iter().sum();
            if name == "sum" {
                return Ok(Value::Number(total));
            }
            if numbers.is_empty() {
                return Ok(Value::None);
            }
            Ok(Value::Number(total / numbers.len() as f64))
        }
        "min" | "max" => {
            if args.is_empty() {
                return Err(arity(name, "at least 1", 0));
            }
            let candidates = if matches!(args.as_slice(), [Value::List(_)]) {
                expect_list(name, args.into_iter().next().unwrap_or(Value::None))?
            } else {
                args
            };
            let mut best: Option<Value> = None;
            for candidate in candidates {
                best = Some(match best {
                    None => candidate,
                    Some(current) => {
                        let ordering = order_values(&candidate, &current)?;
                        let replace = if name == "min" {
                            ordering == Ordering::Less
                        } else {
                            ordering == Ordering::Greater
                        };
                        if replace { candidate } else { current }
                    }
                });
            }
            Ok(best.unwrap_or(Value::None))
        }
        "count" => {
            let [items, needle] = exact::<2>(name, args)?;
            let items = expect_list(name, items)?;
            Ok(Value::Number(
                items.iter().filter(|v| **v == needle).count() as f64,
            ))
        }
        "unique" => {
            let [items] = exact::<1>(name, args)?;
            let mut out: Vec<Value> = Vec::new();
            for item in expect_list(name, items)? {
                if !out.contains(&item) {
                    out.push(item);
                }
            }
            Ok(Value::List(out))
        }
        "reverse" => {
            let [items] = exact::<1>(name, args)?;
            let mut items = expect_list(name, items)?;
            items.reverse();
            Ok(Value::List(items))
        }
        "sort" => {
            check_arity(name, &args, 1, 2)?;
            let descending = args.get(1).is_some_and(Value::truthy);
            let mut items = expect_list(name, args.into_iter().next().unwrap_or(Value::None))?;
            sort_values(&mut items, |v| Ok(v.clone()))?;
            if descending {
                items.reverse();
            }
            Ok(Value::List(items))
        }
        "sort_by" => {
            check_arity(name, &args, 2, 3)?;
            let descending = args.get(2).is_some_and(Value::truthy);
            let key = expect_str(name, &args[1])?.to_string();
            let col = table.column_index(&key);
            let mut items = expect_list(name, args.into_iter().next().unwrap_or(Value::None))?;
            sort_values(&mut items, |item| match item {
                Value::Row(row) => col
                    .map(|c| Value::Str(table.cell(*row, c).to_string()))
                    .ok_or_else(|| RoutineError::UnknownColumn(key.clone())),
                Value::Map(entries) => map_get(entries, &key)
                    .cloned()
                    .ok_or_else(|| RoutineError::MissingKey(key.clone())),
                other => Err(type_mismatch("sort_by", "rows or maps", other)),
            })?;
            if descending {
                items.reverse();
            }
            Ok(Value::List(items))
        }
        _ => Err(RoutineError::UnknownFunction(name.to_string())),
    }
}

fn arity(name: &str, expected: &str, found: usize) -> RoutineError {
    RoutineError::Arity {
        name: name.to_string(),
        expected: expected.to_string(),
        found,
    }
}

fn check_arity(name: &str, args: &[Value], min: usize, max: usize) -> std::result::Result<(), RoutineError> {
    if args.len() < min || args.len() > max {
        return Err(arity(name, &format!("{min} to {max}"), args.len()));
    }
    Ok(())
}

fn exact<const N: usize>(name: &str, args: Vec<Value>) -> std::result::Result<[Value; N], RoutineError> {
    let found = args.len();
    args.try_into()
        .map_err(|_| arity(name, &N.to_string(), found))
}

fn type_mismatch(name: &str, expected: &str, found: &Value) -> RoutineError {
    RoutineError::type_error(format!(
        "`{name}` expects {expected}, found {}",
        found.type_name()
    ))
}

fn expect_str<'a>(name: &str, value: &'a Value) -> std::result::Result<&'a str, RoutineError> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(type_mismatch(name, "a string", other)),
    }
}

fn expect_list(name: &str, value: Value) -> std::result::Result<Vec<Value>, RoutineError> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(type_mismatch(name, "a list", &other)),
    }
}

fn to_number(name: &str, value: &Value) -> std::result::Result<f64, RoutineError> {
    value.to_number().ok_or_else(|| match value {
        Value::Str(s) => RoutineError::type_error(format!("`{name}` cannot convert '{s}' to a number")),
        other => type_mismatch(name, "a number", other),
    })
}

/// Row indices addressed by `source`: the whole table or a list of rows.
fn rows_of(name: &str, source: Value, table: &Table) -> std::result::Result<Vec<usize>, RoutineError> {
    match source {
        Value::Table => Ok((0..table.rows.len()).collect()),
        Value::List(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Row(idx) => Ok(idx),
                other => Err(type_mismatch(name, "a table or a list of rows", &other)),
            })
            .collect(),
        other => Err(type_mismatch(name, "a table or a list of rows", &other)),
    }
}

/// Numeric when both sides read as numbers, otherwise textual.
fn order_values(lhs: &Value, rhs: &Value) -> std::result::Result<Ordering, RoutineError> {
    match (lhs.to_number(), rhs.to_number()) {
        (Some(a), Some(b)) => Ok(a.total_cmp(&b)),
        _ => compare(lhs, rhs),
    }
}

fn sort_values<F>(items: &mut [Value], key: F) -> std::result::Result<(), RoutineError>
where
    F: Fn(&Value) -> std::result::Result<Value, RoutineError>,
{
    let keys = items.iter().map(&key).collect::<std::result::Result<Vec<_>, _>>()?;
    let numeric = keys.iter().all(|k| k.to_number().is_some());
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| {
        if numeric {
            let (x, y) = (keys[a].to_number(), keys[b].to_number());
            return x.unwrap_or_default().total_cmp(&y.unwrap_or_default());
        }
        compare(&keys[a], &keys[b]).unwrap_or_else(|err| {
            failure.get_or_insert(err);
            Ordering::Equal
        })
    });
    if let Some(err) = failure {
        return Err(err);
    }
    let sorted: Vec<Value> = order.iter().map(|&i| items[i].clone()).collect();
    items.clone_from_slice(&sorted);
    Ok(())
}

/// Rejects a value of `len` units before it is built.
fn within_budget(len: usize) -> std::result::Result<(), RoutineError> {
    if len > MAX_ALLOCATION {
        return Err(RoutineError::ResourceLimit(MAX_ALLOCATION));
    }
    Ok(())
}
