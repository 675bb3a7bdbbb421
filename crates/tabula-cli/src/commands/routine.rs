use anyhow::{Context, Result, anyhow, bail};
use serde_json::json;
use std::fs;
use std::path::Path;
use tabula_core::Table;
use tabula_routine::{Routine, parse_routine};

use crate::output::print_json;
use crate::{RoutineCheckArgs, RoutineCmd};

pub(crate) fn run_routine(cmd: RoutineCmd, json_mode: bool) -> Result<()> {
    match cmd {
        RoutineCmd::Check(args) => run_check(args, json_mode),
    }
}

fn run_check(args: RoutineCheckArgs, json_mode: bool) -> Result<()> {
    let source = fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let routine = parse_routine(&source).map_err(|err| anyhow!("{err}"))?;

    let result = match args.table.as_deref() {
        Some(table) => {
            let table = load_table(table)?;
            let bound = bind_args(&routine, &args.args)?;
            Some(
                routine
                    .invoke(&table, &bound)
                    .map_err(|err| anyhow!("{err}"))?,
            )
        }
        None => None,
    };

    if json_mode {
        let mut payload = json!({
            "name": routine.name(),
            "signature": routine.signature(),
            "params": routine.params(),
        });
        if let Some(result) = &result {
            payload["result"] = json!(result);
        }
        print_json(&payload)?;
    } else {
        println!("{}", routine.signature());
        if let Some(result) = result {
            println!("=> {}", result.as_deref().unwrap_or(tabula_core::NOT_FOUND));
        }
    }
    Ok(())
}

/// A table from a JSON file path, or inline JSON when the value starts with `{`.
fn load_table(value: &str) -> Result<Table> {
    let raw = if value.trim_start().starts_with('{') {
        value.to_string()
    } else {
        fs::read_to_string(Path::new(value)).with_context(|| format!("reading table {value}"))?
    };
    serde_json::from_str(&raw).context("table must be a JSON object with header and rows")
}

/// Orders `name=value` pairs by the routine's extra parameters.
fn bind_args(routine: &Routine, pairs: &[String]) -> Result<Vec<String>> {
    let mut given = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("argument `{pair}` must look like name=value"))?;
        given.push((name.trim(), value));
    }
    let extras = routine.extra_params();
    if let Some((name, _)) = given.iter().find(|(name, _)| !extras.contains(name)) {
        bail!("`{}` has no parameter `{name}`", routine.name());
    }
    extras
        .iter()
        .map(|param| {
            given
                .iter()
                .find(|(name, _)| name == param)
                .map(|(_, value)| value.to_string())
                .ok_or_else(|| anyhow!("missing --arg {param}=..."))
        })
        .collect()
}
