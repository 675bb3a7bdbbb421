use anyhow::Result;
use serde_json::json;
use std::path::{Path, PathBuf};
use tabula_core::AppConfig;
use tabula_store::ResultStore;

use crate::output::{print_json, redact_config_for_display};
use crate::{CleanArgs, ConfigCmd};

pub(crate) fn run_clean(args: CleanArgs, json_mode: bool) -> Result<()> {
    let store = ResultStore::open(&args.file)?;
    let report = store.clean_error_entries()?;
    if json_mode {
        print_json(&json!({
            "file": store.path(),
            "kept": report.kept,
            "removed": report.removed,
        }))?;
    } else {
        println!(
            "{}: kept {} record(s), removed {} error record(s)",
            store.path().display(),
            report.kept,
            report.removed
        );
    }
    Ok(())
}

pub(crate) fn run_config(cwd: &Path, cmd: ConfigCmd, json_mode: bool) -> Result<()> {
    match cmd {
        ConfigCmd::Show => {
            let cfg = AppConfig::load(cwd)?;
            let shown = redact_config_for_display(&cfg)?;
            if json_mode {
                print_json(&json!({
                    "config": shown,
                    "sources": config_sources(cwd),
                }))?;
            } else {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            }
        }
    }
    Ok(())
}

/// Settings files that exist, in merge order.
fn config_sources(cwd: &Path) -> Vec<PathBuf> {
    let mut paths = vec![AppConfig::legacy_toml_path(cwd)];
    paths.extend(AppConfig::user_settings_path());
    paths.push(AppConfig::project_settings_path(cwd));
    paths.push(AppConfig::project_local_settings_path(cwd));
    paths.into_iter().filter(|path| path.exists()).collect()
}
