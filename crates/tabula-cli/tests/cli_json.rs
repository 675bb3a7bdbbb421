use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tabula_core::ResultRecord;
use tabula_testkit::{NASCAR_WINNER_ROUTINE, nascar_item, nascar_table, write_dataset};
use tempfile::TempDir;

#[test]
fn config_show_redacts_api_key() {
    let workspace = TempDir::new().expect("workspace");
    write_local_settings(
        workspace.path(),
        r#"{"llm":{"api_key":"sk-do-not-print"},"telemetry":{"event_log":false}}"#,
    );
    let out = run_json(workspace.path(), &["--json", "config", "show"]);
    assert_eq!(out["config"]["llm"]["api_key"], "***REDACTED***");
    assert_eq!(out["config"]["pipeline"]["max_iterations"], 3);
    assert!(
        out["sources"]
            .as_array()
            .is_some_and(|s| s.iter().any(|p| p.as_str().is_some_and(|p| p.ends_with("settings.local.json"))))
    );
    assert!(!out.to_string().contains("sk-do-not-print"));
}

#[test]
fn clean_drops_error_records() {
    let workspace = TempDir::new().expect("workspace");
    let file = workspace.path().join("results.jsonl");
    let done = ResultRecord::success(&nascar_item("a"), "Johnny Benson won.".to_string(), Vec::new());
    let failed = ResultRecord::failure(&nascar_item("b"));
    fs::write(
        &file,
        format!(
            "{}\n{}\n",
            serde_json::to_string(&done).expect("record"),
            serde_json::to_string(&failed).expect("record")
        ),
    )
    .expect("results");

    let out = run_json(
        workspace.path(),
        &["--json", "clean", "--file", file.to_string_lossy().as_ref()],
    );
    assert_eq!(out["kept"], 1);
    assert_eq!(out["removed"], 1);
    let remaining = fs::read_to_string(&file).expect("read");
    assert_eq!(remaining.lines().count(), 1);
    assert!(remaining.contains("\"a\""));
}

#[test]
fn routine_check_prints_signature_and_result() {
    let workspace = TempDir::new().expect("workspace");
    let routine = workspace.path().join("winner.routine");
    fs::write(&routine, NASCAR_WINNER_ROUTINE).expect("routine");
    let table = workspace.path().join("table.json");
    fs::write(&table, serde_json::to_string(&nascar_table()).expect("table")).expect("table");

    let out = run_json(
        workspace.path(),
        &[
            "--json",
            "routine",
            "check",
            routine.to_string_lossy().as_ref(),
            "--table",
            table.to_string_lossy().as_ref(),
        ],
    );
    assert_eq!(out["name"], "get_race_winner");
    assert_eq!(out["params"], serde_json::json!(["table"]));
    let result: Value =
        serde_json::from_str(out["result"].as_str().expect("result string")).expect("result json");
    assert_eq!(result["Driver"], "Johnny Benson");
    assert_eq!(result["Team"], "Bill Davis Racing");
}

#[test]
fn routine_check_binds_named_arguments() {
    let workspace = TempDir::new().expect("workspace");
    let routine = workspace.path().join("team.routine");
    fs::write(
        &routine,
        r#"routine get_team(table, driver) {
    for row in table.rows {
        if row["Driver"] == driver {
            return row["Team"];
        }
    }
    return none;
}"#,
    )
    .expect("routine");
    let table = serde_json::to_string(&nascar_table()).expect("table");

    let found = run_json(
        workspace.path(),
        &[
            "--json", "routine", "check", routine.to_string_lossy().as_ref(),
            "--table", &table, "--arg", "driver=Mike Skinner",
        ],
    );
    assert_eq!(found["result"], "Bill Davis Racing");

    let missing = run_json(
        workspace.path(),
        &[
            "--json", "routine", "check", routine.to_string_lossy().as_ref(),
            "--table", &table, "--arg", "driver=Nobody",
        ],
    );
    assert!(missing["result"].is_null());
}

#[test]
fn eval_scores_exact_match_and_reports_unconfigured_metrics() {
    let workspace = TempDir::new().expect("workspace");
    let file = workspace.path().join("paris.jsonl");
    fs::write(
        &file,
        "{\"example_id\":\"1\",\"prediction\":\"Paris\",\"ground_truth\":\"Paris\"}\n",
    )
    .expect("results");

    let out = run_json(
        workspace.path(),
        &[
            "--json",
            "eval",
            "--file",
            file.to_string_lossy().as_ref(),
            "--dataset-name",
            "DongfuJiang/FeTaQA",
        ],
    );
    let dataset = &out["datasets"][0];
    assert_eq!(dataset["dataset"], "FeTaQA");
    assert_eq!(dataset["samples"], 1);
    let metric = |name: &str| {
        dataset["metrics"]
            .as_array()
            .and_then(|m| m.iter().find(|entry| entry["metric"] == name))
            .cloned()
            .expect("metric present")
    };
    assert_eq!(metric("Rouge-L")["score"], 100.0);
    assert_eq!(metric("Prediction Length")["score"], 1.0);
    assert!(metric("TAPAS-Acc")["unavailable"].is_string());
    assert!(metric("BERTScore")["score"].is_null());
}

#[test]
fn eval_skips_missing_default_files() {
    let workspace = TempDir::new().expect("workspace");
    let out = run_json(
        workspace.path(),
        &["--json", "eval", "--model", "gpt-4o"],
    );
    assert!(out["datasets"].as_array().is_some_and(Vec::is_empty));
    assert_eq!(out["skipped"].as_array().map(Vec::len), Some(2));
}

#[test]
fn run_resumes_without_calling_the_model_when_everything_is_done() {
    let workspace = TempDir::new().expect("workspace");
    let dataset = write_dataset(workspace.path(), "items.jsonl", &[nascar_item("a")]).expect("dataset");
    let previous = workspace
        .path()
        .join("outputs/FeTaQA_output/FeTaQA_test_gpt-4o_output.jsonl");
    fs::create_dir_all(previous.parent().expect("parent")).expect("output dir");
    let done = ResultRecord::success(&nascar_item("a"), "Johnny Benson won.".to_string(), Vec::new());
    let failed = ResultRecord::failure(&nascar_item("old"));
    fs::write(
        &previous,
        format!(
            "{}\n{}\n",
            serde_json::to_string(&done).expect("record"),
            serde_json::to_string(&failed).expect("record")
        ),
    )
    .expect("previous results");

    let out = run_json(
        workspace.path(),
        &[
            "--json",
            "run",
            "--model",
            "gpt-4o",
            "--dataset-name",
            "DongfuJiang/FeTaQA",
            "--dataset-file",
            dataset.to_string_lossy().as_ref(),
            "--n-samples",
            "-1",
        ],
    );
    assert_eq!(out["processed"], 0);
    assert_eq!(out["skipped"], 1);
    assert_eq!(out["removed_errors"], 1);
    assert!(
        out["output_path"]
            .as_str()
            .is_some_and(|p| p.ends_with("FeTaQA_test_gpt-4o_output.jsonl"))
    );
}

fn write_local_settings(workspace: &Path, body: &str) {
    let runtime = workspace.join(".tabula");
    fs::create_dir_all(&runtime).expect("runtime dir");
    fs::write(runtime.join("settings.local.json"), body).expect("settings override");
}

fn run_json(workspace: &Path, args: &[&str]) -> Value {
    if !workspace.join(".tabula/settings.local.json").exists() {
        write_local_settings(workspace, r#"{"telemetry":{"event_log":false}}"#);
    }
    let output = Command::new(assert_cmd::cargo::cargo_bin!("tabula"))
        .current_dir(workspace)
        .env("HOME", workspace)
        .env_remove("OPENAI_API_KEY")
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("json output")
}
