//! End-to-end behavior of the plan, answer, check loop against a scripted
//! gateway.

use tabula_agent::{Gateway, Pipeline};
use tabula_core::{DatasetKind, FinalAnswerScope, LlmConfig, PipelineConfig};
use tabula_observe::Observer;
use tabula_testkit::{
    NASCAR_WINNER_ROUTINE, Scripted, ScriptedLlm, fail, fenced_routine, nascar_item, text,
    tool_call,
};

const WINNER_JSON: &str = r#"{"Driver":"Johnny Benson","Team":"Bill Davis Racing"}"#;

fn answer(llm: &ScriptedLlm, config: PipelineConfig) -> tabula_core::ResultRecord {
    let gateway = Gateway::new(llm, "gpt-35-turbo", &LlmConfig::default());
    let observer = Observer::disabled();
    Pipeline::new(&gateway, &observer, config, DatasetKind::FeTaQA)
        .answer_item(&nascar_item("nascar-1"))
}

#[test]
fn nascar_question_is_answered_in_one_iteration() {
    let llm = ScriptedLlm::new(vec![
        text("Improved Plan:\n1. Who won the race?\n2. What team did they drive for?"),
        fenced_routine(NASCAR_WINNER_ROUTINE),
        text("Johnny Benson won the race."),
        fenced_routine(NASCAR_WINNER_ROUTINE),
        text("Johnny Benson drove for Bill Davis Racing."),
        text("YES"),
        text("Johnny Benson won the race driving for Bill Davis Racing."),
    ]);
    let record = answer(&llm, PipelineConfig::default());

    assert_eq!(
        record.prediction,
        "Johnny Benson won the race driving for Bill Davis Racing."
    );
    assert_eq!(
        record.ground_truth.as_deref(),
        Some("Johnny Benson won the race driving for Bill Davis Racing.")
    );
    let log = record.log_data.expect("log data");
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].iter_num, 1);
    assert_eq!(
        log[0].plan.questions(),
        ["Who won the race?", "What team did they drive for?"]
    );
    let first = &log[0].reasoning_log[0];
    assert_eq!(first.short_answer, WINNER_JSON);
    assert_eq!(first.long_answer, "Johnny Benson won the race.");
    assert_eq!(first.routines, [NASCAR_WINNER_ROUTINE]);
    assert_eq!(llm.remaining(), 0);

    let final_prompt = llm.prompts().last().cloned().expect("final prompt");
    assert!(final_prompt.contains("Johnny Benson won the race."));
    assert!(final_prompt.contains("Johnny Benson drove for Bill Davis Racing."));
}

#[test]
fn repairs_stop_after_three_and_fallback_answers() {
    let llm = ScriptedLlm::new(vec![
        text("1. Who won the race?"),
        text("The winner is in the first row."),
        text("def winner(table): return table[0]"),
        text("```routine\nroutine winner(table) { return table.rows[0][\"Owner\"]; }\n```"),
        text("routine winner(table) { return 1 / 0; }"),
        text("Johnny Benson"),
        text("Johnny Benson won the race."),
        text("YES"),
        text("Johnny Benson won."),
    ]);
    let record = answer(&llm, PipelineConfig::default());
    assert_eq!(record.prediction, "Johnny Benson won.");

    let log = record.log_data.expect("log data");
    let entry = &log[0].reasoning_log[0];
    assert_eq!(entry.routines.len(), 4, "initial routine plus three repairs");
    assert_eq!(entry.short_answer, "Johnny Benson");
    assert_eq!(llm.remaining(), 0);

    let prompts = llm.prompts();
    assert!(prompts[2].contains("syntax error"), "repair sees the parse error");
    assert!(prompts[4].contains("`Owner`"), "repair sees the runtime fault");
    assert_eq!(
        prompts
            .iter()
            .filter(|p| p.contains("The following is the Feedback"))
            .count(),
        3
    );
    assert!(!prompts.iter().any(|p| p.contains("division by zero")));
    assert!(prompts[5].contains("short-form answer"), "fallback asks the table directly");
}

#[test]
fn a_repair_that_works_ends_the_loop_early() {
    let llm = ScriptedLlm::new(vec![
        text("1. Who won the race?"),
        text("routine winner(table) { return table.rows[0][\"Winner\"]; }"),
        fenced_routine(NASCAR_WINNER_ROUTINE),
        text("Johnny Benson won for Bill Davis Racing."),
        text("YES"),
        text("Johnny Benson won."),
    ]);
    let record = answer(&llm, PipelineConfig::default());
    let log = record.log_data.expect("log data");
    let entry = &log[0].reasoning_log[0];
    assert_eq!(entry.routines.len(), 2);
    assert_eq!(entry.short_answer, WINNER_JSON);
    assert_eq!(llm.remaining(), 0);
}

#[test]
fn unresolvable_parameter_feeds_repair() {
    let by_number = r#"routine get_driver(table, car_number) {
        for row in table.rows { if row["No."] == car_number { return row["Driver"]; } }
        return none;
    }"#;
    let llm = ScriptedLlm::new(vec![
        text("1. Who won the race?"),
        fenced_routine(by_number),
        text("I would call get_driver."),
        fenced_routine(NASCAR_WINNER_ROUTINE),
        text("Johnny Benson won."),
        text("YES"),
        text("Johnny Benson won."),
    ]);
    let record = answer(&llm, PipelineConfig::default());
    let log = record.log_data.expect("log data");
    let entry = &log[0].reasoning_log[0];
    assert_eq!(entry.routines.len(), 2);
    assert!(llm.prompts()[3].contains("no arguments could be resolved"));
}

#[test]
fn resolved_arguments_reach_the_routine() {
    let by_number = r#"routine get_driver(table, car_number) {
        for row in table.rows { if row["No."] == car_number { return row["Driver"]; } }
        return none;
    }"#;
    let llm = ScriptedLlm::new(vec![
        text("1. Who drove car 33?"),
        fenced_routine(by_number),
        tool_call("get_driver", serde_json::json!({"car_number": "33"})),
        text("Ron Hornaday Jr. drove car 33."),
        text("yes"),
        text("Ron Hornaday Jr. drove car 33."),
    ]);
    let record = answer(&llm, PipelineConfig::default());
    let log = record.log_data.expect("log data");
    assert_eq!(log[0].reasoning_log[0].short_answer, "Ron Hornaday Jr.");
}

#[test]
fn empty_result_and_missing_direct_answer_give_none() {
    let llm = ScriptedLlm::new(vec![
        text("1. Who finished fourth?"),
        fenced_routine("routine fourth(table) { return none; }"),
        fail("HTTP 503"),
        fail("HTTP 503"),
        text("YES"),
        text("The table does not list a fourth place."),
    ]);
    let record = answer(&llm, PipelineConfig::default());
    let log = record.log_data.expect("log data");
    let entry = &log[0].reasoning_log[0];
    assert_eq!(entry.routines.len(), 1, "a clean none is not repaired");
    assert_eq!(entry.short_answer, "None");
    assert_eq!(entry.long_answer, "None", "sentence miss keeps the short answer");
}

fn one_pass(plan: &str, fact: &str, verdict: &str) -> Vec<Scripted> {
    iteration(plan, &[fact], verdict)
}

fn iteration(plan: &str, facts: &[&str], verdict: &str) -> Vec<Scripted> {
    let mut script = vec![text(plan)];
    for fact in facts {
        script.push(fenced_routine(NASCAR_WINNER_ROUTINE));
        script.push(text(*fact));
    }
    script.push(text(verdict));
    script
}

fn three_rejected_iterations() -> Vec<Scripted> {
    let mut script = iteration("1. Who won?", &["Fact one."], "NO");
    script.extend(iteration(
        "1. Who won?\n2. For which team?",
        &["Fact two.", "Fact two b."],
        "NO",
    ));
    script.extend(iteration(
        "1. Who won?\n2. For which team?\n3. How many laps?",
        &["Fact three.", "Fact three b.", "Fact three c."],
        "NO",
    ));
    script.push(text("Final answer."));
    script
}

#[test]
fn loop_stops_at_three_iterations_and_finalizes_once() {
    let llm = ScriptedLlm::new(three_rejected_iterations());
    let record = answer(&llm, PipelineConfig::default());
    assert_eq!(record.prediction, "Final answer.");
    let log = record.log_data.expect("log data");
    assert_eq!(log.len(), 3);
    assert_eq!(log[2].plan.len(), 3);
    assert_eq!(llm.remaining(), 0);

    let prompts = llm.prompts();
    let replan = prompts
        .iter()
        .filter(|p| p.contains("Old Plan:"))
        .nth(1)
        .expect("second planning prompt");
    assert!(replan.contains("Old Plan: '''1. Who won?'''"));

    let final_prompt = prompts.last().expect("final prompt");
    assert_eq!(
        prompts.iter().filter(|p| p.contains("Fact List")).count(),
        1,
        "final synthesis runs exactly once"
    );
    for fact in ["Fact one.", "Fact two b.", "Fact three c."] {
        assert!(final_prompt.contains(fact), "cumulative answers include {fact}");
    }
}

#[test]
fn last_iteration_scope_drops_superseded_answers() {
    let llm = ScriptedLlm::new(three_rejected_iterations());
    let config = PipelineConfig {
        final_answer_scope: FinalAnswerScope::LastIteration,
        ..PipelineConfig::default()
    };
    answer(&llm, config);
    let final_prompt = llm.prompts().last().cloned().expect("final prompt");
    assert!(final_prompt.contains("Fact three c."));
    assert!(!final_prompt.contains("Fact one."));
}

#[test]
fn planning_miss_yields_error_record() {
    let llm = ScriptedLlm::new(vec![fail("HTTP 401")]);
    let record = answer(&llm, PipelineConfig::default());
    assert!(record.is_error());
    assert!(record.log_data.is_none());
    assert!(record.ground_truth.is_none());
}

#[test]
fn final_synthesis_miss_yields_error_record() {
    let mut script = one_pass("1. Who won?", "Johnny Benson won.", "YES");
    script.push(text("   "));
    let llm = ScriptedLlm::new(script);
    let record = answer(&llm, PipelineConfig::default());
    assert!(record.is_error());
}
