//! Running synthesized routines: argument resolution, interpretation, and
//! the bounded repair loop with its direct-answer fallback.

use crate::gateway::Gateway;
use crate::{prompts, synthesis};
use anyhow::{Result, anyhow, bail};
use serde_json::Value;
use tabula_core::{ExecutionOutcome, LlmToolCall, NOT_FOUND, RunEvent, Table};
use tabula_observe::Observer;
use tabula_routine::{Routine, parse_routine};

/// Parses `routine_source`, resolves its extra parameters from the
/// sub-question when it has any, and interprets it against `table`.
///
/// Never fails: every problem is reported through the outcome's feedback.
pub fn resolve_and_run(
    gateway: &Gateway<'_>,
    routine_source: &str,
    table: &Table,
    sub_question: &str,
) -> ExecutionOutcome {
    let routine = match parse_routine(routine_source) {
        Ok(routine) => routine,
        Err(err) => return ExecutionOutcome::failed(err),
    };

    let args = if routine.extra_params().is_empty() {
        Vec::new()
    } else {
        let call = gateway.complete_with_function(
            prompts::resolution_messages(sub_question),
            vec![prompts::resolution_tool(&routine)],
        );
        let bound = call
            .ok_or_else(|| {
                anyhow!(
                    "no arguments could be resolved for parameter(s) {}",
                    routine.extra_params().join(", ")
                )
            })
            .and_then(|call| bind_arguments(&routine, &call));
        match bound {
            Ok(args) => args,
            Err(err) => return ExecutionOutcome::failed(err),
        }
    };

    match routine.invoke(table, &args) {
        Ok(result) => ExecutionOutcome::succeeded(result),
        Err(err) => ExecutionOutcome::failed(err),
    }
}

/// Checks the selected call against the routine's signature and returns the
/// arguments in declared order.
fn bind_arguments(routine: &Routine, call: &LlmToolCall) -> Result<Vec<String>> {
    if call.name != routine.name() {
        bail!(
            "the resolution selected `{}` but the routine is `{}`",
            call.name,
            routine.name()
        );
    }
    let raw = if call.arguments.trim().is_empty() {
        "{}"
    } else {
        call.arguments.as_str()
    };
    let parsed: Value = serde_json::from_str(raw)
        .map_err(|err| anyhow!("arguments for `{}` are not valid JSON: {err}", call.name))?;
    let Value::Object(map) = parsed else {
        bail!("arguments for `{}` are not a JSON object", call.name);
    };

    let extras = routine.extra_params();
    if let Some(unexpected) = map.keys().find(|key| !extras.contains(&key.as_str())) {
        bail!("unexpected argument `{unexpected}` for {}", routine.signature());
    }
    extras
        .iter()
        .map(|name| match map.get(*name) {
            None => Err(anyhow!("missing argument `{name}` for {}", routine.signature())),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::Bool(b)) => Ok(b.to_string()),
            Some(other) => Err(anyhow!(
                "argument `{name}` must be a string, number or boolean, got {other}"
            )),
        })
        .collect()
}

/// What one sub-question's execution produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallReport {
    /// Every source that was run, the synthesized one first.
    pub routines: Vec<String>,
    pub repairs: u32,
    pub fallback_used: bool,
    pub short_answer: String,
}

/// Runs routines for one sub-question under a repair budget.
pub struct Executor<'a> {
    gateway: &'a Gateway<'a>,
    observer: &'a Observer,
    max_repairs: u32,
}

impl<'a> Executor<'a> {
    pub fn new(gateway: &'a Gateway<'a>, observer: &'a Observer, max_repairs: u32) -> Self {
        Self {
            gateway,
            observer,
            max_repairs,
        }
    }

    /// Runs `routine_source`, repairing it while it fails and budget remains.
    /// When no usable result comes out, the table is asked directly; a miss
    /// there leaves the short answer as `"None"`.
    pub fn function_call(
        &self,
        example_id: &str,
        sub_question: &str,
        table: &Table,
        routine_source: String,
    ) -> CallReport {
        let mut source = routine_source;
        let mut routines = vec![source.clone()];
        let mut repairs = 0;
        let outcome = loop {
            let outcome = resolve_and_run(self.gateway, &source, table, sub_question);
            if outcome.success {
                break outcome;
            }
            tracing::debug!(example_id, sub_question, feedback = %outcome.feedback, "routine failed");
            self.observer.emit(RunEvent::RoutineFailedV1 {
                example_id: example_id.to_string(),
                sub_question: sub_question.to_string(),
                feedback: outcome.feedback.clone(),
            });
            if repairs >= self.max_repairs {
                break outcome;
            }
            repairs += 1;
            self.observer.emit(RunEvent::RepairAttemptedV1 {
                example_id: example_id.to_string(),
                sub_question: sub_question.to_string(),
                attempt: repairs,
            });
            source = synthesis::repair(self.gateway, sub_question, table, &source, &outcome.feedback);
            routines.push(source.clone());
        };

        let fallback_used = outcome.needs_fallback();
        let short_answer = if fallback_used {
            self.observer.emit(RunEvent::FallbackUsedV1 {
                example_id: example_id.to_string(),
                sub_question: sub_question.to_string(),
            });
            self.gateway
                .complete(prompts::ask_directly(sub_question, table))
                .map(|answer| answer.trim().to_string())
                .unwrap_or_else(|| NOT_FOUND.to_string())
        } else {
            outcome.result.unwrap_or_else(|| NOT_FOUND.to_string())
        };

        CallReport {
            routines,
            repairs,
            fallback_used,
            short_answer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabula_core::{LlmConfig, ToolChoice};
    use tabula_testkit::{NASCAR_WINNER_ROUTINE, ScriptedLlm, nascar_table, text, tool_call};

    const DRIVER_BY_NUMBER: &str = r#"routine get_driver(table, car_number) {
        for row in table.rows {
            if row["No."] == car_number { return {"Driver": row["Driver"], "Team": row["Team"]}; }
        }
        return none;
    }"#;

    fn run(llm: &ScriptedLlm, source: &str) -> ExecutionOutcome {
        let gateway = Gateway::new(llm, "m", &LlmConfig::default());
        resolve_and_run(&gateway, source, &nascar_table(), "Who drove car 23?")
    }

    #[test]
    fn zero_argument_routine_skips_resolution() {
        let llm = ScriptedLlm::new(Vec::new());
        let outcome = run(&llm, NASCAR_WINNER_ROUTINE);
        assert!(outcome.success);
        assert_eq!(
            outcome.result.as_deref(),
            Some(r#"{"Driver":"Johnny Benson","Team":"Bill Davis Racing"}"#)
        );
        assert_eq!(outcome.feedback, ExecutionOutcome::SUCCESS_FEEDBACK);
        assert!(llm.requests().is_empty());
    }

    #[test]
    fn parse_error_is_reported_as_feedback() {
        let llm = ScriptedLlm::new(Vec::new());
        let outcome = run(&llm, "def get_driver(table):\n    return None");
        assert!(!outcome.success);
        assert!(outcome.result.is_none());
        assert!(outcome.feedback.starts_with("Feedback: syntax error"), "{}", outcome.feedback);
    }

    #[test]
    fn extra_parameters_are_resolved_through_function_selection() {
        let llm = ScriptedLlm::new(vec![tool_call("get_driver", json!({"car_number": 23}))]);
        let outcome = run(&llm, DRIVER_BY_NUMBER);
        assert!(outcome.success, "{}", outcome.feedback);
        assert!(outcome.result.expect("result").contains("Johnny Benson"));

        let req = &llm.requests()[0];
        assert_eq!(req.tool_choice, ToolChoice::auto());
        assert_eq!(req.tools.len(), 1);
        assert_eq!(req.tools[0].function.name, "get_driver");
        assert_eq!(llm.prompts()[0], "Who drove car 23?");
    }

    #[test]
    fn resolution_mismatches_are_execution_faults() {
        let cases = [
            (tool_call("other", json!({"car_number": "23"})), "selected `other`"),
            (tool_call("get_driver", json!({})), "missing argument `car_number`"),
            (
                tool_call("get_driver", json!({"car_number": "23", "year": "2008"})),
                "unexpected argument `year`",
            ),
            (tool_call("get_driver", json!({"car_number": ["23"]})), "must be a string"),
            (text("I cannot call functions"), "no arguments could be resolved"),
        ];
        for (reply, expected) in cases {
            let llm = ScriptedLlm::new(vec![reply]);
            let outcome = run(&llm, DRIVER_BY_NUMBER);
            assert!(!outcome.success);
            assert!(outcome.feedback.contains(expected), "{}", outcome.feedback);
        }
    }

    #[test]
    fn runtime_fault_names_the_column() {
        let llm = ScriptedLlm::new(Vec::new());
        let outcome = run(&llm, r#"routine r(table) { return table.rows[0]["Owner"]; }"#);
        assert!(!outcome.success);
        assert!(outcome.feedback.contains("`Owner`"), "{}", outcome.feedback);
    }

    #[test]
    fn successful_first_run_needs_no_repair() {
        let llm = ScriptedLlm::new(vec![text("unused")]);
        let gateway = Gateway::new(&llm, "m", &LlmConfig::default());
        let observer = Observer::disabled();
        let report = Executor::new(&gateway, &observer, 3).function_call(
            "ex",
            "Who won?",
            &nascar_table(),
            NASCAR_WINNER_ROUTINE.to_string(),
        );
        assert_eq!(report.repairs, 0);
        assert!(!report.fallback_used);
        assert_eq!(report.routines.len(), 1);
        assert!(report.short_answer.contains("Bill Davis Racing"));
        assert_eq!(llm.remaining(), 1);
    }
}
