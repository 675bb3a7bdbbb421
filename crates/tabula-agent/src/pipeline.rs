//! The per-item plan, answer, check loop.

use crate::execution::Executor;
use crate::gateway::Gateway;
use crate::{prompts, synthesis};
use anyhow::{Result, anyhow, bail};
use tabula_core::{
    DatasetKind, FinalAnswerScope, IterationRecord, LoopState, PipelineConfig, Plan, QueryItem,
    ResultRecord, RunEvent, SubQuestionLog, Table, is_valid_loop_transition,
};
use tabula_observe::Observer;

/// Tracks the loop's state and refuses transitions the state machine forbids.
struct LoopTracker<'a> {
    state: LoopState,
    example_id: &'a str,
    observer: &'a Observer,
}

impl<'a> LoopTracker<'a> {
    fn new(example_id: &'a str, observer: &'a Observer) -> Self {
        Self {
            state: LoopState::Planning,
            example_id,
            observer,
        }
    }

    fn advance(&mut self, to: LoopState) -> Result<()> {
        if !is_valid_loop_transition(self.state, to) {
            bail!("invalid loop transition {:?} -> {:?}", self.state, to);
        }
        self.observer.emit(RunEvent::StateChangedV1 {
            example_id: self.example_id.to_string(),
            from: self.state,
            to,
        });
        self.state = to;
        Ok(())
    }
}

/// Everything a finished loop hands back to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutput {
    pub prediction: String,
    pub iterations: Vec<IterationRecord>,
}

pub struct Pipeline<'a> {
    gateway: &'a Gateway<'a>,
    observer: &'a Observer,
    config: PipelineConfig,
    kind: DatasetKind,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        gateway: &'a Gateway<'a>,
        observer: &'a Observer,
        config: PipelineConfig,
        kind: DatasetKind,
    ) -> Self {
        Self {
            gateway,
            observer,
            config,
            kind,
        }
    }

    /// Answers one item. Any loop-level failure becomes an `"error"` record.
    pub fn answer_item(&self, item: &QueryItem) -> ResultRecord {
        self.observer.emit(RunEvent::ItemStartedV1 {
            example_id: item.example_id.clone(),
        });
        match self.run_loop(item) {
            Ok(output) => {
                self.observer.emit(RunEvent::ItemCompletedV1 {
                    example_id: item.example_id.clone(),
                    iterations: output.iterations.len() as u32,
                });
                ResultRecord::success(item, output.prediction, output.iterations)
            }
            Err(err) => {
                tracing::warn!(example_id = %item.example_id, error = %err, "item failed");
                self.observer.emit(RunEvent::ItemFailedV1 {
                    example_id: item.example_id.clone(),
                    error: format!("{err:#}"),
                });
                ResultRecord::failure(item)
            }
        }
    }

    pub fn run_loop(&self, item: &QueryItem) -> Result<LoopOutput> {
        let mut tracker = LoopTracker::new(&item.example_id, self.observer);
        match self.drive(item, &mut tracker) {
            Ok(output) => Ok(output),
            Err(err) => {
                // Reaching Error is always allowed from a live state.
                let _ = tracker.advance(LoopState::Error);
                Err(err)
            }
        }
    }

    fn drive(&self, item: &QueryItem, tracker: &mut LoopTracker<'_>) -> Result<LoopOutput> {
        let max_iterations = self.config.max_iterations.max(1);
        let mut previous_plan: Option<Plan> = None;
        let mut cumulative: Vec<String> = Vec::new();
        let mut latest: Vec<String> = Vec::new();
        let mut iterations: Vec<IterationRecord> = Vec::new();
        let mut iter_num = 0;

        loop {
            iter_num += 1;
            let reply = self
                .gateway
                .complete(prompts::plan_generation(&item.query, previous_plan.as_ref()))
                .ok_or_else(|| anyhow!("plan generation returned nothing"))?;
            let plan = prompts::parse_plan(&reply)
                .ok_or_else(|| anyhow!("plan generation returned an empty plan"))?;
            tracing::info!(example_id = %item.example_id, iteration = iter_num, steps = plan.len(), "plan generated");
            self.observer.emit(RunEvent::PlanGeneratedV1 {
                example_id: item.example_id.clone(),
                iteration: iter_num,
                plan: plan.clone(),
            });

            tracker.advance(LoopState::Answering)?;
            latest.clear();
            let mut reasoning_log = Vec::with_capacity(plan.len());
            for sub_question in plan.questions() {
                let entry = self.answer_sub_question(&item.example_id, sub_question, &item.table);
                cumulative.push(entry.long_answer.clone());
                latest.push(entry.long_answer.clone());
                reasoning_log.push(entry);
            }
            iterations.push(IterationRecord {
                iter_num,
                plan: plan.clone(),
                reasoning_log,
            });

            tracker.advance(LoopState::Checking)?;
            let verdict = self
                .gateway
                .complete(prompts::check_plan(&item.query, &plan))
                .ok_or_else(|| anyhow!("plan check returned nothing"))?;
            let sufficient = prompts::parse_check(&verdict);
            self.observer.emit(RunEvent::PlanCheckedV1 {
                example_id: item.example_id.clone(),
                iteration: iter_num,
                sufficient,
            });
            if sufficient || iter_num >= max_iterations {
                break;
            }
            tracker.advance(LoopState::Replan)?;
            previous_plan = Some(plan);
            tracker.advance(LoopState::Planning)?;
        }

        tracker.advance(LoopState::Finalizing)?;
        let facts = match self.config.final_answer_scope {
            FinalAnswerScope::Cumulative => &cumulative,
            FinalAnswerScope::LastIteration => &latest,
        };
        let prediction = self
            .gateway
            .complete(prompts::final_answer(self.kind, &item.query, facts))
            .ok_or_else(|| anyhow!("final synthesis returned nothing"))?;
        self.observer.emit(RunEvent::FinalizedV1 {
            example_id: item.example_id.clone(),
            facts: facts.len(),
        });
        tracker.advance(LoopState::Done)?;

        Ok(LoopOutput {
            prediction: prediction.trim().to_string(),
            iterations,
        })
    }

    /// Synthesizes, runs and verbalizes the answer to one sub-question.
    pub fn answer_sub_question(
        &self,
        example_id: &str,
        sub_question: &str,
        table: &Table,
    ) -> SubQuestionLog {
        let source = synthesis::synthesize(self.gateway, sub_question, table);
        let report = Executor::new(self.gateway, self.observer, self.config.max_repairs)
            .function_call(example_id, sub_question, table, source);
        let long_answer = self
            .gateway
            .complete(prompts::to_sentence(&report.short_answer, sub_question))
            .map(|sentence| sentence.trim().to_string())
            .unwrap_or_else(|| report.short_answer.clone());
        SubQuestionLog {
            routines: report.routines,
            short_answer: report.short_answer,
            long_answer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_rejects_skipping_states() {
        let observer = Observer::disabled();
        let mut tracker = LoopTracker::new("ex", &observer);
        assert!(tracker.advance(LoopState::Checking).is_err());
        tracker.advance(LoopState::Answering).expect("answering");
        tracker.advance(LoopState::Checking).expect("checking");
        tracker.advance(LoopState::Finalizing).expect("finalizing");
        tracker.advance(LoopState::Done).expect("done");
        assert!(tracker.advance(LoopState::Error).is_err());
    }
}
