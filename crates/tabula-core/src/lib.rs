use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub type Result<T> = anyhow::Result<T>;

/// Prediction written for items whose loop aborted.
pub const ERROR_PREDICTION: &str = "error";
/// Literal a routine or fallback produces when nothing relevant was found.
pub const NOT_FOUND: &str = "None";
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;
pub const DEFAULT_MAX_REPAIRS: u32 = 3;
/// Name of the routine parameter bound to the table.
pub const TABLE_PARAM: &str = "table";

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".tabula")
}

// ── Data model ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub title: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(title: impl Into<String>, header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            title: title.into(),
            header,
            rows,
        }
    }

    /// Resolves a column name: exact match first, then trimmed and case-insensitive.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        if let Some(idx) = self.header.iter().position(|h| h == name) {
            return Some(idx);
        }
        let wanted = name.trim().to_lowercase();
        self.header
            .iter()
            .position(|h| h.trim().to_lowercase() == wanted)
    }

    /// Cell text at `(row, col)`; ragged rows read as empty cells.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn render_for_prompt(&self) -> String {
        let header = serde_json::to_string(&self.header).unwrap_or_default();
        let rows = serde_json::to_string(&self.rows).unwrap_or_default();
        format!(
            "Title: {}\nHeader: {header}\nRows: {rows}",
            self.title.trim()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryItem {
    pub example_id: String,
    pub query: String,
    #[serde(rename = "summary")]
    pub ground_truth: String,
    pub table: Table,
}

/// Datasets with a dedicated final-synthesis style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetKind {
    FeTaQA,
    QTSumm,
}

impl DatasetKind {
    /// Accepts a bare name or a hub path such as `yale-nlp/QTSumm`.
    pub fn from_name(name: &str) -> Option<Self> {
        match dataset_short_name(name).to_ascii_lowercase().as_str() {
            "fetaqa" => Some(Self::FeTaQA),
            "qtsumm" => Some(Self::QTSumm),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FeTaQA => "FeTaQA",
            Self::QTSumm => "QTSumm",
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn dataset_short_name(name: &str) -> &str {
    name.trim().rsplit('/').next().unwrap_or(name)
}

/// Ordered, non-empty list of sub-questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Plan(Vec<String>);

impl Plan {
    /// Trims each entry and drops blanks; `None` when nothing is left.
    pub fn new<I, S>(questions: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let questions = questions
            .into_iter()
            .map(|q| q.as_ref().trim().to_string())
            .filter(|q| !q.is_empty())
            .collect::<Vec<_>>();
        if questions.is_empty() {
            None
        } else {
            Some(Self(questions))
        }
    }

    pub fn questions(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn render_numbered(&self) -> String {
        self.0
            .iter()
            .enumerate()
            .map(|(idx, q)| format!("{}. {q}", idx + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl TryFrom<Vec<String>> for Plan {
    type Error = String;

    fn try_from(value: Vec<String>) -> std::result::Result<Self, Self::Error> {
        Plan::new(value).ok_or_else(|| "plan must contain at least one sub-question".to_string())
    }
}

impl From<Plan> for Vec<String> {
    fn from(plan: Plan) -> Self {
        plan.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    Planning,
    Answering,
    Checking,
    Replan,
    Finalizing,
    Done,
    Error,
}

pub fn is_valid_loop_transition(from: LoopState, to: LoopState) -> bool {
    if to == LoopState::Error {
        return !matches!(from, LoopState::Done | LoopState::Error);
    }
    match from {
        LoopState::Planning => to == LoopState::Answering,
        LoopState::Answering => to == LoopState::Checking,
        LoopState::Checking => matches!(to, LoopState::Replan | LoopState::Finalizing),
        LoopState::Replan => to == LoopState::Planning,
        LoopState::Finalizing => to == LoopState::Done,
        LoopState::Done | LoopState::Error => false,
    }
}

/// Result of one routine execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub result: Option<String>,
    pub feedback: String,
}

impl ExecutionOutcome {
    pub const SUCCESS_FEEDBACK: &'static str = "Feedback: the routine is correct, nothing to fix.";

    pub fn succeeded(result: Option<String>) -> Self {
        Self {
            success: true,
            result,
            feedback: Self::SUCCESS_FEEDBACK.to_string(),
        }
    }

    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            result: None,
            feedback: format!("Feedback: {reason}"),
        }
    }

    /// True when execution produced nothing usable and the fallback must answer.
    pub fn needs_fallback(&self) -> bool {
        !self.success
            || self
                .result
                .as_deref()
                .is_none_or(|r| r.trim().is_empty() || r.trim() == NOT_FOUND)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuestionLog {
    /// Routine sources in the order they were tried.
    #[serde(rename = "function")]
    pub routines: Vec<String>,
    pub short_answer: String,
    pub long_answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iter_num: u32,
    pub plan: Plan,
    pub reasoning_log: Vec<SubQuestionLog>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub example_id: String,
    pub query: String,
    pub prediction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_data: Option<Vec<IterationRecord>>,
}

impl ResultRecord {
    pub fn success(item: &QueryItem, prediction: String, log_data: Vec<IterationRecord>) -> Self {
        Self {
            example_id: item.example_id.clone(),
            query: item.query.clone(),
            prediction,
            ground_truth: Some(item.ground_truth.clone()),
            log_data: Some(log_data),
        }
    }

    pub fn failure(item: &QueryItem) -> Self {
        Self {
            example_id: item.example_id.clone(),
            query: item.query.clone(),
            prediction: ERROR_PREDICTION.to_string(),
            ground_truth: None,
            log_data: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.prediction == ERROR_PREDICTION
    }
}

// ── Run events ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub at: DateTime<Utc>,
    pub run_id: Uuid,
    pub kind: RunEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RunEvent {
    RunStartedV1 {
        dataset: String,
        split: String,
        model: String,
        already_done: usize,
    },
    ItemStartedV1 {
        example_id: String,
    },
    StateChangedV1 {
        example_id: String,
        from: LoopState,
        to: LoopState,
    },
    PlanGeneratedV1 {
        example_id: String,
        iteration: u32,
        plan: Plan,
    },
    PlanCheckedV1 {
        example_id: String,
        iteration: u32,
        sufficient: bool,
    },
    RoutineFailedV1 {
        example_id: String,
        sub_question: String,
        feedback: String,
    },
    RepairAttemptedV1 {
        example_id: String,
        sub_question: String,
        attempt: u32,
    },
    FallbackUsedV1 {
        example_id: String,
        sub_question: String,
    },
    FinalizedV1 {
        example_id: String,
        facts: usize,
    },
    ItemCompletedV1 {
        example_id: String,
        iterations: u32,
    },
    ItemFailedV1 {
        example_id: String,
        error: String,
    },
    RunFinishedV1 {
        processed: usize,
        failed: usize,
    },
}

impl RunEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStartedV1 { .. } => "run_started",
            Self::ItemStartedV1 { .. } => "item_started",
            Self::StateChangedV1 { .. } => "state_changed",
            Self::PlanGeneratedV1 { .. } => "plan_generated",
            Self::PlanCheckedV1 { .. } => "plan_checked",
            Self::RoutineFailedV1 { .. } => "routine_failed",
            Self::RepairAttemptedV1 { .. } => "repair_attempted",
            Self::FallbackUsedV1 { .. } => "fallback_used",
            Self::FinalizedV1 { .. } => "finalized",
            Self::ItemCompletedV1 { .. } => "item_completed",
            Self::ItemFailedV1 { .. } => "item_failed",
            Self::RunFinishedV1 { .. } => "run_finished",
        }
    }
}

// ── Chat-with-tools types (OpenAI function calling) ────────────────────

/// A message in a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum ChatMessage {
    #[serde(rename = "system")]
    System { content: String },
    #[serde(rename = "user")]
    User { content: String },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON text as returned by the provider.
    pub arguments: String,
}

fn default_finish_reason() -> String {
    "stop".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    #[serde(default = "default_finish_reason")]
    pub finish_reason: String,
    #[serde(default)]
    pub tool_calls: Vec<LlmToolCall>,
}

/// A tool (function) definition sent to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

impl ToolDefinition {
    pub fn function(function: FunctionDefinition) -> Self {
        Self {
            tool_type: "function".to_string(),
            function,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Controls how the model picks tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// "none", "auto", or "required"
    Mode(String),
}

impl ToolChoice {
    pub fn auto() -> Self {
        Self::Mode("auto".to_string())
    }
    pub fn none() -> Self {
        Self::Mode("none".to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

// ── Configuration ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub run: RunConfig,
    pub eval: EvalConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())?;
        Some(Path::new(&home).join(".tabula/settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    pub fn legacy_toml_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("config.toml")
    }

    /// Defaults, then legacy TOML, then user, project and project-local JSON.
    pub fn load(workspace: &Path) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        let legacy = Self::legacy_toml_path(workspace);
        if legacy.exists() {
            let raw = fs::read_to_string(legacy)?;
            let legacy_cfg: AppConfig = toml::from_str(&raw)?;
            merge_json_value(&mut merged, &serde_json::to_value(legacy_cfg)?);
        }

        let mut paths = Vec::new();
        if let Some(user) = Self::user_settings_path() {
            paths.push(user);
        }
        paths.push(Self::project_settings_path(workspace));
        paths.push(Self::project_local_settings_path(workspace));

        for path in paths {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            merge_json_value(&mut merged, &value);
        }

        Ok(serde_json::from_value(merged)?)
    }
}

fn merge_json_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

/// Which chat-completions deployment the gateway talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    /// Azure when both Azure variables are set, otherwise OpenAI.
    #[default]
    Auto,
    OpenAi,
    Azure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub azure_endpoint_env: String,
    pub azure_api_key_env: String,
    pub azure_api_version: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout_seconds: u64,
    pub max_retries: u8,
    pub retry_base_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Auto,
            model: "gpt-35-turbo".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            azure_endpoint_env: "AZURE_OPENAI_ENDPOINT".to_string(),
            azure_api_key_env: "AZURE_OPENAI_API_KEY".to_string(),
            azure_api_version: "2024-06-01".to_string(),
            temperature: 0.7,
            max_tokens: None,
            timeout_seconds: 60,
            max_retries: 3,
            retry_base_ms: 400,
        }
    }
}

/// Which sub-answers feed the final synthesis step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalAnswerScope {
    /// Every sub-answer from every iteration, in production order.
    #[default]
    Cumulative,
    /// Only the sub-answers of the iteration that ended the loop.
    LastIteration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_iterations: u32,
    pub max_repairs: u32,
    pub final_answer_scope: FinalAnswerScope,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_repairs: DEFAULT_MAX_REPAIRS,
            final_answer_scope: FinalAnswerScope::Cumulative,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub output_dir: String,
    pub n_samples: i64,
    pub dataset_name: String,
    pub split_name: String,
    pub hub_endpoint: String,
    pub hub_page_size: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir: "outputs".to_string(),
            n_samples: 10,
            dataset_name: "yale-nlp/QTSumm".to_string(),
            split_name: "test".to_string(),
            hub_endpoint: "https://datasets-server.huggingface.co/rows".to_string(),
            hub_page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub embedding_model: Option<String>,
    pub embedding_endpoint: String,
    pub tapas_command: Option<String>,
    pub autoacu_command: Option<String>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            embedding_model: None,
            embedding_endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            tapas_command: None,
            autoacu_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Write run events to `.tabula/observe.log`.
    pub event_log: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { event_log: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn loop_state_strategy() -> impl Strategy<Value = LoopState> {
        prop_oneof![
            Just(LoopState::Planning),
            Just(LoopState::Answering),
            Just(LoopState::Checking),
            Just(LoopState::Replan),
            Just(LoopState::Finalizing),
            Just(LoopState::Done),
            Just(LoopState::Error),
        ]
    }

    proptest! {
        #[test]
        fn plan_never_keeps_blank_entries(
            entries in prop::collection::vec("[ a-z?]{0,12}", 0..8)
        ) {
            match Plan::new(&entries) {
                Some(plan) => {
                    prop_assert!(!plan.is_empty());
                    prop_assert!(plan.questions().iter().all(|q| !q.trim().is_empty()));
                }
                None => prop_assert!(entries.iter().all(|e| e.trim().is_empty())),
            }
        }

        #[test]
        fn merge_json_value_is_idempotent_for_flat_objects(
            base in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12),
            overlay in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12),
        ) {
            let mut base_value = json!(base);
            let overlay_value = json!(overlay);
            merge_json_value(&mut base_value, &overlay_value);
            let once = base_value.clone();
            merge_json_value(&mut base_value, &overlay_value);
            prop_assert_eq!(base_value, once);
        }

        #[test]
        fn terminal_states_have_no_exits(to in loop_state_strategy()) {
            prop_assert!(!is_valid_loop_transition(LoopState::Done, to));
            prop_assert!(!is_valid_loop_transition(LoopState::Error, to));
        }
    }

    #[test]
    fn chat_messages_carry_only_system_and_user_roles() {
        let wire = serde_json::to_value(vec![ChatMessage::system("rules"), ChatMessage::user("q")])
            .expect("serialize");
        assert_eq!(
            wire,
            json!([
                {"role": "system", "content": "rules"},
                {"role": "user", "content": "q"}
            ])
        );
        assert!(
            serde_json::from_value::<ChatMessage>(json!({"role": "assistant", "content": "a"}))
                .is_err()
        );
    }

    #[test]
    fn loop_transitions_follow_plan_answer_check_cycle() {
        assert!(is_valid_loop_transition(LoopState::Planning, LoopState::Answering));
        assert!(is_valid_loop_transition(LoopState::Checking, LoopState::Replan));
        assert!(is_valid_loop_transition(LoopState::Replan, LoopState::Planning));
        assert!(is_valid_loop_transition(LoopState::Checking, LoopState::Finalizing));
        assert!(is_valid_loop_transition(LoopState::Answering, LoopState::Error));
        assert!(!is_valid_loop_transition(LoopState::Planning, LoopState::Finalizing));
        assert!(!is_valid_loop_transition(LoopState::Answering, LoopState::Done));
    }

    #[test]
    fn plan_rejects_empty_on_deserialize() {
        let err = serde_json::from_str::<Plan>("[\"  \", \"\"]");
        assert!(err.is_err());
        let plan: Plan = serde_json::from_str("[\" Who won? \"]").expect("plan");
        assert_eq!(plan.questions(), &["Who won?".to_string()]);
    }

    #[test]
    fn dataset_kind_accepts_hub_paths() {
        assert_eq!(DatasetKind::from_name("yale-nlp/QTSumm"), Some(DatasetKind::QTSumm));
        assert_eq!(DatasetKind::from_name("DongfuJiang/FeTaQA"), Some(DatasetKind::FeTaQA));
        assert_eq!(DatasetKind::from_name("fetaqa"), Some(DatasetKind::FeTaQA));
        assert_eq!(DatasetKind::from_name("wikitq"), None);
    }

    #[test]
    fn error_record_omits_ground_truth_and_log() {
        let item = QueryItem {
            example_id: "7".to_string(),
            query: "q".to_string(),
            ground_truth: "gt".to_string(),
            table: Table::default(),
        };
        let value = serde_json::to_value(ResultRecord::failure(&item)).expect("serialize");
        assert_eq!(value, json!({"example_id": "7", "query": "q", "prediction": "error"}));
    }

    #[test]
    fn sub_question_log_serializes_routines_as_function() {
        let log = SubQuestionLog {
            routines: vec!["routine f(table) { return rows }".to_string()],
            short_answer: "a".to_string(),
            long_answer: "b".to_string(),
        };
        let value = serde_json::to_value(&log).expect("serialize");
        assert!(value.get("function").is_some_and(|v| v.is_array()));
    }

    #[test]
    fn execution_outcome_fallback_rules() {
        assert!(ExecutionOutcome::failed("boom").needs_fallback());
        assert!(ExecutionOutcome::succeeded(None).needs_fallback());
        assert!(ExecutionOutcome::succeeded(Some("None".to_string())).needs_fallback());
        assert!(!ExecutionOutcome::succeeded(Some("{\"a\":\"b\"}".to_string())).needs_fallback());
        assert_eq!(ExecutionOutcome::failed("boom").feedback, "Feedback: boom");
    }

    #[test]
    fn column_lookup_falls_back_to_case_insensitive() {
        let table = Table::new(
            "t",
            vec!["No.".to_string(), " Driver ".to_string()],
            vec![vec!["23".to_string()]],
        );
        assert_eq!(table.column_index("No."), Some(0));
        assert_eq!(table.column_index("driver"), Some(1));
        assert_eq!(table.column_index("Team"), None);
        assert_eq!(table.cell(0, 1), "");
    }

    #[test]
    fn config_sections_default_when_missing() {
        let cfg: AppConfig =
            serde_json::from_value(json!({"llm": {"model": "gpt-4o-mini"}})).expect("config");
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.llm.timeout_seconds, 60);
        assert_eq!(cfg.pipeline.max_iterations, 3);
        assert_eq!(cfg.pipeline.final_answer_scope, FinalAnswerScope::Cumulative);
    }
}
