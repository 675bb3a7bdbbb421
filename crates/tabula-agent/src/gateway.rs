use tabula_core::{ChatMessage, ChatRequest, LlmConfig, LlmToolCall, ToolChoice, ToolDefinition};
use tabula_llm::LlmClient;

/// Text-completion capability handed to every stage of the loop.
///
/// Transport failures are logged and surface as `None`; callers decide
/// whether a miss is recoverable.
pub struct Gateway<'a> {
    llm: &'a dyn LlmClient,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl<'a> Gateway<'a> {
    pub fn new(llm: &'a dyn LlmClient, model: impl Into<String>, cfg: &LlmConfig) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature: Some(cfg.temperature),
            max_tokens: cfg.max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn complete(&self, messages: Vec<ChatMessage>) -> Option<String> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages,
            tools: Vec::new(),
            tool_choice: ToolChoice::none(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        match self.llm.complete_chat(&req) {
            Ok(resp) if !resp.text.trim().is_empty() => Some(resp.text),
            Ok(_) => {
                tracing::warn!(model = %self.model, "completion returned no text");
                None
            }
            Err(err) => {
                tracing::warn!(model = %self.model, error = %err, "completion failed");
                None
            }
        }
    }

    /// Offers `candidates` with `tool_choice = auto` and returns the first
    /// selected call.
    pub fn complete_with_function(
        &self,
        messages: Vec<ChatMessage>,
        candidates: Vec<ToolDefinition>,
    ) -> Option<LlmToolCall> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages,
            tools: candidates,
            tool_choice: ToolChoice::auto(),
            max_tokens: self.max_tokens,
            temperature: None,
        };
        match self.llm.complete_chat(&req) {
            Ok(resp) => {
                let call = resp.tool_calls.into_iter().next();
                if call.is_none() {
                    tracing::warn!(model = %self.model, "function selection returned no tool call");
                }
                call
            }
            Err(err) => {
                tracing::warn!(model = %self.model, error = %err, "function selection failed");
                None
            }
        }
    }
}
