use crate::gateway::Gateway;
use crate::prompts;
use tabula_core::Table;

/// Asks for a routine answering `sub_question` and extracts its source.
///
/// A gateway miss yields an empty source, which fails to parse and enters
/// the repair loop like any other unusable reply.
pub fn synthesize(gateway: &Gateway<'_>, sub_question: &str, table: &Table) -> String {
    let reply = gateway
        .complete(prompts::routine_generation(sub_question, table))
        .unwrap_or_default();
    prompts::extract_routine_source(&reply)
}

pub fn repair(
    gateway: &Gateway<'_>,
    sub_question: &str,
    table: &Table,
    routine_source: &str,
    feedback: &str,
) -> String {
    let reply = gateway
        .complete(prompts::routine_repair(
            sub_question,
            table,
            routine_source,
            feedback,
        ))
        .unwrap_or_default();
    prompts::extract_routine_source(&reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::LlmConfig;
    use tabula_testkit::{NASCAR_WINNER_ROUTINE, ScriptedLlm, fail, fenced_routine, nascar_table};

    #[test]
    fn synthesized_source_is_unfenced() {
        let llm = ScriptedLlm::new(vec![fenced_routine(NASCAR_WINNER_ROUTINE)]);
        let gateway = Gateway::new(&llm, "m", &LlmConfig::default());
        let source = synthesize(&gateway, "Who won?", &nascar_table());
        assert_eq!(source, NASCAR_WINNER_ROUTINE);
        assert!(llm.prompts()[0].contains("**Question:** '''Who won?'''"));
    }

    #[test]
    fn repair_prompt_carries_feedback_and_miss_is_empty() {
        let llm = ScriptedLlm::new(vec![fail("timeout")]);
        let gateway = Gateway::new(&llm, "m", &LlmConfig::default());
        let source = repair(
            &gateway,
            "Who won?",
            &nascar_table(),
            "routine broken(table) {",
            "Feedback: parse error at 1:25",
        );
        assert_eq!(source, "");
        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("routine broken(table) {"));
        assert!(prompt.contains("Feedback: parse error at 1:25"));
    }
}
