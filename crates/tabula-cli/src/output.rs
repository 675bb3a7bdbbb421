use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use tabula_core::AppConfig;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub(crate) fn redact_config_for_display(cfg: &AppConfig) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(cfg)?;
    if let Some(llm) = value.get_mut("llm").and_then(|entry| entry.as_object_mut())
        && llm.get("api_key").is_some_and(|key| !key.is_null())
    {
        llm.insert("api_key".to_string(), json!("***REDACTED***"));
    }
    Ok(value)
}

/// `12.3456`, or `n/a (<reason>)` for a metric that could not be computed.
pub(crate) fn format_score(score: Option<f64>, unavailable: Option<&str>) -> String {
    match (score, unavailable) {
        (Some(score), _) => format!("{score:.4}"),
        (None, Some(reason)) => format!("n/a ({reason})"),
        (None, None) => "n/a".to_string(),
    }
}
