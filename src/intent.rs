//! Intent analysis: one oracle call turning the raw question into a typed
//! description of what the user wants.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::PipelineError;
use crate::oracle::{CompletionClient, OracleError};
use crate::prompts;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    Statistical,
    Lookup,
    Trend,
    General,
}

/// The analyzer's output: schema-agnostic, not SQL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredIntent {
    pub kind: IntentKind,
    pub intent: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub aggregation: Option<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
}

pub struct IntentAnalyzer {
    oracle: Arc<dyn CompletionClient>,
}

impl IntentAnalyzer {
    pub fn new(oracle: Arc<dyn CompletionClient>) -> Self {
        Self { oracle }
    }

    /// One oracle call. A completion that does not parse into a
    /// [`StructuredIntent`], or that resolves to an empty intent, is a hard
    /// `IntentUnresolved` failure; it is never coerced into a guess.
    pub async fn analyze(
        &self,
        question: &str,
        schema_text: &str,
        business_rules: &str,
        history_context: &str,
    ) -> Result<StructuredIntent, PipelineError> {
        let system = prompts::render(
            prompts::INTENT_SYSTEM,
            &[("schema", schema_text), ("business_rules", business_rules)],
        );
        let user = prompts::render(
            prompts::INTENT_USER,
            &[("history", history_context), ("question", question)],
        );

        let completion = self
            .oracle
            .complete(&system, &user)
            .await
            .map_err(classify_oracle_error)?;

        let json = extract_json(&completion).ok_or_else(|| {
            PipelineError::IntentUnresolved("the analysis contained no JSON object".into())
        })?;
        let intent: StructuredIntent = serde_json::from_str(&json).map_err(|e| {
            PipelineError::IntentUnresolved(format!("the analysis did not parse: {}", e))
        })?;

        if intent.intent.trim().is_empty() {
            return Err(PipelineError::IntentUnresolved(
                "the analysis resolved to an empty intent".into(),
            ));
        }
        Ok(intent)
    }
}

pub(crate) fn classify_oracle_error(err: OracleError) -> PipelineError {
    PipelineError::UpstreamUnavailable(err.to_string())
}

/// Pull the first JSON object out of a completion, tolerating markdown code
/// fences and prose around it.
pub(crate) fn extract_json(completion: &str) -> Option<String> {
    let body = strip_code_fence(completion);
    let start = body.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in body[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(body[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Strip a leading ```/```json fence if present.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.strip_prefix("sql").unwrap_or(rest);
        let rest = rest.trim_start_matches(['\r', '\n']);
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
        return rest.trim();
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_bare() {
        let json = extract_json(r#"{"kind": "statistical", "intent": "sum"}"#).unwrap();
        assert!(json.starts_with('{'));
        assert!(json.ends_with('}'));
    }

    #[test]
    fn test_extract_json_fenced() {
        let completion = "```json\n{\"kind\": \"lookup\", \"intent\": \"x\"}\n```";
        let json = extract_json(completion).unwrap();
        assert_eq!(json, "{\"kind\": \"lookup\", \"intent\": \"x\"}");
    }

    #[test]
    fn test_extract_json_with_surrounding_prose() {
        let completion = "Here is the analysis:\n{\"intent\": \"count rows\"}\nHope that helps.";
        assert_eq!(extract_json(completion).unwrap(), "{\"intent\": \"count rows\"}");
    }

    #[test]
    fn test_extract_json_nested_and_braces_in_strings() {
        let completion = r#"{"intent": "find {weird} things", "inner": {"a": 1}}"#;
        let json = extract_json(completion).unwrap();
        assert_eq!(json, completion);
    }

    #[test]
    fn test_extract_json_none_when_absent() {
        assert!(extract_json("I cannot answer that.").is_none());
    }

    #[test]
    fn test_intent_parses_with_defaults() {
        let intent: StructuredIntent =
            serde_json::from_str(r#"{"kind": "statistical", "intent": "total sales"}"#).unwrap();
        assert_eq!(intent.kind, IntentKind::Statistical);
        assert!(intent.columns.is_empty());
        assert!(intent.aggregation.is_none());
    }

    #[test]
    fn test_intent_full_shape() {
        let intent: StructuredIntent = serde_json::from_str(
            r#"{
                "kind": "statistical",
                "intent": "total sales last month",
                "columns": ["amount", "date"],
                "aggregation": "SUM(amount)",
                "group_by": [],
                "filters": ["date in previous month"]
            }"#,
        )
        .unwrap();
        assert_eq!(intent.aggregation.as_deref(), Some("SUM(amount)"));
        assert_eq!(intent.filters.len(), 1);
    }

    #[test]
    fn test_strip_code_fence_variants() {
        assert_eq!(strip_code_fence("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fence("plain"), "plain");
        assert_eq!(strip_code_fence("```\nabc\n```"), "abc");
    }
}
