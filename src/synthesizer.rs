//! SQL synthesis: one oracle call per attempt turning the structured intent
//! into a candidate statement. Candidates are regenerated, never patched; on
//! a retry the previous rejection reason is fed back so the next attempt can
//! actually converge.

use std::sync::Arc;

use crate::error::PipelineError;
use crate::intent::{classify_oracle_error, strip_code_fence, StructuredIntent};
use crate::oracle::CompletionClient;
use crate::prompts;

pub struct SqlSynthesizer {
    oracle: Arc<dyn CompletionClient>,
}

impl SqlSynthesizer {
    pub fn new(oracle: Arc<dyn CompletionClient>) -> Self {
        Self { oracle }
    }

    /// One oracle call. A completion with no recognizable SQL statement is a
    /// hard failure of this stage, not something to coerce or retry locally.
    pub async fn synthesize(
        &self,
        question: &str,
        intent: &StructuredIntent,
        schema_text: &str,
        business_rules: &str,
        rejection: Option<&str>,
    ) -> Result<String, PipelineError> {
        let intent_json = serde_json::to_string_pretty(intent)
            .map_err(|e| PipelineError::UnsafeOrInvalidQuery(e.to_string()))?;
        let system = prompts::render(
            prompts::SQL_SYSTEM,
            &[
                ("schema", schema_text),
                ("business_rules", business_rules),
                ("intent", &intent_json),
            ],
        );
        let feedback = match rejection {
            Some(reason) => prompts::render(prompts::SQL_RETRY_FEEDBACK, &[("reason", reason)]),
            None => String::new(),
        };
        let user = prompts::render(
            prompts::SQL_USER,
            &[("question", question), ("feedback", &feedback)],
        );

        let completion = self
            .oracle
            .complete(&system, &user)
            .await
            .map_err(classify_oracle_error)?;

        extract_sql(&completion).ok_or_else(|| {
            PipelineError::UnsafeOrInvalidQuery(
                "the generated response contained no SQL statement".into(),
            )
        })
    }
}

/// Pull the SQL out of a completion: a ```sql fence wins, otherwise the text
/// from the first SELECT/WITH keyword onward.
pub(crate) fn extract_sql(completion: &str) -> Option<String> {
    if let Some(fenced) = extract_fenced_sql(completion) {
        return Some(fenced);
    }

    let upper = completion.to_uppercase();
    let start = ["SELECT", "WITH"]
        .iter()
        .filter_map(|kw| find_word(&upper, kw))
        .min()?;
    let candidate = completion[start..].trim();
    // Cut at a closing fence or blank-line explanation if the model kept talking.
    let end = candidate.find("```").unwrap_or(candidate.len());
    let candidate = candidate[..end].trim().trim_end_matches(';').trim();
    if candidate.is_empty() {
        None
    } else {
        Some(candidate.to_string())
    }
}

fn extract_fenced_sql(completion: &str) -> Option<String> {
    let fence = completion.find("```")?;
    let after = &completion[fence..];
    let stripped = strip_code_fence(after);
    let stripped = stripped.trim().trim_end_matches(';').trim();
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

/// Find `word` at a word boundary in `haystack` (both uppercase).
fn find_word(haystack: &str, word: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(word) {
        let at = from + pos;
        let before_ok = at == 0 || !is_ident_byte(bytes[at - 1]);
        let end = at + word.len();
        let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
        if before_ok && after_ok {
            return Some(at);
        }
        from = at + word.len();
    }
    None
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
