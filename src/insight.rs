//! Insight generation: one oracle call turning a result set into a short
//! prose answer, plus the aligned-table fallback used when that call fails.

use std::sync::Arc;

use crate::db::QueryResult;
use crate::error::PipelineError;
use crate::intent::{classify_oracle_error, StructuredIntent};
use crate::oracle::CompletionClient;
use crate::prompts;

/// Rows shown to the oracle; enough to summarize, small enough to stay well
/// inside the prompt budget.
const SAMPLE_ROWS: usize = 10;

pub struct InsightGenerator {
    oracle: Arc<dyn CompletionClient>,
}

impl InsightGenerator {
    pub fn new(oracle: Arc<dyn CompletionClient>) -> Self {
        Self { oracle }
    }

    /// One oracle call over a bounded sample of the result set.
    pub async fn generate(
        &self,
        question: &str,
        intent: &StructuredIntent,
        result: &QueryResult,
    ) -> Result<String, PipelineError> {
        let intent_json = serde_json::to_string_pretty(intent)
            .map_err(|e| PipelineError::UpstreamUnavailable(e.to_string()))?;
        let data = data_summary(result);
        let system = prompts::render(
            prompts::INSIGHT_SYSTEM,
            &[
                ("question", question),
                ("intent", &intent_json),
                ("data", &data),
            ],
        );
        let user = prompts::render(prompts::INSIGHT_USER, &[("question", question)]);

        let narrative = self
            .oracle
            .complete(&system, &user)
            .await
            .map_err(classify_oracle_error)?;

        let narrative = narrative.trim();
        if narrative.is_empty() {
            return Err(PipelineError::UpstreamUnavailable(
                "the summary came back empty".into(),
            ));
        }
        Ok(narrative.to_string())
    }
}

/// Compact JSON picture of the result set for the prompt: shape first, then
/// a row sample.
fn data_summary(result: &QueryResult) -> String {
    let summary = serde_json::json!({
        "columns": result.columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
        "row_count": result.row_count,
        "truncated": result.truncated,
        "sample_rows": result.rows_as_json(SAMPLE_ROWS),
    });
    serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "{}".to_string())
}

/// Degraded-mode answer: the result set rendered as an aligned text table.
/// Used when insight generation fails but the data itself is good.
pub fn render_table(result: &QueryResult) -> String {
    if result.is_empty() {
        return "The query ran successfully and returned no rows.".to_string();
    }

    let widths: Vec<usize> = result.columns.iter().map(|c| c.max_width).collect();
    let mut out = String::new();

    let header: Vec<String> = result
        .columns
        .iter()
        .zip(&widths)
        .map(|(col, width)| pad(&col.name, *width))
        .collect();
    out.push_str(&header.join("  "));
    out.push('\n');

    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&rule.join("  "));
    out.push('\n');

    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| pad(&cell.display(), *width))
            .collect();
        out.push_str(cells.join("  ").trim_end());
        out.push('\n');
    }

    if result.truncated {
        out.push_str(&format!(
            "({} rows shown; the result was cut at the row cap)\n",
            result.row_count
        ));
    } else {
        out.push_str(&format!("({} rows)\n", result.row_count));
    }
    out
}

fn pad(text: &str, width: usize) -> String {
    let current = unicode_width::UnicodeWidthStr::width(text);
    let mut out = text.to_string();
    for _ in current..width {
        out.push(' ');
    }
    out
}
