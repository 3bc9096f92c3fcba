//! The turn state machine: analyze, synthesize, validate, execute, summarize.
//!
//! Regeneration happens only between synthesis and validation: a rejected
//! candidate is thrown away and a new one is requested with the rejection
//! reason fed back, up to the attempt budget. Execution failures are final
//! for the turn. A failed summary degrades the answer to a rendered table
//! instead of failing the turn.

use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::QueryLimits;
use crate::db::{SchemaDescriptor, Store};
use crate::error::PipelineError;
use crate::history::{ConversationTurn, SessionContext, TurnStatus};
use crate::insight::{self, InsightGenerator};
use crate::intent::IntentAnalyzer;
use crate::oracle::CompletionClient;
use crate::synthesizer::SqlSynthesizer;
use crate::validator::{QueryValidator, Verdict};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TurnPhase {
    Received,
    Analyzing,
    Synthesizing,
    Validating,
    RegenerationRequested,
    Executing,
    Summarizing,
    Completed,
    Failed,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnPhase::Received => "received",
            TurnPhase::Analyzing => "analyzing",
            TurnPhase::Synthesizing => "synthesizing",
            TurnPhase::Validating => "validating",
            TurnPhase::RegenerationRequested => "regeneration_requested",
            TurnPhase::Executing => "executing",
            TurnPhase::Summarizing => "summarizing",
            TurnPhase::Completed => "completed",
            TurnPhase::Failed => "failed",
        }
    }
}

/// What a completed turn hands back to the caller.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub narrative: String,
    /// True when the narrative is the rendered table fallback rather than a
    /// generated summary.
    pub degraded: bool,
    pub sql: String,
    pub row_count: usize,
}

pub struct PipelineController {
    analyzer: IntentAnalyzer,
    synthesizer: SqlSynthesizer,
    validator: QueryValidator,
    insight: InsightGenerator,
    store: Store,
    schema_text: String,
    business_rules: String,
    limits: QueryLimits,
}

impl PipelineController {
    pub fn new(
        oracle: Arc<dyn CompletionClient>,
        store: Store,
        schema: Arc<SchemaDescriptor>,
        business_rules: String,
        limits: QueryLimits,
    ) -> Self {
        let schema_text = schema.prompt_text();
        Self {
            analyzer: IntentAnalyzer::new(Arc::clone(&oracle)),
            synthesizer: SqlSynthesizer::new(Arc::clone(&oracle)),
            validator: QueryValidator::new(
                Arc::clone(&schema),
                limits.max_statement_len,
                limits.default_row_limit,
            ),
            insight: InsightGenerator::new(oracle),
            store,
            schema_text,
            business_rules,
            limits,
        }
    }

    /// Run one turn to completion and record it in the session.
    pub async fn process(
        &self,
        session: &mut SessionContext,
        utterance: &str,
    ) -> Result<TurnOutcome, PipelineError> {
        let history_context = session.prompt_context(self.limits.history_window);
        let outcome = self.run_turn(&history_context, utterance).await;
        self.finish(session, utterance, &outcome);
        outcome
    }

    /// Like [`process`], but the turn aborts if `cancel` fires first. A
    /// cancelled turn is recorded as failed; whatever oracle call was in
    /// flight is dropped with it.
    pub async fn process_cancellable(
        &self,
        session: &mut SessionContext,
        utterance: &str,
        mut cancel: oneshot::Receiver<()>,
    ) -> Result<TurnOutcome, PipelineError> {
        let history_context = session.prompt_context(self.limits.history_window);
        let outcome = tokio::select! {
            outcome = self.run_turn(&history_context, utterance) => outcome,
            _ = &mut cancel => Err(PipelineError::Cancelled),
        };
        self.finish(session, utterance, &outcome);
        outcome
    }

    async fn run_turn(
        &self,
        history_context: &str,
        utterance: &str,
    ) -> Result<TurnOutcome, PipelineError> {
        debug!(phase = TurnPhase::Received.as_str(), "turn started");
        let question = utterance.trim();
        if question.is_empty() {
            return Err(PipelineError::MalformedRequest("the question is empty".into()));
        }

        debug!(phase = TurnPhase::Analyzing.as_str(), "analyzing question");
        let intent = self
            .analyzer
            .analyze(question, &self.schema_text, &self.business_rules, history_context)
            .await?;

        let mut rejection: Option<String> = None;
        let mut accepted: Option<String> = None;
        for attempt in 1..=self.limits.max_attempts {
            debug!(
                phase = TurnPhase::Synthesizing.as_str(),
                attempt, "generating candidate"
            );
            let candidate = self
                .synthesizer
                .synthesize(
                    question,
                    &intent,
                    &self.schema_text,
                    &self.business_rules,
                    rejection.as_deref(),
                )
                .await?;

            debug!(phase = TurnPhase::Validating.as_str(), attempt, "checking candidate");
            match self.validator.check(&candidate) {
                Verdict::Accepted { sql } => {
                    accepted = Some(sql);
                    break;
                }
                Verdict::Rejected { reason } => {
                    debug!(
                        phase = TurnPhase::RegenerationRequested.as_str(),
                        attempt,
                        reason = reason.code(),
                        "candidate rejected"
                    );
                    rejection = Some(reason.to_string());
                }
            }
        }
        let sql = accepted.ok_or_else(|| {
            PipelineError::UnsafeOrInvalidQuery(format!(
                "no safe query after {} attempts; last rejection: {}",
                self.limits.max_attempts,
                rejection.unwrap_or_else(|| "none".into())
            ))
        })?;

        debug!(phase = TurnPhase::Executing.as_str(), "running query");
        let result = self
            .store
            .execute(&sql)
            .await
            .map_err(|e| PipelineError::ExecutionError(e.to_string()))?;

        debug!(
            phase = TurnPhase::Summarizing.as_str(),
            rows = result.row_count,
            "summarizing result"
        );
        let (narrative, degraded) = match self.insight.generate(question, &intent, &result).await {
            Ok(narrative) => (narrative, false),
            Err(e) => {
                warn!(error = %e, "summary failed, answering with the raw table");
                (insight::render_table(&result), true)
            }
        };

        debug!(phase = TurnPhase::Completed.as_str(), "turn finished");
        Ok(TurnOutcome {
            narrative,
            degraded,
            sql,
            row_count: result.row_count,
        })
    }

    /// Record the turn in the session whatever its outcome. Persistence
    /// problems are logged, not surfaced; the answer is already final.
    fn finish(
        &self,
        session: &mut SessionContext,
        utterance: &str,
        outcome: &Result<TurnOutcome, PipelineError>,
    ) {
        let (status, narrative) = match outcome {
            Ok(outcome) => (TurnStatus::Succeeded, Some(outcome.narrative.clone())),
            Err(e) => {
                debug!(phase = TurnPhase::Failed.as_str(), kind = e.kind(), "turn failed");
                (TurnStatus::Failed, None)
            }
        };
        let turn = ConversationTurn {
            id: session.next_turn_id(),
            asked_at: chrono::Utc::now(),
            utterance: utterance.trim().to_string(),
            status,
            narrative,
        };
        if let Err(e) = session.record(turn) {
            warn!(error = %e, session = %session.session_id, "failed to persist turn");
        }
    }
}
