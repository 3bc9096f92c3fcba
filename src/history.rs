//! Per-session conversation history with JSONL persistence.
//!
//! Each session is one append-only `.jsonl` file, one turn per line. A
//! bounded window of recent turns is folded into the analyzer prompt so
//! follow-up questions can lean on earlier answers.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Longest answer excerpt carried into prompt context.
const ANSWER_EXCERPT_LEN: usize = 240;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: u64,
    pub asked_at: DateTime<Utc>,
    pub utterance: String,
    pub status: TurnStatus,
    /// The prose answer, present only for succeeded turns.
    pub narrative: Option<String>,
}

/// One session's turns, in order. When `path` is set every recorded turn is
/// also appended to the JSONL file.
#[derive(Debug)]
pub struct SessionContext {
    pub session_id: String,
    turns: Vec<ConversationTurn>,
    path: Option<PathBuf>,
}

impl SessionContext {
    pub fn in_memory(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            turns: Vec::new(),
            path: None,
        }
    }

    /// Open (or create) the persisted session under `dir`, replaying any
    /// existing turns.
    pub fn open(dir: &Path, session_id: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create history dir {}", dir.display()))?;
        let path = dir.join(format!("{}.jsonl", session_id));
        let mut turns = Vec::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Cannot read session file {}", path.display()))?;
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                // A corrupt line loses that turn, not the session.
                if let Ok(turn) = serde_json::from_str::<ConversationTurn>(line) {
                    turns.push(turn);
                }
            }
        }
        Ok(Self {
            session_id: session_id.to_string(),
            turns,
            path: Some(path),
        })
    }

    pub fn next_turn_id(&self) -> u64 {
        self.turns.last().map(|t| t.id + 1).unwrap_or(1)
    }

    /// Append a finished turn, persisting it when the session is on disk.
    pub fn record(&mut self, turn: ConversationTurn) -> Result<()> {
        if let Some(path) = &self.path {
            let line = serde_json::to_string(&turn)?;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot append to session file {}", path.display()))?;
            writeln!(file, "{}", line)?;
        }
        self.turns.push(turn);
        Ok(())
    }

    /// Drop every recorded turn, truncating the on-disk file too. The
    /// session itself stays usable; the next turn starts at id 1.
    pub fn clear(&mut self) -> Result<()> {
        if let Some(path) = &self.path {
            if path.exists() {
                std::fs::write(path, "")
                    .with_context(|| format!("Cannot truncate session file {}", path.display()))?;
            }
        }
        self.turns.clear();
        Ok(())
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn recent(&self, n: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// The last `n` turns rendered as Q/A context for the analyzer prompt,
    /// answers cut to an excerpt. Empty string when there is no history, so
    /// it can be spliced into the prompt unconditionally.
    pub fn prompt_context(&self, n: usize) -> String {
        let recent = self.recent(n);
        if recent.is_empty() {
            return String::new();
        }
        let mut out = String::from("Earlier in this conversation:\n");
        for turn in recent {
            out.push_str(&format!("Q: {}\n", turn.utterance));
            match (&turn.status, &turn.narrative) {
                (TurnStatus::Succeeded, Some(answer)) => {
                    out.push_str(&format!("A: {}\n", excerpt(answer, ANSWER_EXCERPT_LEN)));
                }
                _ => out.push_str("A: (no answer was produced)\n"),
            }
        }
        out.push('\n');
        out
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

/// Shared registry of live sessions. Each session sits behind its own async
/// mutex, so turns within a session are strictly serialized while separate
/// sessions proceed concurrently.
pub struct SessionStore {
    dir: Option<PathBuf>,
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionContext>>>>,
}

impl SessionStore {
    /// `dir = None` keeps all sessions in memory only.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch or lazily create the session, loading persisted turns on first
    /// touch.
    pub async fn session(&self, session_id: &str) -> Result<Arc<Mutex<SessionContext>>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(session_id) {
            return Ok(Arc::clone(session));
        }
        let context = match &self.dir {
            Some(dir) => SessionContext::open(dir, session_id)?,
            None => SessionContext::in_memory(session_id),
        };
        let session = Arc::new(Mutex::new(context));
        sessions.insert(session_id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    /// Reset one session's history, in memory and on disk.
    pub async fn clear(&self, session_id: &str) -> Result<()> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;
        session.clear()
    }
}

/// Accept only identifiers that are safe to use as a file name stem.
pub fn valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
