//! Per-sequence conversational state
//!
//! Owned exclusively by one sequence worker for the lifetime of one
//! (model, sequence, run). Append-only: turns are never rewritten or
//! silently truncated. Size checks report, callers decide.

use shared::{ChatTurn, TurnRole};

/// Rough chars-per-token heuristic for English prose
const CHARS_PER_TOKEN: usize = 4;

/// One accumulated (prompt, response) pair
#[derive(Debug, Clone)]
pub struct ContextTurn {
    pub prompt: String,
    pub response: String,
}

/// Result of a pre-call size check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextValidation {
    Ok { estimated_tokens: u32 },
    OverLimit { estimated_tokens: u32, max_tokens: u32 },
}

/// Ordered, append-only conversation history for one sequence
#[derive(Debug, Default)]
pub struct SequenceContext {
    turns: Vec<ContextTurn>,
    cumulative_chars: usize,
}

impl SequenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one completed turn.
    ///
    /// Logs a content fingerprint rather than the text itself, so runs are
    /// auditable without prompt content landing in logs.
    pub fn append(&mut self, prompt: &str, response: &str) {
        self.cumulative_chars += prompt.len() + response.len();
        self.turns.push(ContextTurn {
            prompt: prompt.to_string(),
            response: response.to_string(),
        });
        tracing::debug!(
            turn = self.turns.len(),
            fingerprint = %self.fingerprint(),
            chars = self.cumulative_chars,
            "context appended"
        );
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn turns(&self) -> &[ContextTurn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Stable hash of the accumulated text, for traceability
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for turn in &self.turns {
            hasher.update(turn.prompt.as_bytes());
            hasher.update(b"\x1f");
            hasher.update(turn.response.as_bytes());
            hasher.update(b"\x1e");
        }
        hasher.finalize().to_hex()[..16].to_string()
    }

    pub fn estimated_tokens(&self) -> u32 {
        (self.cumulative_chars / CHARS_PER_TOKEN) as u32
    }

    /// Render exactly what the provider must see for the next prompt:
    /// all prior turns in order, then the next prompt as the final user turn
    pub fn render_for_next_call(&self, next_prompt: &str) -> Vec<ChatTurn> {
        let mut history = Vec::with_capacity(self.turns.len() * 2 + 1);
        for turn in &self.turns {
            history.push(ChatTurn {
                role: TurnRole::User,
                content: turn.prompt.clone(),
            });
            history.push(ChatTurn {
                role: TurnRole::Assistant,
                content: turn.response.clone(),
            });
        }
        history.push(ChatTurn {
            role: TurnRole::User,
            content: next_prompt.to_string(),
        });
        history
    }

    /// Size check against a model's declared ceiling, including the next
    /// prompt. Never truncates; the caller decides whether to abort.
    pub fn validate(&self, next_prompt: &str, max_tokens: u32) -> ContextValidation {
        let estimated_tokens =
            ((self.cumulative_chars + next_prompt.len()) / CHARS_PER_TOKEN) as u32;
        if estimated_tokens > max_tokens {
            ContextValidation::OverLimit {
                estimated_tokens,
                max_tokens,
            }
        } else {
            ContextValidation::Ok { estimated_tokens }
        }
    }
}
