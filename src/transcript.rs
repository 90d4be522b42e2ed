//! Turn-based transcript assembly
//!
//! Streamed partial transcription text accumulates per speaker until a turn
//! boundary commits it to the ordered transcript log. Append order is the
//! conversation's source of truth for rendering and replay.

use serde::Serialize;
use std::fmt;

/// Who said a committed transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Ai,
    System,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Ai => write!(f, "ai"),
            Speaker::System => write!(f, "system"),
        }
    }
}

/// One committed line of the conversation. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

/// Append-ordered conversation log.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.entries.push(TranscriptEntry {
            speaker,
            text: text.into(),
        });
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Accumulates the in-flight (uncommitted) utterance for each speaker.
///
/// Each speaker has at most one pending utterance at a time; committing a
/// turn clears both accumulators, so a new delta can never collide with
/// already-committed text.
#[derive(Debug, Default)]
pub struct TurnAssembler {
    pending_user: String,
    pending_model: String,
}

impl TurnAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append incremental user transcription text.
    pub fn push_input_delta(&mut self, text: &str) {
        self.pending_user.push_str(text);
    }

    /// Append incremental model transcription text.
    pub fn push_output_delta(&mut self, text: &str) {
        self.pending_model.push_str(text);
    }

    /// Commit the in-flight turn: the user line first, then the model's,
    /// in that fixed order regardless of which accumulator saw the most
    /// recent delta. Empty (after trimming) utterances are skipped. Both
    /// accumulators end up empty.
    pub fn commit_turn(&mut self, transcript: &mut Transcript) {
        let user = self.pending_user.trim().to_string();
        let model = self.pending_model.trim().to_string();

        if !user.is_empty() {
            transcript.push(Speaker::User, user);
        }
        if !model.is_empty() {
            transcript.push(Speaker::Ai, model);
        }

        self.pending_user.clear();
        self.pending_model.clear();
    }

    /// Drop any uncommitted text, e.g. on teardown.
    pub fn clear(&mut self) {
        self.pending_user.clear();
        self.pending_model.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pending_user.is_empty() && self.pending_model.is_empty()
    }
}
