use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub cited_chunk_ids: Vec<String>,
    /// RFC3339 UTC.
    pub asked_at: String,
}

impl ConversationTurn {
    fn transcript_line(&self) -> String {
        format!("Usuario: {}\nAsistente: {}\n", self.question.trim(), self.answer.trim())
    }
}

/// Append-only log of one session's turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMemory {
    turns: Vec<ConversationTurn>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Most recent turns whose transcript lines fit `budget_chars`, in chronological order.
    /// Stops at the first turn that does not fit so the kept window stays contiguous.
    pub fn render(&self, budget_chars: usize) -> &[ConversationTurn] {
        let mut used = 0usize;
        let mut first_kept = self.turns.len();
        for (i, turn) in self.turns.iter().enumerate().rev() {
            let size = turn.transcript_line().chars().count();
            if used + size > budget_chars {
                break;
            }
            used += size;
            first_kept = i;
        }
        &self.turns[first_kept..]
    }

    /// Never longer than `budget_chars`.
    pub fn render_transcript(&self, budget_chars: usize) -> String {
        self.render(budget_chars).iter().map(ConversationTurn::transcript_line).collect()
    }

    /// Only used when the session's document is replaced.
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
