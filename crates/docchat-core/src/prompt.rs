//! Prompt assembly under a character budget.
//!
//! The model request is laid out as:
//!
//! ```text
//! system:    <instructions>\n\nContext excerpts ...\n[1] label\ntext ...
//! user/assistant history, oldest first
//! user:      <question>
//! ```
//!
//! When the total content length exceeds the budget, the oldest history
//! turns are dropped first, then the lowest-scoring excerpts. The
//! instructions and the question are always kept, so a request may still
//! exceed the budget when those two alone are larger than it.

use serde::{Deserialize, Serialize};

use crate::models::{RetrievalResult, Role, Turn};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the provided context \
excerpts to answer questions accurately and cite them by number, e.g. [1]. If the answer is not \
in the excerpts, say you are unsure and suggest how to find it.";

/// One message of a model request, in the wire shape chat APIs expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Fully assembled input for the chat model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub messages: Vec<ChatMessage>,
    /// Excerpts that made it into the context, in citation order.
    pub sources: Vec<RetrievalResult>,
    pub dropped_turns: usize,
    pub dropped_chunks: usize,
}

impl ModelRequest {
    /// Total characters across all message contents.
    pub fn char_len(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    pub system_prompt: String,
    pub max_chars: usize,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_chars: 12_000,
        }
    }
}

impl PromptAssembler {
    pub fn new(system_prompt: impl Into<String>, max_chars: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_chars,
        }
    }

    pub fn assemble(
        &self,
        history: &[Turn],
        retrieved: &[RetrievalResult],
        question: &str,
    ) -> ModelRequest {
        let mut chunks: Vec<RetrievalResult> = retrieved.to_vec();
        chunks.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut turns: Vec<&Turn> = history.iter().filter(|t| t.role != Role::System).collect();
        let mut dropped_turns = 0;
        let mut dropped_chunks = 0;

        let fixed = self.system_prompt.chars().count() + question.chars().count();
        while fixed + context_len(&chunks) + turns_len(&turns) > self.max_chars && !turns.is_empty()
        {
            turns.remove(0);
            dropped_turns += 1;
        }
        while fixed + context_len(&chunks) > self.max_chars && !chunks.is_empty() {
            chunks.pop();
            dropped_chunks += 1;
        }

        if dropped_turns > 0 || dropped_chunks > 0 {
            tracing::debug!(dropped_turns, dropped_chunks, "prompt truncated to budget");
        }

        let mut system = self.system_prompt.clone();
        system.push_str(&render_context(&chunks));

        let mut messages = Vec::with_capacity(turns.len() + 2);
        messages.push(ChatMessage::new(Role::System, system));
        messages.extend(turns.iter().map(|t| ChatMessage::new(t.role, t.text.clone())));
        messages.push(ChatMessage::new(Role::User, question));

        ModelRequest {
            messages,
            sources: chunks,
            dropped_turns,
            dropped_chunks,
        }
    }
}

/// Render numbered excerpts. Empty input renders as an empty string.
pub fn render_context(chunks: &[RetrievalResult]) -> String {
    if chunks.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\nContext excerpts:");
    for (i, result) in chunks.iter().enumerate() {
        out.push_str(&format!(
            "\n\n[{}] {}\n{}",
            i + 1,
            result.chunk.label(),
            result.chunk.metadata.text
        ));
    }
    out
}

fn turns_len(turns: &[&Turn]) -> usize {
    turns.iter().map(|t| t.text.chars().count()).sum()
}

fn context_len(chunks: &[RetrievalResult]) -> usize {
    render_context(chunks).chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, IndexedChunk};

    fn hit(text: &str, score: f32) -> RetrievalResult {
        RetrievalResult {
            chunk: IndexedChunk {
                row: 0,
                chunk_id: text.into(),
                metadata: ChunkMetadata {
                    source_id: "notes.txt".into(),
                    title: None,
                    locator: None,
                    ordinal: 0,
                    text: text.into(),
                },
            },
            score,
        }
    }

    #[test]
    fn layout_system_history_question() {
        let asm = PromptAssembler::new("Be brief.", 10_000);
        let history = vec![Turn::user("hi"), Turn::assistant("hello")];
        let req = asm.assemble(&history, &[hit("The sky is blue.", 0.9)], "sky?");

        assert_eq!(req.messages.len(), 4);
        assert_eq!(req.messages[0].role, Role::System);
        assert!(req.messages[0].content.starts_with("Be brief."));
        assert!(req.messages[0].content.contains("[1] notes.txt\nThe sky is blue."));
        assert_eq!(req.messages[1].content, "hi");
        assert_eq!(req.messages[2].role, Role::Assistant);
        assert_eq!(req.messages[3], ChatMessage::new(Role::User, "sky?"));
    }

    #[test]
    fn excerpts_numbered_by_descending_score() {
        let asm = PromptAssembler::new("sys", 10_000);
        let req = asm.assemble(&[], &[hit("low", 0.1), hit("high", 0.8)], "q");
        let system = &req.messages[0].content;
        assert!(system.find("[1] notes.txt\nhigh").unwrap() < system.find("[2] notes.txt\nlow").unwrap());
        assert_eq!(req.sources[0].chunk.metadata.text, "high");
    }

    #[test]
    fn no_context_block_without_excerpts() {
        let asm = PromptAssembler::new("sys", 100);
        let req = asm.assemble(&[], &[], "q");
        assert_eq!(req.messages[0].content, "sys");
        assert!(req.sources.is_empty());
    }

    #[test]
    fn oldest_history_dropped_first() {
        let chunk = hit("fact", 0.5);
        let asm = PromptAssembler::new("sys", 10_000);
        let base = asm.assemble(&[], &[chunk.clone()], "q").char_len();

        let history = vec![Turn::user("aaaaaaaaaa"), Turn::assistant("bbbbbbbbbb")];
        let asm = PromptAssembler::new("sys", base + 10);
        let req = asm.assemble(&history, &[chunk], "q");

        assert_eq!(req.dropped_turns, 1);
        assert_eq!(req.dropped_chunks, 0);
        assert_eq!(req.messages[1].content, "bbbbbbbbbb");
        assert!(req.char_len() <= base + 10);
    }

    #[test]
    fn lowest_scoring_chunk_dropped_after_history() {
        let asm = PromptAssembler::new("sys", 10_000);
        let one = asm.assemble(&[], &[hit("best", 0.9)], "q").char_len();

        let asm = PromptAssembler::new("sys", one);
        let req = asm.assemble(
            &[Turn::user("old question")],
            &[hit("worst", 0.1), hit("best", 0.9)],
            "q",
        );
        assert_eq!(req.dropped_turns, 1);
        assert_eq!(req.dropped_chunks, 1);
        assert_eq!(req.sources.len(), 1);
        assert_eq!(req.sources[0].chunk.metadata.text, "best");
    }

    #[test]
    fn system_and_question_never_dropped() {
        let asm = PromptAssembler::new("long instructions", 1);
        let req = asm.assemble(&[Turn::user("x")], &[hit("y", 0.3)], "question");
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].content, "long instructions");
        assert_eq!(req.messages[1].content, "question");
    }
}
