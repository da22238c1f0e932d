//! Graph context value types and their serialization into prompt text.

use serde::{Deserialize, Serialize};

use crate::strategy::ResolvedStrategy;

pub const RELATIONS_HEADER: &str = "Knowledge graph relations:";
pub const RELATED_CHUNKS_HEADER: &str = "Related passages:";

/// A typed relationship collected during traversal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub source: String,
    pub relation: String,
    pub target: String,
    /// Traversal depth at which the edge was discovered, starting at 1.
    pub hop: usize,
}

impl Triple {
    pub fn to_line(&self) -> String {
        format!("{} --[{}]--> {}", self.source, self.relation, self.target)
    }
}

/// A chunk reached through SIMILAR edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedChunk {
    pub chunk_id: String,
    pub snippet: String,
    pub similarity: f64,
    /// Fused chunk the SIMILAR edge started from.
    pub via: String,
    pub entities: Vec<String>,
}

impl RelatedChunk {
    pub fn to_line(&self) -> String {
        format!("[{}] {}", self.chunk_id, self.snippet)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphContext {
    pub strategy: ResolvedStrategy,
    /// Seeds and traversed triple endpoints (local), then entities of related chunks (global).
    pub entities: Vec<String>,
    pub triples: Vec<Triple>,
    pub related_chunks: Vec<RelatedChunk>,
    /// Prompt-ready rendering, never longer than the character budget.
    pub text: String,
    /// Some collected lines did not fit into `text`.
    pub truncated: bool,
    /// A graph store call failed or timed out.
    pub degraded: bool,
}

impl GraphContext {
    pub fn empty(strategy: ResolvedStrategy) -> Self {
        Self {
            strategy,
            entities: Vec::new(),
            triples: Vec::new(),
            related_chunks: Vec::new(),
            text: String::new(),
            truncated: false,
            degraded: false,
        }
    }

    pub fn degraded(strategy: ResolvedStrategy) -> Self {
        Self {
            degraded: true,
            ..Self::empty(strategy)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty() && self.related_chunks.is_empty() && self.text.is_empty()
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Collapse whitespace and cut to at most `max_chars` characters.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    if max_chars <= 3 {
        return flat.chars().take(max_chars).collect();
    }
    let mut cut: String = flat.chars().take(max_chars - 3).collect();
    cut.truncate(cut.trim_end().len());
    cut.push_str("...");
    cut
}

/// Appends whole lines under a hard character budget.
///
/// A section header is only written together with the first line of its
/// section, so a section with nothing that fits leaves no trace.
#[derive(Debug)]
pub struct ContextBuilder {
    max_chars: usize,
    text: String,
    used: usize,
    truncated: bool,
}

impl ContextBuilder {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            text: String::new(),
            used: 0,
            truncated: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.max_chars.saturating_sub(self.used)
    }

    /// Write `header` followed by as many of `lines` as fit, in order.
    /// Stops at the first line that does not fit. Returns the lines written.
    pub fn section<I>(&mut self, header: &str, lines: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut written = 0;

        for line in lines {
            let line_chars = line.chars().count();
            let cost = if written == 0 {
                let separator = if self.used == 0 { 0 } else { 2 };
                separator + header.chars().count() + 1 + line_chars
            } else {
                1 + line_chars
            };

            if cost > self.remaining() {
                self.truncated = true;
                break;
            }

            if written == 0 {
                if self.used > 0 {
                    self.text.push_str("\n\n");
                }
                self.text.push_str(header);
            }
            self.text.push('\n');
            self.text.push_str(&line);
            self.used += cost;
            written += 1;
        }

        written
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn finish(self) -> (String, bool) {
        (self.text, self.truncated)
    }
}
