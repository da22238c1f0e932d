use std::fmt::Write;

use crate::context::GraphContext;
use crate::fusion::FusedResult;
use crate::orchestrator::{Message, Role};

/// Conversation turns carried into the prompt.
const HISTORY_TURNS: usize = 6;

pub fn language_instruction(language: &str) -> &'static str {
    if is_turkish(language) {
        "Answer in Turkish."
    } else {
        "Answer in English."
    }
}

pub fn is_turkish(language: &str) -> bool {
    matches!(language.trim().to_lowercase().as_str(), "tr" | "tr-tr" | "turkish" | "türkçe")
}

/// Passages numbered `[Source N]` in fused order, then optional graph
/// context, recent history and the question.
pub fn build_prompt(
    query: &str,
    passages: &[FusedResult],
    graph_context: Option<&GraphContext>,
    history: &[Message],
    language: &str,
) -> String {
    let mut prompt = String::from(
        "You are a medical assistant for healthcare professionals. \
         Answer the question based ONLY on the provided sources. \
         Always cite sources using [Source N] format.\n\n",
    );

    prompt.push_str("Sources:\n");
    for (i, passage) in passages.iter().enumerate() {
        let _ = write!(prompt, "[Source {}]", i + 1);
        if let Some(page) = passage.chunk.as_ref().and_then(|c| c.page_number) {
            let _ = write!(prompt, " (Page {})", page);
        }
        let _ = writeln!(prompt, "\n{}\n", passage.text());
    }

    if let Some(context) = graph_context.filter(|c| !c.text.is_empty()) {
        let _ = writeln!(prompt, "Medical knowledge graph context:\n{}\n", context.text);
    }

    let start = history.len().saturating_sub(HISTORY_TURNS);
    if start < history.len() {
        prompt.push_str("Conversation so far:\n");
        for message in &history[start..] {
            let speaker = match message.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            let _ = writeln!(prompt, "{}: {}", speaker, message.content.trim());
        }
        prompt.push('\n');
    }

    let _ = write!(
        prompt,
        "Question: {}\n\n\
         Instructions:\n\
         - Provide accurate medical information\n\
         - Cite sources for every claim using [Source N]\n\
         - If information is not in sources, say so\n\
         - Be concise and professional\n\
         - {}\n\n\
         Answer:",
        query.trim(),
        language_instruction(language)
    );

    prompt
}
