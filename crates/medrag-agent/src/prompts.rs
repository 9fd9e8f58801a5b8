//! Prompt templates for the graph nodes.
//!
//! Each template opens with a fixed heading so logs and test doubles can tell
//! the calls apart.

use medrag_core::types::{ScoredDocument, Turn};

pub const REWRITE_HEADING: &str = "QUERY INTERPRETER";
pub const GRADE_HEADING: &str = "RETRIEVAL GRADER";
pub const GENERATE_HEADING: &str = "ANSWER GENERATOR";
pub const FALLBACK_HEADING: &str = "FALLBACK RESPONDER";

/// Render prior turns oldest first, or a placeholder when there are none.
pub fn memory_context(turns: &[Turn]) -> String {
    if turns.is_empty() {
        return "(no previous conversation)".to_string();
    }
    turns
        .iter()
        .map(|t| format!("User: {}\nAssistant: {}", t.query, t.answer))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Number the documents `[1]`, `[2]`, ... in the given order.
pub fn numbered_documents(docs: &[ScoredDocument]) -> String {
    docs.iter()
        .enumerate()
        .map(|(i, d)| format!("[{}] {}", i + 1, d.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn rewrite_prompt(raw_query: &str, history: &[Turn]) -> String {
    format!(
        r#"{heading}
You interpret questions for a medical retrieval system.

1. Decide whether the question needs records to be filtered, counted, compared or listed
   (e.g. "which patients", "how many", "most frequent", "list all"). If so, tool_flag is true.
2. Rewrite the question so it is clear and specific on its own.
   - Expand pronouns and vague references using the memory context.
   - Keep the meaning identical.

Memory context:
{memory}

User question:
{query}

Respond with ONLY valid JSON:
{{"rephrased_question": "...", "tool_flag": false}}"#,
        heading = REWRITE_HEADING,
        memory = memory_context(history),
        query = raw_query,
    )
}

pub fn grade_prompt(question: &str, document: &str) -> String {
    format!(
        r#"{heading}
Decide whether the document helps answer the question.

Question:
{question}

Document:
{document}

Respond with exactly one word: "yes" if the document is relevant, "no" if it is not."#,
        heading = GRADE_HEADING,
    )
}

pub fn generate_prompt(question: &str, docs: &[ScoredDocument], history: &[Turn]) -> String {
    format!(
        r#"{heading}
You answer questions for a medical retrieval system.

Rules:
- Base the answer only on the documents below. Do not add details they do not contain.
- Use neutral, professional language.
- Be concise.

Previous conversation:
{memory}

Question:
{question}

Documents:
{documents}

Answer:"#,
        heading = GENERATE_HEADING,
        memory = memory_context(history),
        documents = numbered_documents(docs),
    )
}

/// Reduced generation prompt used after a degenerate first answer.
pub fn simple_generate_prompt(question: &str, docs: &[ScoredDocument]) -> String {
    format!(
        "{heading}\nAnswer the question using only these documents.\n\n\
         {documents}\n\nQuestion: {question}\nAnswer:",
        heading = GENERATE_HEADING,
        documents = numbered_documents(docs),
    )
}

pub fn fallback_prompt(question: &str) -> String {
    format!(
        r#"{heading}
No documents relevant to the question below were found.
Reply in one or two sentences: say that no matching information was found and
ask the user for more details. Do not answer the question itself.

Question:
{question}"#,
        heading = FALLBACK_HEADING,
    )
}

/// Extract JSON from a response that may contain markdown code fences.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return &trimmed[start..=end];
            }
        }
    }
    trimmed
}
