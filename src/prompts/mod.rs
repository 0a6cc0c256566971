//! System prompts for the rephrase and answer stages
//!
//! The rephrase stage restates a follow-up question so it stands alone. The
//! answer stage turns that question plus the schema into one fenced SQL
//! block.

pub mod answer_prompt;
pub mod rephrase_prompt;

use crate::config::Capability;

/// Placeholder replaced by the rendered schema in the answer prompt
pub const SCHEMA_PLACEHOLDER: &str = "{schema}";

/// Builds the answer-stage system prompt for a pipeline capability
///
/// # Examples
///
/// ```
/// use spatialmind::config::Capability;
/// use spatialmind::prompts::build_answer_prompt;
///
/// let prompt = build_answer_prompt(Capability::Text, "--- Table: cities ---");
/// assert!(prompt.contains("cities"));
/// assert!(prompt.contains("```sql"));
/// ```
pub fn build_answer_prompt(capability: Capability, schema: &str) -> String {
    answer_prompt::generate_answer_prompt(capability).replace(SCHEMA_PLACEHOLDER, schema)
}

/// Builds the rephrase-stage system prompt
pub fn build_rephrase_prompt() -> String {
    rephrase_prompt::generate_rephrase_prompt()
}

/// Formats the new question as the final user message of a stage prompt
pub fn question_message(question: &str) -> String {
    format!("Question: {}", question)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_prompt_embeds_schema() {
        let prompt = build_answer_prompt(Capability::Text, "TABLE_MARKER");
        assert!(prompt.contains("TABLE_MARKER"));
        assert!(!prompt.contains(SCHEMA_PLACEHOLDER));
    }

    #[test]
    fn test_vision_prompt_mentions_image() {
        let prompt = build_answer_prompt(Capability::TextImage, "");
        assert!(prompt.to_lowercase().contains("image"));
        let text_only = build_answer_prompt(Capability::Text, "");
        assert!(!text_only.to_lowercase().contains("attached image"));
    }

    #[test]
    fn test_rephrase_prompt_forbids_sql() {
        let prompt = build_rephrase_prompt();
        assert!(prompt.contains("Do not answer"));
        assert!(prompt.contains("SQL"));
    }

    #[test]
    fn test_question_message_prefix() {
        assert_eq!(question_message("cities?"), "Question: cities?");
    }
}
