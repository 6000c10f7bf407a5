//! Instruction prompt template
//!
//! Flattens a conversation into the single prompt string the model was
//! trained on.

use crate::types::message::{ChatTurn, Role};

/// Fixed block between the system turns and the conversation
pub const INSTRUCTION_BLOCK: &str = "### Instruction: \n\
The prompt below is a question to answer, a task to complete, or a conversation to respond to; decide which and write an appropriate response.\n\
### Prompt: ";

/// Prefix of every assistant turn
pub const RESPONSE_MARKER: &str = "\n### Response: ";

/// Closes the prompt; the model continues from here
pub const PROMPT_SUFFIX: &str = "\n### Response:";

/// Builds the prompt for `turns`.
///
/// System turns come first, one per line. User turns and assistant turns are
/// then appended in two separate passes over the whole list, users first, so
/// the output is grouped by role rather than interleaved. Turns with any other
/// role are skipped.
pub fn build_prompt(turns: &[ChatTurn]) -> String {
    let mut prompt = String::new();

    for turn in turns.iter().filter(|t| t.role == Role::System) {
        prompt.push_str(&turn.content);
        prompt.push('\n');
    }

    prompt.push_str(INSTRUCTION_BLOCK);

    for turn in turns.iter().filter(|t| t.role == Role::User) {
        prompt.push('\n');
        prompt.push_str(&turn.content);
    }

    for turn in turns.iter().filter(|t| t.role == Role::Assistant) {
        prompt.push_str(RESPONSE_MARKER);
        prompt.push_str(&turn.content);
    }

    prompt.push_str(PROMPT_SUFFIX);
    prompt
}
