//! Token accounting for persona completions.
//!
//! Counts follow the chat wire format: a fixed overhead per message plus the
//! encoded role and content, and a fixed priming cost for the reply. The
//! `cl100k_base` encoding covers the gpt-4 family.

use tiktoken_rs::cl100k_base;

use common::error::AppError;

use crate::llm::ChatTurn;

/// Wire-format overhead per message.
const TOKENS_PER_MESSAGE: usize = 3;
/// Every reply is primed with an assistant header.
const REPLY_PRIMING_TOKENS: usize = 3;

/// Tokens a prompt made of these turns occupies.
pub fn prompt_tokens(turns: &[ChatTurn]) -> Result<usize, AppError> {
    let bpe = cl100k_base()?;

    let mut total = REPLY_PRIMING_TOKENS;
    for turn in turns {
        total += TOKENS_PER_MESSAGE;
        total += bpe.encode_ordinary(turn.role.as_str()).len();
        total += bpe.encode_ordinary(&turn.content).len();
    }
    Ok(total)
}

/// Completion budget left in the model context once the prompt is in.
///
/// Never zero: a prompt that fills the window still gets a one-token budget
/// so the request stays well-formed and fails with a model-side message
/// instead of a malformed parameter.
pub fn reply_budget(context_window: usize, prompt_tokens: usize) -> u32 {
    let budget = context_window.saturating_sub(prompt_tokens).max(1);
    u32::try_from(budget).unwrap_or(u32::MAX)
}
