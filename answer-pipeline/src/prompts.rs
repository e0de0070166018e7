//! Every prompt literal used by the answer flows.
//!
//! The wording here is load-bearing: canned-answer tests, cached prompt
//! histories and the client-visible greeting all depend on these exact
//! strings, so builders live in one place instead of being scattered over
//! the pipelines.

use crate::llm::ChatTurn;

/// System identity for the persona completion flow.
pub const PERSONA_SYSTEM_PROMPT: &str = "You are personaGPT, the best persona generating AI ever";

/// Returned instead of a completion when moderation flags the question.
pub const MODERATION_REFUSAL: &str = "I cannot give inappropriate responses";

const AI_DISCLAIMER: &str = "As an AI language model, ";
const PERSONA_DISCLAIMER: &str = "I am a synthetic AI persona, as such ";

/// Visible greeting posted when a conversation or trial is created.
pub fn greeting(cluster: &str) -> String {
    format!("You're chatting with Sarah, an AI bot representing the {cluster} segment")
}

/// Hidden assistant turn describing the segment the bot plays.
pub fn segment_briefing(description: &str) -> String {
    format!(
        "We conducted a survey and you represent a segment of this survey. \
         This segment is described as: {description}."
    )
}

/// Hidden assistant turn with the answering instructions.
///
/// `exemplars` is concatenated without a separator; pass an empty string
/// when there are none.
pub fn persona_instruction(question: &str, exemplars: &str) -> String {
    format!(
        "I want you to respond as this segment to the following question: \"{question}\". \
         Please create a response of up to 100 words and limit hallucinations, and do not \
         go beyond answering the question. Do not give any advice which could be illegal \
         or violates personal data. {exemplars}You do not need to reintroduce yourself \
         after the first time."
    )
}

/// The three hidden turns that prime a fresh persona conversation. They are
/// generated once, from the first question, and persisted alongside the
/// visible messages.
pub fn priming_turns(description: &str, question: &str) -> Vec<ChatTurn> {
    vec![
        ChatTurn::system(PERSONA_SYSTEM_PROMPT),
        ChatTurn::assistant(segment_briefing(description)),
        ChatTurn::assistant(persona_instruction(question, "")),
    ]
}

pub fn exemplar_line(question: &str, answer: &str) -> String {
    format!(
        "For reference, this segment responded to this question \"{question}\" \
         with this answer \"{answer}\"."
    )
}

/// Render matched question/answer pairs as one exemplar string, space
/// separated. Empty input renders as an empty string.
pub fn exemplar_block(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(question, answer)| exemplar_line(question, answer))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `Human:`/`Assistant:` rendering of question/answer pairs for the
/// condense prompt.
pub fn history_block(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(question, answer)| format!("Human: {question}\nAssistant: {answer}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt that rewrites a follow-up into a standalone question.
pub fn condense_prompt(chat_history: &str, question: &str) -> String {
    format!(
        "Given the following chat history and a follow up question,\n\
         rephrase the follow up input question to be a standalone question.\n\
         Or end the conversation if it seems like it's done.\n\
         Chat History:\n\
         {chat_history}\n\
         Follow Up Input:\n\
         {question}\n\
         Standalone question:"
    )
}

/// Prompt that synthesizes a persona answer from retrieved passages.
pub fn qa_prompt(segment_name: &str, context: &str, question: &str) -> String {
    format!(
        "You are PersonaGPT, the best persona bot ever!\n\
         We ran a market research survey and collected answers from respondents.\n\
         A segment emerged and you represent a segment of this survey, called '{segment_name}'.\n\
         Use only the following context to answer the question.\n\
         Please create a response of up to 100 words and limit hallucinations.\n\
         Do not give any advice which could be illegal or violates personal data.\n\
         Context:\n\
         {context}\n\
         Question:\n\
         {question}\n\
         Helpful Answer:"
    )
}

/// Soften the stock model disclaimer into persona voice.
pub fn amend_answer(answer: &str) -> String {
    answer.replace(AI_DISCLAIMER, PERSONA_DISCLAIMER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_names_the_cluster() {
        assert_eq!(
            greeting("pioneers"),
            "You're chatting with Sarah, an AI bot representing the pioneers segment"
        );
    }

    #[test]
    fn instruction_without_exemplars_keeps_a_single_space() {
        let instruction = persona_instruction("What do you drink?", "");
        assert!(instruction.contains("question: \"What do you drink?\"."));
        assert!(instruction.contains("or violates personal data. You do not need"));
    }

    #[test]
    fn instruction_splices_exemplars_before_the_closing_sentence() {
        let exemplars = exemplar_block(&[(
            "How often do you shop online?".to_owned(),
            "Once a week".to_owned(),
        )]);
        let instruction = persona_instruction("What do you buy?", &exemplars);
        assert!(instruction.contains(
            "personal data. For reference, this segment responded to this question \
             \"How often do you shop online?\" with this answer \"Once a week\".You do not need"
        ));
    }

    #[test]
    fn exemplars_join_with_single_spaces() {
        let block = exemplar_block(&[
            ("Q1".to_owned(), "A1".to_owned()),
            ("Q2".to_owned(), "A2".to_owned()),
        ]);
        assert_eq!(
            block,
            "For reference, this segment responded to this question \"Q1\" with this answer \"A1\". \
             For reference, this segment responded to this question \"Q2\" with this answer \"A2\"."
        );
        assert_eq!(exemplar_block(&[]), "");
    }

    #[test]
    fn history_renders_human_assistant_lines() {
        let block = history_block(&[
            ("What do you drink?".to_owned(), "Coffee".to_owned()),
            ("How often?".to_owned(), "Daily".to_owned()),
        ]);
        assert_eq!(
            block,
            "Human: What do you drink?\nAssistant: Coffee\nHuman: How often?\nAssistant: Daily"
        );
        assert_eq!(history_block(&[]), "");
    }

    #[test]
    fn condense_prompt_embeds_history_and_question() {
        let prompt = condense_prompt("Human: Hi\nAssistant: Hello", "And you?");
        assert!(prompt.starts_with("Given the following chat history"));
        assert!(prompt.contains("Chat History:\nHuman: Hi\nAssistant: Hello\nFollow Up Input:\nAnd you?\n"));
        assert!(prompt.ends_with("Standalone question:"));
    }

    #[test]
    fn qa_prompt_names_the_segment() {
        let prompt = qa_prompt("pioneers", "passage one\n\npassage two", "What do you buy?");
        assert!(prompt.contains("called 'pioneers'."));
        assert!(prompt.contains("Context:\npassage one\n\npassage two\nQuestion:\nWhat do you buy?\n"));
        assert!(prompt.ends_with("Helpful Answer:"));
    }

    #[test]
    fn priming_is_system_then_two_assistant_turns() {
        let turns = priming_turns("careful shoppers", "What do you buy?");
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0], ChatTurn::system(PERSONA_SYSTEM_PROMPT));
        assert_eq!(
            turns[1].content,
            "We conducted a survey and you represent a segment of this survey. \
             This segment is described as: careful shoppers."
        );
        assert!(turns[2].content.contains("\"What do you buy?\""));
        // No exemplars in priming, so the spacing stays intact.
        assert!(turns[2].content.contains("personal data. You do not need"));
    }

    #[test]
    fn amend_rewrites_the_model_disclaimer() {
        assert_eq!(
            amend_answer("As an AI language model, I cannot say."),
            "I am a synthetic AI persona, as such I cannot say."
        );
        assert_eq!(amend_answer("Plain answer"), "Plain answer");
    }
}
