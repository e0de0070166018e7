pub mod condense;
pub mod context;
pub mod fast_path;
pub mod llm;
pub mod prompts;
pub mod retrieval;
pub mod strategy;
pub mod tokens;

pub use condense::QuestionCondenser;
pub use context::{ConversationContext, ConversationContextService};
pub use fast_path::{FastPathAnswer, FastPathAnswerer};
pub use llm::{ChatRequest, ChatService, ChatTurn, OpenAiChatService, TurnRole};
pub use retrieval::{ChainAnswer, RetrievalAnswerChain};
pub use strategy::{AnswerStrategy, FastPathStrategy, RetrievalChainStrategy};
