//! Retrieval-augmented answer pipeline
//!
//! Per turn: query generation and extraction, retrieval, grounded answer.

pub mod composer;
pub mod controller;
pub mod direct;
pub mod query;

pub use composer::{ComposedAnswer, GroundedAnswerComposer};
pub use controller::{
    ConversationEnd, ConversationLoop, ConversationTranscript, TurnOutcome, TurnRecord,
};
pub use direct::DirectChat;
pub use query::{QueryExtractor, QueryOutcome, QuerySource};
