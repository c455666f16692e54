//! Agent module: the conversation loop of the memory agent
//!
//! # Architecture
//!
//! ```text
//! (query, filters) → AgentController → ModelClient.generate(history)
//!                          ↓
//!                    parse_response → <think> + <python> | <reply>
//!                          ↓
//!                    <python>: CodeExecutor.execute(code)
//!                          ↓
//!                    recall-sandbox worker → ToolApi on the memory root
//!                          ↓
//!                    <result> fed back as the next user turn → loop
//!                          ↓
//!                    <reply>: AgentResult
//! ```

pub mod controller;
pub mod conversation;
pub mod prompt;
pub mod transcripts;

pub use controller::{
    AgentController, AgentError, AgentResult, ControllerState, ErrorKind, ExecutionRecord,
};
pub use conversation::{with_filters, Conversation};
pub use prompt::{corrective_note, DEFAULT_SYSTEM_PROMPT};
pub use transcripts::{Transcript, TranscriptStore, TranscriptSummary};
