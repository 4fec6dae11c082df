//! The AI attendant: utterance buffering, recognition preparation, reply
//! selection and the per-call orchestrator tying them to the media stream.

pub mod buffer;
pub mod orchestrator;
pub mod pipeline;
pub mod reply;

pub use buffer::{BufferPolicy, FlushReason, UtteranceBuffer};
pub use orchestrator::{ConversationEnd, Orchestrator};
pub use reply::{select_reply, Reply, ReplySource};
