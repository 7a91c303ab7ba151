//! The agent wire protocol: framing codec, message grammar, and the
//! session state machine that multiplexes progress events with results.

pub mod codec;
pub mod messages;
pub mod session;

pub use codec::{FrameCodec, MAX_FRAME};
pub use messages::Message;
pub use session::{AgentChannel, AgentEvent, AgentSession, SessionMeta};
