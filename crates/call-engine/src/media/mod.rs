//! RTP media for answered calls: the per-call stream, prompt clips, recording
//! and the plain (non-automated) session.

pub mod clip;
pub mod recorder;
pub mod session;
pub mod stream;

pub use recorder::{recording_path, CallRecorder, SharedRecorder};
pub use session::{MediaSession, SessionEnd};
pub use stream::{MediaStream, SendOutcome};
