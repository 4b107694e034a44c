//! G-code program loading and acknowledgment-gated streaming

pub mod program;
pub mod streamer;

pub use program::GcodeProgram;
pub use streamer::{
    CancelToken, GcodeStreamer, LineProgress, NoopObserver, StreamObserver, StreamOptions,
    StreamReport,
};
