pub mod client;
pub mod messages;

pub use client::NatsVoicePipeline;
pub use messages::{
    ConverseReply, ConverseRequest, SynthesizeReply, SynthesizeRequest, TranscribeReply,
    TranscribeRequest,
};
