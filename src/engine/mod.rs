pub mod channel;
pub mod message;
pub mod process;

#[cfg(test)]
pub mod scripted;

pub use channel::{ChannelConnection, ChannelFactory, VisionChannel};
pub use message::{EngineEvent, EngineJob, RawAnalysis};
pub use process::{ProcessChannel, ProcessChannelFactory};
