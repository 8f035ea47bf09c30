pub mod analysis;
pub mod common;
pub mod config;
pub mod engine;
pub mod error;

pub use analysis::{
    AnalysisKind, AnalysisOutcome, AnalyzerHandle, AnalyzerService, AnalyzerStatus, ImageSource,
    LeafAnalyzer, Notice, NoticeKind, ReadinessState, RequestOrigin,
};
pub use common::Point;
pub use config::Configuration;
pub use engine::{ChannelFactory, ProcessChannelFactory, VisionChannel};
pub use error::AppError;
