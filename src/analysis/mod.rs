pub mod calibration;
pub mod coordinator;
pub mod facade;
pub mod notice;
pub mod payload;
pub mod request;
pub mod service;
pub mod supervisor;

pub use calibration::{format_area, Calibration};
pub use coordinator::RequestCoordinator;
pub use facade::{AnalyzerHandle, LeafAnalyzer, PendingAnalysis};
pub use notice::{Notice, NoticeKind};
pub use payload::{ImagePayload, ImageSource};
pub use request::{AnalysisKind, AnalysisOutcome, AnalysisRequest, RequestOrigin};
pub use service::AnalyzerService;
pub use supervisor::{AnalyzerStatus, ReadinessState};
