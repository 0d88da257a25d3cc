pub mod align;
pub mod config;
pub mod connection;
pub mod review;
pub mod submission;
pub mod telemetry;
pub mod tour;
#[cfg(feature = "web")]
pub mod web;

pub use align::{
    AnnotatedIndexSet, AnnotationMap, Alignment, ReviewMode, Token, Unit, align, sentences,
};
pub use config::{AppConfig, ConfigError, KeyValueStore, MemoryStore};
pub use connection::{BackendRequest, BackendResponse, ConnectionState, LinkError};
pub use review::{
    BoardOptions, Celebration, CompletionSummary, EmptyAnnotationPolicy, Highlight, ReviewBoard,
    ReviewError, ReviewStatus, Toggle,
};
pub use submission::{ReportError, ResultReporter, ReviewResult, SubmissionContext};
pub use telemetry::{TraceEnvelope, TraceLog, TraceStats};
pub use tour::{TargetId, Tour, TourAction, TourScript, TourStage};
