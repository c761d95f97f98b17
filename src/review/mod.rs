pub mod agents;
pub mod analyzer;
pub mod heuristics;
pub mod retry;
pub mod types;

pub use agents::{AnyAgent, LlmAgent, ReviewAgent};
pub use analyzer::{ItemAnalyzer, ItemOutcome};
pub use heuristics::HeuristicAgent;
pub use types::{
    AnalysisKind, ItemReport, ItemVerdict, Recommendation, ReviewMetadata, RiskLevel, TestSummary,
    WorkItem,
};
