//! Work items and the verdicts produced for them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three independent sub-analyses run for every item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisKind {
    CodeQuality,
    TestQuality,
    Security,
}

impl AnalysisKind {
    /// Fixed order in which sub-analyses are scheduled and recorded.
    pub const ALL: [AnalysisKind; 3] = [
        AnalysisKind::CodeQuality,
        AnalysisKind::TestQuality,
        AnalysisKind::Security,
    ];
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisKind::CodeQuality => write!(f, "code-quality"),
            AnalysisKind::TestQuality => write!(f, "test-quality"),
            AnalysisKind::Security => write!(f, "security"),
        }
    }
}

/// Reviewer recommendation. Variant order is severity order, so `Ord`
/// gives the precedence BLOCK > REQUEST_CHANGES > APPROVE.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    #[default]
    Approve,
    RequestChanges,
    Block,
}

impl Recommendation {
    /// Worst-of aggregation. An empty input approves.
    pub fn aggregate<'a>(verdicts: impl IntoIterator<Item = &'a ItemVerdict>) -> Recommendation {
        verdicts
            .into_iter()
            .map(|v| v.recommendation)
            .max()
            .unwrap_or_default()
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::Approve => write!(f, "APPROVE"),
            Recommendation::RequestChanges => write!(f, "REQUEST_CHANGES"),
            Recommendation::Block => write!(f, "BLOCK"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

/// Outcome of the item's test run, when one is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub passed: bool,
    pub total_tests: u32,
    pub failed_tests: u32,
    pub coverage_percent: f64,
}

/// One unit of work. Immutable for the life of the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub diff: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_summary: Option<TestSummary>,
}

impl WorkItem {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        diff: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            diff: diff.into(),
            test_summary: None,
        }
    }

    pub fn with_test_summary(mut self, summary: TestSummary) -> Self {
        self.test_summary = Some(summary);
        self
    }

    /// Lines added by the diff, without the leading `+`.
    pub fn added_lines(&self) -> impl Iterator<Item = &str> {
        self.diff
            .lines()
            .filter(|l| l.starts_with('+') && !l.starts_with("+++"))
            .map(|l| &l[1..])
    }
}

/// Output of one sub-analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemVerdict {
    pub kind: AnalysisKind,
    pub recommendation: Recommendation,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub findings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewMetadata {
    pub reviewed_at: DateTime<Utc>,
    /// Time from scheduling the first sub-analysis to closing the last,
    /// measured on the replay-stable clock.
    pub took_ms: u64,
    pub model: String,
}

/// Aggregate for one successfully analysed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub item_index: usize,
    pub title: String,
    pub overall: Recommendation,
    pub verdicts: Vec<ItemVerdict>,
    pub metadata: ReviewMetadata,
}
