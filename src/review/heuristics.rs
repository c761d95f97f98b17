//! Offline sub-analyses driven by keyword matching and simple thresholds.
//! Used when no API key is configured.

use crate::error::AgentError;
use crate::review::agents::ReviewAgent;
use crate::review::types::{AnalysisKind, ItemVerdict, Recommendation, RiskLevel, WorkItem};

/// Diffs with more added lines than this are asked to be split.
const LARGE_DIFF_LINES: usize = 400;

/// Coverage below this percentage requests changes.
const MIN_COVERAGE_PERCENT: f64 = 60.0;

/// Severity of a matched pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hit {
    Blocking,
    Advisory,
}

const SECURITY_PATTERNS: &[(&str, &str, Hit)] = &[
    ("password =", "hard-coded password", Hit::Blocking),
    ("secret_key", "hard-coded secret key", Hit::Blocking),
    ("api_key =", "hard-coded API key", Hit::Blocking),
    ("eval(", "dynamic code evaluation", Hit::Blocking),
    ("exec(", "dynamic code execution", Hit::Blocking),
    ("md5", "weak hash function (md5)", Hit::Advisory),
    ("sha1", "weak hash function (sha1)", Hit::Advisory),
    ("\"select ", "raw SQL string", Hit::Advisory),
    ("verify=false", "TLS verification disabled", Hit::Advisory),
    ("danger_accept_invalid_certs", "TLS verification disabled", Hit::Advisory),
];

const CODE_SMELLS: &[(&str, &str)] = &[
    ("todo", "unresolved TODO"),
    ("fixme", "unresolved FIXME"),
    ("println!", "debug print left in"),
    ("console.log", "debug print left in"),
    ("dbg!", "debug macro left in"),
    (".unwrap()", "unchecked unwrap"),
];

pub struct HeuristicAgent;

impl HeuristicAgent {
    fn code_quality(item: &WorkItem) -> ItemVerdict {
        let added: Vec<String> = item.added_lines().map(str::to_lowercase).collect();
        let mut findings: Vec<String> = Vec::new();

        for &(needle, label) in CODE_SMELLS {
            let count = added.iter().filter(|l| l.contains(needle)).count();
            if count > 0 {
                findings.push(format!("{label} ({count}x)"));
            }
        }
        let large = added.len() > LARGE_DIFF_LINES;
        if large {
            findings.push(format!(
                "large change: {} added lines, consider splitting",
                added.len()
            ));
        }

        let (recommendation, risk_level) = if large || findings.len() >= 3 {
            (Recommendation::RequestChanges, RiskLevel::Medium)
        } else if findings.is_empty() {
            (Recommendation::Approve, RiskLevel::Low)
        } else {
            (Recommendation::Approve, RiskLevel::Medium)
        };

        ItemVerdict {
            kind: AnalysisKind::CodeQuality,
            recommendation,
            risk_level,
            findings,
        }
    }

    fn test_quality(item: &WorkItem) -> ItemVerdict {
        let verdict = |recommendation, risk_level, findings: Vec<String>| ItemVerdict {
            kind: AnalysisKind::TestQuality,
            recommendation,
            risk_level,
            findings,
        };

        let Some(summary) = &item.test_summary else {
            return verdict(
                Recommendation::RequestChanges,
                RiskLevel::Medium,
                vec!["no test results provided".into()],
            );
        };

        if summary.failed_tests > 0 || !summary.passed {
            return verdict(
                Recommendation::Block,
                RiskLevel::High,
                vec![format!(
                    "{} of {} tests failing",
                    summary.failed_tests, summary.total_tests
                )],
            );
        }

        let mut findings = Vec::new();
        if summary.total_tests == 0 {
            findings.push("change ships without tests".to_string());
        }
        if summary.coverage_percent < MIN_COVERAGE_PERCENT {
            findings.push(format!(
                "coverage {:.1}% is below {MIN_COVERAGE_PERCENT}%",
                summary.coverage_percent
            ));
        }

        if findings.is_empty() {
            verdict(Recommendation::Approve, RiskLevel::Low, findings)
        } else {
            verdict(Recommendation::RequestChanges, RiskLevel::Medium, findings)
        }
    }

    fn security(item: &WorkItem) -> ItemVerdict {
        let mut findings: Vec<String> = Vec::new();
        let mut worst: Option<Hit> = None;

        for line in item.added_lines() {
            let lower = line.to_lowercase().replace(' ', "");
            let spaced = line.to_lowercase();
            for &(needle, label, hit) in SECURITY_PATTERNS {
                // Patterns containing spaces are matched against the raw line,
                // the rest against the line with whitespace removed.
                let haystack = if needle.contains(' ') { &spaced } else { &lower };
                if haystack.contains(needle) && !findings.iter().any(|f| f == label) {
                    findings.push(label.to_string());
                    if worst != Some(Hit::Blocking) {
                        worst = Some(hit);
                    }
                }
            }
        }

        let (recommendation, risk_level) = match worst {
            Some(Hit::Blocking) => (Recommendation::Block, RiskLevel::High),
            Some(Hit::Advisory) => (Recommendation::RequestChanges, RiskLevel::Medium),
            None => (Recommendation::Approve, RiskLevel::Low),
        };

        ItemVerdict {
            kind: AnalysisKind::Security,
            recommendation,
            risk_level,
            findings,
        }
    }
}

impl ReviewAgent for HeuristicAgent {
    async fn analyze(
        &self,
        kind: AnalysisKind,
        item: &WorkItem,
    ) -> Result<ItemVerdict, AgentError> {
        Ok(match kind {
            AnalysisKind::CodeQuality => Self::code_quality(item),
            AnalysisKind::TestQuality => Self::test_quality(item),
            AnalysisKind::Security => Self::security(item),
        })
    }

    fn model_name(&self) -> &str {
        "heuristic"
    }
}
