use crate::court::Assessment;
use crate::laws::LawId;
use ops_core::{atomic_write_json_pretty, utc_now_compact, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENGINE_NAME: &str = "ops-court";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Pass,
    Fail,
    Unverified,
}

impl VerdictStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VerdictStatus::Pass => "pass",
            VerdictStatus::Fail => "fail",
            VerdictStatus::Unverified => "unverified",
        }
    }
}

/// Fields are declared in key order so the written document has sorted keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub checked_at: String,
    pub engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    pub pass: bool,
    pub phase: String,
    pub remediation: String,
    pub status: VerdictStatus,
    pub violated_laws: Vec<LawId>,
    pub violations: Vec<String>,
}

impl Verdict {
    pub fn from_assessment(phase: &str, assessment: &Assessment, evidence_path: &Path) -> Self {
        match assessment {
            Assessment::Unverified(reason) => Verdict {
                checked_at: utc_now_compact(),
                engine: ENGINE_NAME.to_string(),
                evidence: None,
                pass: false,
                phase: phase.to_string(),
                remediation: reason.remediation().to_string(),
                status: VerdictStatus::Unverified,
                violated_laws: vec![LawId::Provenance],
                violations: vec![reason.code().to_string()],
            },
            Assessment::Checked(findings) => {
                let pass = findings.is_clean();
                Verdict {
                    checked_at: utc_now_compact(),
                    engine: ENGINE_NAME.to_string(),
                    evidence: Some(evidence_path.display().to_string()),
                    pass,
                    phase: phase.to_string(),
                    remediation: if pass {
                        "none".to_string()
                    } else {
                        "inspect phase verdict artifacts and rerun flow".to_string()
                    },
                    status: if pass {
                        VerdictStatus::Pass
                    } else {
                        VerdictStatus::Fail
                    },
                    violated_laws: findings.violated_laws(),
                    violations: findings.codes(),
                }
            }
        }
    }

    /// Idempotent overwrite; the verdict for a phase always reflects the latest check.
    pub fn write(&self, path: &Path) -> CoreResult<()> {
        atomic_write_json_pretty(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::court::UnverifiedReason;

    #[test]
    fn unverified_verdict_names_provenance() {
        let verdict = Verdict::from_assessment(
            "P30",
            &Assessment::Unverified(UnverifiedReason::MissingEvidence),
            Path::new("/nope/P30.json"),
        );
        assert_eq!(verdict.status, VerdictStatus::Unverified);
        assert!(!verdict.pass);
        assert_eq!(verdict.violations, vec!["missing_evidence_file".to_string()]);
        assert_eq!(verdict.violated_laws, vec![LawId::Provenance]);
        assert!(verdict.evidence.is_none());
    }

    #[test]
    fn serialized_keys_are_sorted() {
        let verdict = Verdict::from_assessment(
            "P10",
            &Assessment::Unverified(UnverifiedReason::InvalidEvidenceJson),
            Path::new("e.json"),
        );
        let text = serde_json::to_string_pretty(&verdict).unwrap();
        let keys: Vec<&str> = text
            .lines()
            .filter_map(|l| l.trim_start().strip_prefix('"'))
            .filter_map(|l| l.split('"').next())
            .filter(|k| {
                [
                    "checked_at",
                    "engine",
                    "pass",
                    "phase",
                    "remediation",
                    "status",
                    "violated_laws",
                    "violations",
                ]
                .contains(k)
            })
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(text.contains("\"status\": \"unverified\""));
        assert!(text.contains("\"LAW_6_PROVENANCE\""));
    }
}
