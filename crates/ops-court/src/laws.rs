use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named invariants a phase must demonstrably satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LawId {
    #[serde(rename = "LAW_1_CANONICAL_CONFIG")]
    CanonicalConfig,
    #[serde(rename = "LAW_2_SINGLE_CANONICAL_LIFECYCLE")]
    SingleCanonicalLifecycle,
    #[serde(rename = "LAW_3_TARGET_RESOLUTION")]
    TargetResolution,
    #[serde(rename = "LAW_4_NONINTERACTIVE_SAFETY")]
    NoninteractiveSafety,
    #[serde(rename = "LAW_5_PHASE_CONTRACT")]
    PhaseContract,
    #[serde(rename = "LAW_6_PROVENANCE")]
    Provenance,
    #[serde(rename = "LAW_7_EXPLICIT_DESTRUCTION")]
    ExplicitDestruction,
    #[serde(rename = "LAW_8_DOC_SCRIPT_CONSISTENCY")]
    DocScriptConsistency,
    #[serde(rename = "LAW_9_PHASE_END_CONSTITUTIONAL_VALIDATION")]
    PhaseEndValidation,
}

impl LawId {
    pub const ALL: [LawId; 9] = [
        LawId::CanonicalConfig,
        LawId::SingleCanonicalLifecycle,
        LawId::TargetResolution,
        LawId::NoninteractiveSafety,
        LawId::PhaseContract,
        LawId::Provenance,
        LawId::ExplicitDestruction,
        LawId::DocScriptConsistency,
        LawId::PhaseEndValidation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LawId::CanonicalConfig => "LAW_1_CANONICAL_CONFIG",
            LawId::SingleCanonicalLifecycle => "LAW_2_SINGLE_CANONICAL_LIFECYCLE",
            LawId::TargetResolution => "LAW_3_TARGET_RESOLUTION",
            LawId::NoninteractiveSafety => "LAW_4_NONINTERACTIVE_SAFETY",
            LawId::PhaseContract => "LAW_5_PHASE_CONTRACT",
            LawId::Provenance => "LAW_6_PROVENANCE",
            LawId::ExplicitDestruction => "LAW_7_EXPLICIT_DESTRUCTION",
            LawId::DocScriptConsistency => "LAW_8_DOC_SCRIPT_CONSISTENCY",
            LawId::PhaseEndValidation => "LAW_9_PHASE_END_CONSTITUTIONAL_VALIDATION",
        }
    }
}

impl fmt::Display for LawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LawId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LawId::ALL
            .iter()
            .copied()
            .find(|law| law.as_str() == s)
            .ok_or_else(|| format!("unknown law id: {}", s))
    }
}
