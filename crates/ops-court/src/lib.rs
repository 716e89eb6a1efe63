//! Phase-contract compliance: laws, the phase table, evidence documents and the
//! court that turns evidence into verdicts.

pub mod court;
pub mod evidence;
pub mod laws;
pub mod phases;
pub mod verdict;

pub use court::{adjudicate, Assessment, Findings, PhaseCourt, UnverifiedReason, Violation};
pub use evidence::{write_evidence, FlowIdentity, PhaseEvidence, TeardownMode};
pub use laws::LawId;
pub use phases::{PhaseContract, PhaseId, PhaseTable, INTENT_MODE_SENTINEL};
pub use verdict::{Verdict, VerdictStatus};
