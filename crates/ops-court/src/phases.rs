//! The phase-contract table: one fixed entry per lifecycle stage.
//!
//! The table is built once at startup (see [`PhaseTable::standard`]) and handed
//! explicitly to the court and the dispatcher.

use crate::laws::LawId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Value every evidence document must carry in `intent_mode`.
pub const INTENT_MODE_SENTINEL: &str = "mandated_contract_or_die";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PhaseId {
    P00,
    P10,
    P20,
    P30,
    P40,
    P50,
    P60,
    P70,
    P80,
    P90,
    P99,
}

impl PhaseId {
    pub const ALL: [PhaseId; 11] = [
        PhaseId::P00,
        PhaseId::P10,
        PhaseId::P20,
        PhaseId::P30,
        PhaseId::P40,
        PhaseId::P50,
        PhaseId::P60,
        PhaseId::P70,
        PhaseId::P80,
        PhaseId::P90,
        PhaseId::P99,
    ];

    /// Phase that locks the execution target for the rest of the flow.
    pub const TARGET_BINDING: PhaseId = PhaseId::P20;
    pub const TEARDOWN: PhaseId = PhaseId::P90;

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseId::P00 => "P00",
            PhaseId::P10 => "P10",
            PhaseId::P20 => "P20",
            PhaseId::P30 => "P30",
            PhaseId::P40 => "P40",
            PhaseId::P50 => "P50",
            PhaseId::P60 => "P60",
            PhaseId::P70 => "P70",
            PhaseId::P80 => "P80",
            PhaseId::P90 => "P90",
            PhaseId::P99 => "P99",
        }
    }

    pub fn is_at_or_after_target_binding(self) -> bool {
        self >= PhaseId::TARGET_BINDING
    }

    /// Checkout and sweep-start phases need a repository to work from.
    pub fn requires_repo_url(self) -> bool {
        matches!(self, PhaseId::P50 | PhaseId::P60)
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PhaseId::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown phase id: {}", s))
    }
}

#[derive(Debug, Clone)]
pub struct PhaseContract {
    pub intent: &'static str,
    pub required_laws: BTreeSet<LawId>,
    pub allowed_commands: BTreeSet<&'static str>,
}

impl PhaseContract {
    fn new(intent: &'static str, laws: &[LawId], commands: &[&'static str]) -> Self {
        Self {
            intent,
            required_laws: laws.iter().copied().collect(),
            allowed_commands: commands.iter().copied().collect(),
        }
    }

    pub fn allows_command(&self, command: &str) -> bool {
        self.allowed_commands.contains(command)
    }
}

/// Immutable phase id -> contract lookup.
#[derive(Debug, Clone)]
pub struct PhaseTable {
    contracts: BTreeMap<PhaseId, PhaseContract>,
}

impl PhaseTable {
    pub fn standard() -> Self {
        use LawId as L;
        let mut contracts = BTreeMap::new();
        contracts.insert(
            PhaseId::P00,
            PhaseContract::new(
                "Precheck constitutional prerequisites before any remote mutation.",
                &[
                    L::CanonicalConfig,
                    L::SingleCanonicalLifecycle,
                    L::NoninteractiveSafety,
                    L::Provenance,
                    L::PhaseEndValidation,
                ],
                &["flow-precheck"],
            ),
        );
        contracts.insert(
            PhaseId::P10,
            PhaseContract::new(
                "Provision pod deterministically or explicitly mark policy skip.",
                &[
                    L::TargetResolution,
                    L::NoninteractiveSafety,
                    L::PhaseContract,
                    L::Provenance,
                    L::PhaseEndValidation,
                ],
                &["pod-up", "provision-policy"],
            ),
        );
        contracts.insert(
            PhaseId::P20,
            PhaseContract::new(
                "Resolve and lock a legal execution target for remaining phases.",
                &[L::TargetResolution, L::PhaseContract, L::Provenance, L::PhaseEndValidation],
                &["target-bind"],
            ),
        );
        contracts.insert(
            PhaseId::P30,
            PhaseContract::new(
                "Prove remote target is reachable and pod is ready.",
                &[L::PhaseContract, L::Provenance, L::PhaseEndValidation],
                &["pod-status"],
            ),
        );
        contracts.insert(
            PhaseId::P40,
            PhaseContract::new(
                "Satisfy bootstrap prerequisites and helper initialization policy.",
                &[L::PhaseContract, L::Provenance, L::PhaseEndValidation],
                &["bootstrap"],
            ),
        );
        contracts.insert(
            PhaseId::P50,
            PhaseContract::new(
                "Checkout repository and validate torch/data contracts for training readiness.",
                &[L::PhaseContract, L::Provenance, L::DocScriptConsistency, L::PhaseEndValidation],
                &["checkout"],
            ),
        );
        contracts.insert(
            PhaseId::P60,
            PhaseContract::new(
                "Start, resume-check, or policy-skip sweep in a declared mode.",
                &[L::PhaseContract, L::Provenance, L::PhaseEndValidation],
                &["sweep-start", "sweep-status", "sweep-policy"],
            ),
        );
        contracts.insert(
            PhaseId::P70,
            PhaseContract::new(
                "Monitor sweep completion state via wait or snapshot path.",
                &[L::PhaseContract, L::Provenance, L::PhaseEndValidation],
                &["sweep-wait", "sweep-status"],
            ),
        );
        contracts.insert(
            PhaseId::P80,
            PhaseContract::new(
                "Fetch artifacts according to explicit fetch policy.",
                &[L::PhaseContract, L::Provenance, L::PhaseEndValidation],
                &["fetch-policy", "fetch-all", "fetch-run"],
            ),
        );
        contracts.insert(
            PhaseId::P90,
            PhaseContract::new(
                "Apply explicit teardown policy without implicit destruction.",
                &[L::ExplicitDestruction, L::PhaseContract, L::Provenance, L::PhaseEndValidation],
                &["teardown-policy", "pod-delete"],
            ),
        );
        contracts.insert(
            PhaseId::P99,
            PhaseContract::new(
                "Emit final constitutional summary only after all prior phases are known.",
                &[L::PhaseContract, L::Provenance, L::PhaseEndValidation],
                &["flow-summary"],
            ),
        );
        Self { contracts }
    }

    pub fn get(&self, phase: PhaseId) -> Option<&PhaseContract> {
        self.contracts.get(&phase)
    }

    /// Resolve a raw phase string; unknown ids and ids without a contract yield `None`.
    pub fn lookup(&self, raw: &str) -> Option<(PhaseId, &PhaseContract)> {
        let phase = raw.parse::<PhaseId>().ok()?;
        self.get(phase).map(|c| (phase, c))
    }
}
