//! The phase court: adjudicates one evidence document against the phase table and
//! the flow-start snapshot.
//!
//! Checks accumulate; none of them short-circuits the others, so a single verdict
//! lists every problem with a phase at once. The only early exit is an expected
//! phase with no registered contract, since nothing else can be checked without it.

use crate::evidence::{load_object, raw_field, text_field, TeardownMode, REQUIRED_FIELDS};
use crate::laws::LawId;
use crate::phases::{PhaseId, PhaseTable, INTENT_MODE_SENTINEL};
use crate::verdict::Verdict;
use ops_core::CoreResult;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub code: String,
    pub law: LawId,
}

/// Why the court could not examine the evidence at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnverifiedReason {
    MissingEvidence,
    InvalidEvidenceJson,
}

impl UnverifiedReason {
    pub fn code(self) -> &'static str {
        match self {
            UnverifiedReason::MissingEvidence => "missing_evidence_file",
            UnverifiedReason::InvalidEvidenceJson => "invalid_evidence_json",
        }
    }

    pub fn remediation(self) -> &'static str {
        match self {
            UnverifiedReason::MissingEvidence => "re-run the failed phase to regenerate evidence",
            UnverifiedReason::InvalidEvidenceJson => "fix evidence writer and re-run flow",
        }
    }
}

/// Outcome of examining one evidence file. "Could not check" is a distinct state,
/// never an empty violation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    Checked(Findings),
    Unverified(UnverifiedReason),
}

pub struct PhaseCourt<'a> {
    table: &'a PhaseTable,
}

/// Violations in check order, plus laws implicated without a violation of their own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Findings {
    pub violations: Vec<Violation>,
    implicated: BTreeSet<LawId>,
}

impl Findings {
    fn add(&mut self, code: impl Into<String>, law: LawId) {
        self.violations.push(Violation {
            code: code.into(),
            law,
        });
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn codes(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.code.clone()).collect()
    }

    /// Sorted, de-duplicated.
    pub fn violated_laws(&self) -> Vec<LawId> {
        let mut laws = self.implicated.clone();
        laws.extend(self.violations.iter().map(|v| v.law));
        laws.into_iter().collect()
    }
}

impl<'a> PhaseCourt<'a> {
    pub fn new(table: &'a PhaseTable) -> Self {
        Self { table }
    }

    pub fn assess_file(&self, evidence_path: &Path, expected_phase: &str) -> Assessment {
        if !evidence_path.exists() {
            return Assessment::Unverified(UnverifiedReason::MissingEvidence);
        }
        match load_object(evidence_path) {
            Ok(evidence) => Assessment::Checked(self.assess(&evidence, expected_phase)),
            Err(_) => Assessment::Unverified(UnverifiedReason::InvalidEvidenceJson),
        }
    }

    pub fn assess(&self, evidence: &Map<String, Value>, expected_phase: &str) -> Findings {
        let mut findings = Findings::default();

        let contract = match self.table.lookup(expected_phase) {
            Some((_, contract)) => contract,
            None => {
                findings.add("unknown_phase_contract", LawId::PhaseContract);
                return findings;
            }
        };

        for field in REQUIRED_FIELDS {
            if !evidence.contains_key(field) {
                findings.add(format!("missing_field:{}", field), LawId::Provenance);
            }
        }

        let phase_id = raw_field(evidence, "phase_id");
        if phase_id != expected_phase {
            findings.add("phase_mismatch", LawId::PhaseContract);
        }

        if text_field(evidence, "intent_mode") != INTENT_MODE_SENTINEL {
            findings.add("intent_mode_violation", LawId::PhaseContract);
        }
        if text_field(evidence, "contract_intent") != contract.intent {
            findings.add("contract_intent_mismatch", LawId::PhaseContract);
        }

        if !contract.allows_command(&text_field(evidence, "command_name")) {
            findings.add("intent_command_mismatch", LawId::PhaseContract);
        }

        // Declared laws are taken at face value; they are not re-derived from
        // what the command actually did.
        let declared: BTreeSet<String> = match evidence.get("applicable_laws") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.trim().to_string(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                })
                .filter(|s| !s.is_empty())
                .collect(),
            _ => {
                findings.add("applicable_laws_not_list", LawId::Provenance);
                BTreeSet::new()
            }
        };
        let missing_laws: Vec<LawId> = contract
            .required_laws
            .iter()
            .copied()
            .filter(|law| !declared.contains(law.as_str()))
            .collect();
        if !missing_laws.is_empty() {
            for law in &missing_laws {
                findings.add(format!("missing_applicable_law:{}", law), *law);
            }
            // A coverage gap implicates the whole contract, not only the absent laws.
            findings.implicated.extend(contract.required_laws.iter().copied());
        }

        if raw_field(evidence, "phase_status") != "ok" {
            findings.add("phase_status_not_ok", LawId::PhaseContract);
        }
        if command_rc(evidence.get("command_rc")) != 0 {
            findings.add("command_rc_non_zero", LawId::PhaseContract);
        }

        let config_sha = text_field(evidence, "active_config_sha256");
        if config_sha.is_empty() {
            findings.add("missing_config_sha256", LawId::Provenance);
        }

        let flow_start = self.check_flow_start_link(evidence, &mut findings);

        let phase = phase_id.parse::<PhaseId>().ok();
        if let Some(start) = flow_start.filter(|s| !s.is_empty()) {
            check_drift(evidence, &start, phase, &config_sha, &mut findings);
        }

        if let Some(phase) = phase {
            check_phase_rules(evidence, phase, &mut findings);
        }

        findings
    }

    fn check_flow_start_link(
        &self,
        evidence: &Map<String, Value>,
        findings: &mut Findings,
    ) -> Option<Map<String, Value>> {
        let raw = text_field(evidence, "flow_start_artifact");
        if raw.is_empty() {
            findings.add("missing_flow_start_artifact", LawId::Provenance);
            return None;
        }
        let path = Path::new(&raw);
        if !path.exists() {
            findings.add("flow_start_missing", LawId::Provenance);
            return None;
        }
        match load_object(path) {
            Ok(start) => Some(start),
            Err(_) => {
                findings.add("flow_start_invalid_json", LawId::Provenance);
                None
            }
        }
    }
}

fn check_drift(
    evidence: &Map<String, Value>,
    start: &Map<String, Value>,
    phase: Option<PhaseId>,
    config_sha: &str,
    findings: &mut Findings,
) {
    let start_flow_id = text_field(start, "flow_id");
    if !start_flow_id.is_empty() && start_flow_id != text_field(evidence, "flow_id") {
        findings.add("flow_id_mismatch", LawId::Provenance);
    }

    let start_sha = text_field(start, "active_config_sha256");
    if !start_sha.is_empty() && !config_sha.is_empty() && start_sha != config_sha {
        findings.add("config_sha_drift", LawId::CanonicalConfig);
    }

    if phase.map_or(false, PhaseId::is_at_or_after_target_binding) {
        if differs_when_both_set(start, evidence, "lium_target") {
            findings.add("target_drift_from_flow_start", LawId::TargetResolution);
        }
        if differs_when_both_set(start, evidence, "ops_default_host") {
            findings.add("fallback_host_drift_from_flow_start", LawId::TargetResolution);
        }
    }
}

fn differs_when_both_set(start: &Map<String, Value>, current: &Map<String, Value>, key: &str) -> bool {
    let before = text_field(start, key);
    let now = text_field(current, key);
    !before.is_empty() && !now.is_empty() && before != now
}

fn check_phase_rules(evidence: &Map<String, Value>, phase: PhaseId, findings: &mut Findings) {
    if phase == PhaseId::TARGET_BINDING
        && text_field(evidence, "lium_target").is_empty()
        && text_field(evidence, "ops_default_host").is_empty()
    {
        findings.add("target_not_resolved", LawId::TargetResolution);
    }

    if phase.requires_repo_url() && text_field(evidence, "repo_url").is_empty() {
        findings.add("repo_url_missing", LawId::PhaseContract);
    }

    if phase == PhaseId::TEARDOWN && TeardownMode::parse(&text_field(evidence, "teardown_mode")).is_none() {
        findings.add("invalid_teardown_mode", LawId::ExplicitDestruction);
    }
}

/// Exit status the evidence claims; anything unreadable counts as a failure.
fn command_rc(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(1),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(1),
        Some(Value::Bool(b)) => i64::from(*b),
        _ => 1,
    }
}

/// Assess `evidence_path`, write the verdict to `output_path`, and return it.
///
/// Evidence problems never surface as errors; the only error is failing to write
/// the verdict itself.
pub fn adjudicate(
    table: &PhaseTable,
    evidence_path: &Path,
    expected_phase: &str,
    output_path: &Path,
) -> CoreResult<Verdict> {
    let court = PhaseCourt::new(table);
    let assessment = court.assess_file(evidence_path, expected_phase);
    let verdict = Verdict::from_assessment(expected_phase, &assessment, evidence_path);
    verdict.write(output_path)?;
    if verdict.pass {
        info!(phase = expected_phase, "phase verdict: pass");
    } else {
        warn!(
            phase = expected_phase,
            status = verdict.status.as_str(),
            violations = ?verdict.violations,
            "phase verdict: not certified"
        );
    }
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::VerdictStatus;
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;

    struct Scratch {
        dir: PathBuf,
    }

    impl Scratch {
        fn new(tag: &str) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "ops_court_{}_{}_{}",
                tag,
                std::process::id(),
                chrono::Utc::now().timestamp_micros()
            ));
            fs::create_dir_all(&dir).expect("scratch dir");
            Self { dir }
        }

        fn write(&self, name: &str, value: &Value) -> PathBuf {
            let path = self.dir.join(name);
            fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
            path
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    fn compliant(table: &PhaseTable, phase: PhaseId, flow_start: &Path) -> Map<String, Value> {
        let contract = table.get(phase).unwrap();
        let laws: Vec<&str> = contract.required_laws.iter().map(|l| l.as_str()).collect();
        let command = *contract.allowed_commands.iter().next().unwrap();
        let doc = json!({
            "flow_id": "flow_1",
            "phase_id": phase.as_str(),
            "active_config_path": "configs/sweep.json",
            "active_config_sha256": "abc",
            "command_name": command,
            "command_rc": 0,
            "phase_status": "ok",
            "transport_hint": "ssh",
            "intent_mode": INTENT_MODE_SENTINEL,
            "contract_intent": contract.intent,
            "applicable_laws": laws,
            "flow_start_artifact": flow_start.display().to_string(),
            "lium_target": "pod-a",
            "ops_default_host": "lium",
            "repo_url": "https://example.invalid/repo.git",
            "teardown_mode": "keep",
        });
        doc.as_object().unwrap().clone()
    }

    fn flow_start(scratch: &Scratch) -> PathBuf {
        scratch.write(
            "flow_start.json",
            &json!({
                "flow_id": "flow_1",
                "phase_id": "P00",
                "active_config_sha256": "abc",
                "lium_target": "pod-a",
                "ops_default_host": "lium",
            }),
        )
    }

    #[test]
    fn compliant_evidence_passes_every_phase() {
        let scratch = Scratch::new("compliant");
        let start = flow_start(&scratch);
        let table = PhaseTable::standard();
        let court = PhaseCourt::new(&table);
        for phase in PhaseId::ALL {
            let findings = court.assess(&compliant(&table, phase, &start), phase.as_str());
            assert!(findings.is_clean(), "{} unexpectedly failed: {:?}", phase, findings.codes());
        }
    }

    #[test]
    fn missing_evidence_is_unverified_and_still_written() {
        let scratch = Scratch::new("missing");
        let table = PhaseTable::standard();
        let out = scratch.dir.join("verdicts").join("P30.verdict.json");
        let verdict =
            adjudicate(&table, &scratch.dir.join("absent.json"), "P30", &out).expect("verdict");
        assert_eq!(verdict.status, VerdictStatus::Unverified);
        assert_eq!(verdict.violations, vec!["missing_evidence_file"]);
        assert_eq!(verdict.violated_laws, vec![LawId::Provenance]);
        let text = fs::read_to_string(&out).expect("verdict file written");
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn unparsable_evidence_is_unverified_not_failed() {
        let scratch = Scratch::new("badjson");
        let path = scratch.dir.join("P30.json");
        fs::write(&path, "{\"flow_id\": ").unwrap();
        let table = PhaseTable::standard();
        let court = PhaseCourt::new(&table);
        assert_eq!(
            court.assess_file(&path, "P30"),
            Assessment::Unverified(UnverifiedReason::InvalidEvidenceJson)
        );
        fs::write(&path, "[1, 2]").unwrap();
        assert_eq!(
            court.assess_file(&path, "P30"),
            Assessment::Unverified(UnverifiedReason::InvalidEvidenceJson)
        );
    }

    #[test]
    fn config_hash_drift_is_detected() {
        let scratch = Scratch::new("drift");
        let start = flow_start(&scratch);
        let table = PhaseTable::standard();
        let mut evidence = compliant(&table, PhaseId::P40, &start);
        evidence.insert("active_config_sha256".into(), json!("def"));
        let findings = PhaseCourt::new(&table).assess(&evidence, "P40");
        assert_eq!(findings.codes(), vec!["config_sha_drift"]);
        assert_eq!(findings.violated_laws(), vec![LawId::CanonicalConfig]);
    }

    #[test]
    fn target_drift_only_applies_from_target_binding_on() {
        let scratch = Scratch::new("target");
        let start = flow_start(&scratch);
        let table = PhaseTable::standard();
        let court = PhaseCourt::new(&table);

        let mut early = compliant(&table, PhaseId::P10, &start);
        early.insert("lium_target".into(), json!("pod-b"));
        assert!(court.assess(&early, "P10").is_clean());

        let mut late = compliant(&table, PhaseId::P70, &start);
        late.insert("lium_target".into(), json!("pod-b"));
        late.insert("ops_default_host".into(), json!("other"));
        assert_eq!(
            court.assess(&late, "P70").codes(),
            vec!["target_drift_from_flow_start", "fallback_host_drift_from_flow_start"]
        );

        let mut unset = compliant(&table, PhaseId::P70, &start);
        unset.insert("lium_target".into(), json!(""));
        assert!(court.assess(&unset, "P70").is_clean(), "drift needs both sides set");
    }

    #[test]
    fn checks_accumulate_instead_of_short_circuiting() {
        let scratch = Scratch::new("accumulate");
        let start = flow_start(&scratch);
        let table = PhaseTable::standard();
        let mut evidence = compliant(&table, PhaseId::P30, &start);
        evidence.remove("transport_hint");
        evidence.insert("intent_mode".into(), json!("best_effort"));
        evidence.insert("command_name".into(), json!("pod-delete"));
        evidence.insert("phase_status".into(), json!("error"));
        evidence.insert("command_rc".into(), json!("2"));
        evidence.insert("flow_id".into(), json!("flow_2"));
        let findings = PhaseCourt::new(&table).assess(&evidence, "P30");
        assert_eq!(
            findings.codes(),
            vec![
                "missing_field:transport_hint",
                "intent_mode_violation",
                "intent_command_mismatch",
                "phase_status_not_ok",
                "command_rc_non_zero",
                "flow_id_mismatch",
            ]
        );
        assert_eq!(
            findings.violated_laws(),
            vec![LawId::PhaseContract, LawId::Provenance]
        );
    }

    #[test]
    fn law_coverage_gap_implicates_the_whole_contract() {
        let scratch = Scratch::new("laws");
        let start = flow_start(&scratch);
        let table = PhaseTable::standard();
        let mut evidence = compliant(&table, PhaseId::P90, &start);
        evidence.insert(
            "applicable_laws".into(),
            json!(["LAW_5_PHASE_CONTRACT", "LAW_6_PROVENANCE"]),
        );
        let findings = PhaseCourt::new(&table).assess(&evidence, "P90");
        assert_eq!(
            findings.codes(),
            vec![
                "missing_applicable_law:LAW_7_EXPLICIT_DESTRUCTION",
                "missing_applicable_law:LAW_9_PHASE_END_CONSTITUTIONAL_VALIDATION",
            ]
        );
        assert_eq!(
            findings.violated_laws(),
            vec![
                LawId::PhaseContract,
                LawId::Provenance,
                LawId::ExplicitDestruction,
                LawId::PhaseEndValidation,
            ]
        );

        evidence.insert("applicable_laws".into(), json!("LAW_5_PHASE_CONTRACT"));
        let findings = PhaseCourt::new(&table).assess(&evidence, "P90");
        assert_eq!(findings.codes()[0], "applicable_laws_not_list");
    }

    #[test]
    fn phase_specific_rules() {
        let scratch = Scratch::new("rules");
        let start = flow_start(&scratch);
        let table = PhaseTable::standard();
        let court = PhaseCourt::new(&table);

        let mut bind = compliant(&table, PhaseId::P20, &start);
        bind.remove("lium_target");
        bind.insert("ops_default_host".into(), json!("  "));
        assert_eq!(court.assess(&bind, "P20").codes(), vec!["target_not_resolved"]);

        let mut checkout = compliant(&table, PhaseId::P50, &start);
        checkout.remove("repo_url");
        assert_eq!(court.assess(&checkout, "P50").codes(), vec!["repo_url_missing"]);

        let mut teardown = compliant(&table, PhaseId::P90, &start);
        teardown.insert("teardown_mode".into(), json!("destroy"));
        let findings = court.assess(&teardown, "P90");
        assert_eq!(findings.codes(), vec!["invalid_teardown_mode"]);
        assert_eq!(findings.violated_laws(), vec![LawId::ExplicitDestruction]);
    }

    #[test]
    fn contract_intent_must_match_the_phase_table() {
        let scratch = Scratch::new("intent");
        let start = flow_start(&scratch);
        let table = PhaseTable::standard();
        let mut evidence = compliant(&table, PhaseId::P40, &start);
        evidence.insert("contract_intent".into(), json!("Do whatever the operator asks."));
        let findings = PhaseCourt::new(&table).assess(&evidence, "P40");
        assert_eq!(findings.codes(), vec!["contract_intent_mismatch"]);
        assert_eq!(findings.violated_laws(), vec![LawId::PhaseContract]);

        evidence.remove("contract_intent");
        let findings = PhaseCourt::new(&table).assess(&evidence, "P40");
        assert_eq!(
            findings.codes(),
            vec!["missing_field:contract_intent", "contract_intent_mismatch"]
        );
        assert_eq!(findings.violated_laws(), vec![LawId::PhaseContract, LawId::Provenance]);
    }

    #[test]
    fn empty_config_hash_is_missing_provenance_not_drift() {
        let scratch = Scratch::new("nosha");
        let start = flow_start(&scratch);
        let table = PhaseTable::standard();
        let mut evidence = compliant(&table, PhaseId::P30, &start);
        evidence.insert("active_config_sha256".into(), json!("   "));
        let findings = PhaseCourt::new(&table).assess(&evidence, "P30");
        assert_eq!(findings.codes(), vec!["missing_config_sha256"]);
        assert_eq!(findings.violated_laws(), vec![LawId::Provenance]);
    }

    #[test]
    fn sweep_launch_requires_repo_url() {
        let scratch = Scratch::new("p60");
        let start = flow_start(&scratch);
        let table = PhaseTable::standard();
        let mut evidence = compliant(&table, PhaseId::P60, &start);
        evidence.insert("repo_url".into(), json!(""));
        let findings = PhaseCourt::new(&table).assess(&evidence, "P60");
        assert_eq!(findings.codes(), vec!["repo_url_missing"]);
        assert_eq!(findings.violated_laws(), vec![LawId::PhaseContract]);
    }

    #[test]
    fn flow_start_linkage_failures() {
        let scratch = Scratch::new("link");
        let table = PhaseTable::standard();
        let court = PhaseCourt::new(&table);

        let mut evidence = compliant(&table, PhaseId::P30, &scratch.dir.join("gone.json"));
        assert_eq!(court.assess(&evidence, "P30").codes(), vec!["flow_start_missing"]);

        evidence.insert("flow_start_artifact".into(), json!(""));
        assert_eq!(
            court.assess(&evidence, "P30").codes(),
            vec!["missing_flow_start_artifact"]
        );

        let broken = scratch.dir.join("broken.json");
        fs::write(&broken, "not json").unwrap();
        evidence.insert("flow_start_artifact".into(), json!(broken.display().to_string()));
        assert_eq!(
            court.assess(&evidence, "P30").codes(),
            vec!["flow_start_invalid_json"]
        );
    }

    #[test]
    fn phase_mismatch_and_unknown_contract() {
        let scratch = Scratch::new("mismatch");
        let start = flow_start(&scratch);
        let table = PhaseTable::standard();
        let court = PhaseCourt::new(&table);
        let evidence = compliant(&table, PhaseId::P30, &start);
        assert!(court.assess(&evidence, "P40").codes().contains(&"phase_mismatch".to_string()));
        let unknown = court.assess(&evidence, "P35");
        assert_eq!(unknown.codes(), vec!["unknown_phase_contract"]);
        assert_eq!(unknown.violated_laws(), vec![LawId::PhaseContract]);
    }

    #[test]
    fn verdicts_are_deterministic_across_runs() {
        let scratch = Scratch::new("determinism");
        let start = flow_start(&scratch);
        let table = PhaseTable::standard();
        let mut evidence = compliant(&table, PhaseId::P60, &start);
        evidence.insert("active_config_sha256".into(), json!("zzz"));
        evidence.remove("repo_url");
        let path = scratch.write("P60.json", &Value::Object(evidence));
        let first = adjudicate(&table, &path, "P60", &scratch.dir.join("v1.json")).unwrap();
        let second = adjudicate(&table, &path, "P60", &scratch.dir.join("v2.json")).unwrap();
        assert_eq!(first.status, VerdictStatus::Fail);
        assert_eq!(first.violations, second.violations);
        assert_eq!(first.violated_laws, second.violated_laws);
        assert_eq!(first.evidence.as_deref(), Some(path.display().to_string().as_str()));
    }

    #[test]
    fn command_rc_parsing() {
        assert_eq!(command_rc(Some(&json!(0))), 0);
        assert_eq!(command_rc(Some(&json!(" 0 "))), 0);
        assert_eq!(command_rc(Some(&json!(false))), 0);
        assert_eq!(command_rc(Some(&json!(0.0))), 0);
        assert_eq!(command_rc(Some(&json!("oops"))), 1);
        assert_eq!(command_rc(Some(&json!(null))), 1);
        assert_eq!(command_rc(None), 1);
    }
}
