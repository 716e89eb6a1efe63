//! Evidence documents: the per-phase record the court adjudicates.
//!
//! Evidence is append-only. A phase that runs again writes a new file; an existing
//! evidence file or flow-start snapshot is never rewritten.

use crate::laws::LawId;
use crate::phases::{PhaseId, PhaseTable, INTENT_MODE_SENTINEL};
use anyhow::{anyhow, Result};
use ops_core::{atomic_write_new, sha256_file, short_digest, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

pub const REQUIRED_FIELDS: [&str; 12] = [
    "flow_id",
    "phase_id",
    "active_config_path",
    "active_config_sha256",
    "command_name",
    "command_rc",
    "phase_status",
    "transport_hint",
    "intent_mode",
    "contract_intent",
    "applicable_laws",
    "flow_start_artifact",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeardownMode {
    Keep,
    Delete,
}

impl TeardownMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "keep" => Some(TeardownMode::Keep),
            "delete" => Some(TeardownMode::Delete),
            _ => None,
        }
    }
}

/// Values that stay fixed for the whole flow and anchor drift detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowIdentity {
    pub flow_id: String,
    pub config_path: String,
    pub config_sha256: String,
}

impl FlowIdentity {
    /// Hash the active config; generate a flow id when none is given.
    pub fn from_config(config_path: &Path, flow_id: Option<String>) -> CoreResult<Self> {
        let config_sha256 = sha256_file(config_path)?;
        let flow_id = flow_id.unwrap_or_else(|| {
            format!(
                "flow_{}_{}",
                chrono::Utc::now().format("%Y%m%dT%H%M%SZ"),
                short_digest(&config_sha256, 12)
            )
        });
        Ok(Self {
            flow_id,
            config_path: config_path.display().to_string(),
            config_sha256,
        })
    }

    /// Recover the identity recorded in a flow-start snapshot.
    pub fn from_snapshot(snapshot: &Map<String, Value>) -> Result<Self> {
        let flow_id = text_field(snapshot, "flow_id");
        if flow_id.is_empty() {
            return Err(anyhow!("flow-start snapshot has no flow_id"));
        }
        Ok(Self {
            flow_id,
            config_path: text_field(snapshot, "active_config_path"),
            config_sha256: text_field(snapshot, "active_config_sha256"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseEvidence {
    pub flow_id: String,
    pub phase_id: PhaseId,
    pub active_config_path: String,
    pub active_config_sha256: String,
    pub command_name: String,
    pub command_rc: i64,
    pub phase_status: String,
    pub transport_hint: String,
    pub intent_mode: String,
    pub contract_intent: String,
    pub applicable_laws: Vec<LawId>,
    pub flow_start_artifact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lium_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ops_default_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown_mode: Option<TeardownMode>,
    pub recorded_at: String,
}

impl PhaseEvidence {
    /// Evidence skeleton bound to the phase's contract: intent text and laws come
    /// from the table, never from the caller.
    pub fn for_phase(
        table: &PhaseTable,
        phase: PhaseId,
        flow: &FlowIdentity,
        flow_start_artifact: &Path,
        command_name: &str,
    ) -> Result<Self> {
        let contract = table
            .get(phase)
            .ok_or_else(|| anyhow!("no contract registered for phase {}", phase))?;
        Ok(Self {
            flow_id: flow.flow_id.clone(),
            phase_id: phase,
            active_config_path: flow.config_path.clone(),
            active_config_sha256: flow.config_sha256.clone(),
            command_name: command_name.to_string(),
            command_rc: 0,
            phase_status: "ok".to_string(),
            transport_hint: "ssh".to_string(),
            intent_mode: INTENT_MODE_SENTINEL.to_string(),
            contract_intent: contract.intent.to_string(),
            applicable_laws: contract.required_laws.iter().copied().collect(),
            flow_start_artifact: flow_start_artifact.display().to_string(),
            lium_target: None,
            ops_default_host: None,
            repo_url: None,
            teardown_mode: None,
            recorded_at: ops_core::utc_now_compact(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Write an evidence document, refusing to replace an existing one.
pub fn write_evidence(path: &Path, evidence: &PhaseEvidence) -> Result<()> {
    atomic_write_new(path, &evidence.to_bytes()?)?;
    Ok(())
}

/// Load a JSON document that must be an object.
pub fn load_object(path: &Path) -> Result<Map<String, Value>> {
    match ops_core::read_json_file(path)? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!(
            "{} is not a JSON object (found {})",
            path.display(),
            json_kind(&other)
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Field rendered as text without trimming; absent and null fields are empty.
pub fn raw_field(doc: &Map<String, Value>, key: &str) -> String {
    match doc.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn text_field(doc: &Map<String, Value>, key: &str) -> String {
    raw_field(doc, key).trim().to_string()
}
