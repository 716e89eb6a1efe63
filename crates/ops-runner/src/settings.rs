use std::path::PathBuf;

pub const DEFAULT_HOST: &str = "lium";
pub const DEFAULT_REMOTE_OUTPUTS_DIR: &str = "/mnt/pod_artifacts/outputs";
pub const DEFAULT_VLLM_BASE_URL: &str = "http://127.0.0.1:8000/v1";
pub const DEFAULT_SWEEP_CSV: &str = "infra_scripts/sweeps/fineweb10B_full_sweep.csv";

/// Environment-derived defaults, resolved once at startup. Explicit flags always win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpsSettings {
    pub default_host: String,
    pub remote_outputs_dir: String,
    pub remote_repo: Option<String>,
    pub vllm_base_url: String,
    pub lock_dir: PathBuf,
    pub sweep_csv: PathBuf,
    pub sweep_out_root: PathBuf,
}

impl Default for OpsSettings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl OpsSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let remote_outputs_dir =
            get("OPS_REMOTE_OUTPUTS_DIR").unwrap_or_else(|| DEFAULT_REMOTE_OUTPUTS_DIR.to_string());
        Self {
            default_host: get("OPS_DEFAULT_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            remote_repo: get("OPS_REMOTE_REPO"),
            vllm_base_url: get("VLLM_BASE_URL")
                .or_else(|| get("OPENAI_API_BASE"))
                .unwrap_or_else(|| DEFAULT_VLLM_BASE_URL.to_string()),
            lock_dir: get("OPS_LOCK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("ops-locks")),
            sweep_csv: PathBuf::from(get("SWEEP_CSV").unwrap_or_else(|| DEFAULT_SWEEP_CSV.to_string())),
            sweep_out_root: PathBuf::from(
                get("SWEEP_OUT_ROOT").unwrap_or_else(|| remote_outputs_dir.clone()),
            ),
            remote_outputs_dir,
        }
    }

    pub fn host(&self, flag: Option<&str>) -> String {
        pick(flag).unwrap_or_else(|| self.default_host.clone())
    }

    pub fn outputs_dir(&self, flag: Option<&str>) -> String {
        pick(flag).unwrap_or_else(|| self.remote_outputs_dir.clone())
    }
}

fn pick(flag: Option<&str>) -> Option<String> {
    flag.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `<outputs>/<run_id>` with exactly one separator.
pub fn remote_run_dir(outputs_dir: &str, run_id: &str) -> String {
    format!("{}/{}", outputs_dir.trim_end_matches('/'), run_id)
}
