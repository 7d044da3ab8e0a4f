//! Booking wizard state machine, order submission coordinator and runtime configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use booking_core::PriceTable;
use serde::Deserialize;

pub mod script;
pub mod session;
pub mod wizard;

pub use script::{
    load_session_script, run_script, ScriptAction, ScriptEntry, ScriptReport, ScriptStep,
    SessionScript,
};
pub use session::{
    BookingSession, Clock, FixedClock, SessionError, SubmissionError, SubmissionPhase,
    SubmitOutcome, SystemClock,
};
pub use wizard::{
    check_step, field_label, keys, AdvanceError, GuardViolation, OrderSummary, SelectionError,
    Step, ValidationFailure, WizardState,
};

pub const CRATE_NAME: &str = "booking-wizard";

#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub workspace_root: PathBuf,
    pub api_base_url: Option<String>,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl BookingConfig {
    pub fn from_env() -> Self {
        Self {
            workspace_root: std::env::var("BOOKING_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            api_base_url: std::env::var("BOOKING_API_BASE_URL")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            http_timeout_secs: std::env::var("BOOKING_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            user_agent: std::env::var("BOOKING_USER_AGENT")
                .unwrap_or_else(|_| "booking-cli/0.1".to_string()),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn catalog_bundle_path(&self) -> PathBuf {
        self.workspace_root
            .join("fixtures")
            .join("catalog")
            .join("bundle.json")
    }

    pub fn pricing_rules_path(&self) -> PathBuf {
        self.workspace_root.join("rules").join("pricing.yaml")
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PricingRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    defaults: PriceTable,
}

/// Price table from a rules file. A missing file means the built-in defaults.
pub async fn load_price_table(path: impl AsRef<Path>) -> Result<PriceTable> {
    let path = path.as_ref();
    if !tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("checking {}", path.display()))?
    {
        return Ok(PriceTable::default());
    }
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let rules: PricingRulesFile =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(rules.defaults)
}
