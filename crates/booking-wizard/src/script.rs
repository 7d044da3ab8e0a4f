//! Scripted booking sessions: a YAML list of user actions replayed against a session.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use booking_adapters::OrderService;
use booking_core::ServiceCategory;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use crate::session::{BookingSession, SubmitOutcome};
use crate::wizard::{Step, WizardState};

#[derive(Debug, Clone, Deserialize)]
pub struct SessionScript {
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<ScriptStep>,
}

/// One user turn. Edits apply in field order: `set`, `category`, `country`, `provider`,
/// then the optional `action`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptStep {
    #[serde(default)]
    pub set: BTreeMap<String, JsonValue>,
    pub category: Option<ServiceCategory>,
    pub country: Option<String>,
    pub provider: Option<String>,
    pub action: Option<ScriptAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptAction {
    Advance,
    Retreat,
    Submit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptEntry {
    pub index: usize,
    pub step: Step,
    pub action: Option<ScriptAction>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScriptReport {
    pub entries: Vec<ScriptEntry>,
    pub outcome: Option<SubmitOutcome>,
    pub final_state: WizardState,
}

impl ScriptReport {
    pub fn errors(&self) -> impl Iterator<Item = &ScriptEntry> {
        self.entries.iter().filter(|e| e.error.is_some())
    }

    pub fn order_id(&self) -> Option<&str> {
        self.outcome.as_ref().and_then(SubmitOutcome::order_id)
    }
}

pub fn load_session_script(path: impl AsRef<Path>) -> Result<SessionScript> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Replay every step. Errors are recorded per entry and the script keeps going,
/// the same way a customer would stay on the step and try again.
pub async fn run_script<O: OrderService>(
    session: &BookingSession<O>,
    script: &SessionScript,
) -> ScriptReport {
    let mut entries = Vec::with_capacity(script.steps.len());
    let mut outcome = None;

    for (index, turn) in script.steps.iter().enumerate() {
        let step = session.state().await.current_step();
        let mut error = apply_edits(session, turn).await.err();

        if error.is_none() {
            error = match turn.action {
                Some(ScriptAction::Advance) => session.advance().await.err().map(|e| e.to_string()),
                Some(ScriptAction::Retreat) => session.retreat().await.err().map(|e| e.to_string()),
                Some(ScriptAction::Submit) => {
                    let result = session.submit().await;
                    let error = submit_error(&result);
                    outcome = Some(result);
                    error
                }
                None => None,
            };
        }

        entries.push(ScriptEntry {
            index,
            step,
            action: turn.action,
            error,
        });
    }

    let report = ScriptReport {
        entries,
        outcome,
        final_state: session.state().await,
    };
    info!(
        script = script.name.as_deref().unwrap_or("unnamed"),
        turns = report.entries.len(),
        errors = report.errors().count(),
        order_id = report.order_id().unwrap_or("-"),
        "session script finished"
    );
    report
}

async fn apply_edits<O: OrderService>(
    session: &BookingSession<O>,
    turn: &ScriptStep,
) -> Result<(), String> {
    for (key, value) in &turn.set {
        session
            .update_field(key, value.clone())
            .await
            .map_err(|e| e.to_string())?;
    }
    if let Some(category) = turn.category {
        session
            .select_category(category)
            .await
            .map_err(|e| e.to_string())?;
    }
    if let Some(country) = &turn.country {
        session
            .select_country(Some(country.as_str()))
            .await
            .map_err(|e| e.to_string())?;
    }
    if let Some(provider) = &turn.provider {
        session
            .select_provider(provider)
            .await
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn submit_error(outcome: &SubmitOutcome) -> Option<String> {
    match outcome {
        SubmitOutcome::Succeeded { .. } => None,
        SubmitOutcome::Failed(err) => Some(match &err.detail {
            Some(detail) => format!("{err} ({detail})"),
            None => err.to_string(),
        }),
        SubmitOutcome::Ignored => Some("submission already in flight".to_string()),
        SubmitOutcome::Rejected(failure) => Some(failure.to_string()),
        SubmitOutcome::NotReady { step } => Some(format!("cannot submit from {step}")),
    }
}
