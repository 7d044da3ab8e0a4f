//! Six-step booking wizard as an immutable value with pure transitions.
//!
//! Every transition takes `&WizardState` and returns a new state; a failed guard
//! leaves the caller's state untouched. Field validation happens only in
//! [`WizardState::advance`], never in [`WizardState::update_field`].

use std::collections::BTreeMap;
use std::fmt;

use booking_core::{
    available_countries, filter_providers, quote_provider, Discount, OrderSubmission, PriceQuote,
    PriceTable, Provider, ServiceCategory,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Wire keys of the accumulated field bag.
pub mod keys {
    pub const FULL_NAME: &str = "fullName";
    pub const PHONE: &str = "phone";
    pub const EMAIL: &str = "email";
    pub const SERVICE_TYPE: &str = "serviceType";
    pub const DATE: &str = "date";
    pub const TIME: &str = "time";
    pub const ROOMS: &str = "rooms";
    pub const WORKER_COUNT: &str = "workerCount";
    pub const ADDRESS: &str = "address";
    pub const CITY: &str = "city";
    pub const DISTRICT: &str = "district";
    pub const NOTES: &str = "notes";
    pub const AGREE_TO_TERMS: &str = "agreeToTerms";
    pub const SELECTED_CATEGORY: &str = "selectedCategory";
    pub const SELECTED_COUNTRY: &str = "selectedCountry";
    pub const SELECTED_PROVIDER: &str = "selectedProviderId";
}

/// Human-readable label for a field key, used in violation messages.
pub fn field_label(key: &str) -> &str {
    match key {
        keys::FULL_NAME => "Full name",
        keys::PHONE => "Phone number",
        keys::EMAIL => "Email",
        keys::SERVICE_TYPE => "Service type",
        keys::DATE => "Service date",
        keys::TIME => "Service time",
        keys::ROOMS => "Number of rooms",
        keys::WORKER_COUNT => "Number of workers",
        keys::ADDRESS => "Address",
        keys::CITY => "City",
        keys::DISTRICT => "District",
        keys::NOTES => "Notes",
        keys::AGREE_TO_TERMS => "Terms and conditions",
        keys::SELECTED_CATEGORY => "Service category",
        keys::SELECTED_COUNTRY => "Nationality",
        keys::SELECTED_PROVIDER => "Provider",
        other => other,
    }
}

const MIN_NAME_CHARS: usize = 3;
const MIN_ADDRESS_CHARS: usize = 10;
const PHONE_CHARS: std::ops::RangeInclusive<usize> = 7..=20;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    #[default]
    PersonalInfo,
    ServiceCategory,
    ProviderSelection,
    ServiceDetails,
    Address,
    Confirmation,
}

impl Step {
    pub const ALL: [Step; 6] = [
        Step::PersonalInfo,
        Step::ServiceCategory,
        Step::ProviderSelection,
        Step::ServiceDetails,
        Step::Address,
        Step::Confirmation,
    ];

    /// 1-based position shown to the customer.
    pub fn number(self) -> u8 {
        match self {
            Step::PersonalInfo => 1,
            Step::ServiceCategory => 2,
            Step::ProviderSelection => 3,
            Step::ServiceDetails => 4,
            Step::Address => 5,
            Step::Confirmation => 6,
        }
    }

    pub fn from_number(number: u8) -> Option<Step> {
        Step::ALL.iter().copied().find(|s| s.number() == number)
    }

    pub fn next(self) -> Option<Step> {
        Step::from_number(self.number() + 1)
    }

    pub fn previous(self) -> Option<Step> {
        self.number().checked_sub(1).and_then(Step::from_number)
    }

    pub fn title(self) -> &'static str {
        match self {
            Step::PersonalInfo => "Personal information",
            Step::ServiceCategory => "Service category",
            Step::ProviderSelection => "Provider selection",
            Step::ServiceDetails => "Service details",
            Step::Address => "Address",
            Step::Confirmation => "Confirmation",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({})", self.number(), self.title())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardViolation {
    #[error("{} is required", field_label(.field))]
    MissingField { field: &'static str },
    #[error("{} {reason}", field_label(.field))]
    InvalidFormat { field: &'static str, reason: String },
    #[error("no {category} providers are available for {country}")]
    NoEligibleProvider {
        category: ServiceCategory,
        country: String,
    },
}

impl GuardViolation {
    fn missing(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            field,
            reason: reason.into(),
        }
    }

    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::MissingField { field } | Self::InvalidFormat { field, .. } => Some(field),
            Self::NoEligibleProvider { .. } => None,
        }
    }

    /// Blocking conditions cannot be fixed by editing a field on the current step.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::NoEligibleProvider { .. })
    }
}

/// Unmet predicates for one step. The state that produced it is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{step} is incomplete: {}", join_violations(.violations))]
pub struct ValidationFailure {
    pub step: Step,
    pub violations: Vec<GuardViolation>,
}

fn join_violations(violations: &[GuardViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationFailure {
    pub fn fields(&self) -> Vec<&'static str> {
        self.violations.iter().filter_map(GuardViolation::field).collect()
    }

    pub fn violation_for(&self, field: &str) -> Option<&GuardViolation> {
        self.violations.iter().find(|v| v.field() == Some(field))
    }

    pub fn has_blocking(&self) -> bool {
        self.violations.iter().any(GuardViolation::is_blocking)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdvanceError {
    #[error(transparent)]
    Guard(#[from] ValidationFailure),
    #[error("confirmation is the last step; submit the order to finish")]
    FinalStep,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("choose a service category before picking a provider")]
    CategoryNotSelected,
    #[error("choose a nationality before picking a provider")]
    CountryNotSelected,
    #[error("provider {0} is not in the catalog")]
    UnknownProvider(String),
    #[error("provider {provider_id} is not available as a {category} for {country}")]
    NotInPool {
        provider_id: String,
        category: ServiceCategory,
        country: String,
    },
}

/// Provider and quote shown on the confirmation step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub provider: Provider,
    pub category: ServiceCategory,
    pub quote: PriceQuote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WizardState {
    current_step: Step,
    fields: BTreeMap<String, JsonValue>,
    selected_category: Option<ServiceCategory>,
    selected_country: Option<String>,
    selected_provider_id: Option<String>,
}

impl WizardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_step(&self) -> Step {
        self.current_step
    }

    pub fn fields(&self) -> &BTreeMap<String, JsonValue> {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&JsonValue> {
        self.fields.get(key)
    }

    pub fn selected_category(&self) -> Option<ServiceCategory> {
        self.selected_category
    }

    pub fn selected_country(&self) -> Option<&str> {
        self.selected_country.as_deref()
    }

    pub fn selected_provider_id(&self) -> Option<&str> {
        self.selected_provider_id.as_deref()
    }

    /// Merge a value into the field bag. No validation happens here.
    pub fn update_field(&self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        let mut next = self.clone();
        next.fields.insert(key.into(), value.into());
        next
    }

    /// Switching category drops a provider picked from the old pool.
    pub fn select_category(&self, category: ServiceCategory) -> Self {
        let mut next = self.clone();
        if next.selected_category != Some(category) {
            next.selected_provider_id = None;
        }
        next.selected_category = Some(category);
        next
    }

    /// Switching nationality drops a provider picked for the old one.
    pub fn select_country(&self, country: Option<&str>) -> Self {
        let country = country
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(ToString::to_string);
        let mut next = self.clone();
        if next.selected_country != country {
            next.selected_provider_id = None;
        }
        next.selected_country = country;
        next
    }

    pub fn select_provider(
        &self,
        providers: &[Provider],
        provider_id: &str,
    ) -> Result<Self, SelectionError> {
        let category = self
            .selected_category
            .ok_or(SelectionError::CategoryNotSelected)?;
        let country = self
            .selected_country
            .as_deref()
            .ok_or(SelectionError::CountryNotSelected)?;
        if !providers.iter().any(|p| p.id == provider_id) {
            return Err(SelectionError::UnknownProvider(provider_id.to_string()));
        }
        if !filter_providers(providers, category, Some(country))
            .iter()
            .any(|p| p.id == provider_id)
        {
            return Err(SelectionError::NotInPool {
                provider_id: provider_id.to_string(),
                category,
                country: country.to_string(),
            });
        }
        let mut next = self.clone();
        next.selected_provider_id = Some(provider_id.to_string());
        Ok(next)
    }

    /// Pool for the current category and nationality. Empty until a category is chosen.
    pub fn eligible_providers<'a>(&self, providers: &'a [Provider]) -> Vec<&'a Provider> {
        match self.selected_category {
            Some(category) => filter_providers(providers, category, self.selected_country()),
            None => Vec::new(),
        }
    }

    pub fn available_countries(&self, providers: &[Provider]) -> Vec<String> {
        self.selected_category
            .map(|category| available_countries(providers, category))
            .unwrap_or_default()
    }

    pub fn selected_provider<'a>(&self, providers: &'a [Provider]) -> Option<&'a Provider> {
        let id = self.selected_provider_id.as_deref()?;
        self.eligible_providers(providers)
            .into_iter()
            .find(|p| p.id == id)
    }

    /// Evaluate the guard of the current step and move one step forward.
    pub fn advance(&self, providers: &[Provider]) -> Result<Self, AdvanceError> {
        let violations = check_step(self, self.current_step, providers);
        if !violations.is_empty() {
            return Err(ValidationFailure {
                step: self.current_step,
                violations,
            }
            .into());
        }
        let next_step = self.current_step.next().ok_or(AdvanceError::FinalStep)?;
        let mut next = self.clone();
        next.current_step = next_step;
        Ok(next)
    }

    /// Step back one step, keeping every entered field. A no-op on step 1.
    pub fn retreat(&self) -> Self {
        let mut next = self.clone();
        if let Some(previous) = self.current_step.previous() {
            next.current_step = previous;
        }
        next
    }

    /// Re-run every guard in order and report the first failing step.
    pub fn validate_all(&self, providers: &[Provider]) -> Result<(), ValidationFailure> {
        for step in Step::ALL {
            let violations = check_step(self, step, providers);
            if !violations.is_empty() {
                return Err(ValidationFailure { step, violations });
            }
        }
        Ok(())
    }

    pub fn summary(
        &self,
        providers: &[Provider],
        discounts: &[Discount],
        prices: &PriceTable,
        now: DateTime<Utc>,
    ) -> Option<OrderSummary> {
        let category = self.selected_category?;
        let provider = self.selected_provider(providers)?;
        Some(OrderSummary {
            provider: provider.clone(),
            category,
            quote: quote_provider(provider, category, prices, discounts, now),
        })
    }

    /// Freeze the accumulated state into the order payload, priced at `now`.
    pub fn assemble_order(
        &self,
        providers: &[Provider],
        discounts: &[Discount],
        prices: &PriceTable,
        now: DateTime<Utc>,
    ) -> Result<(OrderSubmission, OrderSummary), ValidationFailure> {
        self.validate_all(providers)?;
        let fail = |step: Step| move |violation: GuardViolation| ValidationFailure {
            step,
            violations: vec![violation],
        };

        let summary = self
            .summary(providers, discounts, prices, now)
            .ok_or_else(|| {
                fail(Step::ProviderSelection)(GuardViolation::missing(keys::SELECTED_PROVIDER))
            })?;
        let country = self
            .selected_country
            .clone()
            .ok_or_else(|| {
                fail(Step::ProviderSelection)(GuardViolation::missing(keys::SELECTED_COUNTRY))
            })?;

        let submission = OrderSubmission {
            full_name: self.required_text(keys::FULL_NAME).map_err(fail(Step::PersonalInfo))?,
            phone: self.required_text(keys::PHONE).map_err(fail(Step::PersonalInfo))?,
            email: self.optional_text(keys::EMAIL),
            service_category: summary.category,
            provider_id: summary.provider.id.clone(),
            nationality: country,
            service_type: self
                .required_text(keys::SERVICE_TYPE)
                .map_err(fail(Step::ServiceDetails))?,
            date: self.required_date(keys::DATE).map_err(fail(Step::ServiceDetails))?,
            time: self
                .required_time(keys::TIME)
                .map_err(fail(Step::ServiceDetails))?
                .format("%H:%M")
                .to_string(),
            rooms: self.required_count(keys::ROOMS).map_err(fail(Step::ServiceDetails))?,
            worker_count: self
                .required_count(keys::WORKER_COUNT)
                .map_err(fail(Step::ServiceDetails))?,
            address: self.required_text(keys::ADDRESS).map_err(fail(Step::Address))?,
            city: self.required_text(keys::CITY).map_err(fail(Step::Address))?,
            district: self.optional_text(keys::DISTRICT),
            notes: self.optional_text(keys::NOTES),
            amount: summary.quote.final_price,
            agree_to_terms: self.agreed_to_terms().is_ok(),
        };
        Ok((submission, summary))
    }

    fn optional_text(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            JsonValue::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn required_text(&self, key: &'static str) -> Result<String, GuardViolation> {
        self.optional_text(key)
            .ok_or_else(|| GuardViolation::missing(key))
    }

    fn text_with_min_chars(&self, key: &'static str, min: usize) -> Result<String, GuardViolation> {
        let text = self.required_text(key)?;
        if text.chars().count() < min {
            return Err(GuardViolation::invalid(
                key,
                format!("must be at least {min} characters"),
            ));
        }
        Ok(text)
    }

    fn phone(&self) -> Result<String, GuardViolation> {
        let phone = self.required_text(keys::PHONE)?;
        if !is_valid_phone(&phone) {
            return Err(GuardViolation::invalid(
                keys::PHONE,
                format!(
                    "must be {} to {} characters of digits, spaces, +, - or parentheses",
                    PHONE_CHARS.start(),
                    PHONE_CHARS.end()
                ),
            ));
        }
        Ok(phone)
    }

    fn required_count(&self, key: &'static str) -> Result<u32, GuardViolation> {
        let value = self.fields.get(key).ok_or_else(|| GuardViolation::missing(key))?;
        let parsed = match value {
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            JsonValue::String(s) if s.trim().is_empty() => {
                return Err(GuardViolation::missing(key));
            }
            JsonValue::String(s) => s.trim().parse::<i64>().ok(),
            JsonValue::Null => return Err(GuardViolation::missing(key)),
            _ => None,
        };
        let count = parsed.ok_or_else(|| GuardViolation::invalid(key, "must be a whole number"))?;
        if count < 1 {
            return Err(GuardViolation::invalid(key, "must be at least 1"));
        }
        u32::try_from(count).map_err(|_| GuardViolation::invalid(key, "is too large"))
    }

    fn required_date(&self, key: &'static str) -> Result<NaiveDate, GuardViolation> {
        let text = self.required_text(key)?;
        NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .map_err(|_| GuardViolation::invalid(key, "must be a date like 2026-01-31"))
    }

    fn required_time(&self, key: &'static str) -> Result<NaiveTime, GuardViolation> {
        let text = self.required_text(key)?;
        NaiveTime::parse_from_str(&text, "%H:%M")
            .map_err(|_| GuardViolation::invalid(key, "must be a time like 09:30"))
    }

    fn agreed_to_terms(&self) -> Result<(), GuardViolation> {
        match self.fields.get(keys::AGREE_TO_TERMS) {
            Some(JsonValue::Bool(true)) => Ok(()),
            None | Some(JsonValue::Null) => Err(GuardViolation::missing(keys::AGREE_TO_TERMS)),
            Some(_) => Err(GuardViolation::invalid(
                keys::AGREE_TO_TERMS,
                "must be accepted",
            )),
        }
    }
}

pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_CHARS.contains(&phone.chars().count())
        && phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' '))
}

fn collect<T>(out: &mut Vec<GuardViolation>, result: Result<T, GuardViolation>) {
    if let Err(violation) = result {
        out.push(violation);
    }
}

/// All unmet predicates of `step` for `state`; empty means the guard passes.
pub fn check_step(state: &WizardState, step: Step, providers: &[Provider]) -> Vec<GuardViolation> {
    let mut out = Vec::new();
    match step {
        Step::PersonalInfo => {
            collect(&mut out, state.text_with_min_chars(keys::FULL_NAME, MIN_NAME_CHARS));
            collect(&mut out, state.phone());
        }
        Step::ServiceCategory => {
            if state.selected_category.is_none() {
                out.push(GuardViolation::missing(keys::SELECTED_CATEGORY));
            }
        }
        Step::ProviderSelection => check_provider_selection(state, providers, &mut out),
        Step::ServiceDetails => {
            collect(&mut out, state.required_text(keys::SERVICE_TYPE));
            collect(&mut out, state.required_date(keys::DATE));
            collect(&mut out, state.required_time(keys::TIME));
            collect(&mut out, state.required_count(keys::ROOMS));
            collect(&mut out, state.required_count(keys::WORKER_COUNT));
        }
        Step::Address => {
            collect(&mut out, state.text_with_min_chars(keys::ADDRESS, MIN_ADDRESS_CHARS));
            collect(&mut out, state.required_text(keys::CITY));
        }
        Step::Confirmation => collect(&mut out, state.agreed_to_terms()),
    }
    out
}

fn check_provider_selection(
    state: &WizardState,
    providers: &[Provider],
    out: &mut Vec<GuardViolation>,
) {
    let Some(category) = state.selected_category else {
        out.push(GuardViolation::missing(keys::SELECTED_CATEGORY));
        return;
    };
    let Some(country) = state.selected_country() else {
        out.push(GuardViolation::missing(keys::SELECTED_COUNTRY));
        return;
    };

    let pool = filter_providers(providers, category, Some(country));
    if pool.is_empty() {
        out.push(GuardViolation::NoEligibleProvider {
            category,
            country: country.to_string(),
        });
    }
    match state.selected_provider_id() {
        None => out.push(GuardViolation::missing(keys::SELECTED_PROVIDER)),
        Some(id) if !pool.iter().any(|p| p.id == id) => out.push(GuardViolation::invalid(
            keys::SELECTED_PROVIDER,
            "is no longer available for this category and nationality",
        )),
        Some(_) => {}
    }
}
