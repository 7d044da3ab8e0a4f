//! Core domain model, provider eligibility and discount-aware pricing for the booking flow.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "booking-core";

/// Two-way split of the provider pool, driven by contract type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceCategory {
    Worker,
    Assistant,
}

impl ServiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "worker" | "workers" => Ok(Self::Worker),
            "assistant" | "assistants" => Ok(Self::Assistant),
            other => Err(format!("unknown service category: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractType {
    Hourly,
    Daily,
    Monthly,
    Yearly,
    #[serde(other)]
    Unknown,
}

impl ContractType {
    /// `hourly|daily` book as workers, `monthly|yearly` as assistants.
    pub fn category(self) -> Option<ServiceCategory> {
        match self {
            Self::Hourly | Self::Daily => Some(ServiceCategory::Worker),
            Self::Monthly | Self::Yearly => Some(ServiceCategory::Assistant),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderStatus {
    #[default]
    Available,
    Busy,
    OnLeave,
    Inactive,
    /// Any status this client does not know; never bookable.
    #[serde(other)]
    Unknown,
}

/// Read-only catalog snapshot entry. The booking flow never mutates providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub id: String,
    pub display_name: String,
    pub nationality: String,
    #[serde(default)]
    pub contract_type: Option<ContractType>,
    #[serde(default)]
    pub status: ProviderStatus,
    /// Absent means active; only an explicit `false` disables the provider.
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub base_price: Option<f64>,
    #[serde(default)]
    pub skills: BTreeSet<String>,
}

impl Provider {
    pub fn is_bookable(&self) -> bool {
        self.is_active != Some(false)
            && !matches!(self.status, ProviderStatus::Inactive | ProviderStatus::Unknown)
    }

    pub fn category(&self) -> Option<ServiceCategory> {
        self.contract_type.and_then(ContractType::category)
    }

    pub fn matches_country(&self, country: &str) -> bool {
        self.nationality
            .to_lowercase()
            .contains(&country.to_lowercase())
    }

    pub fn is_eligible(&self, category: ServiceCategory, country: Option<&str>) -> bool {
        self.is_bookable()
            && self.category() == Some(category)
            && country.map_or(true, |c| self.matches_country(c))
    }
}

/// Eligible providers for a category and optional country, in catalog order.
pub fn filter_providers<'a>(
    providers: &'a [Provider],
    category: ServiceCategory,
    country: Option<&str>,
) -> Vec<&'a Provider> {
    providers
        .iter()
        .filter(|p| p.is_eligible(category, country))
        .collect()
}

/// Distinct nationalities among bookable providers of a category, first-seen order.
pub fn available_countries(providers: &[Provider], category: ServiceCategory) -> Vec<String> {
    let mut seen = BTreeSet::new();
    filter_providers(providers, category, None)
        .into_iter()
        .map(|p| p.nationality.trim().to_string())
        .filter(|n| !n.is_empty() && seen.insert(n.to_lowercase()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountTarget {
    Workers,
    Assistants,
    All,
}

impl DiscountTarget {
    pub fn for_category(category: ServiceCategory) -> Self {
        match category {
            ServiceCategory::Worker => Self::Workers,
            ServiceCategory::Assistant => Self::Assistants,
        }
    }

    pub fn applies_to(self, category: ServiceCategory) -> bool {
        self == Self::All || self == Self::for_category(category)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workers => "workers",
            Self::Assistants => "assistants",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discount {
    pub id: String,
    pub discount_type: DiscountType,
    pub discount_value: f64,
    pub target_type: DiscountTarget,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl Discount {
    /// Validity window is inclusive on both ends.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.start_date <= now && now <= self.end_date
    }

    /// Savings this discount yields on `base_price`, never more than the price itself.
    pub fn amount_off(&self, base_price: f64) -> f64 {
        let value = self.discount_value.max(0.0);
        let raw = match self.discount_type {
            DiscountType::Percentage => base_price * value / 100.0,
            DiscountType::Fixed => value,
        };
        raw.min(base_price).max(0.0)
    }
}

/// First discount in catalog order whose window contains `now` and whose target
/// covers `category`. Earliest-listed wins; savings are not compared.
pub fn resolve_discount<'a>(
    discounts: &'a [Discount],
    category: ServiceCategory,
    now: DateTime<Utc>,
) -> Option<&'a Discount> {
    discounts
        .iter()
        .find(|d| d.is_active_at(now) && d.target_type.applies_to(category))
}

/// Default prices per contract type, used when a provider carries no override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceTable {
    pub hourly: f64,
    pub daily: f64,
    pub monthly: f64,
    pub yearly: f64,
    pub baseline: f64,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self {
            hourly: 100.0,
            daily: 200.0,
            monthly: 1500.0,
            yearly: 15000.0,
            baseline: 100.0,
        }
    }
}

impl PriceTable {
    pub fn default_for(&self, contract_type: Option<ContractType>) -> f64 {
        match contract_type {
            Some(ContractType::Hourly) => self.hourly,
            Some(ContractType::Daily) => self.daily,
            Some(ContractType::Monthly) => self.monthly,
            Some(ContractType::Yearly) => self.yearly,
            Some(ContractType::Unknown) | None => self.baseline,
        }
    }

    pub fn base_price_for(
        &self,
        contract_type: Option<ContractType>,
        override_price: Option<f64>,
    ) -> f64 {
        match override_price {
            Some(price) if price.is_finite() && price >= 0.0 => price,
            _ => self.default_for(contract_type),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub original_price: f64,
    pub final_price: f64,
    pub discount_amount: f64,
    pub applied_discount: Option<Discount>,
}

/// Amounts rounded to cents. Only for display; quotes themselves stay unrounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplayAmounts {
    pub original: f64,
    pub discount: f64,
    pub total: f64,
}

impl PriceQuote {
    pub fn has_discount(&self) -> bool {
        self.applied_discount.is_some() && self.discount_amount > 0.0
    }

    pub fn display_amounts(&self) -> DisplayAmounts {
        DisplayAmounts {
            original: round_cents(self.original_price),
            discount: round_cents(self.discount_amount),
            total: round_cents(self.final_price),
        }
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn quote(base_price: f64, discount: Option<&Discount>) -> PriceQuote {
    let base_price = base_price.max(0.0);
    match discount {
        Some(d) => {
            let final_price = (base_price - d.amount_off(base_price)).max(0.0);
            PriceQuote {
                original_price: base_price,
                final_price,
                discount_amount: base_price - final_price,
                applied_discount: Some(d.clone()),
            }
        }
        None => PriceQuote {
            original_price: base_price,
            final_price: base_price,
            discount_amount: 0.0,
            applied_discount: None,
        },
    }
}

/// Base price from the table plus whichever discount is live for `category` at `now`.
pub fn quote_provider(
    provider: &Provider,
    category: ServiceCategory,
    table: &PriceTable,
    discounts: &[Discount],
    now: DateTime<Utc>,
) -> PriceQuote {
    let base = table.base_price_for(provider.contract_type, provider.base_price);
    quote(base, resolve_discount(discounts, category, now))
}

/// Frozen order payload handed to the order service. Flat camelCase on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSubmission {
    pub full_name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub service_category: ServiceCategory,
    pub provider_id: String,
    pub nationality: String,
    pub service_type: String,
    pub date: NaiveDate,
    /// `HH:MM`, 24-hour.
    pub time: String,
    pub rooms: u32,
    pub worker_count: u32,
    pub address: String,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub amount: f64,
    pub agree_to_terms: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub success: bool,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).single().unwrap()
    }

    fn provider(id: &str, nationality: &str, contract: ContractType) -> Provider {
        Provider {
            id: id.to_string(),
            display_name: format!("Provider {id}"),
            nationality: nationality.to_string(),
            contract_type: Some(contract),
            status: ProviderStatus::Available,
            is_active: None,
            base_price: None,
            skills: BTreeSet::new(),
        }
    }

    fn discount(id: &str, kind: DiscountType, value: f64, target: DiscountTarget) -> Discount {
        Discount {
            id: id.to_string(),
            discount_type: kind,
            discount_value: value,
            target_type: target,
            start_date: ts(2026, 1, 1),
            end_date: ts(2026, 12, 31),
        }
    }

    #[test]
    fn percentage_discount_takes_share_of_base() {
        let d = discount("d1", DiscountType::Percentage, 10.0, DiscountTarget::All);
        let q = quote(300.0, Some(&d));
        assert_eq!(q.discount_amount, 30.0);
        assert_eq!(q.final_price, 270.0);
        assert_eq!(q.original_price, 300.0);
        assert_eq!(q.applied_discount.as_ref().map(|d| d.id.as_str()), Some("d1"));
    }

    #[test]
    fn fixed_discount_larger_than_price_floors_at_zero() {
        let d = discount("d1", DiscountType::Fixed, 500.0, DiscountTarget::All);
        let q = quote(150.0, Some(&d));
        assert_eq!(q.discount_amount, 150.0);
        assert_eq!(q.final_price, 0.0);
    }

    #[test]
    fn percentage_above_hundred_is_clamped() {
        let d = discount("d1", DiscountType::Percentage, 150.0, DiscountTarget::All);
        let q = quote(80.0, Some(&d));
        assert_eq!(q.final_price, 0.0);
        assert_eq!(q.discount_amount, 80.0);
    }

    #[test]
    fn no_discount_keeps_base_price() {
        let q = quote(200.0, None);
        assert_eq!(q.final_price, 200.0);
        assert_eq!(q.discount_amount, 0.0);
        assert!(!q.has_discount());
    }

    #[test]
    fn filter_matches_nationality_and_category() {
        let providers = vec![
            provider("a", "فلبينية", ContractType::Hourly),
            provider("b", "إندونيسية", ContractType::Hourly),
        ];
        let eligible = filter_providers(&providers, ServiceCategory::Worker, Some("فلبينية"));
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, "a");
    }

    #[test]
    fn filter_excludes_inactive_and_disabled_providers() {
        let mut inactive = provider("a", "Filipino", ContractType::Daily);
        inactive.status = ProviderStatus::Inactive;
        let mut disabled = provider("b", "Filipino", ContractType::Daily);
        disabled.is_active = Some(false);
        let mut busy = provider("c", "Filipino", ContractType::Daily);
        busy.status = ProviderStatus::Busy;
        let providers = vec![inactive, disabled, busy];

        let eligible = filter_providers(&providers, ServiceCategory::Worker, None);
        assert_eq!(eligible.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn filter_splits_categories_by_contract_type() {
        let mut unknown = provider("u", "Kenyan", ContractType::Unknown);
        unknown.contract_type = None;
        let providers = vec![
            provider("h", "Kenyan", ContractType::Hourly),
            provider("m", "Kenyan", ContractType::Monthly),
            provider("y", "Kenyan", ContractType::Yearly),
            provider("d", "Kenyan", ContractType::Daily),
            unknown,
        ];
        let workers = filter_providers(&providers, ServiceCategory::Worker, None);
        let assistants = filter_providers(&providers, ServiceCategory::Assistant, None);
        assert_eq!(workers.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["h", "d"]);
        assert_eq!(
            assistants.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["m", "y"]
        );
    }

    #[test]
    fn country_match_is_case_insensitive_substring() {
        let providers = vec![provider("a", "Filipino (Manila)", ContractType::Hourly)];
        assert_eq!(
            filter_providers(&providers, ServiceCategory::Worker, Some("filipino")).len(),
            1
        );
        assert!(filter_providers(&providers, ServiceCategory::Worker, Some("kenyan")).is_empty());
    }

    #[test]
    fn available_countries_are_distinct_in_catalog_order() {
        let providers = vec![
            provider("a", "Kenyan", ContractType::Hourly),
            provider("b", "Filipino", ContractType::Daily),
            provider("c", "kenyan", ContractType::Hourly),
            provider("d", "Indonesian", ContractType::Monthly),
        ];
        assert_eq!(
            available_countries(&providers, ServiceCategory::Worker),
            vec!["Kenyan".to_string(), "Filipino".to_string()]
        );
    }

    #[test]
    fn first_active_matching_discount_wins() {
        let mut expired = discount("old", DiscountType::Percentage, 50.0, DiscountTarget::All);
        expired.end_date = ts(2026, 2, 1);
        let discounts = vec![
            expired,
            discount("assist", DiscountType::Percentage, 40.0, DiscountTarget::Assistants),
            discount("small", DiscountType::Fixed, 5.0, DiscountTarget::Workers),
            discount("big", DiscountType::Percentage, 30.0, DiscountTarget::All),
        ];
        let now = ts(2026, 6, 1);
        assert_eq!(
            resolve_discount(&discounts, ServiceCategory::Worker, now).map(|d| d.id.as_str()),
            Some("small")
        );
        assert_eq!(
            resolve_discount(&discounts, ServiceCategory::Assistant, now).map(|d| d.id.as_str()),
            Some("assist")
        );
    }

    #[test]
    fn discount_window_is_inclusive() {
        let d = discount("d", DiscountType::Fixed, 10.0, DiscountTarget::All);
        assert!(d.is_active_at(d.start_date));
        assert!(d.is_active_at(d.end_date));
        assert!(!d.is_active_at(ts(2027, 1, 1)));
        assert!(resolve_discount(&[d], ServiceCategory::Worker, ts(2025, 6, 1)).is_none());
    }

    #[test]
    fn base_price_prefers_override_then_table() {
        let table = PriceTable::default();
        assert_eq!(table.base_price_for(Some(ContractType::Hourly), None), 100.0);
        assert_eq!(table.base_price_for(Some(ContractType::Daily), None), 200.0);
        assert_eq!(table.base_price_for(Some(ContractType::Daily), Some(275.5)), 275.5);
        assert_eq!(table.base_price_for(None, None), table.baseline);
        assert_eq!(table.base_price_for(Some(ContractType::Unknown), None), table.baseline);
        assert_eq!(table.base_price_for(Some(ContractType::Hourly), Some(-5.0)), 100.0);
    }

    #[test]
    fn quote_provider_combines_table_and_resolver() {
        let p = provider("a", "Kenyan", ContractType::Daily);
        let discounts = vec![discount("d", DiscountType::Percentage, 25.0, DiscountTarget::Workers)];
        let q = quote_provider(&p, ServiceCategory::Worker, &PriceTable::default(), &discounts, ts(2026, 3, 3));
        assert_eq!(q.original_price, 200.0);
        assert_eq!(q.final_price, 150.0);
    }

    #[test]
    fn display_amounts_round_only_at_presentation() {
        let d = discount("d", DiscountType::Percentage, 33.333, DiscountTarget::All);
        let q = quote(100.0, Some(&d));
        assert_eq!(q.discount_amount, q.original_price - q.final_price);
        let shown = q.display_amounts();
        assert_eq!(shown.discount, 33.33);
        assert_eq!(shown.total, 66.67);
    }

    #[test]
    fn unrecognised_status_keeps_catalog_readable() {
        let providers: Vec<Provider> = serde_json::from_str(
            r#"[{"id":"p1","displayName":"A","nationality":"Filipino","contractType":"hourly"},
                {"id":"p2","displayName":"B","nationality":"Filipino","contractType":"hourly",
                 "status":"suspended"}]"#,
        )
        .unwrap();
        assert_eq!(providers[1].status, ProviderStatus::Unknown);
        let eligible = filter_providers(&providers, ServiceCategory::Worker, None);
        assert_eq!(
            eligible.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["p1"]
        );
    }

    #[test]
    fn provider_snapshot_parses_wire_shape() {
        let p: Provider = serde_json::from_str(
            r#"{"id":"p1","displayName":"Maria","nationality":"Filipino",
                "contractType":"monthly","status":"on-leave","skills":["cooking"]}"#,
        )
        .unwrap();
        assert_eq!(p.status, ProviderStatus::OnLeave);
        assert_eq!(p.category(), Some(ServiceCategory::Assistant));
        assert!(p.is_bookable());

        let odd: Provider = serde_json::from_str(
            r#"{"id":"p2","displayName":"X","nationality":"Y","contractType":"weekly","isActive":false}"#,
        )
        .unwrap();
        assert_eq!(odd.contract_type, Some(ContractType::Unknown));
        assert!(!odd.is_bookable());
    }
}
