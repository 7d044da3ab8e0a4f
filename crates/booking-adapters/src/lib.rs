//! Collaborator contracts for the booking flow + fixture-first implementations.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use booking_core::{
    Discount, DiscountTarget, OrderResponse, OrderSubmission, Provider, ServiceCategory,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

pub const CRATE_NAME: &str = "booking-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[async_trait]
pub trait ProviderCatalog: Send + Sync {
    async fn list_providers(&self, category: ServiceCategory) -> Result<Vec<Provider>, AdapterError>;
}

#[async_trait]
pub trait DiscountSource: Send + Sync {
    async fn list_active_discounts(
        &self,
        target: DiscountTarget,
    ) -> Result<Vec<Discount>, AdapterError>;
}

#[async_trait]
pub trait OrderService: Send + Sync {
    async fn create_order(&self, submission: &OrderSubmission) -> Result<OrderResponse, AdapterError>;
}

#[async_trait]
impl<T: OrderService + ?Sized> OrderService for Arc<T> {
    async fn create_order(&self, submission: &OrderSubmission) -> Result<OrderResponse, AdapterError> {
        (**self).create_order(submission).await
    }
}

/// Provider list as seen by the wizard. A failed fetch leaves `providers` empty and
/// records the transport error instead of failing the flow.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CatalogSnapshot {
    pub providers: Vec<Provider>,
    pub error: Option<String>,
}

impl CatalogSnapshot {
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

pub async fn load_catalog_snapshot(
    catalog: &dyn ProviderCatalog,
    category: ServiceCategory,
) -> CatalogSnapshot {
    match catalog.list_providers(category).await {
        Ok(providers) => CatalogSnapshot {
            providers,
            error: None,
        },
        Err(err) => {
            warn!(%category, error = %err, "provider catalog fetch failed");
            CatalogSnapshot {
                providers: Vec::new(),
                error: Some(err.to_string()),
            }
        }
    }
}

/// Snapshot of both pools merged in catalog order, workers first.
pub async fn load_full_catalog(catalog: &dyn ProviderCatalog) -> CatalogSnapshot {
    let workers = load_catalog_snapshot(catalog, ServiceCategory::Worker).await;
    let assistants = load_catalog_snapshot(catalog, ServiceCategory::Assistant).await;
    let error = match (workers.error, assistants.error) {
        (Some(a), Some(b)) => Some(format!("{a}; {b}")),
        (a, b) => a.or(b),
    };
    let mut providers = workers.providers;
    providers.extend(assistants.providers);
    CatalogSnapshot { providers, error }
}

/// Live discounts for both pools, merged so each pool keeps its catalog order.
/// Discounts are optional to the flow; a failed fetch simply drops that pool's discounts.
pub async fn load_discounts(source: &dyn DiscountSource) -> Vec<Discount> {
    let workers = fetch_discounts(source, DiscountTarget::Workers).await;
    let assistants = fetch_discounts(source, DiscountTarget::Assistants).await;
    merge_discounts(workers, assistants)
}

async fn fetch_discounts(source: &dyn DiscountSource, target: DiscountTarget) -> Vec<Discount> {
    match source.list_active_discounts(target).await {
        Ok(discounts) => discounts,
        Err(err) => {
            warn!(
                target = target.as_str(),
                error = %err,
                "discount fetch failed; quoting without them"
            );
            Vec::new()
        }
    }
}

/// Interleave two catalog-ordered lists that share `all`-targeted entries, without
/// duplicates and without reordering either list.
fn merge_discounts(first: Vec<Discount>, second: Vec<Discount>) -> Vec<Discount> {
    let mut merged: Vec<Discount> = Vec::with_capacity(first.len() + second.len());
    let mut cursor = 0;
    for discount in first {
        if let Some(offset) = second[cursor..].iter().position(|d| d.id == discount.id) {
            for pending in &second[cursor..cursor + offset] {
                if !merged.iter().any(|m| m.id == pending.id) {
                    merged.push(pending.clone());
                }
            }
            cursor += offset + 1;
        }
        if !merged.iter().any(|m| m.id == discount.id) {
            merged.push(discount);
        }
    }
    for pending in &second[cursor..] {
        if !merged.iter().any(|m| m.id == pending.id) {
            merged.push(pending.clone());
        }
    }
    merged
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogBundle {
    pub fixture_id: String,
    pub captured_from_url: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub discounts: Vec<Discount>,
    pub notes: Option<String>,
}

pub fn load_catalog_bundle(path: impl AsRef<Path>) -> Result<CatalogBundle> {
    read_json_file(path)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Serves a captured catalog bundle as both provider catalog and discount source.
#[derive(Debug, Clone)]
pub struct FixtureCatalog {
    bundle: CatalogBundle,
}

impl FixtureCatalog {
    pub fn new(bundle: CatalogBundle) -> Self {
        Self { bundle }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_catalog_bundle(path)?))
    }

    pub fn bundle(&self) -> &CatalogBundle {
        &self.bundle
    }
}

#[async_trait]
impl ProviderCatalog for FixtureCatalog {
    async fn list_providers(&self, category: ServiceCategory) -> Result<Vec<Provider>, AdapterError> {
        Ok(self
            .bundle
            .providers
            .iter()
            .filter(|p| p.category() == Some(category))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DiscountSource for FixtureCatalog {
    async fn list_active_discounts(
        &self,
        target: DiscountTarget,
    ) -> Result<Vec<Discount>, AdapterError> {
        Ok(self
            .bundle
            .discounts
            .iter()
            .filter(|d| d.target_type == target || d.target_type == DiscountTarget::All)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderBehavior {
    Accept,
    Reject(String),
    TransportFailure(String),
}

/// Order service kept in memory; every call is recorded.
#[derive(Debug)]
pub struct InMemoryOrderService {
    behavior: Mutex<OrderBehavior>,
    received: Mutex<Vec<OrderSubmission>>,
}

impl Default for InMemoryOrderService {
    fn default() -> Self {
        Self::new(OrderBehavior::Accept)
    }
}

impl InMemoryOrderService {
    pub fn new(behavior: OrderBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            received: Mutex::new(Vec::new()),
        }
    }

    pub async fn set_behavior(&self, behavior: OrderBehavior) {
        *self.behavior.lock().await = behavior;
    }

    pub async fn received(&self) -> Vec<OrderSubmission> {
        self.received.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.received.lock().await.len()
    }
}

#[async_trait]
impl OrderService for InMemoryOrderService {
    async fn create_order(&self, submission: &OrderSubmission) -> Result<OrderResponse, AdapterError> {
        self.received.lock().await.push(submission.clone());
        match self.behavior.lock().await.clone() {
            OrderBehavior::Accept => Ok(OrderResponse {
                success: true,
                order_id: Some(Uuid::new_v4().to_string()),
                message: None,
            }),
            OrderBehavior::Reject(message) => Ok(OrderResponse {
                success: false,
                order_id: None,
                message: Some(message),
            }),
            OrderBehavior::TransportFailure(message) => Err(AdapterError::Transport(message)),
        }
    }
}
