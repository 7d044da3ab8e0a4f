//! Booking session: one wizard instance, its read-only catalog snapshot and the
//! order submission coordinator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use booking_adapters::{
    load_discounts, load_full_catalog, AdapterError, CatalogSnapshot, DiscountSource,
    OrderService, ProviderCatalog,
};
use booking_core::{Discount, OrderSubmission, PriceTable, Provider, ServiceCategory};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};

use crate::wizard::{
    AdvanceError, OrderSummary, SelectionError, Step, ValidationFailure, WizardState,
};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmissionPhase {
    #[default]
    Idle,
    Submitting,
}

/// Generic customer-facing message plus the collaborator's own text, when it sent any.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SubmissionError {
    pub message: String,
    pub detail: Option<String>,
}

impl SubmissionError {
    const GENERIC: &'static str = "We could not place your order. Please try again.";

    pub fn rejected(message: Option<String>) -> Self {
        Self {
            message: Self::GENERIC.to_string(),
            detail: message.filter(|m| !m.trim().is_empty()),
        }
    }

    pub fn transport(err: &AdapterError) -> Self {
        Self {
            message: "The booking service is unreachable right now. Please try again.".to_string(),
            detail: Some(err.to_string()),
        }
    }

    pub fn missing_order_id() -> Self {
        Self {
            message: Self::GENERIC.to_string(),
            detail: Some("order service reported success without an order id".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Succeeded {
        order_id: String,
        submission: OrderSubmission,
        summary: OrderSummary,
    },
    Failed(SubmissionError),
    /// A submission was already in flight; nothing was sent.
    Ignored,
    Rejected(ValidationFailure),
    NotReady { step: Step },
}

impl SubmitOutcome {
    pub fn order_id(&self) -> Option<&str> {
        match self {
            Self::Succeeded { order_id, .. } => Some(order_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("an order is being submitted; wait for it to finish")]
    Busy,
    #[error(transparent)]
    Advance(#[from] AdvanceError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
}

#[derive(Debug, Default)]
struct SessionInner {
    wizard: WizardState,
    last_error: Option<SubmissionError>,
}

/// Marks a submission in flight. Dropping it, on completion or when the submit
/// future is cancelled mid-await, puts the session back to `Idle`.
struct InFlight<'a> {
    submitting: &'a AtomicBool,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn start(submitting: &'a AtomicBool) -> Self {
        submitting.store(true, Ordering::SeqCst);
        Self {
            submitting,
            settled: false,
        }
    }

    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("order submission abandoned before the order service answered");
        }
        self.submitting.store(false, Ordering::SeqCst);
    }
}

pub struct BookingSession<O> {
    catalog: CatalogSnapshot,
    discounts: Vec<Discount>,
    prices: PriceTable,
    orders: O,
    clock: Arc<dyn Clock>,
    inner: Mutex<SessionInner>,
    submitting: AtomicBool,
}

impl<O: OrderService> BookingSession<O> {
    pub fn new(
        catalog: CatalogSnapshot,
        discounts: Vec<Discount>,
        prices: PriceTable,
        orders: O,
    ) -> Self {
        Self::with_clock(catalog, discounts, prices, orders, Arc::new(SystemClock))
    }

    pub fn with_clock(
        catalog: CatalogSnapshot,
        discounts: Vec<Discount>,
        prices: PriceTable,
        orders: O,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            discounts,
            prices,
            orders,
            clock,
            inner: Mutex::new(SessionInner::default()),
            submitting: AtomicBool::new(false),
        }
    }

    /// Fetch both provider pools and the discount list once, then open a session on them.
    pub async fn mount(
        catalog: &dyn ProviderCatalog,
        discounts: &dyn DiscountSource,
        prices: PriceTable,
        orders: O,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let snapshot = load_full_catalog(catalog).await;
        let discounts = load_discounts(discounts).await;
        info!(
            providers = snapshot.providers.len(),
            discounts = discounts.len(),
            degraded = snapshot.is_degraded(),
            "booking session mounted"
        );
        Self::with_clock(snapshot, discounts, prices, orders, clock)
    }

    pub fn providers(&self) -> &[Provider] {
        &self.catalog.providers
    }

    pub fn catalog(&self) -> &CatalogSnapshot {
        &self.catalog
    }

    pub fn discounts(&self) -> &[Discount] {
        &self.discounts
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    pub async fn state(&self) -> WizardState {
        self.inner.lock().await.wizard.clone()
    }

    pub fn phase(&self) -> SubmissionPhase {
        if self.submitting.load(Ordering::SeqCst) {
            SubmissionPhase::Submitting
        } else {
            SubmissionPhase::Idle
        }
    }

    pub async fn last_error(&self) -> Option<SubmissionError> {
        self.inner.lock().await.last_error.clone()
    }

    pub async fn summary(&self) -> Option<OrderSummary> {
        let now = self.clock.now();
        self.inner
            .lock()
            .await
            .wizard
            .summary(&self.catalog.providers, &self.discounts, &self.prices, now)
    }

    async fn mutate<F>(&self, action: &str, f: F) -> Result<WizardState, SessionError>
    where
        F: FnOnce(&WizardState, &[Provider]) -> Result<WizardState, SessionError>,
    {
        let mut inner = self.inner.lock().await;
        if self.phase() == SubmissionPhase::Submitting {
            warn!(action, "session busy submitting; action refused");
            return Err(SessionError::Busy);
        }
        let next = f(&inner.wizard, &self.catalog.providers)?;
        inner.wizard = next.clone();
        Ok(next)
    }

    pub async fn update_field(
        &self,
        key: &str,
        value: impl Into<JsonValue>,
    ) -> Result<WizardState, SessionError> {
        let value = value.into();
        self.mutate("update_field", |state, _| Ok(state.update_field(key, value)))
            .await
    }

    pub async fn select_category(
        &self,
        category: ServiceCategory,
    ) -> Result<WizardState, SessionError> {
        self.mutate("select_category", |state, _| Ok(state.select_category(category)))
            .await
    }

    pub async fn select_country(&self, country: Option<&str>) -> Result<WizardState, SessionError> {
        self.mutate("select_country", |state, _| Ok(state.select_country(country)))
            .await
    }

    pub async fn select_provider(&self, provider_id: &str) -> Result<WizardState, SessionError> {
        self.mutate("select_provider", |state, providers| {
            Ok(state.select_provider(providers, provider_id)?)
        })
        .await
    }

    pub async fn advance(&self) -> Result<WizardState, SessionError> {
        self.mutate("advance", |state, providers| match state.advance(providers) {
            Ok(next) => {
                info!(from = %state.current_step(), to = %next.current_step(), "wizard advanced");
                Ok(next)
            }
            Err(err) => {
                warn!(step = %state.current_step(), error = %err, "wizard guard failed");
                Err(err.into())
            }
        })
        .await
    }

    pub async fn retreat(&self) -> Result<WizardState, SessionError> {
        self.mutate("retreat", |state, _| Ok(state.retreat())).await
    }

    /// Confirm the order. At most one call to the order service is in flight per session.
    pub async fn submit(&self) -> SubmitOutcome {
        // The phase only flips while `inner` is held, so checks made under the lock agree.
        let (submission, summary, in_flight) = {
            let mut inner = self.inner.lock().await;
            if self.phase() == SubmissionPhase::Submitting {
                warn!("submit ignored; an order is already in flight");
                return SubmitOutcome::Ignored;
            }
            let step = inner.wizard.current_step();
            if step != Step::Confirmation {
                return SubmitOutcome::NotReady { step };
            }
            let now = self.clock.now();
            let assembled = inner.wizard.assemble_order(
                &self.catalog.providers,
                &self.discounts,
                &self.prices,
                now,
            );
            match assembled {
                Ok((submission, summary)) => {
                    inner.last_error = None;
                    (submission, summary, InFlight::start(&self.submitting))
                }
                Err(failure) => {
                    warn!(error = %failure, "order assembly failed");
                    return SubmitOutcome::Rejected(failure);
                }
            }
        };

        let span = info_span!(
            "submit_order",
            provider_id = %submission.provider_id,
            amount = submission.amount
        );
        let result = self.orders.create_order(&submission).instrument(span).await;

        let mut inner = self.inner.lock().await;
        in_flight.settle();
        let error = match result {
            Ok(resp) if resp.success => match resp.order_id {
                Some(order_id) => {
                    info!(%order_id, amount = submission.amount, "order placed");
                    inner.wizard = WizardState::new();
                    inner.last_error = None;
                    return SubmitOutcome::Succeeded {
                        order_id,
                        submission,
                        summary,
                    };
                }
                None => SubmissionError::missing_order_id(),
            },
            Ok(resp) => SubmissionError::rejected(resp.message),
            Err(err) => SubmissionError::transport(&err),
        };
        warn!(error = %error, detail = ?error.detail, "order submission failed");
        inner.last_error = Some(error.clone());
        SubmitOutcome::Failed(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wizard::keys;
    use async_trait::async_trait;
    use booking_adapters::{InMemoryOrderService, OrderBehavior};
    use booking_core::{ContractType, OrderResponse, ProviderStatus};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn provider(id: &str, nationality: &str, contract: ContractType) -> Provider {
        Provider {
            id: id.to_string(),
            display_name: id.to_uppercase(),
            nationality: nationality.to_string(),
            contract_type: Some(contract),
            status: ProviderStatus::Available,
            is_active: Some(true),
            base_price: None,
            skills: Default::default(),
        }
    }

    fn snapshot() -> CatalogSnapshot {
        CatalogSnapshot {
            providers: vec![
                provider("w-1", "Filipino", ContractType::Hourly),
                provider("a-1", "Kenyan", ContractType::Monthly),
            ],
            error: None,
        }
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).single().unwrap(),
        ))
    }

    fn session<O: OrderService>(orders: O) -> BookingSession<O> {
        BookingSession::with_clock(snapshot(), Vec::new(), PriceTable::default(), orders, clock())
    }

    async fn fill_to_confirmation<O: OrderService>(session: &BookingSession<O>) {
        session.update_field(keys::FULL_NAME, "Nora Ali").await.unwrap();
        session.update_field(keys::PHONE, "0501234567").await.unwrap();
        session.advance().await.unwrap();
        session.select_category(ServiceCategory::Worker).await.unwrap();
        session.advance().await.unwrap();
        session.select_country(Some("filipino")).await.unwrap();
        session.select_provider("w-1").await.unwrap();
        session.advance().await.unwrap();
        for (key, value) in [
            (keys::SERVICE_TYPE, JsonValue::from("standard")),
            (keys::DATE, JsonValue::from("2026-06-10")),
            (keys::TIME, JsonValue::from("08:00")),
            (keys::ROOMS, JsonValue::from(2)),
            (keys::WORKER_COUNT, JsonValue::from(1)),
        ] {
            session.update_field(key, value).await.unwrap();
        }
        session.advance().await.unwrap();
        session
            .update_field(keys::ADDRESS, "7 Tahlia Street, Jeddah")
            .await
            .unwrap();
        session.update_field(keys::CITY, "Jeddah").await.unwrap();
        session.advance().await.unwrap();
        session.update_field(keys::AGREE_TO_TERMS, true).await.unwrap();
    }

    /// Holds every order until released, so a test can act while a submit is in flight.
    #[derive(Default)]
    struct GatedOrders {
        calls: AtomicUsize,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl OrderService for GatedOrders {
        async fn create_order(
            &self,
            _submission: &OrderSubmission,
        ) -> Result<OrderResponse, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(OrderResponse {
                success: true,
                order_id: Some("ord-42".to_string()),
                message: None,
            })
        }
    }

    #[tokio::test]
    async fn successful_submit_resets_wizard() {
        let orders = Arc::new(InMemoryOrderService::default());
        let session = session(orders.clone());
        fill_to_confirmation(&session).await;

        let outcome = session.submit().await;
        let SubmitOutcome::Succeeded {
            order_id,
            submission,
            summary,
        } = outcome
        else {
            panic!("expected success, got {outcome:?}");
        };
        assert!(!order_id.is_empty());
        assert_eq!(submission.nationality, "filipino");
        assert_eq!(submission.amount, 100.0);
        assert_eq!(summary.provider.id, "w-1");

        assert_eq!(session.state().await, WizardState::new());
        assert_eq!(session.phase(), SubmissionPhase::Idle);
        assert_eq!(orders.call_count().await, 1);
    }

    #[tokio::test]
    async fn double_confirm_sends_one_order() {
        let orders = Arc::new(GatedOrders::default());
        let session = Arc::new(session(orders.clone()));
        fill_to_confirmation(&session).await;

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.submit().await }
        });
        orders.entered.notified().await;
        assert_eq!(session.phase(), SubmissionPhase::Submitting);

        assert_eq!(session.submit().await, SubmitOutcome::Ignored);
        assert_eq!(session.advance().await.unwrap_err(), SessionError::Busy);
        assert_eq!(session.retreat().await.unwrap_err(), SessionError::Busy);

        orders.release.notify_one();
        let outcome = first.await.unwrap();
        assert_eq!(outcome.order_id(), Some("ord-42"));
        assert_eq!(orders.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.phase(), SubmissionPhase::Idle);
    }

    /// Never answers the first order; accepts every later one.
    #[derive(Default)]
    struct StallsOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OrderService for StallsOnce {
        async fn create_order(
            &self,
            _submission: &OrderSubmission,
        ) -> Result<OrderResponse, AdapterError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                std::future::pending::<()>().await;
            }
            Ok(OrderResponse {
                success: true,
                order_id: Some("ord-7".to_string()),
                message: None,
            })
        }
    }

    #[tokio::test]
    async fn dropped_submit_returns_session_to_idle() {
        let orders = Arc::new(StallsOnce::default());
        let session = session(orders.clone());
        fill_to_confirmation(&session).await;

        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(50), session.submit()).await;
        assert!(timed_out.is_err());
        assert_eq!(session.phase(), SubmissionPhase::Idle);
        assert_eq!(session.state().await.current_step(), Step::Confirmation);

        let back = session.retreat().await.unwrap();
        assert_eq!(back.current_step(), Step::Address);
        session.advance().await.unwrap();

        let outcome = session.submit().await;
        assert_eq!(outcome.order_id(), Some("ord-7"));
        assert_eq!(orders.calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.phase(), SubmissionPhase::Idle);
    }

    #[tokio::test]
    async fn rejected_order_stays_on_confirmation_for_retry() {
        let orders = Arc::new(InMemoryOrderService::new(OrderBehavior::Reject(
            "slot already taken".to_string(),
        )));
        let session = session(orders.clone());
        fill_to_confirmation(&session).await;
        let before = session.state().await;

        let SubmitOutcome::Failed(error) = session.submit().await else {
            panic!("expected failure");
        };
        assert_eq!(error.detail.as_deref(), Some("slot already taken"));
        assert_eq!(session.state().await, before);
        assert_eq!(session.state().await.current_step(), Step::Confirmation);
        assert_eq!(session.phase(), SubmissionPhase::Idle);
        assert_eq!(session.last_error().await, Some(error));

        orders.set_behavior(OrderBehavior::Accept).await;
        assert!(session.submit().await.order_id().is_some());
        assert_eq!(session.last_error().await, None);
        assert_eq!(orders.call_count().await, 2);
    }

    #[tokio::test]
    async fn transport_failure_keeps_raw_detail() {
        let orders = InMemoryOrderService::new(OrderBehavior::TransportFailure(
            "connection reset".to_string(),
        ));
        let session = session(orders);
        fill_to_confirmation(&session).await;

        let SubmitOutcome::Failed(error) = session.submit().await else {
            panic!("expected failure");
        };
        assert!(error.detail.unwrap().contains("connection reset"));
        assert!(!error.message.contains("connection reset"));
        assert_eq!(session.state().await.current_step(), Step::Confirmation);

        // back-navigation still works after a failure
        let back = session.retreat().await.unwrap();
        assert_eq!(back.current_step(), Step::Address);
    }

    #[tokio::test]
    async fn success_without_order_id_is_a_failure() {
        struct NoId;

        #[async_trait]
        impl OrderService for NoId {
            async fn create_order(
                &self,
                _submission: &OrderSubmission,
            ) -> Result<OrderResponse, AdapterError> {
                Ok(OrderResponse {
                    success: true,
                    order_id: None,
                    message: None,
                })
            }
        }

        let session = session(NoId);
        fill_to_confirmation(&session).await;
        let outcome = session.submit().await;
        assert_eq!(
            outcome,
            SubmitOutcome::Failed(SubmissionError::missing_order_id())
        );
        assert_eq!(session.state().await.current_step(), Step::Confirmation);
    }

    #[tokio::test]
    async fn submit_before_confirmation_is_not_ready() {
        let orders = Arc::new(InMemoryOrderService::default());
        let session = session(orders.clone());
        assert_eq!(
            session.submit().await,
            SubmitOutcome::NotReady {
                step: Step::PersonalInfo
            }
        );

        fill_to_confirmation(&session).await;
        session.update_field(keys::AGREE_TO_TERMS, false).await.unwrap();
        assert!(matches!(session.submit().await, SubmitOutcome::Rejected(_)));
        assert_eq!(orders.call_count().await, 0);
    }

    #[tokio::test]
    async fn session_surfaces_guard_and_selection_errors() {
        let session = session(InMemoryOrderService::default());
        assert!(matches!(
            session.advance().await.unwrap_err(),
            SessionError::Advance(AdvanceError::Guard(_))
        ));
        assert_eq!(
            session.select_provider("w-1").await.unwrap_err(),
            SessionError::Selection(SelectionError::CategoryNotSelected)
        );
        assert_eq!(session.state().await.current_step(), Step::PersonalInfo);
    }

    #[tokio::test]
    async fn mount_loads_both_pools_and_discounts() {
        use booking_adapters::{CatalogBundle, FixtureCatalog};

        let catalog = FixtureCatalog::new(CatalogBundle {
            fixture_id: "unit".to_string(),
            captured_from_url: "memory://unit".to_string(),
            captured_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap(),
            providers: snapshot().providers,
            discounts: Vec::new(),
            notes: None,
        });
        let session = BookingSession::mount(
            &catalog,
            &catalog,
            PriceTable::default(),
            InMemoryOrderService::default(),
            clock(),
        )
        .await;
        assert_eq!(session.providers().len(), 2);
        assert!(!session.catalog().is_degraded());
        assert!(session.discounts().is_empty());
        assert!(session.summary().await.is_none());
    }
}
