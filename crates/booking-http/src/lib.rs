//! HTTP client for the remote catalog, discount and order endpoints.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use booking_adapters::{AdapterError, DiscountSource, OrderService, ProviderCatalog};
use booking_core::{
    Discount, DiscountTarget, OrderResponse, OrderSubmission, Provider, ServiceCategory,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{info_span, Instrument};

pub const CRATE_NAME: &str = "booking-http";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl HttpClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl From<HttpError> for AdapterError {
    fn from(err: HttpError) -> Self {
        AdapterError::Transport(err.to_string())
    }
}

/// One client for all three collaborators. No retries: a failure surfaces at once.
#[derive(Debug, Clone)]
pub struct HttpBookingClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBookingClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, HttpError> {
        let url = self.url(path);
        let resp = self.client.get(&url).query(query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(HttpError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl ProviderCatalog for HttpBookingClient {
    async fn list_providers(&self, category: ServiceCategory) -> Result<Vec<Provider>, AdapterError> {
        let span = info_span!("list_providers", %category);
        let providers = self
            .get_json::<Vec<Provider>>("providers", &[("category", category.as_str())])
            .instrument(span)
            .await?;
        Ok(providers)
    }
}

#[async_trait]
impl DiscountSource for HttpBookingClient {
    async fn list_active_discounts(
        &self,
        target: DiscountTarget,
    ) -> Result<Vec<Discount>, AdapterError> {
        let span = info_span!("list_active_discounts", target = target.as_str());
        let discounts = self
            .get_json::<Vec<Discount>>("discounts/active", &[("targetType", target.as_str())])
            .instrument(span)
            .await?;
        Ok(discounts)
    }
}

#[async_trait]
impl OrderService for HttpBookingClient {
    async fn create_order(&self, submission: &OrderSubmission) -> Result<OrderResponse, AdapterError> {
        let url = self.url("orders");
        let span = info_span!("create_order", provider_id = %submission.provider_id, url = %url);
        let resp = self.post_order(&url, submission).instrument(span).await?;
        Ok(resp)
    }
}

impl HttpBookingClient {
    async fn post_order(
        &self,
        url: &str,
        submission: &OrderSubmission,
    ) -> Result<OrderResponse, HttpError> {
        let resp = self.client.post(url).json(submission).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        let body = resp.bytes().await?;

        // Validation rejections come back as 4xx with the usual response body.
        match serde_json::from_slice::<OrderResponse>(&body) {
            Ok(parsed) if status.is_success() || is_customer_facing(status) => Ok(parsed),
            _ => Err(HttpError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            }),
        }
    }
}

/// Statuses worth showing to the customer verbatim rather than as a generic failure.
pub fn is_customer_facing(status: StatusCode) -> bool {
    status.is_client_error() && status != StatusCode::UNAUTHORIZED && status != StatusCode::FORBIDDEN
}
