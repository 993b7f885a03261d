//! Stripe REST API client.
//!
//! Requests are form-encoded and authenticated with the secret key as a
//! bearer token. Bracketed keys (`metadata[userId]`) follow Stripe's
//! nested-parameter convention.

use super::{
    BillingError, BillingProvider, CheckoutParams, CheckoutSession, Customer, PortalSession,
    ProviderSubscription,
};
use crate::config::StripeConfig;
use crate::models::UserId;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, de::DeserializeOwned};
use std::borrow::Cow;
use std::time::Duration;
use tracing::{debug, instrument};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    api_base: String,
    secret_key: Option<SecretString>,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.api_base)
            .field("secret_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct List<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Price {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Result<Self, BillingError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn secret_key(&self) -> Result<&str, BillingError> {
        self.secret_key
            .as_ref()
            .map(|key| key.expose_secret())
            .ok_or(BillingError::NotConfigured)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, BillingError> {
        let url = format!("{}{path}", self.api_base);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.secret_key()?)
            .query(query)
            .send()
            .await?;
        handle_response(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<T, BillingError> {
        let url = format!("{}{path}", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.secret_key()?)
            .form(form)
            .send()
            .await?;
        handle_response(response).await
    }
}

/// Encodes a caller-supplied object id as exactly one path segment.
fn segment(id: &str) -> Result<Cow<'_, str>, BillingError> {
    if matches!(id, "" | "." | "..") {
        return Err(BillingError::InvalidPayload(format!("invalid object id {id:?}")));
    }
    Ok(urlencoding::encode(id))
}

async fn handle_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, BillingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error.message)
        .unwrap_or_else(|_| format!("Stripe returned {status}"));
    debug!(status = status.as_u16(), "stripe error: {message}");

    Err(BillingError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl BillingProvider for StripeClient {
    fn is_configured(&self) -> bool {
        self.secret_key.is_some()
    }

    #[instrument(skip(self))]
    async fn active_price(&self, product_id: &str) -> Result<Option<String>, BillingError> {
        let prices: List<Price> = self
            .get(
                "/v1/prices",
                &[("product", product_id), ("active", "true"), ("limit", "1")],
            )
            .await?;
        Ok(prices.data.into_iter().next().map(|price| price.id))
    }

    #[instrument(skip(self))]
    async fn retrieve_customer(&self, customer_id: &str) -> Result<Customer, BillingError> {
        let path = format!("/v1/customers/{}", segment(customer_id)?);
        self.get(&path, &[]).await
    }

    #[instrument(skip(self, email, name))]
    async fn create_customer(
        &self,
        email: &str,
        name: &str,
        user_id: &UserId,
    ) -> Result<Customer, BillingError> {
        let form = [
            ("email", email.to_string()),
            ("name", name.to_string()),
            ("metadata[userId]", user_id.to_string()),
        ];
        self.post("/v1/customers", &form).await
    }

    #[instrument(skip(self, params), fields(user_id = %params.user_id, plan = %params.plan))]
    async fn create_checkout_session(
        &self,
        params: &CheckoutParams<'_>,
    ) -> Result<CheckoutSession, BillingError> {
        let user_id = params.user_id.to_string();
        let plan = params.plan.to_string();
        let form = [
            ("customer", params.customer_id.to_string()),
            ("mode", "subscription".to_string()),
            ("payment_method_types[0]", "card".to_string()),
            ("line_items[0][price]", params.price_id.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("success_url", params.success_url.clone()),
            ("cancel_url", params.cancel_url.clone()),
            ("metadata[userId]", user_id.clone()),
            ("metadata[plan]", plan.clone()),
            ("subscription_data[metadata][userId]", user_id),
            ("subscription_data[metadata][plan]", plan),
        ];
        self.post("/v1/checkout/sessions", &form).await
    }

    #[instrument(skip(self))]
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, BillingError> {
        let path = format!("/v1/checkout/sessions/{}", segment(session_id)?);
        self.get(&path, &[]).await
    }

    #[instrument(skip(self))]
    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, BillingError> {
        let form = [
            ("customer", customer_id.to_string()),
            ("return_url", return_url.to_string()),
        ];
        self.post("/v1/billing_portal/sessions", &form).await
    }

    #[instrument(skip(self))]
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, BillingError> {
        let path = format!("/v1/subscriptions/{}", segment(subscription_id)?);
        self.get(&path, &[]).await
    }

    #[instrument(skip(self))]
    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, BillingError> {
        let form = [("cancel_at_period_end", "true".to_string())];
        let path = format!("/v1/subscriptions/{}", segment(subscription_id)?);
        self.post(&path, &form).await
    }
}
