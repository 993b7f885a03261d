//! Subscription billing.
//!
//! The server never talks to the payment provider directly; it goes through
//! [`BillingProvider`]. [`StripeClient`] is the production implementation.
//! Subscription state received from checkout verification and webhooks is
//! kept in a [`SubscriptionStore`].
//!
//! # Flow
//!
//! 1. Client asks for a checkout session for a paid plan
//! 2. Provider hosts the payment page and redirects back with a session id
//! 3. Either session verification or the `checkout.session.completed` webhook
//!    records the subscription and upgrades the user's plan
//! 4. Later lifecycle webhooks update the status or downgrade to free

mod stripe;
mod subscriptions;
pub mod webhook;

pub use stripe::StripeClient;
pub use subscriptions::{
    MemorySubscriptionStore, SubscriptionRecord, SubscriptionStatus, SubscriptionStore,
    apply_event,
};

use crate::errors::DomainError;
use crate::models::{PlanTier, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Billing request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Billing provider is not configured")]
    NotConfigured,

    #[error("{0}")]
    InvalidSignature(String),

    #[error("Invalid billing payload: {0}")]
    InvalidPayload(String),
}

impl From<BillingError> for DomainError {
    fn from(err: BillingError) -> Self {
        Self::ExternalService(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Customer {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutParams<'a> {
    pub customer_id: &'a str,
    pub price_id: &'a str,
    pub user_id: &'a UserId,
    pub plan: PlanTier,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Unix seconds on the provider's clock.
    #[serde(default)]
    pub created: Option<i64>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created.and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PortalSession {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer: String,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub cancel_at: Option<i64>,
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    fn is_configured(&self) -> bool;

    /// First active price of `product_id`, if it has one.
    async fn active_price(&self, product_id: &str) -> Result<Option<String>, BillingError>;

    async fn retrieve_customer(&self, customer_id: &str) -> Result<Customer, BillingError>;

    async fn create_customer(
        &self,
        email: &str,
        name: &str,
        user_id: &UserId,
    ) -> Result<Customer, BillingError>;

    async fn create_checkout_session(
        &self,
        params: &CheckoutParams<'_>,
    ) -> Result<CheckoutSession, BillingError>;

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, BillingError>;

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession, BillingError>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, BillingError>;

    async fn cancel_at_period_end(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, BillingError>;
}

/// Price id for each paid plan, resolved once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PriceTable(BTreeMap<PlanTier, String>);

impl PriceTable {
    /// Looks up the active price of every configured product. Plans whose
    /// lookup fails are left out and logged; startup continues.
    pub async fn resolve(provider: &dyn BillingProvider, products: &[(PlanTier, &str)]) -> Self {
        let mut table = Self::default();
        if !provider.is_configured() {
            warn!("billing provider not configured; no prices loaded");
            return table;
        }

        for &(plan, product_id) in products {
            match provider.active_price(product_id).await {
                Ok(Some(price_id)) => {
                    info!("found price for {plan}: {price_id}");
                    table.insert(plan, price_id);
                }
                Ok(None) => warn!("no active price found for {plan} ({product_id})"),
                Err(err) => error!("failed to fetch price for {plan}: {err}"),
            }
        }
        table
    }

    pub fn insert(&mut self, plan: PlanTier, price_id: impl Into<String>) {
        self.0.insert(plan, price_id.into());
    }

    pub fn price_for(&self, plan: PlanTier) -> Option<&str> {
        self.0.get(&plan).map(String::as_str)
    }

    pub fn plans(&self) -> impl Iterator<Item = PlanTier> + '_ {
        self.0.keys().copied()
    }
}
