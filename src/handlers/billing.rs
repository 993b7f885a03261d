use super::parse_user;
use crate::accounts;
use crate::billing::webhook::{SIGNATURE_HEADER, parse_event, verify_signature};
use crate::billing::{
    BillingError, CheckoutParams, CheckoutSession, SubscriptionRecord, SubscriptionStatus,
    apply_event,
};
use crate::errors::{AppError, DomainError};
use crate::extract::{JsonBody, PathParams, QueryParams};
use crate::models::{PlanTier, UserId};
use crate::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use chrono::{DateTime, SubsecRound, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    plan: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    user_email: String,
    #[serde(default)]
    user_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRequest {
    #[serde(default)]
    user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQuery {
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    plan: PlanTier,
    status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_id: Option<String>,
}

impl SubscriptionView {
    fn free(status: Option<&'static str>) -> Self {
        Self {
            plan: PlanTier::Free,
            status,
            customer_id: None,
        }
    }
}

/// Timestamp for a record written outside a webhook. Webhook staleness is
/// judged on the provider's clock, so the session's creation time is used when
/// the provider reports one.
fn stamp(session: &CheckoutSession) -> DateTime<Utc> {
    session
        .created_at()
        .unwrap_or_else(|| Utc::now().trunc_subsecs(0))
}

/// Brings each user's stored plan in line with their subscription record.
/// Callers hold the write lock.
async fn sync_plans(
    state: &AppState,
    applied: &[(UserId, SubscriptionRecord)],
) -> Result<(), AppError> {
    if applied.is_empty() {
        return Ok(());
    }

    let mut records = state.accounts.load().await?;
    let mut changed = false;
    for (user_id, subscription) in applied {
        let plan = subscription.effective_plan();
        if accounts::set_plan(&mut records, user_id, plan) {
            info!(user_id = %user_id, plan = %plan, "plan changed");
            changed = true;
        }
    }
    if changed {
        state.accounts.save(&records).await?;
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<CheckoutRequest>,
) -> Result<Json<Value>, AppError> {
    if payload.plan.trim().is_empty() || payload.user_id.trim().is_empty() {
        return Err(AppError::bad_request("Plan and userId are required"));
    }
    let user_id = parse_user(&payload.user_id)?;
    let (plan, price_id) = payload
        .plan
        .parse::<PlanTier>()
        .ok()
        .and_then(|plan| state.prices.price_for(plan).map(|price| (plan, price)))
        .ok_or_else(|| AppError::bad_request("Invalid plan selected"))?;

    let existing = state.subscriptions.get(&user_id).await?;
    let customer = match &existing {
        Some(record) => state.billing.retrieve_customer(&record.customer_id).await?,
        None => {
            state
                .billing
                .create_customer(&payload.user_email, &payload.user_name, &user_id)
                .await?
        }
    };

    let frontend = &state.config.frontend_url;
    let params = CheckoutParams {
        customer_id: &customer.id,
        price_id,
        user_id: &user_id,
        plan,
        success_url: format!(
            "{frontend}/subscription?success=true&session_id={{CHECKOUT_SESSION_ID}}"
        ),
        cancel_url: format!("{frontend}/subscription?canceled=true"),
    };
    let session = state.billing.create_checkout_session(&params).await?;

    if existing.is_none() {
        state
            .subscriptions
            .put(
                &user_id,
                SubscriptionRecord::pending(customer.id, plan, stamp(&session)),
            )
            .await?;
    }

    info!(user_id = %user_id, session_id = %session.id, "checkout session created");
    Ok(Json(json!({ "url": session.url, "sessionId": session.id })))
}

pub async fn create_portal_session(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<UserRequest>,
) -> Result<Json<Value>, AppError> {
    let user_id = parse_user(&payload.user_id)?;
    let record = state
        .subscriptions
        .get(&user_id)
        .await?
        .ok_or_else(|| DomainError::NotFound("No subscription found".into()))?;

    let return_url = format!("{}/subscription", state.config.frontend_url);
    let session = state
        .billing
        .create_portal_session(&record.customer_id, &return_url)
        .await?;
    Ok(Json(json!({ "url": session.url })))
}

/// Reports the plan a user is entitled to. When a subscription id is known the
/// provider's current status wins over the stored one.
pub async fn get_subscription(
    State(state): State<AppState>,
    PathParams(user_id): PathParams<String>,
) -> Result<Json<SubscriptionView>, AppError> {
    let user_id = parse_user(&user_id)?;
    let Some(mut record) = state.subscriptions.get(&user_id).await? else {
        return Ok(Json(SubscriptionView::free(None)));
    };

    if let Some(subscription_id) = record.subscription_id.as_deref() {
        match state.billing.retrieve_subscription(subscription_id).await {
            Ok(remote) => record.status = remote.status,
            Err(err) => {
                warn!(user_id = %user_id, "subscription lookup failed: {err}");
                return Ok(Json(SubscriptionView::free(Some("none"))));
            }
        }
    }

    if record.status != SubscriptionStatus::Active {
        return Ok(Json(SubscriptionView::free(Some(record.status.as_str()))));
    }
    Ok(Json(SubscriptionView {
        plan: record.effective_plan(),
        status: Some(record.status.as_str()),
        customer_id: Some(record.customer_id),
    }))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<UserRequest>,
) -> Result<Json<Value>, AppError> {
    let user_id = parse_user(&payload.user_id)?;
    let subscription_id = state
        .subscriptions
        .get(&user_id)
        .await?
        .and_then(|record| record.subscription_id)
        .ok_or_else(|| DomainError::NotFound("No active subscription found".into()))?;

    let canceled = state.billing.cancel_at_period_end(&subscription_id).await?;
    info!(user_id = %user_id, "subscription set to cancel at period end");
    Ok(Json(json!({
        "success": true,
        "message": "Subscription will be canceled at the end of the billing period",
        "cancelAt": canceled.cancel_at,
    })))
}

/// Receives signed lifecycle events. The body is taken raw because the
/// signature covers the exact bytes sent.
#[instrument(skip_all)]
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let Some(secret) = state.config.stripe.webhook_secret.as_ref() else {
        warn!("webhook received without STRIPE_WEBHOOK_SECRET configured");
        return Err(BillingError::InvalidSignature("Webhook secret not configured".into()).into());
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| BillingError::InvalidSignature("Missing signature header".into()))?;

    if let Err(err) = verify_signature(&body, signature, secret.expose_secret(), Utc::now().timestamp()) {
        warn!("webhook signature verification failed: {err}");
        return Err(err.into());
    }

    let event = parse_event(&body)?;
    info!(event_id = %event.id, "webhook received");

    let _guard = state.writes.lock().await;
    let applied = apply_event(state.subscriptions.as_ref(), &event).await?;
    sync_plans(&state, &applied).await?;

    Ok(Json(json!({ "received": true })))
}

/// Confirms a checkout after the provider redirects back. A paid session
/// activates the subscription unless webhooks already recorded it.
pub async fn verify_session(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<VerifyQuery>,
) -> Result<Json<Value>, AppError> {
    let session_id = query
        .session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("Session ID required"))?;

    let session = state.billing.retrieve_checkout_session(&session_id).await?;
    if !session.is_paid() {
        return Ok(Json(json!({
            "success": false,
            "plan": PlanTier::Free,
            "status": session.payment_status,
        })));
    }

    let plan = session
        .metadata
        .get("plan")
        .and_then(|plan| plan.parse().ok())
        .unwrap_or(PlanTier::Pro);
    let user_id = session
        .metadata
        .get("userId")
        .and_then(|id| UserId::parse(id).ok());

    if let (Some(user_id), Some(customer_id)) = (user_id, session.customer.clone()) {
        let _guard = state.writes.lock().await;
        let current = state.subscriptions.get(&user_id).await?;
        let record = match current {
            Some(current)
                if current.subscription_id == session.subscription
                    && current.status != SubscriptionStatus::Pending =>
            {
                current
            }
            _ => {
                let record = SubscriptionRecord {
                    customer_id,
                    subscription_id: session.subscription.clone(),
                    plan,
                    status: SubscriptionStatus::Active,
                    updated_at: stamp(&session),
                };
                state.subscriptions.put(&user_id, record.clone()).await?;
                record
            }
        };
        sync_plans(&state, &[(user_id, record)]).await?;
    }

    Ok(Json(json!({
        "success": true,
        "plan": plan,
        "customerId": session.customer,
        "subscriptionId": session.subscription,
        "status": SubscriptionStatus::Active.as_str(),
    })))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "stripeConfigured": state.billing.is_configured(),
        "prices": state.prices.as_ref(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
