//! Signed webhook payloads.
//!
//! The provider sends `Stripe-Signature: t=<unix seconds>,v1=<hex>` where the
//! hex digest is HMAC-SHA256 of `"{t}.{raw body}"` keyed by the endpoint's
//! signing secret. More than one `v1` entry may be present while secrets are
//! being rolled.

use super::BillingError;
use crate::models::{PlanTier, UserId};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::warn;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Maximum age, in seconds, of a signed payload.
pub const TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
pub fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, BillingError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BillingError::InvalidSignature(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Full header value for `payload` signed at `timestamp`.
pub fn signature_header(
    secret: &str,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, BillingError> {
    Ok(format!("t={timestamp},v1={}", sign(secret, timestamp, payload)?))
}

pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), BillingError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let (Some(timestamp), false) = (timestamp, signatures.is_empty()) else {
        return Err(BillingError::InvalidSignature(
            "Unable to extract timestamp and signatures from header".into(),
        ));
    };

    if (now - timestamp).abs() > TOLERANCE_SECS {
        return Err(BillingError::InvalidSignature(
            "Timestamp outside the tolerance zone".into(),
        ));
    }

    let matched = signatures.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    });

    if matched {
        Ok(())
    } else {
        Err(BillingError::InvalidSignature(
            "No signatures found matching the expected signature for payload".into(),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub id: String,
    /// Unix seconds at which the provider created the event.
    pub created: i64,
    pub kind: BillingEvent,
}

impl WebhookEvent {
    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.created, 0).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    CheckoutCompleted {
        user_id: UserId,
        plan: PlanTier,
        customer_id: String,
        subscription_id: Option<String>,
    },
    SubscriptionUpdated {
        customer_id: String,
        status: super::SubscriptionStatus,
    },
    SubscriptionDeleted {
        customer_id: String,
    },
    PaymentFailed {
        customer_id: String,
    },
    Unhandled(String),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    created: i64,
    #[serde(rename = "type")]
    kind: String,
    data: RawData,
}

#[derive(Debug, Deserialize)]
struct RawData {
    object: Value,
}

#[derive(Debug, Deserialize)]
struct RawCheckoutSession {
    customer: Option<String>,
    subscription: Option<String>,
    #[serde(default)]
    metadata: RawMetadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    user_id: Option<String>,
    plan: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSubscription {
    customer: String,
    status: super::SubscriptionStatus,
}

#[derive(Debug, Deserialize)]
struct RawInvoice {
    customer: String,
}

/// Parses a verified payload. Event types that carry no subscription change,
/// and checkouts missing the metadata written at session creation, come back
/// as [`BillingEvent::Unhandled`].
pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, BillingError> {
    let raw: RawEvent = serde_json::from_slice(payload)
        .map_err(|e| BillingError::InvalidPayload(e.to_string()))?;
    let object = raw.data.object;

    let kind = match raw.kind.as_str() {
        "checkout.session.completed" => {
            let session: RawCheckoutSession = from_object(object)?;
            checkout_completed(session).unwrap_or_else(|| {
                warn!(event_id = %raw.id, "checkout session without usable metadata");
                BillingEvent::Unhandled(raw.kind.clone())
            })
        }
        "customer.subscription.updated" => {
            let subscription: RawSubscription = from_object(object)?;
            BillingEvent::SubscriptionUpdated {
                customer_id: subscription.customer,
                status: subscription.status,
            }
        }
        "customer.subscription.deleted" => {
            let subscription: RawSubscription = from_object(object)?;
            BillingEvent::SubscriptionDeleted {
                customer_id: subscription.customer,
            }
        }
        "invoice.payment_failed" => {
            let invoice: RawInvoice = from_object(object)?;
            BillingEvent::PaymentFailed {
                customer_id: invoice.customer,
            }
        }
        _ => BillingEvent::Unhandled(raw.kind.clone()),
    };

    Ok(WebhookEvent {
        id: raw.id,
        created: raw.created,
        kind,
    })
}

fn from_object<T: serde::de::DeserializeOwned>(object: Value) -> Result<T, BillingError> {
    serde_json::from_value(object).map_err(|e| BillingError::InvalidPayload(e.to_string()))
}

fn checkout_completed(session: RawCheckoutSession) -> Option<BillingEvent> {
    let user_id = UserId::parse(session.metadata.user_id.as_deref()?).ok()?;
    let plan = session.metadata.plan.as_deref()?.parse().ok()?;
    Some(BillingEvent::CheckoutCompleted {
        user_id,
        plan,
        customer_id: session.customer?,
        subscription_id: session.subscription,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::SubscriptionStatus;
    use serde_json::json;

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_700_000_000;

    #[test]
    fn accepts_a_fresh_valid_signature() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = signature_header(SECRET, NOW - 10, payload).unwrap();
        assert!(verify_signature(payload, &header, SECRET, NOW).is_ok());
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let payload = br#"{"id":"evt_1"}"#;
        let good = sign(SECRET, NOW, payload).unwrap();
        let header = format!("t={NOW},v1={},v1={good},v0=ignored", "ab".repeat(32));
        assert!(verify_signature(payload, &header, SECRET, NOW).is_ok());
    }

    #[test]
    fn rejects_tampered_payloads() {
        let header = signature_header(SECRET, NOW, br#"{"id":"evt_1"}"#).unwrap();
        let err = verify_signature(br#"{"id":"evt_2"}"#, &header, SECRET, NOW).unwrap_err();
        assert!(matches!(err, BillingError::InvalidSignature(_)));
    }

    #[test]
    fn rejects_wrong_secret() {
        let payload = b"{}";
        let header = signature_header("whsec_other", NOW, payload).unwrap();
        assert!(verify_signature(payload, &header, SECRET, NOW).is_err());
    }

    #[test]
    fn rejects_old_timestamps() {
        let payload = b"{}";
        let header = signature_header(SECRET, NOW - TOLERANCE_SECS - 1, payload).unwrap();
        let err = verify_signature(payload, &header, SECRET, NOW).unwrap_err();
        assert_eq!(err.to_string(), "Timestamp outside the tolerance zone");
    }

    #[test]
    fn rejects_malformed_headers() {
        for header in ["", "garbage", "t=abc,v1=00", "t=1700000000"] {
            assert!(
                verify_signature(b"{}", header, SECRET, NOW).is_err(),
                "{header:?}"
            );
        }
    }

    fn payload(kind: &str, object: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "created": NOW,
            "type": kind,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[test]
    fn parses_checkout_completed() {
        let body = payload(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "userId": "u1", "plan": "premium" }
            }),
        );
        let event = parse_event(&body).unwrap();
        assert_eq!(event.created, NOW);
        assert_eq!(
            event.kind,
            BillingEvent::CheckoutCompleted {
                user_id: UserId::parse("u1").unwrap(),
                plan: PlanTier::Premium,
                customer_id: "cus_1".into(),
                subscription_id: Some("sub_1".into()),
            }
        );
    }

    #[test]
    fn checkout_without_metadata_is_unhandled() {
        let body = payload(
            "checkout.session.completed",
            json!({ "id": "cs_1", "customer": "cus_1" }),
        );
        assert_eq!(
            parse_event(&body).unwrap().kind,
            BillingEvent::Unhandled("checkout.session.completed".into())
        );
    }

    #[test]
    fn parses_subscription_lifecycle() {
        let body = payload(
            "customer.subscription.updated",
            json!({ "id": "sub_1", "customer": "cus_1", "status": "past_due" }),
        );
        assert_eq!(
            parse_event(&body).unwrap().kind,
            BillingEvent::SubscriptionUpdated {
                customer_id: "cus_1".into(),
                status: SubscriptionStatus::PastDue,
            }
        );

        let body = payload(
            "customer.subscription.deleted",
            json!({ "id": "sub_1", "customer": "cus_1", "status": "canceled" }),
        );
        assert_eq!(
            parse_event(&body).unwrap().kind,
            BillingEvent::SubscriptionDeleted {
                customer_id: "cus_1".into()
            }
        );

        let body = payload("invoice.payment_failed", json!({ "customer": "cus_1" }));
        assert!(matches!(
            parse_event(&body).unwrap().kind,
            BillingEvent::PaymentFailed { .. }
        ));
    }

    #[test]
    fn other_types_are_unhandled() {
        let body = payload("charge.refunded", json!({}));
        assert_eq!(
            parse_event(&body).unwrap().kind,
            BillingEvent::Unhandled("charge.refunded".into())
        );
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            parse_event(b"not json"),
            Err(BillingError::InvalidPayload(_))
        ));
    }
}
