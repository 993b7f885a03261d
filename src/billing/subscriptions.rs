use super::webhook::{BillingEvent, WebhookEvent};
use crate::models::{PlanTier, UserId};
use crate::storage::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Provider-side subscription status. Unrecognized values deserialize as
/// [`SubscriptionStatus::Unknown`] rather than failing the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Unpaid => "unpaid",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Paused => "paused",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub customer_id: String,
    pub subscription_id: Option<String>,
    pub plan: PlanTier,
    pub status: SubscriptionStatus,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Record for a customer created at checkout, before payment completes.
    pub fn pending(customer_id: impl Into<String>, plan: PlanTier, at: DateTime<Utc>) -> Self {
        Self {
            customer_id: customer_id.into(),
            subscription_id: None,
            plan,
            status: SubscriptionStatus::Pending,
            updated_at: at,
        }
    }

    /// Plan the user is entitled to. Only an active subscription grants its
    /// plan.
    pub fn effective_plan(&self) -> PlanTier {
        if self.status == SubscriptionStatus::Active {
            self.plan
        } else {
            PlanTier::Free
        }
    }

    fn same_state(&self, other: &Self) -> bool {
        self.customer_id == other.customer_id
            && self.subscription_id == other.subscription_id
            && self.plan == other.plan
            && self.status == other.status
    }
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>, StorageError>;

    async fn put(&self, user_id: &UserId, record: SubscriptionRecord) -> Result<(), StorageError>;

    /// Every user whose record points at `customer_id`.
    async fn by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Vec<(UserId, SubscriptionRecord)>, StorageError>;
}

/// Process-local subscription records. Lost on restart.
#[derive(Debug, Default)]
pub struct MemorySubscriptionStore {
    records: RwLock<HashMap<UserId, SubscriptionRecord>>,
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn get(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>, StorageError> {
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn put(&self, user_id: &UserId, record: SubscriptionRecord) -> Result<(), StorageError> {
        self.records.write().await.insert(user_id.clone(), record);
        Ok(())
    }

    async fn by_customer(
        &self,
        customer_id: &str,
    ) -> Result<Vec<(UserId, SubscriptionRecord)>, StorageError> {
        let records = self.records.read().await;
        let mut matched: Vec<_> = records
            .iter()
            .filter(|(_, record)| record.customer_id == customer_id)
            .map(|(user_id, record)| (user_id.clone(), record.clone()))
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matched)
    }
}

/// Applies a webhook event and returns the resulting record of every user it
/// concerns, so their stored plans can be brought in line.
///
/// Records carry the event's timestamp instead of the wall clock. Events older
/// than the stored record are skipped and records whose state would not change
/// are left alone, so redelivered events leave the store as they found it.
pub async fn apply_event(
    store: &dyn SubscriptionStore,
    event: &WebhookEvent,
) -> Result<Vec<(UserId, SubscriptionRecord)>, StorageError> {
    let at = event.created_at();
    match &event.kind {
        BillingEvent::CheckoutCompleted {
            user_id,
            plan,
            customer_id,
            subscription_id,
        } => {
            let next = SubscriptionRecord {
                customer_id: customer_id.clone(),
                subscription_id: subscription_id.clone(),
                plan: *plan,
                status: SubscriptionStatus::Active,
                updated_at: at,
            };
            let current = store.get(user_id).await?;
            let record = write_if_changed(store, user_id, current, next).await?;
            info!(user_id = %user_id, plan = %plan, "checkout completed");
            Ok(vec![(user_id.clone(), record)])
        }
        BillingEvent::SubscriptionUpdated {
            customer_id,
            status,
        } => {
            let status = *status;
            let applied = update_customer(store, customer_id, at, |record| {
                record.status = status;
            })
            .await?;
            info!(customer_id = %customer_id, status = status.as_str(), "subscription updated");
            Ok(applied)
        }
        BillingEvent::SubscriptionDeleted { customer_id } => {
            let applied = update_customer(store, customer_id, at, |record| {
                record.status = SubscriptionStatus::Canceled;
                record.plan = PlanTier::Free;
            })
            .await?;
            info!(customer_id = %customer_id, "subscription canceled");
            Ok(applied)
        }
        BillingEvent::PaymentFailed { customer_id } => {
            warn!(customer_id = %customer_id, "payment failed");
            Ok(Vec::new())
        }
        BillingEvent::Unhandled(kind) => {
            debug!("unhandled event type {kind}");
            Ok(Vec::new())
        }
    }
}

async fn update_customer(
    store: &dyn SubscriptionStore,
    customer_id: &str,
    at: DateTime<Utc>,
    change: impl Fn(&mut SubscriptionRecord),
) -> Result<Vec<(UserId, SubscriptionRecord)>, StorageError> {
    let matched = store.by_customer(customer_id).await?;
    if matched.is_empty() {
        warn!(customer_id, "no subscription record for customer");
    }

    let mut applied = Vec::with_capacity(matched.len());
    for (user_id, current) in matched {
        let mut next = current.clone();
        change(&mut next);
        next.updated_at = at;
        let record = write_if_changed(store, &user_id, Some(current), next).await?;
        applied.push((user_id, record));
    }
    Ok(applied)
}

/// Stores `next` unless it is stale or identical to `current`. Returns the
/// record that ends up stored.
async fn write_if_changed(
    store: &dyn SubscriptionStore,
    user_id: &UserId,
    current: Option<SubscriptionRecord>,
    next: SubscriptionRecord,
) -> Result<SubscriptionRecord, StorageError> {
    if let Some(current) = current {
        if current.updated_at > next.updated_at {
            debug!(user_id = %user_id, "skipping stale event");
            return Ok(current);
        }
        if current.same_state(&next) {
            return Ok(current);
        }
    }
    store.put(user_id, next.clone()).await?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn event(created: i64, kind: BillingEvent) -> WebhookEvent {
        WebhookEvent {
            id: format!("evt_{created}"),
            created,
            kind,
        }
    }

    fn completed(created: i64) -> WebhookEvent {
        event(
            created,
            BillingEvent::CheckoutCompleted {
                user_id: user("u1"),
                plan: PlanTier::Pro,
                customer_id: "cus_1".into(),
                subscription_id: Some("sub_1".into()),
            },
        )
    }

    #[tokio::test]
    async fn checkout_completed_activates_the_plan() {
        let store = MemorySubscriptionStore::default();
        let applied = apply_event(&store, &completed(1_700_000_000)).await.unwrap();

        assert_eq!(applied.len(), 1);
        let (user_id, record) = &applied[0];
        assert_eq!(user_id.as_str(), "u1");
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert_eq!(record.effective_plan(), PlanTier::Pro);
        assert_eq!(
            record.updated_at,
            Utc.timestamp_opt(1_700_000_000, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn canceled_event_is_idempotent() {
        let store = MemorySubscriptionStore::default();
        apply_event(&store, &completed(100)).await.unwrap();

        let canceled = event(
            200,
            BillingEvent::SubscriptionDeleted {
                customer_id: "cus_1".into(),
            },
        );
        let first = apply_event(&store, &canceled).await.unwrap();
        let after_first = store.get(&user("u1")).await.unwrap();
        let second = apply_event(&store, &canceled).await.unwrap();
        let after_second = store.get(&user("u1")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(after_first, after_second);
        let record = after_second.unwrap();
        assert_eq!(record.status, SubscriptionStatus::Canceled);
        assert_eq!(record.plan, PlanTier::Free);
        assert_eq!(record.effective_plan(), PlanTier::Free);
    }

    #[tokio::test]
    async fn status_update_reaches_every_user_of_the_customer() {
        let store = MemorySubscriptionStore::default();
        let at = Utc.timestamp_opt(100, 0).unwrap();
        store
            .put(&user("a"), SubscriptionRecord::pending("cus_1", PlanTier::Pro, at))
            .await
            .unwrap();
        store
            .put(&user("b"), SubscriptionRecord::pending("cus_1", PlanTier::Premium, at))
            .await
            .unwrap();
        store
            .put(&user("c"), SubscriptionRecord::pending("cus_2", PlanTier::Pro, at))
            .await
            .unwrap();

        let past_due = event(
            150,
            BillingEvent::SubscriptionUpdated {
                customer_id: "cus_1".into(),
                status: SubscriptionStatus::PastDue,
            },
        );
        let applied = apply_event(&store, &past_due).await.unwrap();

        let users: Vec<_> = applied.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(users, ["a", "b"]);
        assert!(applied
            .iter()
            .all(|(_, record)| record.effective_plan() == PlanTier::Free));
        assert_eq!(
            store.get(&user("c")).await.unwrap().unwrap().status,
            SubscriptionStatus::Pending
        );
    }

    #[tokio::test]
    async fn stale_events_do_not_overwrite_newer_state() {
        let store = MemorySubscriptionStore::default();
        apply_event(&store, &completed(100)).await.unwrap();
        apply_event(
            &store,
            &event(
                300,
                BillingEvent::SubscriptionDeleted {
                    customer_id: "cus_1".into(),
                },
            ),
        )
        .await
        .unwrap();

        let late_update = event(
            200,
            BillingEvent::SubscriptionUpdated {
                customer_id: "cus_1".into(),
                status: SubscriptionStatus::Active,
            },
        );
        let applied = apply_event(&store, &late_update).await.unwrap();
        assert_eq!(applied[0].1.status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn unknown_customer_and_unhandled_events_change_nothing() {
        let store = MemorySubscriptionStore::default();
        let orphan = event(
            100,
            BillingEvent::SubscriptionDeleted {
                customer_id: "cus_missing".into(),
            },
        );
        assert!(apply_event(&store, &orphan).await.unwrap().is_empty());

        let other = event(100, BillingEvent::Unhandled("charge.refunded".into()));
        assert!(apply_event(&store, &other).await.unwrap().is_empty());
    }

    #[test]
    fn unknown_statuses_deserialize() {
        let status: SubscriptionStatus = serde_json::from_str("\"something_new\"").unwrap();
        assert_eq!(status, SubscriptionStatus::Unknown);
        let status: SubscriptionStatus = serde_json::from_str("\"past_due\"").unwrap();
        assert_eq!(status.as_str(), "past_due");
    }
}
