use crate::errors::DomainError;
use crate::models::PlanTier;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanLimits {
    /// `None` means unlimited.
    pub habits: Option<usize>,
    /// Cap on tasks that are not completed. `None` means unlimited.
    pub active_tasks: Option<usize>,
    pub priorities: bool,
}

// Indexed by `PlanTier` discriminant.
const PLAN_LIMITS: [(PlanTier, PlanLimits); 3] = [
    (
        PlanTier::Free,
        PlanLimits {
            habits: Some(5),
            active_tasks: Some(10),
            priorities: false,
        },
    ),
    (
        PlanTier::Pro,
        PlanLimits {
            habits: Some(20),
            active_tasks: Some(50),
            priorities: true,
        },
    ),
    (
        PlanTier::Premium,
        PlanLimits {
            habits: None,
            active_tasks: None,
            priorities: true,
        },
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Habit,
    ActiveTask,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Habit => f.write_str("habits"),
            Self::ActiveTask => f.write_str("active tasks"),
        }
    }
}

impl PlanTier {
    pub fn limits(self) -> PlanLimits {
        PLAN_LIMITS[self as usize].1
    }
}

impl PlanLimits {
    pub fn cap(&self, kind: ResourceKind) -> Option<usize> {
        match kind {
            ResourceKind::Habit => self.habits,
            ResourceKind::ActiveTask => self.active_tasks,
        }
    }
}

/// Fails when one more `kind` would exceed what `plan` allows, given that
/// `current` are already counted against the cap.
pub fn check_limit(current: usize, plan: PlanTier, kind: ResourceKind) -> Result<(), DomainError> {
    match plan.limits().cap(kind) {
        Some(limit) if current >= limit => Err(DomainError::LimitExceeded { kind, limit }),
        _ => Ok(()),
    }
}
