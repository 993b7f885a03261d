mod accounts;
mod billing;
mod habits;
mod tasks;

pub use accounts::{get_user, login, signup};
pub use billing::{
    cancel_subscription, create_checkout_session, create_portal_session, get_subscription,
    health, verify_session, webhook,
};
pub use habits::{create_habit, delete_habit, get_progress, list_habits, toggle_habit, update_habit};
pub use tasks::{create_task, delete_task, get_task_stats, list_tasks, toggle_task, update_task};

use crate::accounts as account_rules;
use crate::errors::AppError;
use crate::models::{PlanTier, UserId};
use crate::state::AppState;

fn parse_user(raw: &str) -> Result<UserId, AppError> {
    Ok(UserId::parse(raw)?)
}

/// Plan of an existing account. Unknown users are a 404.
async fn account_plan(state: &AppState, user_id: &UserId) -> Result<PlanTier, AppError> {
    let accounts = state.accounts.load().await?;
    Ok(account_rules::find(&accounts, user_id)?.plan)
}
