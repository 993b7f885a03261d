use crate::errors::DomainError;
use crate::models::{LoginRequest, PlanTier, SignupRequest, User, UserId, UserRecord};
use chrono::Utc;

pub fn signup(accounts: &mut Vec<UserRecord>, input: SignupRequest) -> Result<User, DomainError> {
    let name = input.name.trim();
    let email = input.email.trim().to_lowercase();
    if name.is_empty() || email.is_empty() || input.password.is_empty() {
        return Err(DomainError::Validation(
            "Name, email and password are required".into(),
        ));
    }
    if find_by_email(accounts, &email).is_some() {
        return Err(DomainError::Conflict(
            "An account with this email already exists".into(),
        ));
    }

    let user = User {
        id: UserId::generate(),
        name: name.to_string(),
        email,
        plan: PlanTier::Free,
        created_at: Utc::now(),
    };
    accounts.push(UserRecord {
        user: user.clone(),
        password: input.password,
    });
    Ok(user)
}

pub fn login(accounts: &[UserRecord], input: &LoginRequest) -> Result<User, DomainError> {
    find_by_email(accounts, input.email.trim())
        .filter(|record| record.password == input.password)
        .map(|record| record.user.clone())
        .ok_or_else(|| DomainError::InvalidCredentials("Invalid email or password".into()))
}

pub fn find<'a>(accounts: &'a [UserRecord], id: &UserId) -> Result<&'a User, DomainError> {
    accounts
        .iter()
        .map(|record| &record.user)
        .find(|user| &user.id == id)
        .ok_or_else(|| DomainError::NotFound(format!("User not found: {id}")))
}

/// Returns whether the stored plan changed.
pub fn set_plan(accounts: &mut [UserRecord], id: &UserId, plan: PlanTier) -> bool {
    match accounts.iter_mut().find(|record| &record.user.id == id) {
        Some(record) if record.user.plan != plan => {
            record.user.plan = plan;
            true
        }
        _ => false,
    }
}

fn find_by_email<'a>(accounts: &'a [UserRecord], email: &str) -> Option<&'a UserRecord> {
    accounts
        .iter()
        .find(|record| record.user.email.eq_ignore_ascii_case(email))
}
