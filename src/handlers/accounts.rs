use super::parse_user;
use crate::accounts;
use crate::errors::AppError;
use crate::extract::{JsonBody, PathParams};
use crate::models::{LoginRequest, SignupRequest, User, UserProfile};
use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use tracing::info;

pub async fn signup(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<SignupRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let _guard = state.writes.lock().await;
    let mut records = state.accounts.load().await?;
    let user = accounts::signup(&mut records, payload)?;
    state.accounts.save(&records).await?;

    info!(user_id = %user.id, "account created");
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<Json<User>, AppError> {
    let records = state.accounts.load().await?;
    Ok(Json(accounts::login(&records, &payload)?))
}

pub async fn get_user(
    State(state): State<AppState>,
    PathParams(user_id): PathParams<String>,
) -> Result<Json<UserProfile>, AppError> {
    let user_id = parse_user(&user_id)?;
    let records = state.accounts.load().await?;
    let user = accounts::find(&records, &user_id)?.clone();
    Ok(Json(user.into()))
}
