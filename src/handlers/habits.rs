use super::{account_plan, parse_user};
use crate::errors::{AppError, DomainError};
use crate::extract::{JsonBody, PathParams};
use crate::habits;
use crate::models::{
    Habit, HabitListResponse, HabitUpdate, NewHabit, TodayProgress, ToggleRequest, UserId,
};
use crate::state::AppState;
use crate::stats::{today_progress, today_progress_at};
use crate::streak::today;
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
};
use chrono::NaiveDate;

/// Loads a user's habits with streaks brought up to `today`. Callers hold the
/// write lock because stale streaks are written back.
async fn load_fresh(
    state: &AppState,
    user_id: &UserId,
    today: NaiveDate,
) -> Result<Vec<Habit>, AppError> {
    let mut items = state.habits.load(user_id).await?;
    if habits::refresh_streaks(&mut items, today) {
        state.habits.save(user_id, &items).await?;
    }
    Ok(items)
}

pub async fn list_habits(
    State(state): State<AppState>,
    PathParams(user_id): PathParams<String>,
) -> Result<Json<HabitListResponse>, AppError> {
    let user_id = parse_user(&user_id)?;
    let today = today();
    let _guard = state.writes.lock().await;
    account_plan(&state, &user_id).await?;
    let items = load_fresh(&state, &user_id, today).await?;

    Ok(Json(HabitListResponse {
        progress: today_progress_at(today, &items),
        habits: items,
    }))
}

pub async fn create_habit(
    State(state): State<AppState>,
    PathParams(user_id): PathParams<String>,
    JsonBody(payload): JsonBody<NewHabit>,
) -> Result<(StatusCode, Json<Habit>), AppError> {
    let user_id = parse_user(&user_id)?;
    let _guard = state.writes.lock().await;
    let plan = account_plan(&state, &user_id).await?;
    let mut items = load_fresh(&state, &user_id, today()).await?;

    let habit = habits::add_habit(&mut items, payload, plan)?;
    state.habits.save(&user_id, &items).await?;
    Ok((StatusCode::CREATED, Json(habit)))
}

pub async fn update_habit(
    State(state): State<AppState>,
    PathParams((user_id, habit_id)): PathParams<(String, String)>,
    JsonBody(payload): JsonBody<HabitUpdate>,
) -> Result<Json<Habit>, AppError> {
    let user_id = parse_user(&user_id)?;
    let _guard = state.writes.lock().await;
    account_plan(&state, &user_id).await?;
    let mut items = load_fresh(&state, &user_id, today()).await?;

    let habit = habits::update_habit(&mut items, &habit_id, payload)?;
    state.habits.save(&user_id, &items).await?;
    Ok(Json(habit))
}

pub async fn delete_habit(
    State(state): State<AppState>,
    PathParams((user_id, habit_id)): PathParams<(String, String)>,
) -> Result<StatusCode, AppError> {
    let user_id = parse_user(&user_id)?;
    let _guard = state.writes.lock().await;
    account_plan(&state, &user_id).await?;
    let mut items = load_fresh(&state, &user_id, today()).await?;

    habits::delete_habit(&mut items, &habit_id)?;
    state.habits.save(&user_id, &items).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reads the optional toggle body. An empty body means today; anything else
/// must be a valid [`ToggleRequest`].
fn toggle_date(body: &[u8], today: NaiveDate) -> Result<NaiveDate, DomainError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(today);
    }
    let request: ToggleRequest = serde_json::from_slice(body)
        .map_err(|err| DomainError::Validation(format!("Invalid toggle request: {err}")))?;
    Ok(request.date.unwrap_or(today))
}

/// `date` defaults to today. An empty body is accepted.
pub async fn toggle_habit(
    State(state): State<AppState>,
    PathParams((user_id, habit_id)): PathParams<(String, String)>,
    body: Bytes,
) -> Result<Json<Habit>, AppError> {
    let user_id = parse_user(&user_id)?;
    let today = today();
    let date = toggle_date(&body, today)?;

    let _guard = state.writes.lock().await;
    account_plan(&state, &user_id).await?;
    let mut items = load_fresh(&state, &user_id, today).await?;

    let habit = habits::toggle_completion(&mut items, &habit_id, date, today)?;
    habits::refresh_streaks(&mut items, today);
    state.habits.save(&user_id, &items).await?;
    Ok(Json(habit))
}

pub async fn get_progress(
    State(state): State<AppState>,
    PathParams(user_id): PathParams<String>,
) -> Result<Json<TodayProgress>, AppError> {
    let user_id = parse_user(&user_id)?;
    account_plan(&state, &user_id).await?;
    let items = state.habits.load(&user_id).await?;
    Ok(Json(today_progress(&items)))
}
