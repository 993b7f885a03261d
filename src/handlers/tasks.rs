use super::{account_plan, parse_user};
use crate::errors::AppError;
use crate::extract::{JsonBody, PathParams, QueryParams};
use crate::models::{NewTask, Task, TaskListResponse, TaskQuery, TaskStats, TaskUpdate};
use crate::state::AppState;
use crate::stats::{compute_stats, sort_tasks};
use crate::tasks;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub async fn list_tasks(
    State(state): State<AppState>,
    PathParams(user_id): PathParams<String>,
    QueryParams(query): QueryParams<TaskQuery>,
) -> Result<Response, AppError> {
    let user_id = parse_user(&user_id)?;
    account_plan(&state, &user_id).await?;
    let items = state.tasks.load(&user_id).await?;

    let response = TaskListResponse {
        tasks: sort_tasks(&items, query.filter),
        stats: compute_stats(&items),
    };
    Ok(Json(response).into_response())
}

pub async fn create_task(
    State(state): State<AppState>,
    PathParams(user_id): PathParams<String>,
    JsonBody(payload): JsonBody<NewTask>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    let user_id = parse_user(&user_id)?;
    let _guard = state.writes.lock().await;
    let plan = account_plan(&state, &user_id).await?;
    let mut items = state.tasks.load(&user_id).await?;

    let task = tasks::add_task(&mut items, payload, plan)?;
    state.tasks.save(&user_id, &items).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn update_task(
    State(state): State<AppState>,
    PathParams((user_id, task_id)): PathParams<(String, String)>,
    JsonBody(payload): JsonBody<TaskUpdate>,
) -> Result<Json<Task>, AppError> {
    let user_id = parse_user(&user_id)?;
    let _guard = state.writes.lock().await;
    let plan = account_plan(&state, &user_id).await?;
    let mut items = state.tasks.load(&user_id).await?;

    let task = tasks::update_task(&mut items, &task_id, payload, plan)?;
    state.tasks.save(&user_id, &items).await?;
    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<AppState>,
    PathParams((user_id, task_id)): PathParams<(String, String)>,
) -> Result<StatusCode, AppError> {
    let user_id = parse_user(&user_id)?;
    let _guard = state.writes.lock().await;
    account_plan(&state, &user_id).await?;
    let mut items = state.tasks.load(&user_id).await?;

    tasks::delete_task(&mut items, &task_id)?;
    state.tasks.save(&user_id, &items).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_task(
    State(state): State<AppState>,
    PathParams((user_id, task_id)): PathParams<(String, String)>,
) -> Result<Json<Task>, AppError> {
    let user_id = parse_user(&user_id)?;
    let _guard = state.writes.lock().await;
    account_plan(&state, &user_id).await?;
    let mut items = state.tasks.load(&user_id).await?;

    let task = tasks::toggle_task(&mut items, &task_id)?;
    state.tasks.save(&user_id, &items).await?;
    Ok(Json(task))
}

pub async fn get_task_stats(
    State(state): State<AppState>,
    PathParams(user_id): PathParams<String>,
) -> Result<Json<TaskStats>, AppError> {
    let user_id = parse_user(&user_id)?;
    account_plan(&state, &user_id).await?;
    let items = state.tasks.load(&user_id).await?;
    Ok(Json(compute_stats(&items)))
}
