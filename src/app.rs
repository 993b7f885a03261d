use crate::handlers;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, patch, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/signup", post(handlers::signup))
        .route("/api/login", post(handlers::login))
        .route("/api/users/:user_id", get(handlers::get_user))
        .route(
            "/api/users/:user_id/habits",
            get(handlers::list_habits).post(handlers::create_habit),
        )
        .route(
            "/api/users/:user_id/habits/:habit_id",
            patch(handlers::update_habit).delete(handlers::delete_habit),
        )
        .route(
            "/api/users/:user_id/habits/:habit_id/toggle",
            post(handlers::toggle_habit),
        )
        .route("/api/users/:user_id/progress", get(handlers::get_progress))
        .route(
            "/api/users/:user_id/tasks",
            get(handlers::list_tasks).post(handlers::create_task),
        )
        .route(
            "/api/users/:user_id/tasks/:task_id",
            patch(handlers::update_task).delete(handlers::delete_task),
        )
        .route(
            "/api/users/:user_id/tasks/:task_id/toggle",
            post(handlers::toggle_task),
        )
        .route("/api/users/:user_id/task-stats", get(handlers::get_task_stats))
        .route(
            "/api/create-checkout-session",
            post(handlers::create_checkout_session),
        )
        .route(
            "/api/create-portal-session",
            post(handlers::create_portal_session),
        )
        .route("/api/subscription/:user_id", get(handlers::get_subscription))
        .route("/api/cancel-subscription", post(handlers::cancel_subscription))
        .route("/api/verify-session", get(handlers::verify_session))
        .route("/api/webhook", post(handlers::webhook))
        .route("/api/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
