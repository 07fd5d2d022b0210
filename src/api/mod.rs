mod attendance;
pub mod audit;
pub mod auth;
pub mod error;
mod extract;
mod holidays;
mod leave;
pub mod response;
mod roles;
mod tours;
mod users;
mod validation;

use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public)
    let public_auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/register", post(auth::register));

    // Session routes (token required)
    let session_routes = Router::new()
        .route("/logout", post(auth::logout))
        .route("/logout-all", post(auth::logout_all))
        .route("/sessions", get(auth::list_sessions))
        .route("/profile", get(auth::profile));

    let attendance_routes = Router::new()
        .route("/checkin", post(attendance::check_in))
        .route("/start-new-session", post(attendance::start_new_session))
        .route("/checkout", post(attendance::check_out))
        .route("/today", get(attendance::today))
        .route("/date/:date", get(attendance::by_date))
        .route("/range", get(attendance::by_range))
        .route("/all", get(attendance::all))
        .route("/admin/all-users", get(attendance::all_users))
        .route("/admin/create", post(attendance::admin_create))
        .route("/admin/update/:id", put(attendance::admin_update))
        .route("/admin/delete/:id", delete(attendance::admin_delete));

    let leave_routes = Router::new()
        // Holidays
        .route(
            "/holidays",
            get(holidays::list_holidays).post(holidays::create_holiday),
        )
        .route("/holidays/year/:year", get(holidays::list_holidays_by_year))
        .route(
            "/holidays/:id",
            get(holidays::get_holiday)
                .put(holidays::update_holiday)
                .delete(holidays::delete_holiday),
        )
        // Leave requests
        .route(
            "/leave-requests",
            get(leave::list_leaves).post(leave::create_leave),
        )
        .route("/leave-requests/my", get(leave::my_leaves))
        .route("/leave-requests/range", get(leave::leaves_in_range))
        .route("/leave-requests/balance", get(leave::balance))
        .route(
            "/leave-requests/:id",
            get(leave::get_leave).put(leave::update_leave),
        )
        .route("/leave-requests/:id/status", put(leave::update_status))
        .route("/leave-requests/:id/approve", put(leave::approve))
        .route("/leave-requests/:id/reject", put(leave::reject))
        .route("/leave-requests/:id/cancel", put(leave::cancel));

    let tour_routes = Router::new()
        .route("/tours", get(tours::list_tours).post(tours::create_tour))
        .route("/tours/my", get(tours::my_tours))
        .route("/tours/range", get(tours::tours_in_range))
        .route(
            "/tours/:id",
            get(tours::get_tour)
                .patch(tours::update_tour)
                .delete(tours::delete_tour),
        )
        .route("/tours/:id/status", patch(tours::update_tour_status))
        .route("/tours/:id/status-history", get(tours::status_history));

    let user_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route(
            "/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        );

    let role_routes = Router::new()
        .route("/", get(roles::list_roles).post(roles::create_role))
        .route("/available-permissions", get(roles::available_permissions))
        .route("/name/:name", get(roles::get_role_by_name))
        .route(
            "/:id",
            get(roles::get_role)
                .put(roles::update_role)
                .delete(roles::delete_role),
        )
        .route("/:id/permissions", put(roles::assign_permissions));

    // Protected API routes
    let api_routes = Router::new()
        .nest("/auth", session_routes)
        .nest("/attendance", attendance_routes)
        .nest("/leave-management", leave_routes)
        .nest("/tour-management", tour_routes)
        .nest("/users", user_routes)
        .nest("/roles", role_routes)
        .route("/audit-logs", get(audit::list_logs))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    // Credentialed CORS: echo the caller's origin
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", public_auth_routes)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}


#[cfg(test)]
mod tests {
    use super::create_router;
    use super::test_support::{send, test_state};
    use axum::http::{header, Method, Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_is_public() {
        let app = create_router(test_state().await);
        let response = send(&app, Method::GET, "/health", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cors_echoes_origin() {
        let app = create_router(test_state().await);
        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "https://hr.example.com")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://hr.example.com"
        );
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
            "true"
        );
    }
}
