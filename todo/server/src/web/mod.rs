use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Method, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Json, Response};
use axum::{Router, routing::get};
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::sensitive_headers::SetSensitiveRequestHeadersLayer;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{AuthState, basic_auth_middleware};
use crate::config::Config;
use crate::todo::TodoState;
use crate::todo::api::v1;
use crate::user::UserService;

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Human-readable description of the failure
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors a handler can answer with. Each maps to one status code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The `id` path segment is not an integer.
    #[error("Bad Request: id")]
    BadId,
    /// The JSON body is missing, malformed or fails validation.
    #[error("Bad Request: Payload")]
    BadPayload,
    /// No todo exists for the ID.
    #[error("Todo item {0} not found")]
    NotFound(i32),
    /// The store failed; details are logged, not returned.
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadId | ApiError::BadPayload => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        v1::list_todos_handler,
        v1::get_todo_handler,
        v1::create_todo_handler,
        v1::update_todo_handler,
        v1::update_todo_status_handler,
        v1::delete_todo_handler,
    ),
    components(schemas(v1::TodoJson, v1::TodoRequest, v1::StatusRequest, ErrorResponse)),
    modifiers(&BasicAuthAddon),
    tags((name = "Todos", description = "Create, read, update and delete todo items"))
)]
pub struct ApiDoc;

struct BasicAuthAddon;

impl Modify for BasicAuthAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "basic_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Basic)),
            );
        }
    }
}

/// Builds the application router on top of an open database connection.
///
/// The `/todo` routes sit behind the Basic-auth middleware; `/health`, the
/// OpenAPI document and the 404 fallback are public.
pub fn create_app(db: Arc<DatabaseConnection>) -> Router {
    let auth_state = Arc::new(AuthState::new(Arc::new(UserService::new(db.clone()))));
    let todo_state = Arc::new(TodoState { db });

    let protected_routes = v1::create_api_router(todo_state)
        .route_layer(from_fn_with_state(auth_state, basic_auth_middleware));

    let public_routes = Router::new()
        .route("/health", get(health_check_handler))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .fallback(not_found_handler)
        .method_not_allowed_fallback(not_found_handler)
        .layer(
            ServiceBuilder::new()
                .layer(SetSensitiveRequestHeadersLayer::new([AUTHORIZATION]))
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_methods([
                            Method::GET,
                            Method::POST,
                            Method::PUT,
                            Method::PATCH,
                            Method::DELETE,
                        ])
                        .allow_headers([AUTHORIZATION, CONTENT_TYPE]),
                ),
        )
}

#[tracing::instrument(skip(config))]
pub async fn start_web_server(config: Config) -> anyhow::Result<()> {
    let db = Database::connect(&config.db_url).await?;
    migration::Migrator::up(&db, None).await?;
    tracing::info!("Database migrations applied successfully");
    let db = Arc::new(db);

    if let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password) {
        UserService::new(db.clone())
            .ensure_user(username, password)
            .await?;
    }

    let app = create_app(db);

    let server_address = format!("0.0.0.0:{}", &config.port);
    let listener = tokio::net::TcpListener::bind(&server_address).await?;
    tracing::info!("Web server running on http://{}", server_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        return;
    }
    tracing::info!("Shutting down web server");
}

#[tracing::instrument]
pub async fn health_check_handler() -> &'static str {
    "OK"
}

pub async fn not_found_handler() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new("404 page not found")),
    )
}
