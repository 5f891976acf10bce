use crate::auth::CurrentUser;
use crate::todo::{Todo, TodoPayload, TodoService, TodoServiceError, TodoState};
use crate::web::{ApiError, ErrorResponse};
use axum::{
    Router,
    extract::{Extension, FromRequest, FromRequestParts, Path, Request, State},
    http::{StatusCode, request::Parts},
    response::Json,
    routing::{get, patch},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use utoipa::ToSchema;
use validator::Validate;

/// JSON representation of a Todo for API responses.
#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq, Eq, Clone)]
pub struct TodoJson {
    /// Unique identifier, assigned on creation
    pub id: i32,
    /// Short title, at most 30 characters
    pub title: String,
    /// Free-form status label such as "Backlog" or "Done"
    pub status: String,
    /// Optional longer description
    pub details: String,
    /// Priority label, at most 1000 characters
    pub priority: String,
    /// When the todo was created
    pub created_at: DateTime<Utc>,
    /// When the todo was last changed
    pub updated_at: DateTime<Utc>,
}

impl From<Todo> for TodoJson {
    fn from(todo: Todo) -> Self {
        Self {
            id: todo.id(),
            title: todo.title().to_string(),
            status: todo.status().to_string(),
            details: todo.details().to_string(),
            priority: todo.priority().to_string(),
            created_at: todo.created_at(),
            updated_at: todo.updated_at(),
        }
    }
}

/// Request body for creating or fully updating a todo.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct TodoRequest {
    #[validate(length(min = 1, max = 30), custom(function = "validate_no_nul"))]
    pub title: String,
    #[validate(length(min = 1), custom(function = "validate_no_nul"))]
    pub status: String,
    #[serde(default)]
    #[validate(custom(function = "validate_no_nul"))]
    pub details: Option<String>,
    #[validate(length(min = 1, max = 1000), custom(function = "validate_no_nul"))]
    pub priority: String,
}

impl From<TodoRequest> for TodoPayload {
    fn from(request: TodoRequest) -> Self {
        Self {
            title: request.title,
            status: request.status,
            details: request.details.unwrap_or_default(),
            priority: request.priority,
        }
    }
}

/// Request body for the status-only update.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct StatusRequest {
    #[validate(length(min = 1), custom(function = "validate_no_nul"))]
    pub status: String,
}

/// PostgreSQL text columns cannot hold U+0000.
fn validate_no_nul(value: &str) -> Result<(), validator::ValidationError> {
    if value.contains('\0') {
        return Err(validator::ValidationError::new("nul_character"));
    }
    Ok(())
}

/// JSON body extractor that also runs `validator` rules.
///
/// Every rejection, including a missing content type, becomes `ApiError::BadPayload`.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| {
                tracing::debug!("Rejected request body: {}", rejection.body_text());
                ApiError::BadPayload
            })?;
        value.validate().map_err(|errors| {
            tracing::debug!("Request body failed validation: {}", errors);
            ApiError::BadPayload
        })?;
        Ok(Self(value))
    }
}

/// The `{id}` path segment, parsed as an integer.
pub struct TodoId(pub i32);

impl<S> FromRequestParts<S> for TodoId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::BadId)?;
        raw.parse().map(TodoId).map_err(|_| ApiError::BadId)
    }
}

impl From<TodoServiceError> for ApiError {
    fn from(err: TodoServiceError) -> Self {
        match err {
            TodoServiceError::TodoNotFound(id) => ApiError::NotFound(id),
            TodoServiceError::Database(err) => {
                tracing::error!("Todo store failure: {}", err);
                ApiError::Internal
            }
        }
    }
}

/// Handler for GET /todo - Returns all todos.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/todo",
    responses(
        (status = 200, description = "Successfully retrieved todos", body = [TodoJson]),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    security(("basic_auth" = [])),
    tag = "Todos"
)]
pub async fn list_todos_handler(
    State(state): State<Arc<TodoState>>,
) -> Result<Json<Vec<TodoJson>>, ApiError> {
    let todos = TodoService::new(&state.db).get_all_todos().await?;
    Ok(Json(todos.into_iter().map(TodoJson::from).collect()))
}

/// Handler for GET /todo/{id} - Returns a single todo.
#[tracing::instrument(skip(state, id), fields(id = id.0))]
#[utoipa::path(
    get,
    path = "/todo/{id}",
    params(("id" = i32, Path, description = "ID of the todo")),
    responses(
        (status = 200, description = "Successfully retrieved todo", body = TodoJson),
        (status = 400, description = "ID is not an integer", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
        (status = 404, description = "Todo not found", body = ErrorResponse)
    ),
    security(("basic_auth" = [])),
    tag = "Todos"
)]
pub async fn get_todo_handler(
    State(state): State<Arc<TodoState>>,
    id: TodoId,
) -> Result<Json<TodoJson>, ApiError> {
    let todo = TodoService::new(&state.db).get_todo_by_id(id.0).await?;
    Ok(Json(TodoJson::from(todo)))
}

/// Handler for POST /todo - Creates a todo.
#[tracing::instrument(skip(state, user, request), fields(user = %user.name))]
#[utoipa::path(
    post,
    path = "/todo",
    request_body = TodoRequest,
    responses(
        (status = 201, description = "Todo created", body = TodoJson),
        (status = 400, description = "Body is missing or invalid", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse)
    ),
    security(("basic_auth" = [])),
    tag = "Todos"
)]
pub async fn create_todo_handler(
    State(state): State<Arc<TodoState>>,
    Extension(user): Extension<CurrentUser>,
    ValidatedJson(request): ValidatedJson<TodoRequest>,
) -> Result<(StatusCode, Json<TodoJson>), ApiError> {
    let todo = TodoService::new(&state.db)
        .create_todo(TodoPayload::from(request))
        .await?;
    Ok((StatusCode::CREATED, Json(TodoJson::from(todo))))
}

/// Handler for PUT /todo/{id} - Replaces title, status, details and priority.
#[tracing::instrument(skip(state, user, id, request), fields(id = id.0, user = %user.name))]
#[utoipa::path(
    put,
    path = "/todo/{id}",
    params(("id" = i32, Path, description = "ID of the todo")),
    request_body = TodoRequest,
    responses(
        (status = 200, description = "Todo updated", body = TodoJson),
        (status = 400, description = "Bad ID or body", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
        (status = 404, description = "Todo not found", body = ErrorResponse)
    ),
    security(("basic_auth" = [])),
    tag = "Todos"
)]
pub async fn update_todo_handler(
    State(state): State<Arc<TodoState>>,
    Extension(user): Extension<CurrentUser>,
    id: TodoId,
    ValidatedJson(request): ValidatedJson<TodoRequest>,
) -> Result<Json<TodoJson>, ApiError> {
    let todo = TodoService::new(&state.db)
        .update_todo(id.0, TodoPayload::from(request))
        .await?;
    Ok(Json(TodoJson::from(todo)))
}

/// Handler for PATCH /todo/{id}/status - Changes only the status.
#[tracing::instrument(skip(state, user, id, request), fields(id = id.0, user = %user.name))]
#[utoipa::path(
    patch,
    path = "/todo/{id}/status",
    params(("id" = i32, Path, description = "ID of the todo")),
    request_body = StatusRequest,
    responses(
        (status = 200, description = "Status updated", body = TodoJson),
        (status = 400, description = "Bad ID or body", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
        (status = 404, description = "Todo not found", body = ErrorResponse)
    ),
    security(("basic_auth" = [])),
    tag = "Todos"
)]
pub async fn update_todo_status_handler(
    State(state): State<Arc<TodoState>>,
    Extension(user): Extension<CurrentUser>,
    id: TodoId,
    ValidatedJson(request): ValidatedJson<StatusRequest>,
) -> Result<Json<TodoJson>, ApiError> {
    let todo = TodoService::new(&state.db)
        .update_todo_status(id.0, request.status)
        .await?;
    Ok(Json(TodoJson::from(todo)))
}

/// Handler for DELETE /todo/{id} - Deletes a todo and returns it.
#[tracing::instrument(skip(state, user, id), fields(id = id.0, user = %user.name))]
#[utoipa::path(
    delete,
    path = "/todo/{id}",
    params(("id" = i32, Path, description = "ID of the todo")),
    responses(
        (status = 200, description = "Todo deleted; body is the removed todo", body = TodoJson),
        (status = 400, description = "ID is not an integer", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
        (status = 404, description = "Todo not found", body = ErrorResponse)
    ),
    security(("basic_auth" = [])),
    tag = "Todos"
)]
pub async fn delete_todo_handler(
    State(state): State<Arc<TodoState>>,
    Extension(user): Extension<CurrentUser>,
    id: TodoId,
) -> Result<Json<TodoJson>, ApiError> {
    let todo = TodoService::new(&state.db).delete_todo(id.0).await?;
    Ok(Json(TodoJson::from(todo)))
}

/// Creates and returns the todo API router.
pub fn create_api_router(state: Arc<TodoState>) -> Router {
    Router::new()
        .route("/todo", get(list_todos_handler).post(create_todo_handler))
        .route(
            "/todo/{id}",
            get(get_todo_handler)
                .put(update_todo_handler)
                .delete(delete_todo_handler),
        )
        .route("/todo/{id}/status", patch(update_todo_status_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(title: &str, status: &str, priority: &str) -> TodoRequest {
        TodoRequest {
            title: title.to_string(),
            status: status.to_string(),
            details: None,
            priority: priority.to_string(),
        }
    }

    #[test]
    fn can_accept_valid_request() {
        assert!(request("Test TODO", "Done", "P0").validate().is_ok());
    }

    #[test]
    fn can_count_title_length_in_characters() {
        let title = "あ".repeat(30);
        assert!(request(&title, "Done", "P0").validate().is_ok());

        let title = "a".repeat(31);
        assert!(request(&title, "Done", "P0").validate().is_err());
    }

    #[test]
    fn can_reject_empty_required_fields() {
        assert!(request("", "Done", "P0").validate().is_err());
        assert!(request("Test TODO", "", "P0").validate().is_err());
        assert!(request("Test TODO", "Done", "").validate().is_err());
    }

    #[test]
    fn can_limit_priority_length() {
        let priority = "p".repeat(1000);
        assert!(request("Test TODO", "Done", &priority).validate().is_ok());

        let priority = "p".repeat(1001);
        assert!(request("Test TODO", "Done", &priority).validate().is_err());
    }

    #[test]
    fn can_reject_nul_characters() {
        assert!(request("Test\0TODO", "Done", "P0").validate().is_err());
        assert!(request("Test TODO", "Do\0ne", "P0").validate().is_err());
        assert!(request("Test TODO", "Done", "P\00").validate().is_err());

        let mut with_details = request("Test TODO", "Done", "P0");
        with_details.details = Some("line\0break".to_string());
        assert!(with_details.validate().is_err());

        let status = StatusRequest {
            status: "\0".to_string(),
        };
        assert!(status.validate().is_err());
    }

    #[test]
    fn can_reject_body_with_missing_fields() {
        let parsed = serde_json::from_str::<TodoRequest>(r#"{"message":"bad"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn can_default_missing_details_to_empty() {
        let parsed: TodoRequest =
            serde_json::from_str(r#"{"title":"Test TODO","status":"Done","priority":"P0"}"#)
                .unwrap();

        let payload = TodoPayload::from(parsed);

        assert_eq!(payload.details, "");
    }
}
