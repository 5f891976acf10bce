use axum::Router;
use axum::http::StatusCode;
use insta::assert_yaml_snapshot;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use todo_server::web::create_app;

mod common;

use common::{ADMIN_AUTH, send};

/// App without a reachable database: anything that touches the store fails.
fn create_test_app() -> Router {
    create_app(Arc::new(DatabaseConnection::default()))
}

#[tokio::test]
async fn can_check_health_endpoint() {
    let app = create_test_app();

    let response = tower::ServiceExt::oneshot(
        app,
        axum::http::Request::builder()
            .uri("/health")
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn can_return_not_found_for_unknown_routes() {
    let app = create_test_app();

    for method in ["GET", "POST", "PUT", "DELETE"] {
        let (status, body) = send(&app, method, "/error", None, None).await;

        assert_eq!(status, StatusCode::NOT_FOUND, "{method} /error");
        assert_yaml_snapshot!(body, @r#"message: 404 page not found"#);
    }
}

#[tokio::test]
async fn can_reject_todo_routes_without_credentials() {
    let app = create_test_app();
    let routes = [
        ("GET", "/todo"),
        ("POST", "/todo"),
        ("GET", "/todo/1"),
        ("PUT", "/todo/1"),
        ("PATCH", "/todo/1/status"),
        ("DELETE", "/todo/1"),
    ];

    for (method, uri) in routes {
        let (status, body) = send(&app, method, uri, None, None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
        assert_eq!(body["message"], "401 Unauthorized");
    }
}

#[tokio::test]
async fn can_report_unreachable_store_during_authentication() {
    let app = create_test_app();

    let (status, body) = send(&app, "GET", "/todo", Some(ADMIN_AUTH), None).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_yaml_snapshot!(body, @r#"message: Internal server error"#);
}

#[tokio::test]
async fn can_serve_openapi_document() {
    let app = create_test_app();

    let (status, body) = send(&app, "GET", "/api-docs/openapi.json", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/todo"]["get"].is_object());
    assert!(body["paths"]["/todo/{id}/status"]["patch"].is_object());
    assert_eq!(
        body["components"]["securitySchemes"]["basic_auth"]["scheme"],
        "basic"
    );
}
