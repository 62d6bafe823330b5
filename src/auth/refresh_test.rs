use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use serde_json::{Value, json};

use super::*;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/api")
}

fn refresher(api_url: &str) -> HttpTokenRefresher {
    HttpTokenRefresher::new(api_url, RefreshTimeouts::default()).unwrap()
}

#[test]
fn endpoint_appends_refresh_path_once() {
    assert_eq!(refresh_endpoint("https://x.test/api"), "https://x.test/api/token/refresh/");
    assert_eq!(refresh_endpoint("https://x.test/api/"), "https://x.test/api/token/refresh/");
}

#[test]
fn parse_refresh_response_requires_access() {
    assert_eq!(parse_refresh_response(r#"{"access":"T2"}"#).unwrap(), "T2");
    assert!(matches!(parse_refresh_response(r#"{"access":""}"#), Err(CredentialError::RefreshParse(_))));
    assert!(matches!(parse_refresh_response("{}"), Err(CredentialError::RefreshParse(_))));
    assert!(matches!(parse_refresh_response("<html>"), Err(CredentialError::RefreshParse(_))));
}

#[tokio::test]
async fn refresh_posts_token_and_returns_access() {
    let app = Router::new().route(
        "/api/token/refresh/",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body, json!({"refresh": "R1"}));
            Json(json!({"access": "T2"}))
        }),
    );
    let api_url = serve(app).await;

    let token = refresher(&api_url).refresh("R1").await.unwrap();
    assert_eq!(token, "T2");
}

#[tokio::test]
async fn non_success_status_is_rejection() {
    let app = Router::new().route(
        "/api/token/refresh/",
        post(|| async { (StatusCode::UNAUTHORIZED, Json(json!({"detail": "token_not_valid"}))) }),
    );
    let api_url = serve(app).await;

    let err = refresher(&api_url).refresh("stale").await.unwrap_err();
    assert!(matches!(err, CredentialError::RefreshRejected { status: 401 }));
}

#[tokio::test]
async fn unreachable_server_is_request_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = refresher(&format!("http://{addr}")).refresh("R1").await.unwrap_err();
    assert!(matches!(err, CredentialError::RefreshRequest(_)));
}
