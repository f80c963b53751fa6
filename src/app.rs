use std::time::Duration;

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::services::AuthService;
use crate::context::RequestContext;
use crate::error::AppError;
use crate::handlers::auth::{login, logout, refresh_token, register};
use crate::handlers::health::health;
use crate::handlers::user::{get_profile, list_users};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: AuthService,
    pub request_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(service: AuthService, request_timeout: Duration) -> Self {
        Self {
            service,
            request_timeout: Some(request_timeout),
        }
    }

    /// A fresh context for one request; its deadline starts now.
    pub fn context(&self) -> RequestContext {
        RequestContext::new(self.request_timeout)
    }
}

/// Runs a blocking service call off the async executor.
pub async fn run_blocking<T, F>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::internal(format!("blocking task failed: {e}")))?
}

/// Configure les routes d'authentification
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/token/refresh", post(refresh_token))
        .route("/logout", post(logout))
}

/// Routes protégées par l'extracteur `AuthUser`
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/profile", get(get_profile))
        .route("/users", get(list_users))
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    match HeaderValue::from_str(frontend_url) {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::warn!(frontend_url, "⚠️ Invalid FRONTEND_URL, CORS origin not set");
            cors
        }
    }
}

/// Construit l'application complète
pub fn build_router(state: AppState, frontend_url: &str) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .merge(auth_routes())
        .merge(user_routes());

    Router::new()
        .nest("/api/v1", api)
        .layer(cors_layer(frontend_url))
        // Middleware global de tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt; // for oneshot

    use super::*;
    use crate::auth::jwt::JwtManager;
    use crate::auth::password::PasswordManager;
    use crate::db::store::MemoryStore;

    fn test_app(check_revocation: bool) -> Router {
        let jwt = JwtManager::new(
            "test_secret_for_auth_routes_0123456789",
            chrono::Duration::minutes(50),
            chrono::Duration::days(24),
        );
        let service = AuthService::new(
            Arc::new(MemoryStore::new()),
            jwt,
            PasswordManager::new(PasswordManager::MIN_COST),
        )
        .with_revocation_check(check_revocation);

        build_router(
            AppState::new(service, Duration::from_secs(10)),
            "http://localhost:5173",
        )
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri).method(method);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let resp = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn register_and_login(app: &Router, email: &str, username: &str) -> Value {
        let (status, _) = send(
            app,
            "POST",
            "/api/v1/register",
            Some(json!({"email": email, "username": username, "password": "password123"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            app,
            "POST",
            "/api/v1/login",
            Some(json!({"email": email, "password": "password123"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["data"].clone()
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app(false);

        let (status, body) = send(&app, "GET", "/api/v1/health", None, None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));
    }

    // ============================================
    // Register
    // ============================================
    #[tokio::test]
    async fn test_register_returns_public_profile() {
        let app = test_app(false);

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/register",
            Some(json!({"email": "a@x.com", "username": "alice", "password": "password123"})),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["email"], "a@x.com");
        assert_eq!(body["data"]["username"], "alice");
        assert!(body["data"].get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_invalid_fields() {
        let app = test_app(false);
        register_and_login(&app, "a@x.com", "alice").await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/register",
            Some(json!({"email": "a@x.com", "username": "other", "password": "password123"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "DUPLICATE_EMAIL");

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/register",
            Some(json!({"email": "nope", "username": "bob", "password": "short"})),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["errors"]["email"].is_array());
        assert!(body["errors"]["password"].is_array());
    }

    #[tokio::test]
    async fn test_malformed_json_is_a_bad_request() {
        let app = test_app(false);

        let req = Request::builder()
            .uri("/api/v1/login")
            .method("POST")
            .header("Content-Type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    // ============================================
    // Login / profile
    // ============================================
    #[tokio::test]
    async fn test_login_then_profile() {
        let app = test_app(false);
        let pair = register_and_login(&app, "a@x.com", "alice").await;
        assert_eq!(pair["token_type"], "Bearer");

        let access = pair["access_token"].as_str().unwrap();
        let (status, body) = send(&app, "GET", "/api/v1/profile", None, Some(access)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["username"], "alice");
    }

    #[tokio::test]
    async fn test_login_with_wrong_password_is_unauthorized() {
        let app = test_app(false);
        register_and_login(&app, "a@x.com", "alice").await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/login",
            Some(json!({"email": "a@x.com", "password": "wrong-password"})),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "INVALID_CREDENTIALS");
    }

    #[tokio::test]
    async fn test_profile_requires_valid_token() {
        let app = test_app(false);

        let (status, _) = send(&app, "GET", "/api/v1/profile", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "GET", "/api/v1/profile", None, Some("invalid.token.here")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh_token_cannot_authenticate() {
        let app = test_app(false);
        let pair = register_and_login(&app, "a@x.com", "alice").await;

        let refresh = pair["refresh_token"].as_str().unwrap();
        let (status, _) = send(&app, "GET", "/api/v1/profile", None, Some(refresh)).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // ============================================
    // Refresh
    // ============================================
    #[tokio::test]
    async fn test_refresh_rotates_once() {
        let app = test_app(false);
        let pair = register_and_login(&app, "a@x.com", "alice").await;
        let refresh = json!({"refresh_token": pair["refresh_token"]});

        let (status, body) = send(&app, "POST", "/api/v1/token/refresh", Some(refresh.clone()), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(body["data"]["refresh_token"], pair["refresh_token"]);

        let (status, body) = send(&app, "POST", "/api/v1/token/refresh", Some(refresh), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "TOKEN_ALREADY_USED");
    }

    // ============================================
    // Logout
    // ============================================
    #[tokio::test]
    async fn test_logout_requires_authorization() {
        let app = test_app(false);

        let (status, body) = send(&app, "POST", "/api/v1/logout", None, None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_TOKEN_FORMAT");
    }

    #[tokio::test]
    async fn test_logout_success_then_already_revoked() {
        let app = test_app(false);
        let pair = register_and_login(&app, "a@x.com", "alice").await;
        let access = pair["access_token"].as_str().unwrap();

        let (status, body) = send(&app, "POST", "/api/v1/logout", None, Some(access)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Logged out successfully");

        let (status, body) = send(&app, "POST", "/api/v1/logout", None, Some(access)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_INPUT");

        // soft logout: the stateless check still accepts the token
        let (status, _) = send(&app, "GET", "/api/v1/profile", None, Some(access)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_revoked_token_rejected_when_revocation_is_checked() {
        let app = test_app(true);
        let pair = register_and_login(&app, "a@x.com", "alice").await;
        let access = pair["access_token"].as_str().unwrap();

        let (status, _) = send(&app, "GET", "/api/v1/profile", None, Some(access)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, "POST", "/api/v1/logout", None, Some(access)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "GET", "/api/v1/profile", None, Some(access)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "INVALID_TOKEN");
    }

    // ============================================
    // Users listing
    // ============================================
    #[tokio::test]
    async fn test_list_users_paginates() {
        let app = test_app(false);
        let pair = register_and_login(&app, "a@x.com", "alice").await;
        register_and_login(&app, "b@x.com", "bob").await;
        register_and_login(&app, "c@x.com", "carol").await;
        let access = pair["access_token"].as_str().unwrap();

        let (status, body) = send(
            &app,
            "GET",
            "/api/v1/users?per_page=2&sort=username%20asc",
            None,
            Some(access),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["username"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["alice", "bob"]);
        assert_eq!(body["meta"]["total"], 3);
        assert_eq!(body["meta"]["total_pages"], 2);
    }

    #[tokio::test]
    async fn test_list_users_rejects_private_columns() {
        let app = test_app(false);
        let pair = register_and_login(&app, "a@x.com", "alice").await;
        let access = pair["access_token"].as_str().unwrap();

        let (status, body) = send(
            &app,
            "GET",
            "/api/v1/users?password_hash%5Blike%5D=%24",
            None,
            Some(access),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_list_users_rejects_bad_filter_values_and_pages() {
        let app = test_app(false);
        let pair = register_and_login(&app, "a@x.com", "alice").await;
        let access = pair["access_token"].as_str().unwrap();

        let (status, body) = send(&app, "GET", "/api/v1/users?id%5Bgte%5D=abc", None, Some(access)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "invalid value for filter on `id`");

        let (status, body) = send(
            &app,
            "GET",
            "/api/v1/users?page=18446744073709551615",
            None,
            Some(access),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_INPUT");
    }
}
