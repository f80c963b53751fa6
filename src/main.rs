use authgate::app::{AppState, build_router};
use authgate::auth::jwt::JwtManager;
use authgate::auth::password::PasswordManager;
use authgate::auth::services::AuthService;
use authgate::config::Config;
use authgate::db::open_store;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Si RUST_LOG n'est pas défini, utiliser ces règles par défaut
        tracing_subscriber::EnvFilter::new("info,authgate=debug,hyper_util=warn,tower_http=info")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// ----------------- Main -----------------

#[tokio::main]
async fn main() -> Result<(), lambda_http::Error> {
    // Initialize logging for all environments
    setup_logging();
    tracing::info!("Starting authgate...");

    let config = Config::from_env().map_err(|e| {
        tracing::error!("❌ Invalid configuration: {e:#}");
        e
    })?;

    let store = open_store(&config.store).map_err(|e| {
        tracing::error!("❌ Failed to open the {} store: {e}", config.store.name());
        e
    })?;

    let jwt = JwtManager::new(
        &config.jwt_secret,
        config.access_token_ttl,
        config.refresh_token_ttl,
    );
    let service = AuthService::new(store, jwt, PasswordManager::new(config.bcrypt_cost))
        .with_revocation_check(config.check_revocation);
    let app = build_router(
        AppState::new(service, config.request_timeout),
        &config.frontend_url,
    );

    if std::env::var("AWS_LAMBDA_FUNCTION_NAME").is_ok() {
        tracing::info!("Running in Lambda mode");
        lambda_http::run(app).await
    } else {
        tracing::info!("Running in local HTTP server mode");
        let addr = format!("{}:{}", config.server_host, config.server_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("🚀 Server running at http://{}", addr);
        axum::serve(listener, app).await?;

        Ok(())
    }
}
