use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;

use crate::db::StoreBackend;
use crate::db::connection::PoolSettings;

/// Minimum JWT secret length accepted in production.
const MIN_PRODUCTION_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Détecte automatiquement l'environnement
    pub fn detect() -> Self {
        Self::detect_with(&|key| env::var(key).ok())
    }

    fn detect_with(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        // Méthode 1: Vérifier si on est dans AWS Lambda
        if lookup("AWS_LAMBDA_FUNCTION_NAME").is_some() {
            return Self::Production;
        }

        // Méthode 2: Vérifier la variable APP_ENV
        match lookup("APP_ENV").as_deref() {
            Some("production") | Some("prod") => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub store: StoreBackend,
    pub jwt_secret: String,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
    /// Authenticated routes also require the access token to be persisted
    /// and not revoked.
    pub check_revocation: bool,
    pub bcrypt_cost: u32,
    pub request_timeout: Duration,
    pub frontend_url: String,
    pub server_host: String,
    pub server_port: u16,
}

impl Config {
    /// Charge la configuration depuis les variables d'environnement
    /// avec détection automatique de l'environnement
    pub fn from_env() -> Result<Self> {
        let environment = Environment::detect();

        tracing::info!(
            "🌍 Environment detected: {}",
            environment.as_str().to_uppercase()
        );

        // Charger le fichier .env approprié
        Self::load_env_file(&environment);

        let config = Self::from_lookup(environment, &|key| env::var(key).ok())?;

        tracing::info!("✅ Configuration loaded successfully");
        if let StoreBackend::Postgres(pool) = &config.store {
            tracing::debug!("   Database: {}", Self::mask_credentials(&pool.url));
        }
        tracing::debug!("   Store: {}", config.store.name());
        tracing::debug!("   Frontend: {}", config.frontend_url);
        tracing::debug!("   Server: {}:{}", config.server_host, config.server_port);

        Ok(config)
    }

    fn from_lookup(environment: Environment, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = Self::get_jwt_secret(&environment, lookup)?;
        let store = Self::get_store_backend(&environment, lookup)?;

        let access_token_ttl = positive_ttl(
            "ACCESS_TOKEN_TTL_MINUTES",
            parse_or(lookup, "ACCESS_TOKEN_TTL_MINUTES", 50_i64),
            chrono::Duration::try_minutes,
        )?;
        let refresh_token_ttl = positive_ttl(
            "REFRESH_TOKEN_TTL_DAYS",
            parse_or(lookup, "REFRESH_TOKEN_TTL_DAYS", 24_i64),
            chrono::Duration::try_days,
        )?;

        Ok(Self {
            store,
            jwt_secret,
            access_token_ttl,
            refresh_token_ttl,
            check_revocation: parse_or(lookup, "AUTH_CHECK_REVOCATION", false),
            bcrypt_cost: parse_or(lookup, "BCRYPT_COST", bcrypt::DEFAULT_COST),
            request_timeout: Duration::from_secs(parse_or(lookup, "REQUEST_TIMEOUT_SECS", 10)),
            frontend_url: Self::get_frontend_url(&environment, lookup),
            server_host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: parse_or(lookup, "SERVER_PORT", 3000),
            environment,
        })
    }

    /// Charge le bon fichier .env selon l'environnement
    fn load_env_file(environment: &Environment) {
        // En production (Lambda), les variables sont déjà injectées
        if environment.is_production() {
            tracing::info!("📦 Production mode: using injected environment variables");
            return;
        }

        tracing::info!("📦 Development mode: loading .env file");
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("   Loaded: {}", path.display()),
            Err(e) if e.not_found() => {
                tracing::warn!("   .env file not found, using environment variables")
            }
            Err(e) => tracing::warn!("   .env file could not be parsed: {e}"),
        }
    }

    fn get_store_backend(
        environment: &Environment,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<StoreBackend> {
        match lookup("STORE_BACKEND").as_deref().unwrap_or("postgres") {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" => Ok(StoreBackend::Postgres(PoolSettings {
                url: Self::get_database_url(environment, lookup)?,
                max_size: parse_or(lookup, "DB_POOL_SIZE", 10),
                connection_timeout: Duration::from_secs(parse_or(lookup, "DB_CONNECTION_TIMEOUT_SECS", 5)),
                statement_timeout: Duration::from_millis(parse_or(lookup, "DB_STATEMENT_TIMEOUT_MS", 5000)),
            })),
            other => anyhow::bail!("STORE_BACKEND must be `postgres` or `memory`, got `{other}`"),
        }
    }

    /// Récupère DATABASE_URL avec logique intelligente
    fn get_database_url(
        environment: &Environment,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<String> {
        if let Some(url) = lookup("DATABASE_URL") {
            return Ok(url);
        }

        // Si en prod et DATABASE_URL manque, erreur critique
        if environment.is_production() {
            anyhow::bail!(
                "DATABASE_URL must be set in production! \
                 Configure it in Lambda environment variables."
            );
        }

        // En dev, construire l'URL depuis les composants
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        Ok(format!(
            "postgres://{}:{}@{}:{}/{}",
            var("POSTGRES_USER", "postgres"),
            var("POSTGRES_PASSWORD", "postgres"),
            var("DB_HOST", "localhost"),
            var("DB_PORT", "5432"),
            var("POSTGRES_DB", "auth_db"),
        ))
    }

    /// JWT_SECRET is required everywhere; production also enforces a length.
    fn get_jwt_secret(
        environment: &Environment,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<String> {
        let Some(secret) = lookup("JWT_SECRET").filter(|s| !s.is_empty()) else {
            tracing::error!("❌ JWT_SECRET not set!");
            anyhow::bail!("JWT_SECRET is required");
        };

        if environment.is_production() && secret.len() < MIN_PRODUCTION_SECRET_LEN {
            anyhow::bail!(
                "JWT_SECRET must be at least {MIN_PRODUCTION_SECRET_LEN} characters in production (current: {})",
                secret.len()
            );
        }

        Ok(secret)
    }

    /// Récupère FRONTEND_URL avec fallback
    fn get_frontend_url(environment: &Environment, lookup: &dyn Fn(&str) -> Option<String>) -> String {
        lookup("FRONTEND_URL").unwrap_or_else(|| {
            if environment.is_production() {
                "https://authgate.example.com".to_string()
            } else {
                "http://localhost:8080".to_string()
            }
        })
    }

    /// Masque les credentials dans les logs
    fn mask_credentials(url: &str) -> String {
        if let Some(at_pos) = url.find('@')
            && let Some(scheme_end) = url.find("://")
        {
            let scheme = &url[..scheme_end + 3];
            let after_at = &url[at_pos..];
            return format!("{}***:***{}", scheme, after_at);
        }
        url.to_string()
    }

    /// Retourne true si on est en mode production
    pub fn is_production(&self) -> bool {
        self.environment.is_production()
    }
}

/// Parses `key`, falling back to `default` when unset or unparsable.
fn parse_or<T>(lookup: &dyn Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("⚠️  {key}={raw} is not valid, using default {default}");
            default
        }),
    }
}

/// A token lifetime of `amount` units; zero, negative and overflowing values are fatal.
fn positive_ttl(
    key: &str,
    amount: i64,
    unit: fn(i64) -> Option<chrono::Duration>,
) -> Result<chrono::Duration> {
    if amount <= 0 {
        anyhow::bail!("{key} must be positive, got {amount}");
    }
    unit(amount).ok_or_else(|| anyhow::anyhow!("{key} is out of range: {amount}"))
}
