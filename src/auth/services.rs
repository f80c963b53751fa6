use authgate_api::{
    LoginRequest, PaginationMeta, RefreshTokenRequest, RegisterRequest, TokenPairResponse,
    UserResponse,
};
use validator::Validate;

use crate::auth::jwt::{JwtManager, TokenKind};
use crate::auth::password::PasswordManager;
use crate::context::RequestContext;
use crate::db::error::RepositoryError;
use crate::db::models::User;
use crate::db::persistence::filter::{Condition, OrderBy, parse_params};
use crate::db::persistence::record::Record;
use crate::db::persistence::{PageRequest, Persistence};
use crate::db::repositories::TokenRepository;
use crate::db::store::SharedStore;
use crate::error::AppError;

/// Columns of `users` that public listings may filter and sort on.
pub const USER_LIST_COLUMNS: &[&str] = &["id", "email", "username", "created_at"];
pub const DEFAULT_PER_PAGE: u64 = 10;
pub const MAX_PER_PAGE: u64 = 100;
const DEFAULT_USER_SORT: &str = "created_at desc";

/// Registration, login and the token lifecycle.
///
/// A token pair moves through Issued, then Active, then one of Rotated
/// (refresh token claimed), Revoked (access token, on logout) or Expired
/// (detected at verification, never written back).
#[derive(Clone)]
pub struct AuthService {
    store: SharedStore,
    jwt: JwtManager,
    passwords: PasswordManager,
    check_revocation: bool,
}

impl AuthService {
    pub fn new(store: SharedStore, jwt: JwtManager, passwords: PasswordManager) -> Self {
        Self {
            store,
            jwt,
            passwords,
            check_revocation: false,
        }
    }

    /// Makes [`AuthService::authenticate`] also reject revoked access tokens.
    #[must_use]
    pub fn with_revocation_check(mut self, enabled: bool) -> Self {
        self.check_revocation = enabled;
        self
    }

    pub fn checks_revocation(&self) -> bool {
        self.check_revocation
    }

    fn db(&self, ctx: RequestContext) -> Persistence<'_> {
        Persistence::new(self.store.as_ref()).with_deadline(ctx.deadline)
    }

    fn repo(&self, ctx: RequestContext) -> TokenRepository<'_> {
        TokenRepository::new(self.db(ctx), self.passwords)
    }

    /// Inscription d'un nouvel utilisateur
    pub fn register(&self, ctx: RequestContext, request: RegisterRequest) -> Result<UserResponse, AppError> {
        request.validate()?;

        let user = self
            .repo(ctx)
            .register(&request.email, &request.username, &request.password)?;
        Ok(user.into())
    }

    /// Connexion d'un utilisateur. Unknown email and wrong password give
    /// the same error.
    pub fn login(&self, ctx: RequestContext, request: LoginRequest) -> Result<TokenPairResponse, AppError> {
        request.validate()?;
        let repo = self.repo(ctx);

        let user = match repo.find_user_by_email(&request.email) {
            Ok(user) => user,
            Err(RepositoryError::NotFound { .. }) => {
                tracing::warn!(request_id = %ctx.request_id, "Login failed");
                return Err(AppError::InvalidCredentials);
            }
            Err(e) => {
                tracing::error!(request_id = %ctx.request_id, error = %e, "Login lookup failed");
                return Err(AppError::InvalidCredentials);
            }
        };

        match self.passwords.verify(&request.password, &user.password_hash) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(request_id = %ctx.request_id, "Login failed");
                return Err(AppError::InvalidCredentials);
            }
            Err(e) => {
                tracing::error!(request_id = %ctx.request_id, error = %e, "Password verification failed");
                return Err(AppError::InvalidCredentials);
            }
        }

        let pair = self.generate_token_pair(ctx, user.id)?;
        tracing::info!(request_id = %ctx.request_id, user_id = user.id, "User logged in");
        Ok(pair)
    }

    /// Issues and persists a fresh access/refresh pair for `user_id`.
    pub fn generate_token_pair(&self, ctx: RequestContext, user_id: i64) -> Result<TokenPairResponse, AppError> {
        self.issue_pair(&self.repo(ctx), user_id)
    }

    fn issue_pair(&self, repo: &TokenRepository<'_>, user_id: i64) -> Result<TokenPairResponse, AppError> {
        let access = self.jwt.issue(user_id, TokenKind::Access)?;
        let refresh = self.jwt.issue(user_id, TokenKind::Refresh)?;

        repo.save_token_pair(
            user_id,
            &access.token,
            access.expires_at,
            &refresh.token,
            refresh.expires_at,
        )?;

        Ok(TokenPairResponse {
            token_type: "Bearer".to_string(),
            access_token: access.token,
            access_expires_at: access.expires_at,
            refresh_token: refresh.token,
            refresh_expires_at: refresh.expires_at,
        })
    }

    /// Rotates a refresh token into a new pair.
    ///
    /// The claim is a conditional update run in the same transaction as the
    /// new pair's inserts: of two concurrent calls with one token only the
    /// first claims it, and a failed insert leaves the old token unclaimed.
    pub fn refresh_token_pair(
        &self,
        ctx: RequestContext,
        request: RefreshTokenRequest,
    ) -> Result<TokenPairResponse, AppError> {
        request.validate()?;
        let claims = self.jwt.verify(&request.refresh_token, TokenKind::Refresh)?;

        let stored = self.repo(ctx).find_refresh_token(&request.refresh_token)?;
        if stored.user_id != claims.user_id {
            tracing::warn!(request_id = %ctx.request_id, "Refresh token owner mismatch");
            return Err(AppError::InvalidToken);
        }
        if stored.claimed {
            tracing::warn!(request_id = %ctx.request_id, token_id = stored.id, "Refresh token replayed");
            return Err(AppError::TokenAlreadyUsed);
        }

        let pair = self.db(ctx).transaction(|tx| {
            let repo = TokenRepository::new(*tx, self.passwords);
            if !repo.claim_refresh_token(stored.id)? {
                tracing::warn!(request_id = %ctx.request_id, token_id = stored.id, "Refresh token lost claim race");
                return Err(AppError::TokenAlreadyUsed);
            }
            self.issue_pair(&repo, stored.user_id)
        })?;

        tracing::info!(request_id = %ctx.request_id, user_id = stored.user_id, "Token pair rotated");
        Ok(pair)
    }

    /// Signature, algorithm and expiry only; never consults the store, so
    /// a revoked token stays valid here until it expires.
    pub fn verify_access_token(&self, token: &str) -> Result<i64, AppError> {
        let claims = self.jwt.verify(token, TokenKind::Access)?;
        Ok(claims.user_id)
    }

    /// The check used by authenticated routes: stateless, plus the revoked
    /// flag when revocation checking is enabled.
    pub fn authenticate(&self, ctx: RequestContext, token: &str) -> Result<i64, AppError> {
        let user_id = self.verify_access_token(token)?;
        if self.check_revocation {
            match self.repo(ctx).find_active_access_token(user_id, token) {
                Ok(_) => {}
                Err(RepositoryError::NotFound { .. }) => return Err(AppError::InvalidToken),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(user_id)
    }

    /// Marks the persisted access token revoked. A token that is unknown or
    /// already revoked gives `NotFound`.
    pub fn revoke_access_token(&self, ctx: RequestContext, token: &str) -> Result<(), AppError> {
        let user_id = self.verify_access_token(token)?;
        let repo = self.repo(ctx);

        let active = repo.find_active_access_token(user_id, token)?;
        repo.mark_access_token_revoked(active.id)?;

        tracing::info!(request_id = %ctx.request_id, user_id, token_id = active.id, "Access token revoked");
        Ok(())
    }

    pub fn get_profile(&self, ctx: RequestContext, user_id: i64) -> Result<UserResponse, AppError> {
        Ok(self.repo(ctx).find_user_by_id(user_id)?.into())
    }

    pub fn list_users(
        &self,
        ctx: RequestContext,
        query: UserListQuery,
    ) -> Result<(Vec<UserResponse>, PaginationMeta), AppError> {
        let offset = query.offset()?;
        let page = self.repo(ctx).list_users(PageRequest {
            conditions: query.filters,
            order_by: vec![query.sort],
            limit: query.per_page,
            offset,
        })?;

        let meta = PaginationMeta::new(query.page, query.per_page, page.total);
        Ok((page.items.into_iter().map(UserResponse::from).collect(), meta))
    }
}

/// Paging, sorting and filters for the user listing.
#[derive(Debug, Clone, PartialEq)]
pub struct UserListQuery {
    pub page: u64,
    pub per_page: u64,
    pub sort: OrderBy,
    pub filters: Vec<Condition>,
}

impl UserListQuery {
    /// Reads `page`, `per_page`, `sort` and `field[op]=value` filters.
    pub fn from_params(params: &[(String, String)]) -> Result<Self, AppError> {
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        let number = |key: &str, default: u64| -> Result<u64, AppError> {
            get(key).map_or(Ok(default), |raw| {
                raw.parse()
                    .map_err(|_| AppError::invalid_input(format!("`{key}` must be a positive integer")))
            })
        };

        let page = number("page", 1)?.max(1);
        let per_page = number("per_page", DEFAULT_PER_PAGE)?.clamp(1, MAX_PER_PAGE);

        let sort = OrderBy::parse(get("sort").unwrap_or(DEFAULT_USER_SORT))
            .map_err(|e| AppError::invalid_input(e.to_string()))?;
        if !USER_LIST_COLUMNS.contains(&sort.column.as_str()) {
            return Err(AppError::invalid_input(format!("sorting on `{}` is not allowed", sort.column)));
        }

        let filters = parse_params(
            params.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            USER_LIST_COLUMNS,
            &["page", "per_page", "sort"],
        )
        .map_err(|e| AppError::invalid_input(e.to_string()))?
        .into_iter()
        .map(|condition| {
            let column = condition.column.clone();
            condition
                .normalize(User::schema())
                .map_err(|_| AppError::invalid_input(format!("invalid value for filter on `{column}`")))
        })
        .collect::<Result<Vec<_>, _>>()?;

        let query = Self {
            page,
            per_page,
            sort,
            filters,
        };
        query.offset()?;
        Ok(query)
    }

    /// Rows to skip; fails when the page lies beyond what a query can address.
    pub fn offset(&self) -> Result<u64, AppError> {
        self.page
            .saturating_sub(1)
            .checked_mul(self.per_page)
            .filter(|offset| i64::try_from(*offset).is_ok())
            .ok_or_else(|| AppError::invalid_input("`page` is out of range"))
    }
}
