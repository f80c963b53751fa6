use chrono::{DateTime, Utc};

use crate::auth::password::PasswordManager;
use crate::db::error::{PersistenceError, RepositoryError};
use crate::db::models::{AccessToken, RefreshToken, User};
use crate::db::persistence::filter::Condition;
use crate::db::persistence::record::Record;
use crate::db::persistence::value::{Row, Value};
use crate::db::persistence::{Page, PageRequest, Persistence};

impl From<PersistenceError> for RepositoryError {
    fn from(source: PersistenceError) -> Self {
        RepositoryError::wrap("run", "transaction", source)
    }
}

/// The two rows written for one issued token pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: AccessToken,
    pub refresh: RefreshToken,
}

/// Users and tokens on top of the generic persistence helper.
pub struct TokenRepository<'a> {
    db: Persistence<'a>,
    passwords: PasswordManager,
}

impl<'a> TokenRepository<'a> {
    pub fn new(db: Persistence<'a>, passwords: PasswordManager) -> Self {
        Self { db, passwords }
    }

    // ----------------- Users -----------------

    /// Creates a user after hashing `password`.
    ///
    /// The lookups only give a friendlier error; the unique constraints on
    /// email and username decide, so a concurrent registration that slips
    /// past them still fails with the matching duplicate error.
    pub fn register(&self, email: &str, username: &str, password: &str) -> Result<User, RepositoryError> {
        if self.exists::<User>("email", email)? {
            return Err(RepositoryError::DuplicateEmail);
        }
        if self.exists::<User>("username", username)? {
            return Err(RepositoryError::DuplicateUsername);
        }

        let password_hash = self
            .passwords
            .hash(password)
            .map_err(|e| RepositoryError::Hashing(e.to_string()))?;

        let mut user = User::new(email, username, password_hash);
        match self.db.insert(&mut user) {
            Ok(()) => {
                tracing::info!(user_id = user.id, "User registered");
                Ok(user)
            }
            Err(e) if e.is_unique_violation_on("email") => Err(RepositoryError::DuplicateEmail),
            Err(e) if e.is_unique_violation_on("username") => Err(RepositoryError::DuplicateUsername),
            Err(e) => Err(RepositoryError::wrap("insert", "user", e)),
        }
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<User, RepositoryError> {
        self.db
            .find_one_by_fields(&[("email", Value::from(email))])
            .map_err(|e| RepositoryError::wrap("find", "user", e))
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<User, RepositoryError> {
        self.db
            .find_one_by_fields(&[("username", Value::from(username))])
            .map_err(|e| RepositoryError::wrap("find", "user", e))
    }

    pub fn find_user_by_id(&self, id: i64) -> Result<User, RepositoryError> {
        self.db
            .find_by_id(id)
            .map_err(|e| RepositoryError::wrap("find", "user", e))
    }

    pub fn list_users(&self, page: PageRequest) -> Result<Page<User>, RepositoryError> {
        self.db
            .find_all_paginated(page)
            .map_err(|e| RepositoryError::wrap("list", "user", e))
    }

    // ----------------- Tokens -----------------

    /// Persists an access token and its refresh token in one transaction;
    /// either both rows exist afterwards or neither does.
    pub fn save_token_pair(
        &self,
        user_id: i64,
        access_token: &str,
        access_expires_at: DateTime<Utc>,
        refresh_token: &str,
        refresh_expires_at: DateTime<Utc>,
    ) -> Result<TokenPair, RepositoryError> {
        self.db.transaction(|tx| {
            let mut access = AccessToken::new(user_id, access_token.to_string(), access_expires_at);
            tx.insert(&mut access)
                .map_err(|e| RepositoryError::wrap("insert", "access token", e))?;

            let mut refresh =
                RefreshToken::new(user_id, refresh_token.to_string(), access.id, refresh_expires_at);
            tx.insert(&mut refresh)
                .map_err(|e| RepositoryError::wrap("insert", "refresh token", e))?;

            Ok(TokenPair { access, refresh })
        })
    }

    pub fn find_refresh_token(&self, token: &str) -> Result<RefreshToken, RepositoryError> {
        self.db
            .find_one_by_fields(&[("token", Value::from(token))])
            .map_err(|e| RepositoryError::wrap("find", "refresh token", e))
    }

    /// Atomically flips `claimed` from false to true. Returns false when the
    /// token was already claimed, so exactly one caller can win.
    pub fn claim_refresh_token(&self, id: i64) -> Result<bool, RepositoryError> {
        let affected = self
            .db
            .update_where::<RefreshToken>(
                Row::new().with("claimed", true),
                vec![Condition::eq("id", id), Condition::eq("claimed", false)],
            )
            .map_err(|e| RepositoryError::wrap("claim", "refresh token", e))?;
        Ok(affected == 1)
    }

    /// Idempotent: claiming an already claimed token succeeds.
    pub fn mark_refresh_token_claimed(&self, id: i64) -> Result<(), RepositoryError> {
        self.flip::<RefreshToken>("claimed", id, "refresh token")
    }

    /// Idempotent: revoking an already revoked token succeeds.
    pub fn mark_access_token_revoked(&self, id: i64) -> Result<(), RepositoryError> {
        self.flip::<AccessToken>("revoked", id, "access token")
    }

    /// The unrevoked access token `token` issued to `user_id`.
    pub fn find_active_access_token(&self, user_id: i64, token: &str) -> Result<AccessToken, RepositoryError> {
        self.db
            .find_one_by_fields(&[
                ("user_id", Value::Int(user_id)),
                ("token", Value::from(token)),
                ("revoked", Value::Bool(false)),
            ])
            .map_err(|e| RepositoryError::wrap("find", "access token", e))
    }

    pub fn find_access_token(&self, token: &str) -> Result<AccessToken, RepositoryError> {
        self.db
            .find_one_by_fields(&[("token", Value::from(token))])
            .map_err(|e| RepositoryError::wrap("find", "access token", e))
    }

    fn flip<R: Record>(
        &self,
        column: &'static str,
        id: i64,
        entity: &'static str,
    ) -> Result<(), RepositoryError> {
        let affected = self
            .db
            .update_partial_by_id::<R>(Row::new().with(column, true), id)
            .map_err(|e| RepositoryError::wrap("update", entity, e))?;
        if affected == 0 {
            return Err(RepositoryError::NotFound { entity });
        }
        Ok(())
    }

    fn exists<R: Record>(
        &self,
        column: &str,
        value: &str,
    ) -> Result<bool, RepositoryError> {
        match self.db.find_one_by_fields::<R>(&[(column, Value::from(value))]) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(RepositoryError::wrap("find", "user", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use chrono::Duration;

    use super::*;
    use crate::db::persistence::filter::Query;
    use crate::db::persistence::record::TableSchema;
    use crate::db::store::{MemoryStore, Store, TxWork};

    fn passwords() -> PasswordManager {
        PasswordManager::new(PasswordManager::MIN_COST)
    }

    /// Wraps a store to simulate races and failures on one table.
    struct Faulty<'a> {
        inner: &'a dyn Store,
        /// Selects on this table see no rows.
        blind_to: Option<&'static str>,
        /// Inserts into this table fail.
        fail_inserts_into: Option<&'static str>,
    }

    impl Store for Faulty<'_> {
        fn insert_many(&self, schema: &TableSchema, rows: &[Row]) -> Result<Vec<i64>, PersistenceError> {
            if self.fail_inserts_into == Some(schema.name()) {
                return Err(PersistenceError::Connection("connection reset".to_string()));
            }
            self.inner.insert_many(schema, rows)
        }

        fn select(&self, schema: &TableSchema, query: &Query) -> Result<Vec<Row>, PersistenceError> {
            if self.blind_to == Some(schema.name()) {
                return Ok(Vec::new());
            }
            self.inner.select(schema, query)
        }

        fn count(&self, schema: &TableSchema, conditions: &[Condition]) -> Result<u64, PersistenceError> {
            self.inner.count(schema, conditions)
        }

        fn update(&self, schema: &TableSchema, assignments: &Row, conditions: &[Condition]) -> Result<u64, PersistenceError> {
            self.inner.update(schema, assignments, conditions)
        }

        fn delete(&self, schema: &TableSchema, conditions: &[Condition]) -> Result<u64, PersistenceError> {
            self.inner.delete(schema, conditions)
        }

        fn transaction(&self, work: &mut TxWork<'_>) -> Result<(), PersistenceError> {
            let (blind_to, fail_inserts_into) = (self.blind_to, self.fail_inserts_into);
            self.inner.transaction(&mut |tx| {
                work(&Faulty {
                    inner: tx,
                    blind_to,
                    fail_inserts_into,
                })
            })
        }

        fn backend(&self) -> &'static str {
            "faulty"
        }
    }

    fn register_alice(repo: &TokenRepository<'_>) -> User {
        repo.register("a@x.com", "alice", "password123").unwrap()
    }

    // ============================================
    // Registration
    // ============================================

    #[test]
    fn test_register_hashes_password() {
        let store = MemoryStore::new();
        let repo = TokenRepository::new(Persistence::new(&store), passwords());

        let user = register_alice(&repo);

        assert!(user.id > 0);
        assert_ne!(user.password_hash, "password123");
        assert!(passwords().verify("password123", &user.password_hash).unwrap());
        assert_eq!(repo.find_user_by_username("alice").unwrap().id, user.id);
    }

    #[test]
    fn test_register_duplicate_email_creates_no_row() {
        let store = MemoryStore::new();
        let db = Persistence::new(&store);
        let repo = TokenRepository::new(db, passwords());
        register_alice(&repo);

        let err = repo.register("a@x.com", "alice2", "password123").unwrap_err();

        assert!(matches!(err, RepositoryError::DuplicateEmail));
        assert_eq!(db.count_all::<User>().unwrap(), 1);
    }

    #[test]
    fn test_register_duplicate_username() {
        let store = MemoryStore::new();
        let repo = TokenRepository::new(Persistence::new(&store), passwords());
        register_alice(&repo);

        let err = repo.register("b@x.com", "alice", "password123").unwrap_err();

        assert!(matches!(err, RepositoryError::DuplicateUsername));
    }

    #[test]
    fn test_unique_constraint_rejects_registration_race() {
        // Arrange: the pre-check cannot see the row a concurrent request wrote
        let store = MemoryStore::new();
        register_alice(&TokenRepository::new(Persistence::new(&store), passwords()));
        let blind = Faulty {
            inner: &store,
            blind_to: Some(User::schema().name()),
            fail_inserts_into: None,
        };
        let repo = TokenRepository::new(Persistence::new(&blind), passwords());

        // Act
        let email = repo.register("a@x.com", "other", "password123").unwrap_err();
        let username = repo.register("c@x.com", "alice", "password123").unwrap_err();

        // Assert
        assert!(matches!(email, RepositoryError::DuplicateEmail));
        assert!(matches!(username, RepositoryError::DuplicateUsername));
        assert_eq!(Persistence::new(&store).count_all::<User>().unwrap(), 1);
    }

    #[test]
    fn test_find_user_by_email_not_found() {
        let store = MemoryStore::new();
        let repo = TokenRepository::new(Persistence::new(&store), passwords());

        let err = repo.find_user_by_email("nobody@x.com").unwrap_err();

        assert!(matches!(err, RepositoryError::NotFound { entity: "user" }));
    }

    // ============================================
    // Token pairs
    // ============================================

    #[test]
    fn test_save_token_pair_links_refresh_to_access() {
        let store = MemoryStore::new();
        let repo = TokenRepository::new(Persistence::new(&store), passwords());
        let user = register_alice(&repo);
        let expiry = Utc::now() + Duration::minutes(50);

        let pair = repo
            .save_token_pair(user.id, "access-1", expiry, "refresh-1", expiry + Duration::days(24))
            .unwrap();

        assert_eq!(pair.refresh.access_token_id, pair.access.id);
        assert!(!pair.access.revoked);
        assert!(!pair.refresh.claimed);
        assert_eq!(repo.find_refresh_token("refresh-1").unwrap().id, pair.refresh.id);
    }

    #[test]
    fn test_save_token_pair_is_atomic() {
        // Arrange: the refresh insert fails after the access insert succeeded
        let store = MemoryStore::new();
        let user = register_alice(&TokenRepository::new(Persistence::new(&store), passwords()));
        let failing = Faulty {
            inner: &store,
            blind_to: None,
            fail_inserts_into: Some(RefreshToken::schema().name()),
        };
        let repo = TokenRepository::new(Persistence::new(&failing), passwords());
        let expiry = Utc::now() + Duration::minutes(50);

        // Act
        let err = repo
            .save_token_pair(user.id, "access-1", expiry, "refresh-1", expiry)
            .unwrap_err();

        // Assert
        assert!(matches!(
            err,
            RepositoryError::Persistence { entity: "refresh token", .. }
        ));
        let db = Persistence::new(&store);
        assert_eq!(db.count_all::<AccessToken>().unwrap(), 0);
        assert_eq!(db.count_all::<RefreshToken>().unwrap(), 0);
    }

    #[test]
    fn test_save_token_pair_rejects_unknown_user() {
        let store = MemoryStore::new();
        let repo = TokenRepository::new(Persistence::new(&store), passwords());
        let expiry = Utc::now() + Duration::minutes(50);

        let err = repo
            .save_token_pair(42, "access-1", expiry, "refresh-1", expiry)
            .unwrap_err();

        assert!(matches!(err, RepositoryError::Persistence { entity: "access token", .. }));
    }

    #[test]
    fn test_claim_refresh_token_only_once() {
        let store = MemoryStore::new();
        let repo = TokenRepository::new(Persistence::new(&store), passwords());
        let user = register_alice(&repo);
        let expiry = Utc::now() + Duration::days(1);
        let pair = repo.save_token_pair(user.id, "a", expiry, "r", expiry).unwrap();

        assert!(repo.claim_refresh_token(pair.refresh.id).unwrap());
        assert!(!repo.claim_refresh_token(pair.refresh.id).unwrap());
        assert!(repo.find_refresh_token("r").unwrap().claimed);

        // the plain flip stays idempotent
        repo.mark_refresh_token_claimed(pair.refresh.id).unwrap();
        assert!(matches!(
            repo.mark_refresh_token_claimed(i64::MAX),
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let store = MemoryStore::new();
        let repo = TokenRepository::new(Persistence::new(&store), passwords());
        let user = register_alice(&repo);
        let expiry = Utc::now() + Duration::days(1);
        let id = repo.save_token_pair(user.id, "a", expiry, "r", expiry).unwrap().refresh.id;

        let barrier = Barrier::new(2);
        let wins: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let (store, barrier) = (&store, &barrier);
                    scope.spawn(move || {
                        let repo = TokenRepository::new(Persistence::new(store), passwords());
                        barrier.wait();
                        repo.claim_refresh_token(id).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(wins.iter().filter(|won| **won).count(), 1);
    }

    #[test]
    fn test_find_active_access_token_excludes_revoked() {
        let store = MemoryStore::new();
        let repo = TokenRepository::new(Persistence::new(&store), passwords());
        let user = register_alice(&repo);
        let expiry = Utc::now() + Duration::days(1);
        let pair = repo.save_token_pair(user.id, "a", expiry, "r", expiry).unwrap();

        let active = repo.find_active_access_token(user.id, "a").unwrap();
        repo.mark_access_token_revoked(active.id).unwrap();

        assert!(repo.find_access_token("a").unwrap().revoked);
        assert!(matches!(
            repo.find_active_access_token(user.id, "a"),
            Err(RepositoryError::NotFound { entity: "access token" })
        ));
        assert!(matches!(
            repo.find_active_access_token(user.id + 1, "a"),
            Err(RepositoryError::NotFound { .. })
        ));
        assert_eq!(pair.access.id, active.id);
    }
}
