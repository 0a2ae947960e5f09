//! Account and token operations: registration, login, refresh rotation and
//! access-token validation.

use crate::config::ServerConfig;
use crate::store::Store;
use lmi_core::model::{NewUser, User};
use lmi_core::token::now_secs;
use lmi_core::validate::validate_registration;
use lmi_core::{AccessClaims, LmiError, LmiResult, PasswordHasher, TokenPair, TokenService};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Refresh-token lifetimes, in seconds.
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    /// Expiry of the token handed out at login.
    pub login_ttl: i64,
    /// Expiry set on every rotation.
    pub rotation_ttl: i64,
    /// Absolute age limit of a chain; 0 means unlimited.
    pub chain_max_age: i64,
}

impl RefreshPolicy {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            login_ttl: config.login_refresh_ttl,
            rotation_ttl: config.rotation_refresh_ttl,
            chain_max_age: config.refresh_chain_max_age,
        }
    }
}

pub struct AuthService {
    store: Arc<dyn Store>,
    tokens: TokenService,
    hasher: PasswordHasher,
    policy: RefreshPolicy,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn Store>,
        tokens: TokenService,
        hasher: PasswordHasher,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            store,
            tokens,
            hasher,
            policy,
        }
    }

    /// Validate input and create a user with salted, peppered credentials.
    pub async fn register(&self, display_name: &str, email: &str, password: &str) -> LmiResult<User> {
        validate_registration(display_name, email, password)?;
        if self.store.find_credentials_by_email(email).await?.is_some() {
            return Err(LmiError::DuplicateEmail);
        }
        let salt = self.hasher.generate_salt()?;
        let password_hash = self.hasher.hash(password, &salt);
        let user = self
            .store
            .create_user(NewUser {
                display_name: display_name.to_string(),
                email: email.to_string(),
                password_hash,
                salt,
            })
            .await?;
        info!(user_id = user.id, "user registered");
        Ok(user)
    }

    /// Check credentials and start a new refresh chain.
    pub async fn login(&self, email: &str, password: &str) -> LmiResult<TokenPair> {
        let credentials = self
            .store
            .find_credentials_by_email(email)
            .await?
            .ok_or(LmiError::InvalidCredentials)?;
        if !self
            .hasher
            .verify(password, &credentials.salt, &credentials.password_hash)
        {
            debug!(user_id = credentials.user_id, "password mismatch");
            return Err(LmiError::InvalidCredentials);
        }

        let access_token = self.tokens.issue_access_token(credentials.user_id)?;
        let refresh_token = self.tokens.issue_refresh_token()?;
        self.store
            .insert_refresh_token(
                credentials.user_id,
                &refresh_token,
                now_secs() + self.policy.login_ttl,
            )
            .await?;
        info!(user_id = credentials.user_id, "login succeeded");
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Exchange a refresh token for a new pair. Each value redeems once.
    pub async fn redeem_refresh_token(&self, value: &str) -> LmiResult<TokenPair> {
        self.redeem_refresh_token_at(value, now_secs()).await
    }

    pub async fn redeem_refresh_token_at(&self, value: &str, now: i64) -> LmiResult<TokenPair> {
        let record = self
            .store
            .find_refresh_token(value)
            .await?
            .ok_or(LmiError::InvalidRefreshToken)?;

        if !record.active || now > record.expires_at {
            debug!(chain = record.id, "refresh token inactive or expired");
            return Err(LmiError::InvalidRefreshToken);
        }
        if self.policy.chain_max_age > 0
            && now - record.created_at.timestamp() > self.policy.chain_max_age
        {
            debug!(chain = record.id, "refresh chain past maximum age");
            return Err(LmiError::InvalidRefreshToken);
        }

        let access_token = self.tokens.issue_access_token_at(record.user_id, now)?;
        let refresh_token = self.tokens.issue_refresh_token()?;
        let swapped = self
            .store
            .swap_refresh_token(
                record.id,
                value,
                &refresh_token,
                now + self.policy.rotation_ttl,
            )
            .await?;
        if !swapped {
            warn!(chain = record.id, user_id = record.user_id, "refresh token redeemed concurrently");
            return Err(LmiError::InvalidRefreshToken);
        }

        debug!(chain = record.id, user_id = record.user_id, "refresh token rotated");
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Validate a presented access token.
    pub fn authenticate(&self, token: &str) -> LmiResult<AccessClaims> {
        self.tokens.validate_access_token(token)
    }

    #[cfg(test)]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use lmi_core::token::ACCESS_TOKEN_TTL_SECS;

    pub(crate) const TEST_SECRET: &[u8] = b"test-secret-for-let-me-in";

    pub(crate) fn test_policy() -> RefreshPolicy {
        RefreshPolicy {
            login_ttl: 24 * 60 * 60,
            rotation_ttl: 7 * 24 * 60 * 60,
            chain_max_age: 30 * 24 * 60 * 60,
        }
    }

    pub(crate) fn test_service(store: Arc<dyn Store>) -> AuthService {
        AuthService::new(
            store,
            TokenService::new(TEST_SECRET, ACCESS_TOKEN_TTL_SECS),
            PasswordHasher::new("pepper", 1_000),
            test_policy(),
        )
    }

    async fn service_with_alice() -> (AuthService, (i64, TokenPair)) {
        let service = test_service(Arc::new(MemoryStore::new()));
        let user = service
            .register("alice", "alice@example.com", "correct horse")
            .await
            .unwrap();
        let pair = service
            .login("alice@example.com", "correct horse")
            .await
            .unwrap();
        (service, (user.id, pair))
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email() {
        let service = test_service(Arc::new(MemoryStore::new()));
        service
            .register("alice", "alice@example.com", "password1")
            .await
            .unwrap();
        let err = service
            .register("alice2", "alice@example.com", "password2")
            .await
            .unwrap_err();
        assert!(matches!(err, LmiError::DuplicateEmail));
    }

    #[tokio::test]
    async fn register_validates_fields() {
        let service = test_service(Arc::new(MemoryStore::new()));
        let err = service
            .register("alice", "not-an-email", "password1")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid email format");
    }

    #[tokio::test]
    async fn login_issues_valid_access_token() {
        let (service, (user_id, pair)) = service_with_alice().await;
        let claims = service.authenticate(&pair.access_token).unwrap();
        assert_eq!(claims.user_id, user_id);
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let (service, _) = service_with_alice().await;
        let wrong_password = service
            .login("alice@example.com", "wrong password")
            .await
            .unwrap_err();
        let unknown_email = service
            .login("bob@example.com", "correct horse")
            .await
            .unwrap_err();
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert!(matches!(unknown_email, LmiError::InvalidCredentials));
    }

    #[tokio::test]
    async fn refresh_value_redeems_once() {
        let (service, (user_id, pair)) = service_with_alice().await;

        let rotated = service
            .redeem_refresh_token(&pair.refresh_token)
            .await
            .unwrap();
        assert_ne!(rotated.refresh_token, pair.refresh_token);
        assert_eq!(
            service.authenticate(&rotated.access_token).unwrap().user_id,
            user_id
        );

        let err = service
            .redeem_refresh_token(&pair.refresh_token)
            .await
            .unwrap_err();
        assert!(matches!(err, LmiError::InvalidRefreshToken));

        // The rotated value continues the chain.
        service
            .redeem_refresh_token(&rotated.refresh_token)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_refresh_token_is_rejected() {
        let (service, (_, pair)) = service_with_alice().await;
        let later = now_secs() + test_policy().login_ttl + 1;
        let err = service
            .redeem_refresh_token_at(&pair.refresh_token, later)
            .await
            .unwrap_err();
        assert!(matches!(err, LmiError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn chain_max_age_caps_rotation() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let service = AuthService::new(
            store,
            TokenService::new(TEST_SECRET, ACCESS_TOKEN_TTL_SECS),
            PasswordHasher::new("pepper", 1_000),
            RefreshPolicy {
                login_ttl: 100,
                rotation_ttl: 100,
                chain_max_age: 50,
            },
        );
        service
            .register("alice", "alice@example.com", "correct horse")
            .await
            .unwrap();
        let pair = service
            .login("alice@example.com", "correct horse")
            .await
            .unwrap();
        let err = service
            .redeem_refresh_token_at(&pair.refresh_token, now_secs() + 60)
            .await
            .unwrap_err();
        assert!(matches!(err, LmiError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn concurrent_redemptions_have_one_winner() {
        let (service, (_, pair)) = service_with_alice().await;
        let service = Arc::new(service);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            let value = pair.refresh_token.clone();
            tasks.push(tokio::spawn(async move {
                service.redeem_refresh_token(&value).await.is_ok()
            }));
        }
        let mut wins = 0;
        for task in tasks {
            if task.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn unknown_refresh_token_is_rejected() {
        let (service, _) = service_with_alice().await;
        let err = service.redeem_refresh_token("nope").await.unwrap_err();
        assert!(matches!(err, LmiError::InvalidRefreshToken));
    }
}
