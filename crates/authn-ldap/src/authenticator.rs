//! Password verification against the directory.
//!
//! ## Security
//!
//! Passwords are checked by binding as the user on a dedicated connection.
//! That connection is never pooled because its bound identity differs from
//! the service account. Passwords are never logged.

use crate::client::DirectoryClient;
use crate::error::{LdapError, LdapResult};
use crate::factory::{ClientFactory, ClientOptions};

/// Authenticates users with any [`ClientFactory`].
pub struct DirectoryAuthenticator<F: ClientFactory> {
    factory: F,
}

impl<F: ClientFactory> DirectoryAuthenticator<F> {
    /// Creates an authenticator over a factory.
    #[must_use]
    pub const fn new(factory: F) -> Self {
        Self { factory }
    }

    /// Returns the underlying factory.
    #[must_use]
    pub const fn factory(&self) -> &F {
        &self.factory
    }

    /// Verifies the backend is reachable with the service account.
    ///
    /// Initializes the factory, then checks out and returns one client.
    pub async fn startup_check(&self) -> LdapResult<()> {
        self.factory.initialize().await?;

        let mut client = self.factory.get_client(None).await?;
        let healthy = !client.is_closing();
        client.close().await?;

        if healthy {
            tracing::info!("LDAP startup check succeeded");
            Ok(())
        } else {
            Err(LdapError::ClientClosed)
        }
    }

    /// Checks a user's password by binding as `user_dn`.
    ///
    /// Returns `Ok(false)` when the directory rejects the credentials.
    pub async fn check_user_password(&self, user_dn: &str, password: &str) -> LdapResult<bool> {
        // An empty password would be an unauthenticated bind, which succeeds
        // without proving anything.
        if password.is_empty() {
            tracing::debug!(user_dn, "Rejected empty password");
            return Ok(false);
        }

        let options = ClientOptions::new()
            .principal(user_dn)
            .credential(password);

        match self.factory.get_client(Some(options)).await {
            Ok(mut client) => {
                if let Err(e) = client.close().await {
                    tracing::debug!(error = %e, "Failed to close user LDAP connection");
                }
                tracing::debug!(user_dn, "User password verified");
                Ok(true)
            }
            Err(e) if e.is_invalid_credentials() => {
                tracing::debug!(user_dn, "Invalid user credentials");
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(user_dn, error = %e, "Password check failed");
                Err(e)
            }
        }
    }

    /// Shuts down the underlying factory.
    pub async fn shutdown(&self) -> LdapResult<()> {
        self.factory.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::LdapConfig;
    use crate::factory::build_factory;
    use crate::testing::MockDirectory;

    fn config() -> LdapConfig {
        LdapConfig::builder()
            .address("ldap://127.0.0.1:389")
            .user("cn=admin,dc=example,dc=com")
            .password("secret")
            .pool(2, 2, Duration::from_secs(1))
            .build()
            .unwrap()
    }

    fn directory() -> MockDirectory {
        let directory = MockDirectory::new();
        directory.add_user("cn=admin,dc=example,dc=com", "secret");
        directory.add_user("uid=john,ou=users,dc=example,dc=com", "hunter2");
        directory
    }

    #[tokio::test]
    async fn startup_check_initializes_pool() {
        let directory = directory();
        let authenticator = DirectoryAuthenticator::new(build_factory(&config(), directory.dialer()));

        authenticator.startup_check().await.unwrap();

        let stats = authenticator.factory().pool().unwrap().stats();
        assert_eq!(stats.idle, 2);
    }

    #[tokio::test]
    async fn valid_password() {
        let directory = directory();
        let authenticator = DirectoryAuthenticator::new(build_factory(&config(), directory.dialer()));

        let valid = authenticator
            .check_user_password("uid=john,ou=users,dc=example,dc=com", "hunter2")
            .await
            .unwrap();

        assert!(valid);
        // The user connection is closed, not pooled.
        assert_eq!(directory.open_connections(), 0);
    }

    #[tokio::test]
    async fn invalid_password() {
        let directory = directory();
        let authenticator = DirectoryAuthenticator::new(build_factory(&config(), directory.dialer()));

        let valid = authenticator
            .check_user_password("uid=john,ou=users,dc=example,dc=com", "wrong")
            .await
            .unwrap();

        assert!(!valid);
    }

    #[tokio::test]
    async fn empty_password_is_rejected_without_dialing() {
        let directory = directory();
        let authenticator = DirectoryAuthenticator::new(build_factory(&config(), directory.dialer()));

        let valid = authenticator
            .check_user_password("uid=john,ou=users,dc=example,dc=com", "")
            .await
            .unwrap();

        assert!(!valid);
        assert_eq!(directory.dials(), 0);
    }

    #[tokio::test]
    async fn transport_failure_is_an_error() {
        let directory = directory();
        directory.fail_all_dials(true);
        let authenticator = DirectoryAuthenticator::new(build_factory(&config(), directory.dialer()));

        let result = authenticator
            .check_user_password("uid=john,ou=users,dc=example,dc=com", "hunter2")
            .await;

        assert!(matches!(result, Err(LdapError::Dial { .. })));
    }
}
