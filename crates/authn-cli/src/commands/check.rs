//! Backend health check.

use std::time::Instant;

use authn_ldap::{
    build_factory, ClientFactory, Dialer, DirectoryAuthenticator, DirectoryClient, LdapConfig,
    PoolStats,
};
use futures::future::join_all;
use serde::Serialize;
use tabled::Tabled;

use crate::cli::OutputFormat;
use crate::output::{output, success, warning};
use crate::{CliError, CliResult};

/// Result of a check run.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct CheckRow {
    /// Directory address.
    #[tabled(rename = "Address")]
    pub address: String,
    /// Whether pooling was enabled.
    #[tabled(rename = "Pooled")]
    pub pooled: bool,
    /// Successful acquisitions.
    #[tabled(rename = "Acquired")]
    pub acquired: usize,
    /// Failed acquisitions.
    #[tabled(rename = "Failed")]
    pub failed: usize,
    /// Wall time of the parallel acquisitions.
    #[tabled(rename = "Elapsed (ms)")]
    pub elapsed_ms: u64,
}

/// Pool counters after a check run.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct PoolRow {
    /// Configured capacity.
    #[tabled(rename = "Count")]
    pub count: usize,
    /// Open connections.
    #[tabled(rename = "Active")]
    pub active: usize,
    /// Idle connections.
    #[tabled(rename = "Idle")]
    pub idle: usize,
}

impl From<PoolStats> for PoolRow {
    fn from(stats: PoolStats) -> Self {
        Self {
            count: stats.count,
            active: stats.active,
            idle: stats.idle,
        }
    }
}

/// Outcome of [`check`].
#[derive(Debug, Clone)]
pub struct CheckReport {
    /// Summary row.
    pub summary: CheckRow,
    /// Pool counters, when pooling is enabled.
    pub pool: Option<PoolRow>,
}

/// Runs the startup check, then acquires `concurrency` clients in parallel.
///
/// Each client is closed as soon as it is acquired. The factory is shut
/// down before returning.
pub async fn check<D: Dialer>(
    config: &LdapConfig,
    dialer: D,
    concurrency: usize,
) -> CliResult<CheckReport> {
    let authenticator = DirectoryAuthenticator::new(build_factory(config, dialer));
    let factory = authenticator.factory();

    if let Err(e) = authenticator.startup_check().await {
        let _ = authenticator.shutdown().await;
        return Err(e.into());
    }

    let started = Instant::now();
    let results = join_all((0..concurrency.max(1)).map(|_| async move {
        let mut client = factory.get_client(None).await?;
        client.close().await
    }))
    .await;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let failed = results.iter().filter(|r| r.is_err()).count();
    for e in results.iter().filter_map(|r| r.as_ref().err()) {
        tracing::debug!(error = %e, "Acquisition failed during check");
    }

    let pool = factory.pool().map(|pool| PoolRow::from(pool.stats()));
    authenticator.shutdown().await?;

    Ok(CheckReport {
        summary: CheckRow {
            address: config.address.clone(),
            pooled: pool.is_some(),
            acquired: results.len() - failed,
            failed,
            elapsed_ms,
        },
        pool,
    })
}

/// Runs the check command against the configured directory.
pub async fn run_check<D: Dialer>(
    config: &LdapConfig,
    dialer: D,
    concurrency: usize,
    format: OutputFormat,
) -> CliResult<()> {
    let report = check(config, dialer, concurrency).await?;
    let CheckRow { acquired, failed, .. } = report.summary;

    output(&[report.summary], format)?;
    if let Some(pool) = report.pool {
        output(&[pool], format)?;
    }

    if failed > 0 {
        warning(&format!("{failed} acquisitions failed"));
        return Err(CliError::CheckFailed {
            failed,
            total: acquired + failed,
        });
    }

    if format != OutputFormat::Quiet {
        success(&format!("Directory at {} is healthy", config.address));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use authn_ldap::testing::MockDirectory;

    use super::*;

    fn config(pooled: bool) -> LdapConfig {
        let mut builder = LdapConfig::builder()
            .address("ldap://127.0.0.1:389")
            .user("cn=admin,dc=example,dc=com")
            .password("secret");
        if pooled {
            builder = builder.pool(2, 2, Duration::from_secs(1));
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn pooled_check_reuses_connections() {
        let directory = MockDirectory::new();

        let report = check(&config(true), directory.dialer(), 6).await.unwrap();

        assert_eq!(report.summary.acquired, 6);
        assert_eq!(report.summary.failed, 0);
        assert!(report.summary.pooled);
        let pool = report.pool.unwrap();
        assert_eq!(pool.count, 2);
        assert_eq!(pool.idle, 2);
        assert!(directory.max_open_connections() <= 2);
        assert_eq!(directory.open_connections(), 0);
    }

    #[tokio::test]
    async fn standard_check_dials_per_client() {
        let directory = MockDirectory::new();

        let report = check(&config(false), directory.dialer(), 3).await.unwrap();

        assert_eq!(report.summary.acquired, 3);
        assert!(report.pool.is_none());
        // One dial for the startup check, one per client.
        assert_eq!(directory.dials(), 4);
    }

    #[tokio::test]
    async fn unreachable_directory_fails() {
        let directory = MockDirectory::new();
        directory.fail_all_dials(true);

        let result = check(&config(true), directory.dialer(), 1).await;

        assert!(matches!(result, Err(CliError::Ldap(_))));
    }
}
