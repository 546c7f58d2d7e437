//! Credential resolution for the CLI.
//!
//! Flags win, then environment variables (wired through clap's `env`
//! attribute), then Vault when `--use-vault` is set. Passwords have no
//! default; a missing one is a usage-level failure before any connection
//! is opened.

use crate::cli::CredentialArgs;
use crate::config::{PostgresConfig, SqlServerConfig};
use crate::error::{ReconcileError, Result};
use crate::vault::VaultClient;

pub async fn resolve(args: &CredentialArgs) -> Result<(SqlServerConfig, PostgresConfig)> {
    if args.use_vault {
        let client = VaultClient::from_env()?;
        let source_map = client.get_database_credentials("sqlserver").await?;
        let target_map = client.get_database_credentials("postgresql").await?;
        return Ok((
            SqlServerConfig::from_secret_map(&source_map)?,
            PostgresConfig::from_secret_map(&target_map)?,
        ));
    }

    let source = SqlServerConfig {
        server: args
            .source_server
            .clone()
            .unwrap_or_else(|| "localhost".to_string()),
        port: SqlServerConfig::DEFAULT_PORT,
        database: args
            .source_database
            .clone()
            .unwrap_or_else(|| "warehouse_source".to_string()),
        username: args.source_user.clone().unwrap_or_else(|| "sa".to_string()),
        password: args.source_password.clone().ok_or_else(|| {
            ReconcileError::Credentials(
                "source database password not provided; set --source-password or SQLSERVER_PASSWORD"
                    .to_string(),
            )
        })?,
        trust_cert: true,
    };

    let target = PostgresConfig {
        host: args
            .target_host
            .clone()
            .unwrap_or_else(|| "localhost".to_string()),
        port: args.target_port.unwrap_or(PostgresConfig::DEFAULT_PORT),
        database: args
            .target_database
            .clone()
            .unwrap_or_else(|| "warehouse_target".to_string()),
        username: args
            .target_user
            .clone()
            .unwrap_or_else(|| "postgres".to_string()),
        password: args.target_password.clone().ok_or_else(|| {
            ReconcileError::Credentials(
                "target database password not provided; set --target-password or POSTGRES_PASSWORD"
                    .to_string(),
            )
        })?,
    };

    Ok((source, target))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> CredentialArgs {
        CredentialArgs {
            source_server: Some("mssql".to_string()),
            source_database: Some("src".to_string()),
            source_user: Some("sa".to_string()),
            source_password: Some("pw1".to_string()),
            target_host: Some("pg".to_string()),
            target_port: Some(5433),
            target_database: Some("tgt".to_string()),
            target_user: Some("postgres".to_string()),
            target_password: Some("pw2".to_string()),
            use_vault: false,
        }
    }

    #[tokio::test]
    async fn test_explicit_flags_resolve() {
        let (source, target) = resolve(&args()).await.unwrap();
        assert_eq!(source.server, "mssql");
        assert_eq!(source.port, 1433);
        assert_eq!(target.host, "pg");
        assert_eq!(target.port, 5433);
    }

    #[tokio::test]
    async fn test_missing_password_is_a_credential_error() {
        let mut missing = args();
        missing.source_password = None;
        let err = resolve(&missing).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Credentials(_)));
    }

    #[tokio::test]
    async fn test_defaults_apply_when_flags_absent() {
        let sparse = CredentialArgs {
            source_server: None,
            source_database: None,
            source_user: None,
            source_password: Some("pw".to_string()),
            target_host: None,
            target_port: None,
            target_database: None,
            target_user: None,
            target_password: Some("pw".to_string()),
            use_vault: false,
        };
        let (source, target) = resolve(&sparse).await.unwrap();
        assert_eq!(source.server, "localhost");
        assert_eq!(source.database, "warehouse_source");
        assert_eq!(target.port, 5432);
        assert_eq!(target.database, "warehouse_target");
    }
}
