//! Database connection configuration.
//!
//! Credential material arrives from CLI flags, environment variables, or the
//! secret store; the CLI layer merges those sources into these structs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};

/// Source connection settings (SQL Server).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlServerConfig {
    pub server: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Accept the server certificate without verification. CDC lab setups
    /// routinely run with self-signed certs.
    pub trust_cert: bool,
}

impl SqlServerConfig {
    pub const DEFAULT_PORT: u16 = 1433;

    /// Build from a secret-store map. Required keys: `server`, `database`,
    /// `username`, `password`.
    pub fn from_secret_map(map: &HashMap<String, String>) -> Result<Self> {
        let missing: Vec<&str> = ["server", "database", "username", "password"]
            .iter()
            .filter(|k| !map.contains_key(**k))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(ReconcileError::Credentials(format!(
                "missing required sqlserver credential keys: {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            server: map["server"].clone(),
            port: map
                .get("port")
                .map(|p| p.parse())
                .transpose()
                .map_err(|e| ReconcileError::Credentials(format!("invalid sqlserver port: {e}")))?
                .unwrap_or(Self::DEFAULT_PORT),
            database: map["database"].clone(),
            username: map["username"].clone(),
            password: map["password"].clone(),
            trust_cert: true,
        })
    }
}

/// Target connection settings (PostgreSQL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl PostgresConfig {
    pub const DEFAULT_PORT: u16 = 5432;

    /// Build from a secret-store map. Required keys: `host`, `database`,
    /// `username`, `password`; `port` defaults to 5432.
    pub fn from_secret_map(map: &HashMap<String, String>) -> Result<Self> {
        let missing: Vec<&str> = ["host", "database", "username", "password"]
            .iter()
            .filter(|k| !map.contains_key(**k))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(ReconcileError::Credentials(format!(
                "missing required postgresql credential keys: {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            host: map["host"].clone(),
            port: map
                .get("port")
                .map(|p| p.parse())
                .transpose()
                .map_err(|e| ReconcileError::Credentials(format!("invalid postgres port: {e}")))?
                .unwrap_or(Self::DEFAULT_PORT),
            database: map["database"].clone(),
            username: map["username"].clone(),
            password: map["password"].clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_sqlserver_from_secret_map() {
        let config = SqlServerConfig::from_secret_map(&map(&[
            ("server", "mssql.internal"),
            ("database", "warehouse_source"),
            ("username", "sa"),
            ("password", "s3cret"),
        ]))
        .unwrap();
        assert_eq!(config.server, "mssql.internal");
        assert_eq!(config.port, 1433);
    }

    #[test]
    fn test_sqlserver_missing_keys() {
        let err = SqlServerConfig::from_secret_map(&map(&[("server", "x")])).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("database"));
        assert!(message.contains("password"));
    }

    #[test]
    fn test_postgres_port_default_and_override() {
        let base = [
            ("host", "pg.internal"),
            ("database", "warehouse_target"),
            ("username", "postgres"),
            ("password", "s3cret"),
        ];
        let config = PostgresConfig::from_secret_map(&map(&base)).unwrap();
        assert_eq!(config.port, 5432);

        let mut with_port = map(&base);
        with_port.insert("port".into(), "6543".into());
        assert_eq!(PostgresConfig::from_secret_map(&with_port).unwrap().port, 6543);
    }
}
