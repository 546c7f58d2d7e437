//! HashiCorp Vault KV v2 credential client.
//!
//! The engine consumes the secret store through one narrow call:
//! `get_database_credentials(kind)` returning a key/value map. Everything
//! else (address, token, namespace) comes from the environment.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{ReconcileError, Result};

static VALID_SECRET_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9/_-]+$").unwrap());

static VALID_DATABASE_KIND: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").unwrap());

pub struct VaultClient {
    address: String,
    token: String,
    namespace: Option<String>,
    http: reqwest::Client,
}

impl VaultClient {
    /// Build a client from `VAULT_ADDR` and `VAULT_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let address = std::env::var("VAULT_ADDR").map_err(|_| {
            ReconcileError::Vault("VAULT_ADDR environment variable not set".to_string())
        })?;
        let token = std::env::var("VAULT_TOKEN").map_err(|_| {
            ReconcileError::Vault("VAULT_TOKEN environment variable not set".to_string())
        })?;
        let namespace = std::env::var("VAULT_NAMESPACE").ok();
        Ok(Self::new(address, token, namespace))
    }

    pub fn new(address: String, token: String, namespace: Option<String>) -> Self {
        Self {
            address: address.trim_end_matches('/').to_string(),
            token,
            namespace,
            http: reqwest::Client::new(),
        }
    }

    fn validate_secret_path(path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(ReconcileError::Vault("secret path cannot be empty".to_string()));
        }
        if path.contains("..") || path.starts_with("//") {
            return Err(ReconcileError::Vault(format!(
                "invalid secret path {path:?}: path traversal is not allowed"
            )));
        }
        if !VALID_SECRET_PATH.is_match(path) {
            return Err(ReconcileError::Vault(format!(
                "invalid secret path {path:?}: only alphanumerics, slashes, underscores, and hyphens are allowed"
            )));
        }
        Ok(())
    }

    /// Insert the `/data/` segment KV v2 expects after the mount point.
    fn kv2_path(path: &str) -> String {
        if path.contains("/data/") {
            return path.to_string();
        }
        match path.split_once('/') {
            Some((mount, rest)) => format!("{mount}/data/{rest}"),
            None => format!("{path}/data"),
        }
    }

    /// Fetch a secret's key/value map from the KV v2 engine.
    pub async fn get_secret(&self, secret_path: &str) -> Result<HashMap<String, String>> {
        Self::validate_secret_path(secret_path)?;
        let url = format!("{}/v1/{}", self.address, Self::kv2_path(secret_path));
        debug!(path = %secret_path, "fetching secret");

        let mut request = self
            .http
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .timeout(std::time::Duration::from_secs(10));
        if let Some(namespace) = &self.namespace {
            request = request.header("X-Vault-Namespace", namespace);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ReconcileError::Vault(format!("vault request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ReconcileError::Vault(format!(
                "secret not found at path: {secret_path}"
            )));
        }
        let response = response
            .error_for_status()
            .map_err(|e| ReconcileError::Vault(format!("vault returned error: {e}")))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ReconcileError::Vault(format!("malformed vault response: {e}")))?;

        let data = body
            .get("data")
            .and_then(|d| d.get("data"))
            .and_then(|d| d.as_object())
            .ok_or_else(|| {
                ReconcileError::Vault(format!("no data in secret at path: {secret_path}"))
            })?;

        if data.is_empty() {
            return Err(ReconcileError::Vault(format!(
                "no data in secret at path: {secret_path}"
            )));
        }

        Ok(data
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect())
    }

    /// Fetch database credentials for `kind` (`sqlserver` or `postgresql`)
    /// from `secret/database/<kind>`.
    pub async fn get_database_credentials(&self, kind: &str) -> Result<HashMap<String, String>> {
        if !VALID_DATABASE_KIND.is_match(kind) {
            return Err(ReconcileError::Vault(format!(
                "invalid database kind {kind:?}"
            )));
        }
        if kind != "sqlserver" && kind != "postgresql" {
            return Err(ReconcileError::Vault(format!(
                "unsupported database kind {kind:?}: must be \"sqlserver\" or \"postgresql\""
            )));
        }

        let credentials = self.get_secret(&format!("secret/database/{kind}")).await?;
        info!(kind = %kind, "fetched database credentials from vault");
        Ok(credentials)
    }

    /// Probe `/v1/sys/health`. Standby and recovery states still count as
    /// healthy; sealed or uninitialized do not.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/v1/sys/health", self.address);
        match self
            .http
            .get(&url)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => matches!(response.status().as_u16(), 200 | 429 | 472 | 473),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_path_validation() {
        assert!(VaultClient::validate_secret_path("secret/database/sqlserver").is_ok());
        assert!(VaultClient::validate_secret_path("").is_err());
        assert!(VaultClient::validate_secret_path("secret/../admin").is_err());
        assert!(VaultClient::validate_secret_path("//secret").is_err());
        assert!(VaultClient::validate_secret_path("secret/with space").is_err());
        assert!(VaultClient::validate_secret_path("secret/$(rm -rf)").is_err());
    }

    #[test]
    fn test_kv2_path_insertion() {
        assert_eq!(
            VaultClient::kv2_path("secret/database/sqlserver"),
            "secret/data/database/sqlserver"
        );
        assert_eq!(
            VaultClient::kv2_path("secret/data/database/sqlserver"),
            "secret/data/database/sqlserver"
        );
        assert_eq!(VaultClient::kv2_path("secret"), "secret/data");
    }

    #[tokio::test]
    async fn test_unsupported_kind_rejected() {
        let client = VaultClient::new("http://127.0.0.1:8200".to_string(), "tok".to_string(), None);
        assert!(client.get_database_credentials("mysql").await.is_err());
        assert!(client.get_database_credentials("sqlserver; rm").await.is_err());
    }
}
