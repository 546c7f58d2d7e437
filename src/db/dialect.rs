//! Database dialect rules.
//!
//! The dialect is derived from the connector kind at connection-open time
//! and carried on the connection handle; nothing in the engine inspects
//! driver types at runtime.

use std::fmt;

/// Database-kind-specific quoting, placeholder, and pagination rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    SqlServer,
}

impl Dialect {
    /// Quote a single already-validated identifier part.
    ///
    /// Quoting style: `"name"` on Postgres, `[name]` on SQL Server.
    pub fn quote(&self, identifier: &str) -> String {
        match self {
            Dialect::Postgres => format!("\"{identifier}\""),
            Dialect::SqlServer => format!("[{identifier}]"),
        }
    }

    /// Parameter placeholder for the 0-indexed parameter `index`.
    ///
    /// Both dialects number their placeholders: `$1, $2, ...` on Postgres,
    /// `@P1, @P2, ...` in the TDS syntax SQL Server expects.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index + 1),
            Dialect::SqlServer => "@P".to_string() + &(index + 1).to_string(),
        }
    }

    /// Pagination clause for chunked reads. Callers must already have an
    /// `ORDER BY` in place; SQL Server rejects `OFFSET` without one.
    pub fn pagination(&self, limit: usize, offset: usize) -> String {
        match self {
            Dialect::Postgres => format!("LIMIT {limit} OFFSET {offset}"),
            Dialect::SqlServer => {
                format!("OFFSET {offset} ROWS FETCH NEXT {limit} ROWS ONLY")
            }
        }
    }

    /// Cheap liveness probe used by pool health checks.
    pub fn probe_query(&self) -> &'static str {
        "SELECT 1"
    }

    /// Stable label for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgresql",
            Dialect::SqlServer => "sqlserver",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_styles() {
        assert_eq!(Dialect::Postgres.quote("users"), "\"users\"");
        assert_eq!(Dialect::SqlServer.quote("users"), "[users]");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Postgres.placeholder(0), "$1");
        assert_eq!(Dialect::Postgres.placeholder(2), "$3");
        assert_eq!(Dialect::SqlServer.placeholder(0), "@P1");
        assert_eq!(Dialect::SqlServer.placeholder(4), "@P5");
    }

    #[test]
    fn test_pagination() {
        assert_eq!(Dialect::Postgres.pagination(100, 200), "LIMIT 100 OFFSET 200");
        assert_eq!(
            Dialect::SqlServer.pagination(100, 200),
            "OFFSET 200 ROWS FETCH NEXT 100 ROWS ONLY"
        );
    }
}
