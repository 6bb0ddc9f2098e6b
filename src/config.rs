//! Configuration for the database handle
//!
//! Provides a builder pattern for configuring connections and query defaults.

/// Default number of pooled connections
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default page size for list queries
pub const DEFAULT_ROWS_PER_PAGE: u64 = 25;

/// Configuration for [`Database`](crate::session::Database)
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// PostgreSQL database URL
    pub database_url: String,
    /// Maximum pool size (default: 10)
    pub max_connections: u32,
    /// Page size used by `ListQuery::for_config` (default: 25)
    pub default_rows_per_page: u64,
    /// Whether sessions log every executed statement at debug level
    pub log_statements: bool,
}

impl StoreConfig {
    /// Create a new configuration builder
    pub fn builder(database_url: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(database_url)
    }
}

/// Builder for StoreConfig
#[derive(Debug)]
pub struct StoreConfigBuilder {
    database_url: String,
    max_connections: u32,
    default_rows_per_page: u64,
    log_statements: bool,
}

impl StoreConfigBuilder {
    /// Create a new builder with the database URL
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            default_rows_per_page: DEFAULT_ROWS_PER_PAGE,
            log_statements: true,
        }
    }

    /// Set the maximum pool size (default: 10)
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the default page size; 0 disables the LIMIT
    pub fn default_rows_per_page(mut self, rows: u64) -> Self {
        self.default_rows_per_page = rows;
        self
    }

    /// Enable or disable statement logging (default: true)
    pub fn log_statements(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> StoreConfig {
        StoreConfig {
            database_url: self.database_url,
            max_connections: self.max_connections,
            default_rows_per_page: self.default_rows_per_page,
            log_statements: self.log_statements,
        }
    }
}
