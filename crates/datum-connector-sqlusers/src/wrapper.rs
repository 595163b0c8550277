//! The thin SQL client seam.
//!
//! The connector never touches a driver directly; it talks to this trait.
//! Production wires a real client behind it, tests wire a recording mock.

use async_trait::async_trait;
use serde_json::{Map, Value};

use datum_core::SyncResult;

/// Minimal SQL execution surface the connector needs.
///
/// A rejected statement surfaces as [`datum_core::SyncError::Query`];
/// connectivity problems as `ConnectionFailed`.
#[async_trait]
pub trait SqlWrapper: Send + Sync {
    /// Open the connection. Idempotent.
    async fn connect(&self) -> SyncResult<()>;

    /// Close the connection. Idempotent, safe after a failed connect.
    async fn disconnect(&self) -> SyncResult<()>;

    /// Execute a statement without a result set.
    async fn query(&self, sql: &str) -> SyncResult<()>;

    /// Execute a parameterized select, returning rows as attribute maps.
    async fn select(&self, sql: &str, values: &[Value]) -> SyncResult<Vec<Map<String, Value>>>;
}
