/// Node identifiers are the inventory primary keys (BIGSERIAL upstream).
pub type NodeId = i64;

/// Tenant (workspace) identifiers.
pub type TenantId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
