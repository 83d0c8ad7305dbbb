//! Tenant-scoped category taxonomy.

use serde::{Deserialize, Serialize};

/// One entry in a tenant's category taxonomy.
///
/// Defines both the label space the categorize stage validates AI responses
/// against and the filename the split stage writes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantCategory {
    pub id: String,
    pub tenant_id: String,
    /// Stable key, unique within the tenant.
    pub key: String,
    pub name: String,
    pub subcategory: Option<String>,
    /// Filename-safe identifier, produced by `sanitize_filename`.
    pub safe_name: String,
    pub sort_order: i32,
}
