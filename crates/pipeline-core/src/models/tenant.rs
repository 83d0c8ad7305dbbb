//! Tenant identity, quota, and credential configuration.

use serde::{Deserialize, Serialize};

use super::category::TenantCategory;

/// A tenant on whose behalf pipeline runs are executed.
///
/// Never deleted; disabled tenants are soft-flagged via `active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    /// Unique human-readable slug (distinct from `id`).
    pub slug: String,
    /// Tenant-scoped AI credential. Falls back to the process-wide default
    /// configured in `PipelineSettings` when absent.
    pub ai_credential: Option<String>,
    /// Maximum number of concurrently-active (non-child) runs.
    pub max_concurrent_pipelines: u32,
    /// Storage budget in megabytes. Not enforced by the core today; carried
    /// for the admin surface that reads quota usage.
    pub storage_budget_mb: u32,
    pub active: bool,
    /// Ordered by `TenantCategory::sort_order`.
    pub categories: Vec<TenantCategory>,
}

impl Tenant {
    pub fn new(id: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slug: slug.into(),
            ai_credential: None,
            max_concurrent_pipelines: 2,
            storage_budget_mb: 1024,
            active: true,
            categories: Vec::new(),
        }
    }

    /// Categories sorted for presentation to the AI categorize prompt and the
    /// split stage's filename derivation.
    pub fn sorted_categories(&self) -> Vec<&TenantCategory> {
        let mut cats: Vec<&TenantCategory> = self.categories.iter().collect();
        cats.sort_by_key(|c| c.sort_order);
        cats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_categories_respects_sort_order() {
        let mut tenant = Tenant::new("t1", "acme");
        tenant.categories.push(TenantCategory {
            id: "c2".into(),
            tenant_id: "t1".into(),
            key: "b".into(),
            name: "Biology".into(),
            subcategory: None,
            safe_name: "biology".into(),
            sort_order: 2,
        });
        tenant.categories.push(TenantCategory {
            id: "c1".into(),
            tenant_id: "t1".into(),
            key: "a".into(),
            name: "Anatomy".into(),
            subcategory: None,
            safe_name: "anatomy".into(),
            sort_order: 1,
        });

        let sorted = tenant.sorted_categories();
        assert_eq!(sorted[0].key, "a");
        assert_eq!(sorted[1].key, "b");
    }
}
