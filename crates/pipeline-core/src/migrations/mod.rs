mod m0001_pipeline_schema;

use cetane::prelude::MigrationRegistry;

pub fn registry() -> MigrationRegistry {
    let mut reg = MigrationRegistry::new();
    reg.register(m0001_pipeline_schema::migration());
    reg
}
