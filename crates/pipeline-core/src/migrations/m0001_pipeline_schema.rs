use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0001_pipeline_schema")
        .operation(
            CreateTable::new("tenants")
                .add_field(Field::new("id", FieldType::Text).primary_key())
                .add_field(Field::new("slug", FieldType::Text).not_null().unique())
                .add_field(Field::new("ai_credential", FieldType::Text))
                .add_field(
                    Field::new("max_concurrent_pipelines", FieldType::Integer)
                        .not_null()
                        .default("2"),
                )
                .add_field(
                    Field::new("storage_budget_mb", FieldType::Integer)
                        .not_null()
                        .default("1024"),
                )
                .add_field(Field::new("active", FieldType::Boolean).not_null().default("1"))
                .add_field(Field::new("created_at", FieldType::Text).not_null())
                .add_field(Field::new("updated_at", FieldType::Text).not_null()),
        )
        .operation(
            CreateTable::new("tenant_categories")
                .add_field(Field::new("id", FieldType::Text).primary_key())
                .add_field(
                    Field::new("tenant_id", FieldType::Text)
                        .not_null()
                        .references("tenants", "id"),
                )
                .add_field(Field::new("key", FieldType::Text).not_null())
                .add_field(Field::new("name", FieldType::Text).not_null())
                .add_field(Field::new("subcategory", FieldType::Text))
                .add_field(Field::new("safe_name", FieldType::Text).not_null())
                .add_field(Field::new("sort_order", FieldType::Integer).not_null().default("0")),
        )
        .operation(AddIndex::new(
            "tenant_categories",
            Index::new("idx_tenant_categories_tenant").column("tenant_id"),
        ))
        .operation(
            CreateTable::new("pipeline_runs")
                .add_field(Field::new("id", FieldType::Text).primary_key())
                .add_field(
                    Field::new("tenant_id", FieldType::Text)
                        .not_null()
                        .references("tenants", "id"),
                )
                .add_field(Field::new("input_files", FieldType::Text).not_null().default("'[]'"))
                .add_field(Field::new("source_urls", FieldType::Text).not_null().default("'[]'"))
                .add_field(Field::new("status", FieldType::Text).not_null())
                .add_field(Field::new("current_stage", FieldType::Text).not_null())
                .add_field(Field::new("progress", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("error", FieldType::Text))
                .add_field(Field::new("created_at", FieldType::Text).not_null())
                .add_field(Field::new("started_at", FieldType::Text))
                .add_field(Field::new("completed_at", FieldType::Text))
                .add_field(
                    Field::new("parent_run_id", FieldType::Text).references("pipeline_runs", "id"),
                )
                .add_field(Field::new("batch_index", FieldType::Integer))
                .add_field(Field::new("batch_size", FieldType::Integer))
                .add_field(Field::new("total_batches", FieldType::Integer))
                .add_field(Field::new("total_items", FieldType::Integer).not_null().default("0"))
                .add_field(
                    Field::new("processed_items", FieldType::Integer)
                        .not_null()
                        .default("0"),
                )
                .add_field(
                    Field::new("total_questions", FieldType::Integer)
                        .not_null()
                        .default("0"),
                ),
        )
        .operation(AddIndex::new(
            "pipeline_runs",
            Index::new("idx_pipeline_runs_tenant_status")
                .column("tenant_id")
                .column("status"),
        ))
        .operation(AddIndex::new(
            "pipeline_runs",
            Index::new("idx_pipeline_runs_parent").column("parent_run_id"),
        ))
        .operation(
            CreateTable::new("pipeline_jobs")
                .add_field(Field::new("id", FieldType::Text).primary_key())
                .add_field(
                    Field::new("pipeline_run_id", FieldType::Text)
                        .not_null()
                        .references("pipeline_runs", "id"),
                )
                .add_field(Field::new("stage", FieldType::Text).not_null())
                .add_field(Field::new("status", FieldType::Text).not_null())
                .add_field(Field::new("progress", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("external_job_id", FieldType::Text))
                .add_field(Field::new("error_message", FieldType::Text))
                .add_field(Field::new("result", FieldType::Text))
                .add_field(Field::new("attempt", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("created_at", FieldType::Text).not_null())
                .add_field(Field::new("started_at", FieldType::Text))
                .add_field(Field::new("completed_at", FieldType::Text)),
        )
        .operation(AddIndex::new(
            "pipeline_jobs",
            Index::new("idx_pipeline_jobs_run_stage")
                .column("pipeline_run_id")
                .column("stage"),
        ))
        .operation(
            CreateTable::new("items")
                .add_field(Field::new("tenant_id", FieldType::Text).not_null())
                .add_field(Field::new("file", FieldType::Text).not_null())
                .add_field(Field::new("pipeline_run_id", FieldType::Text).not_null())
                .add_field(Field::new("source_document_id", FieldType::Text).not_null())
                .add_field(Field::new("success", FieldType::Boolean).not_null())
                .add_field(Field::new("parse_payload", FieldType::Text).not_null())
                .add_field(Field::new("categorization", FieldType::Text))
                .add_field(Field::new("similarity_group_id", FieldType::Text))
                .add_field(Field::new("marked_wrong", FieldType::Boolean).not_null().default("0"))
                .add_field(Field::new("marked_wrong_at", FieldType::Text)),
        )
        .operation(AddIndex::new(
            "items",
            Index::new("idx_items_natural_key")
                .column("tenant_id")
                .column("file")
                .unique(),
        ))
        .operation(AddIndex::new(
            "items",
            Index::new("idx_items_tenant_similarity")
                .column("tenant_id")
                .column("similarity_group_id"),
        ))
        .operation(
            CreateTable::new("stage_queue_messages")
                .add_field(Field::new("id", FieldType::Text).primary_key())
                .add_field(Field::new("stage", FieldType::Text).not_null())
                .add_field(Field::new("partition_key", FieldType::Text).not_null())
                .add_field(Field::new("consumer_group", FieldType::Text).not_null().default("''"))
                .add_field(Field::new("payload", FieldType::Text).not_null())
                .add_field(Field::new("status", FieldType::Text).not_null().default("'pending'"))
                .add_field(Field::new("attempt", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("visible_at", FieldType::Text).not_null())
                .add_field(Field::new("lease_owner", FieldType::Text))
                .add_field(Field::new("created_at", FieldType::Text).not_null())
                .add_field(Field::new("updated_at", FieldType::Text).not_null()),
        )
        .operation(AddIndex::new(
            "stage_queue_messages",
            Index::new("idx_stage_queue_stage_status_visible")
                .column("stage")
                .column("status")
                .column("visible_at"),
        ))
}
