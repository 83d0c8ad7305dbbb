//! Diesel table definitions for the pipeline store.

diesel::table! {
    tenants (id) {
        id -> Text,
        slug -> Text,
        ai_credential -> Nullable<Text>,
        max_concurrent_pipelines -> Integer,
        storage_budget_mb -> Integer,
        active -> Bool,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    tenant_categories (id) {
        id -> Text,
        tenant_id -> Text,
        key -> Text,
        name -> Text,
        subcategory -> Nullable<Text>,
        safe_name -> Text,
        sort_order -> Integer,
    }
}

diesel::table! {
    pipeline_runs (id) {
        id -> Text,
        tenant_id -> Text,
        input_files -> Text,
        source_urls -> Text,
        status -> Text,
        current_stage -> Text,
        progress -> Integer,
        error -> Nullable<Text>,
        created_at -> Text,
        started_at -> Nullable<Text>,
        completed_at -> Nullable<Text>,
        parent_run_id -> Nullable<Text>,
        batch_index -> Nullable<Integer>,
        batch_size -> Nullable<Integer>,
        total_batches -> Nullable<Integer>,
        total_items -> Integer,
        processed_items -> Integer,
        total_questions -> Integer,
    }
}

diesel::table! {
    pipeline_jobs (id) {
        id -> Text,
        pipeline_run_id -> Text,
        stage -> Text,
        status -> Text,
        progress -> Integer,
        external_job_id -> Nullable<Text>,
        error_message -> Nullable<Text>,
        result -> Nullable<Text>,
        attempt -> Integer,
        created_at -> Text,
        started_at -> Nullable<Text>,
        completed_at -> Nullable<Text>,
    }
}

diesel::table! {
    items (tenant_id, file) {
        tenant_id -> Text,
        file -> Text,
        pipeline_run_id -> Text,
        source_document_id -> Text,
        success -> Bool,
        parse_payload -> Text,
        categorization -> Nullable<Text>,
        similarity_group_id -> Nullable<Text>,
        marked_wrong -> Bool,
        marked_wrong_at -> Nullable<Text>,
    }
}

// Visibility-timeout based durable queue. One row per in-flight or recently
// completed message; completed rows are retained (at least 1000 per stage)
// for audit rather than deleted.
diesel::table! {
    stage_queue_messages (id) {
        id -> Text,
        stage -> Text,
        partition_key -> Text,
        consumer_group -> Text,
        payload -> Text,
        status -> Text,
        attempt -> Integer,
        visible_at -> Text,
        lease_owner -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::joinable!(tenant_categories -> tenants (tenant_id));
diesel::joinable!(pipeline_jobs -> pipeline_runs (pipeline_run_id));

diesel::allow_tables_to_appear_in_same_query!(
    items,
    pipeline_jobs,
    pipeline_runs,
    stage_queue_messages,
    tenant_categories,
    tenants,
);
