//! Sea-query Iden enums for tables that use dynamic upserts.
//!
//! These provide backend-agnostic table/column identifiers for generating
//! SQL with correct quoting and placeholder syntax via sea-query.
//! Only columns referenced in INSERT/UPDATE/ON CONFLICT clauses need entries.

use sea_query::Iden;

/// The Corpus Merge target: natural key `(tenant_id, file)`.
#[derive(Iden)]
pub enum Items {
    Table,
    TenantId,
    File,
    PipelineRunId,
    SourceDocumentId,
    Success,
    ParsePayload,
    Categorization,
    SimilarityGroupId,
    MarkedWrong,
    MarkedWrongAt,
}
