//! The five Stage Processors — Extract, Parse, Categorize, Similarity,
//! Split — and the external collaborator traits they're built against:
//! a PDF rasterizer, a vision model client, a language model client, and a
//! similarity engine. Production adapters shell out to
//! `poppler-utils` and an HTTP AI endpoint; fakes usable in tests live
//! alongside each trait.

pub mod collaborators;
pub mod error;
pub mod marker;
mod support;

pub mod categorize;
pub mod extract;
pub mod parse;
pub mod similarity;
pub mod split;

pub use categorize::CategorizeProcessor;
pub use collaborators::{LanguageModelClient, PdfRasterizer, SimilarityEngine, VisionModelClient};
pub use extract::ExtractProcessor;
pub use parse::ParseProcessor;
pub use similarity::SimilarityProcessor;
pub use split::SplitProcessor;
