//! The four external collaborators the stage processors treat as black-box
//! subroutines: a native PDF rasterizer, the AI vision model used
//! by Parse, the AI language model used by Categorize, and the ML similarity
//! engine used by Similarity. Each is a trait with one production adapter
//! (subprocess or HTTP) so a test can swap in an in-memory double without
//! touching `poppler-utils`, a real AI endpoint, or a real subprocess binary.

pub mod ai;
pub mod rasterizer;
pub mod similarity_engine;

pub use ai::{AiError, HttpAiClient, LanguageModelClient, VisionModelClient};
pub use rasterizer::{LineText, PdfRasterizer, PopplerRasterizer, RasterError};
pub use similarity_engine::{SimilarityEngine, SimilarityEngineError, SubprocessSimilarityEngine};
