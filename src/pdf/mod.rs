pub mod processor;

pub use processor::{ChunkWindow, ExtractedChunk, PdfMetadata, PdfProcessor, plan_chunks};
