//! Core data types that flow through the ingestion and query pipeline.

/// One logical row extracted from an uploaded file, rendered as
/// `Header: value` lines. Immutable once created.
#[derive(Debug, Clone)]
pub struct Record {
    /// Sheet name for workbooks, `"csv"` for CSV files.
    pub sheet: String,
    /// 0-based data-row index within the sheet (header row excluded).
    pub row_index: usize,
    /// Rendered row text.
    pub text: String,
}

/// A bounded slice of one or more adjacent records' text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Contiguous index starting at 0 within the upload.
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of the text, hex-encoded.
    pub hash: String,
}

/// A chunk returned from the vector index with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// The composed answer together with the chunks it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Retrieved context, ordered by descending similarity.
    pub context: Vec<ScoredChunk>,
}
