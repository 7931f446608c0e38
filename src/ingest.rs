//! Upload ingestion.
//!
//! Validates an uploaded payload (extension allow-list, size cap), spills
//! it to a transient temp file for the path-based parsers, and extracts one
//! [`Record`] per data row. [`build_index`] runs the whole upload pipeline:
//! parse → chunk → embed → index. The caller registers the returned index;
//! nothing is published on any failure path, so a failed upload can never
//! leave a half-populated, queryable session.
//!
//! The spill file is owned by a [`tempfile::NamedTempFile`] guard and is
//! removed when the guard drops: on success, on parse failure, and when
//! the request future is cancelled mid-flight.

use std::io::Write;
use std::path::{Path, PathBuf};

use calamine::Reader;

use crate::chunk::chunk_records;
use crate::config::{Config, LimitsConfig};
use crate::embedding;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::models::Record;

/// Extensions accepted by the upload endpoint.
pub const ALLOWED_EXTENSIONS: &[&str] = &["csv", "xls", "xlsx"];

/// Validates and parses uploaded payloads into row records.
pub struct Ingestor {
    max_bytes: usize,
    spill_dir: PathBuf,
}

impl Ingestor {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            max_bytes: limits.max_upload_bytes,
            spill_dir: limits
                .spill_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        }
    }

    /// Parse an uploaded file into ordered records.
    ///
    /// Fails with [`Error::UnsupportedFormat`] for extensions outside the
    /// allow-list, [`Error::PayloadTooLarge`] over the size cap, and
    /// [`Error::Parse`] when the bytes cannot be decoded.
    pub fn parse_records(&self, filename: &str, data: &[u8]) -> Result<Vec<Record>> {
        let extension = extension_of(filename)?;

        if data.len() > self.max_bytes {
            return Err(Error::PayloadTooLarge {
                size: data.len(),
                limit: self.max_bytes,
            });
        }

        // The workbook and CSV parsers want a path; spill the payload into
        // a guard-owned temp file that is removed on every exit path.
        let mut spill = tempfile::Builder::new()
            .prefix("tablechat-")
            .suffix(&format!(".{extension}"))
            .tempfile_in(&self.spill_dir)?;
        spill.write_all(data)?;
        spill.flush()?;

        match extension.as_str() {
            "csv" => parse_csv(spill.path()),
            _ => parse_workbook(spill.path()),
        }
    }
}

fn extension_of(filename: &str) -> Result<String> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(Error::UnsupportedFormat(extension));
    }
    Ok(extension)
}

fn parse_csv(path: &Path) -> Result<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::Parse(e.to_string()))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| Error::Parse(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for (row_index, row) in reader.records().enumerate() {
        let row = row.map_err(|e| Error::Parse(e.to_string()))?;
        let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
        if let Some(text) = render_row(&headers, &cells) {
            records.push(Record {
                sheet: "csv".to_string(),
                row_index,
                text,
            });
        }
    }

    Ok(records)
}

fn parse_workbook(path: &Path) -> Result<Vec<Record>> {
    let mut workbook =
        calamine::open_workbook_auto(path).map_err(|e| Error::Parse(e.to_string()))?;

    let mut records = Vec::new();
    for sheet_name in workbook.sheet_names().to_vec() {
        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| Error::Parse(e.to_string()))?;

        let mut rows = range.rows();
        let headers: Vec<String> = match rows.next() {
            Some(header_row) => header_row.iter().map(cell_to_string).collect(),
            None => continue,
        };

        for (row_index, row) in rows.enumerate() {
            let cells: Vec<String> = row.iter().map(cell_to_string).collect();
            if let Some(text) = render_row(&headers, &cells) {
                records.push(Record {
                    sheet: sheet_name.clone(),
                    row_index,
                    text,
                });
            }
        }
    }

    Ok(records)
}

fn cell_to_string(cell: &calamine::Data) -> String {
    match cell {
        calamine::Data::Empty => String::new(),
        calamine::Data::String(s) => s.trim().to_string(),
        calamine::Data::Float(f) => f.to_string(),
        calamine::Data::Int(i) => i.to_string(),
        calamine::Data::Bool(b) => b.to_string(),
        calamine::Data::DateTime(dt) => dt.to_string(),
        calamine::Data::DateTimeIso(s) | calamine::Data::DurationIso(s) => s.clone(),
        _ => String::new(),
    }
}

/// Render a row as `Header: value` lines. Returns `None` for rows with no
/// non-empty cells. Cells beyond the header row fall back to a positional
/// column name.
fn render_row(headers: &[String], cells: &[String]) -> Option<String> {
    if cells.iter().all(|c| c.trim().is_empty()) {
        return None;
    }

    let mut lines = Vec::with_capacity(cells.len());
    for (i, cell) in cells.iter().enumerate() {
        let value = cell.trim();
        if value.is_empty() {
            continue;
        }
        let header = headers
            .get(i)
            .filter(|h| !h.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("column_{}", i + 1));
        lines.push(format!("{header}: {value}"));
    }
    Some(lines.join("\n"))
}

/// Run the full upload pipeline and return the populated index.
///
/// Parsing runs on the blocking pool; embedding is the await point. A file
/// that yields no data rows fails with [`Error::Parse`]; a session must
/// contain at least one chunk to be worth publishing.
pub async fn build_index(config: &Config, filename: &str, data: &[u8]) -> Result<VectorIndex> {
    let limits = config.limits.clone();
    let owned_name = filename.to_string();
    let owned_data = data.to_vec();

    let records = tokio::task::spawn_blocking(move || {
        Ingestor::new(&limits).parse_records(&owned_name, &owned_data)
    })
    .await
    .map_err(|e| Error::Parse(format!("ingestion task failed: {e}")))??;

    if records.is_empty() {
        return Err(Error::Parse("no data rows in file".to_string()));
    }

    let chunks = chunk_records(
        &records,
        config.chunking.max_chars,
        config.chunking.overlap_chars,
    );
    if chunks.is_empty() {
        return Err(Error::Parse("no data rows in file".to_string()));
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedding::embed_texts(&config.embedding, &texts).await?;
    if vectors.len() != chunks.len() {
        return Err(Error::EmbeddingUnavailable(format!(
            "got {} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        )));
    }

    let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
    let mut index = VectorIndex::new(dims);
    for (chunk, vector) in chunks.into_iter().zip(vectors) {
        index.add(chunk, vector)?;
    }

    tracing::debug!(
        file = filename,
        records = records.len(),
        chunks = index.len(),
        "built session index"
    );

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY_CSV: &str = "\
Supplier,Commodity,Quantity
Acme,Steel,50
Globex,Copper,75
";

    fn ingestor_in(dir: &Path) -> Ingestor {
        Ingestor::new(&LimitsConfig {
            max_upload_bytes: 10 * 1024 * 1024,
            spill_dir: Some(dir.to_path_buf()),
        })
    }

    #[test]
    fn csv_rows_become_header_value_records() {
        let dir = tempfile::tempdir().unwrap();
        let records = ingestor_in(dir.path())
            .parse_records("inventory.csv", INVENTORY_CSV.as_bytes())
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sheet, "csv");
        assert_eq!(records[0].row_index, 0);
        assert_eq!(records[0].text, "Supplier: Acme\nCommodity: Steel\nQuantity: 50");
        assert_eq!(records[1].text, "Supplier: Globex\nCommodity: Copper\nQuantity: 75");
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let records = ingestor_in(dir.path())
            .parse_records("INVENTORY.CSV", INVENTORY_CSV.as_bytes())
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn disallowed_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = ingestor_in(dir.path())
            .parse_records("notes.pdf", b"%PDF-1.4")
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(ref ext) if ext == "pdf"));

        let err = ingestor_in(dir.path())
            .parse_records("no_extension", b"data")
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = Ingestor::new(&LimitsConfig {
            max_upload_bytes: 16,
            spill_dir: Some(dir.path().to_path_buf()),
        });
        let err = ingestor
            .parse_records("big.csv", &[b'a'; 32])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::PayloadTooLarge { size: 32, limit: 16 }
        ));
    }

    #[test]
    fn corrupt_workbook_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ingestor_in(dir.path())
            .parse_records("sheet.xlsx", b"this is not a zip archive")
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn spill_dir_is_clean_after_every_path() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ingestor_in(dir.path());

        ingestor
            .parse_records("inventory.csv", INVENTORY_CSV.as_bytes())
            .unwrap();
        ingestor
            .parse_records("sheet.xlsx", b"not a zip archive")
            .unwrap_err();

        let leftover: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftover.is_empty(), "spill files leaked: {leftover:?}");
    }

    #[test]
    fn blank_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let csv = "Supplier,Quantity\nAcme,50\n,,\n";
        let records = ingestor_in(dir.path())
            .parse_records("inventory.csv", csv.as_bytes())
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn empty_csv_yields_parse_error() {
        let mut config = Config::default();
        config.embedding.provider = "hash".to_string();
        config.embedding.dims = 64;
        let dir = tempfile::tempdir().unwrap();
        config.limits.spill_dir = Some(dir.path().to_path_buf());

        let err = build_index(&config, "empty.csv", b"Supplier,Quantity\n")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn build_index_produces_queryable_chunks() {
        let mut config = Config::default();
        config.embedding.provider = "hash".to_string();
        config.embedding.dims = 128;
        let dir = tempfile::tempdir().unwrap();
        config.limits.spill_dir = Some(dir.path().to_path_buf());

        let index = build_index(&config, "inventory.csv", INVENTORY_CSV.as_bytes())
            .await
            .unwrap();
        assert!(!index.is_empty());
    }
}
