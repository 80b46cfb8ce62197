use std::sync::Arc;

use bytes::Bytes;
use lopdf::{Dictionary, Document, Object};
use sha2::{Digest, Sha256};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::ImageMeta;

/// Document-level metadata collected during validation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfMetadata {
    pub filename: String,
    pub file_size: u64,
    pub file_hash: String,
    pub page_count: u32,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub is_encrypted: bool,
    pub is_form: bool,
    pub has_images: bool,
    pub has_tables: bool,
}

/// One window of the chunk plan. Pages are 1-based inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWindow {
    pub chunk_index: u32,
    pub page_start: u32,
    pub page_end: u32,
}

/// A fully extracted chunk ready for persistence.
#[derive(Debug, Clone)]
pub struct ExtractedChunk {
    pub job_id: Uuid,
    pub chunk_index: u32,
    pub page_start: u32,
    pub page_end: u32,
    pub text: String,
    pub cleaned_text: String,
    pub images: Vec<ImageMeta>,
}

/// Computes the chunk plan: windows of `chunk_size` pages reusing
/// `overlap` pages between neighbours. The last window is truncated at the
/// page count and never spills past it; a document at most `chunk_size`
/// pages long yields exactly one window.
pub fn plan_chunks(total_pages: u32, chunk_size: u32, overlap: u32) -> Vec<ChunkWindow> {
    if total_pages == 0 {
        return Vec::new();
    }
    if total_pages <= chunk_size {
        return vec![ChunkWindow { chunk_index: 0, page_start: 1, page_end: total_pages }];
    }

    let mut windows = Vec::new();
    let mut chunk_index = 0u32;
    let mut current = 1u32;
    loop {
        let start = current;
        let end = (current + chunk_size - 1).min(total_pages);
        windows.push(ChunkWindow { chunk_index, page_start: start, page_end: end });
        if end == total_pages {
            break;
        }
        current = if overlap > 0 { end + 1 - overlap } else { end + 1 };
        chunk_index += 1;
    }
    windows
}

/// PDF validation, metadata extraction and streaming chunk decomposition.
///
/// Text comes from a single `pdf-extract` pass; chunk assembly and image
/// scanning run on a bounded worker pool. The result channel holds at most
/// `pool_size` finished chunks, so a slow consumer back-pressures the
/// extractors.
pub struct PdfProcessor {
    chunk_size: u32,
    chunk_overlap: u32,
    pool_size: usize,
}

impl PdfProcessor {
    pub fn new(chunk_size: u32, chunk_overlap: u32, pool_size: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            pool_size: pool_size.max(1),
        }
    }


    /// Validates the document and extracts its metadata. Checks, in order:
    /// size limit, parseability, decryptability with the empty password,
    /// and a non-zero page count.
    pub fn validate(
        &self,
        bytes: &[u8],
        filename: &str,
        max_size_bytes: u64,
    ) -> AppResult<PdfMetadata> {
        if bytes.len() as u64 > max_size_bytes {
            return Err(AppError::FileTooLarge(format!(
                "{} bytes exceeds the {} byte limit",
                bytes.len(),
                max_size_bytes
            )));
        }

        let mut doc = Document::load_mem(bytes)
            .map_err(|e| AppError::PdfInvalid(format!("unreadable document: {}", e)))?;

        let was_encrypted = doc.is_encrypted();
        if was_encrypted {
            doc.decrypt("").map_err(|_| {
                AppError::PdfEncrypted("document is password protected".to_string())
            })?;
        }

        let pages = doc.get_pages();
        if pages.is_empty() {
            return Err(AppError::PdfInvalid("document has no pages".to_string()));
        }

        let file_hash = hex::encode(Sha256::digest(bytes));
        let info = document_info(&doc);
        let is_form = catalog_has_acroform(&doc);

        let mut has_images = false;
        let mut has_tables = false;
        for (&page_num, &page_id) in &pages {
            if !has_images && !page_images(&doc, page_id).is_empty() {
                has_images = true;
            }
            if !has_tables {
                if let Ok(text) = doc.extract_text(&[page_num]) {
                    if text.to_lowercase().contains("table") {
                        has_tables = true;
                    }
                }
            }
            if has_images && has_tables {
                break;
            }
        }

        Ok(PdfMetadata {
            filename: filename.to_string(),
            file_size: bytes.len() as u64,
            file_hash,
            page_count: pages.len() as u32,
            title: info.get("Title").cloned(),
            author: info.get("Author").cloned(),
            subject: info.get("Subject").cloned(),
            keywords: info.get("Keywords").cloned(),
            creator: info.get("Creator").cloned(),
            producer: info.get("Producer").cloned(),
            is_encrypted: was_encrypted,
            is_form,
            has_images,
            has_tables,
        })
    }

    /// Streams extracted chunks. Distinct chunks are assembled in parallel
    /// by at most `pool_size` blocking workers and delivered as soon as
    /// each is ready, in completion order. Cancelling the token aborts
    /// pending extractions.
    pub async fn decompose(
        &self,
        job_id: Uuid,
        bytes: Bytes,
        token: CancellationToken,
    ) -> AppResult<mpsc::Receiver<AppResult<ExtractedChunk>>> {
        let data = bytes.to_vec();
        let parsed = tokio::task::spawn_blocking(move || -> AppResult<_> {
            let doc = Document::load_mem(&data)
                .map_err(|e| AppError::PdfInvalid(format!("unreadable document: {}", e)))?;
            let page_texts = pdf_extract::extract_text_from_mem_by_pages(&data)
                .map_err(|e| AppError::ExtractionFailed(format!("text extraction failed: {}", e)))?;
            Ok((Arc::new(doc), Arc::new(page_texts)))
        })
        .await
        .map_err(|e| AppError::Internal(format!("extraction task panicked: {}", e)))??;
        let (doc, page_texts) = parsed;

        let total_pages = page_texts.len() as u32;
        let windows = plan_chunks(total_pages, self.chunk_size, self.chunk_overlap);
        log::info!(
            "Decomposing job {}: {} pages into {} chunks (size {}, overlap {})",
            job_id,
            total_pages,
            windows.len(),
            self.chunk_size,
            self.chunk_overlap
        );

        let (tx, rx) = mpsc::channel(self.pool_size);
        let semaphore = Arc::new(Semaphore::new(self.pool_size));

        tokio::spawn(async move {
            for window in windows {
                let permit = tokio::select! {
                    _ = token.cancelled() => {
                        log::info!("Decomposition of job {} cancelled", job_id);
                        break;
                    }
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                };

                let doc = doc.clone();
                let page_texts = page_texts.clone();
                let tx = tx.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    if token.is_cancelled() {
                        return;
                    }
                    let result = tokio::task::spawn_blocking(move || {
                        extract_chunk(job_id, &doc, &page_texts, window)
                    })
                    .await
                    .unwrap_or_else(|e| {
                        Err(AppError::ExtractionFailed(format!(
                            "chunk {} extraction panicked: {}",
                            window.chunk_index, e
                        )))
                    });
                    // Receiver gone means the consumer gave up; just drop.
                    let _ = tx.send(result).await;
                    drop(permit);
                });
            }
        });

        Ok(rx)
    }
}

/// Assembles one chunk: page texts joined with `--- Page N ---` separators
/// plus per-image metadata, pixels never decoded.
fn extract_chunk(
    job_id: Uuid,
    doc: &Document,
    page_texts: &[String],
    window: ChunkWindow,
) -> AppResult<ExtractedChunk> {
    let pages = doc.get_pages();
    let mut parts = Vec::new();
    let mut images = Vec::new();

    for page_num in window.page_start..=window.page_end {
        let text = page_texts
            .get((page_num - 1) as usize)
            .ok_or_else(|| AppError::PageOutOfRange(format!("page {} not extracted", page_num)))?;
        parts.push(format!("--- Page {} ---\n{}", page_num, text));

        if let Some(&page_id) = pages.get(&page_num) {
            for (index, mut image) in page_images(doc, page_id).into_iter().enumerate() {
                image.page = page_num;
                image.index = index;
                images.push(image);
            }
        }
    }

    let text = parts.join("\n\n");
    let cleaned_text = clean_text(&text);

    Ok(ExtractedChunk {
        job_id,
        chunk_index: window.chunk_index,
        page_start: window.page_start,
        page_end: window.page_end,
        text,
        cleaned_text,
        images,
    })
}

/// Collapses runs of whitespace while keeping paragraph breaks.
fn clean_text(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    for paragraph in text.split("\n\n") {
        let collapsed = paragraph.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            if !cleaned.is_empty() {
                cleaned.push_str("\n\n");
            }
            cleaned.push_str(&collapsed);
        }
    }
    cleaned
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object.as_reference() {
        Ok(id) => doc.get_object(id).ok(),
        Err(_) => Some(object),
    }
}

fn resolve_dict<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    resolve(doc, object)?.as_dict().ok()
}

fn document_info(doc: &Document) -> std::collections::HashMap<String, String> {
    let mut info_map = std::collections::HashMap::new();
    let Some(info) = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|obj| resolve_dict(doc, obj))
    else {
        return info_map;
    };

    for key in ["Title", "Author", "Subject", "Keywords", "Creator", "Producer"] {
        if let Ok(value) = info.get(key.as_bytes()) {
            if let Some(Object::String(bytes, _)) = resolve(doc, value) {
                let text = String::from_utf8_lossy(bytes).trim().to_string();
                if !text.is_empty() {
                    info_map.insert(key.to_string(), text);
                }
            }
        }
    }
    info_map
}

fn catalog_has_acroform(doc: &Document) -> bool {
    doc.trailer
        .get(b"Root")
        .ok()
        .and_then(|obj| resolve_dict(doc, obj))
        .map(|catalog| catalog.has(b"AcroForm"))
        .unwrap_or(false)
}

/// Image XObject metadata of one page. `page` and `index` are filled by
/// the caller.
fn page_images(doc: &Document, page_id: lopdf::ObjectId) -> Vec<ImageMeta> {
    let mut images = Vec::new();

    let Some(page_dict) = doc.get_object(page_id).ok().and_then(|o| o.as_dict().ok()) else {
        return images;
    };
    let Some(resources) = page_dict.get(b"Resources").ok().and_then(|o| resolve_dict(doc, o))
    else {
        return images;
    };
    let Some(xobjects) = resources.get(b"XObject").ok().and_then(|o| resolve_dict(doc, o)) else {
        return images;
    };

    for (_name, object) in xobjects.iter() {
        let Some(stream) = resolve(doc, object).and_then(|o| o.as_stream().ok()) else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(|o| o.as_name().ok())
            .map(|name| name == b"Image")
            .unwrap_or(false);
        if !is_image {
            continue;
        }

        let width = stream.dict.get(b"Width").ok().and_then(|o| o.as_i64().ok()).unwrap_or(0);
        let height = stream.dict.get(b"Height").ok().and_then(|o| o.as_i64().ok()).unwrap_or(0);
        let colorspace = stream
            .dict
            .get(b"ColorSpace")
            .ok()
            .and_then(|o| resolve(doc, o))
            .map(|o| match o {
                Object::Name(name) => String::from_utf8_lossy(name).to_string(),
                Object::Array(_) => "Indexed".to_string(),
                _ => "Unknown".to_string(),
            })
            .unwrap_or_else(|| "Unknown".to_string());

        images.push(ImageMeta {
            page: 0,
            index: 0,
            width,
            height,
            colorspace,
            size_bytes: stream.content.len(),
        });
    }
    images
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_page_yields_one_chunk() {
        let plan = plan_chunks(1, 5, 1);
        assert_eq!(plan, vec![ChunkWindow { chunk_index: 0, page_start: 1, page_end: 1 }]);
    }

    #[test]
    fn test_three_pages_fit_one_chunk() {
        // pageCount <= chunkSize produces a single chunk irrespective of
        // overlap.
        let plan = plan_chunks(3, 5, 1);
        assert_eq!(plan, vec![ChunkWindow { chunk_index: 0, page_start: 1, page_end: 3 }]);
        let plan = plan_chunks(3, 5, 0);
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_twelve_pages_chunk_with_overlap() {
        let plan = plan_chunks(12, 5, 1);
        let ranges: Vec<(u32, u32)> = plan.iter().map(|w| (w.page_start, w.page_end)).collect();
        assert_eq!(ranges, vec![(1, 5), (5, 9), (9, 12)]);
    }

    #[test]
    fn test_disjoint_chunks_without_overlap() {
        let plan = plan_chunks(10, 5, 0);
        let ranges: Vec<(u32, u32)> = plan.iter().map(|w| (w.page_start, w.page_end)).collect();
        assert_eq!(ranges, vec![(1, 5), (6, 10)]);
    }

    #[test]
    fn test_chunk_indexes_are_dense() {
        let plan = plan_chunks(23, 5, 2);
        for (i, window) in plan.iter().enumerate() {
            assert_eq!(window.chunk_index, i as u32);
        }
    }

    proptest! {
        /// The union of windows covers [1, total] and adjacent windows
        /// share exactly `overlap` pages (or are contiguous when zero).
        #[test]
        fn prop_plan_covers_all_pages(
            total in 1u32..400,
            size in 1u32..20,
            overlap in 0u32..5,
        ) {
            prop_assume!(overlap < size);
            let plan = plan_chunks(total, size, overlap);

            prop_assert_eq!(plan[0].page_start, 1);
            prop_assert_eq!(plan[plan.len() - 1].page_end, total);

            for pair in plan.windows(2) {
                let (prev, next) = (pair[0], pair[1]);
                prop_assert!(prev.page_end <= total);
                // Shared pages between neighbours.
                let shared = prev.page_end as i64 - next.page_start as i64 + 1;
                prop_assert_eq!(shared, overlap as i64);
            }

            // Every page is covered.
            let mut covered = vec![false; total as usize + 1];
            for window in &plan {
                for page in window.page_start..=window.page_end {
                    covered[page as usize] = true;
                }
            }
            prop_assert!(covered[1..].iter().all(|c| *c));
        }
    }

    #[test]
    fn test_clean_text_collapses_whitespace() {
        let cleaned = clean_text("a   b\nc\n\n\n\nd  e");
        assert_eq!(cleaned, "a b c\n\nd e");
    }
}

#[cfg(test)]
mod validate_tests {
    use super::*;

    #[test]
    fn test_oversized_file_rejected_before_parsing() {
        let processor = PdfProcessor::new(5, 1, 4);
        let bytes = vec![0u8; 1024];
        let err = processor.validate(&bytes, "doc.pdf", 1023).unwrap_err();
        assert!(matches!(err, AppError::FileTooLarge(_)));

        // At exactly the limit the size check passes and parsing decides.
        let err = processor.validate(&bytes, "doc.pdf", 1024).unwrap_err();
        assert!(matches!(err, AppError::PdfInvalid(_)));
    }

    #[test]
    fn test_garbage_bytes_are_invalid_pdf() {
        let processor = PdfProcessor::new(5, 1, 4);
        let err = processor
            .validate(b"not a pdf at all", "doc.pdf", 10_000)
            .unwrap_err();
        assert!(matches!(err, AppError::PdfInvalid(_)));
    }
}
