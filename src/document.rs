use crate::error::RagError;
use crate::layout::{layout_lines, page_runs};
use crate::tables::{detect_tables, Table};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use log::{debug, info, warn};
use lopdf::{Dictionary, Object, ObjectId};
use mime_guess::from_path;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Parent chains longer than this are treated as malformed
const MAX_PAGE_TREE_DEPTH: usize = 32;

/// Text of a single page
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page: u32,
    pub total_pages: u32,
    pub content: String,
}

/// An image XObject found in a page's resources
#[derive(Debug, Clone)]
pub struct ExtractedImage {
    pub page: u32,
    pub image_index: usize,
    pub format: String,
    pub width: i64,
    pub height: i64,
    /// Base64 of the raw (still encoded) stream bytes
    pub data: String,
}

/// A table detected on a page
#[derive(Debug, Clone)]
pub struct ExtractedTable {
    pub page: u32,
    pub table_index: usize,
    pub table: Table,
}

/// Everything pulled out of a document, grouped by content type
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub text: Vec<PageText>,
    pub images: Vec<ExtractedImage>,
    pub tables: Vec<ExtractedTable>,
}

/// Represents a document on disk with its detected type
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    /// The document's file name (used as document name in answers)
    pub document_id: String,
    pub mime_type: String,
}

impl Document {
    /// Open a document from a file path
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref();
        if !path.is_file() {
            return Err(RagError::PdfNotFound(path.to_path_buf()).into());
        }

        let file_name = path
            .file_name()
            .context("Invalid file name")?
            .to_str()
            .context("Invalid file name encoding")?
            .to_string();

        // Detect MIME type, trusting the header over a missing or odd extension
        let mut mime_type = from_path(path).first_or_octet_stream().to_string();
        if !mime_type.starts_with("application/pdf") && has_pdf_header(path)? {
            mime_type = "application/pdf".to_string();
        }
        debug!("Detected MIME type: {}", mime_type);

        if !(mime_type.starts_with("application/pdf") || mime_type.starts_with("text/")) {
            return Err(RagError::UnsupportedDocument(mime_type).into());
        }

        Ok(Document {
            path: path.to_path_buf(),
            document_id: file_name,
            mime_type,
        })
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type.starts_with("application/pdf")
    }

    /// Extract text, images and tables
    pub fn extract_all(&self) -> Result<ExtractedContent> {
        if !self.is_pdf() {
            info!("Processing text document: {}", self.path.display());
            let content = fs::read_to_string(&self.path)
                .with_context(|| format!("Failed to read text file: {}", self.path.display()))?;
            let text = normalize_whitespace(&content);
            let text = if text.is_empty() {
                Vec::new()
            } else {
                vec![PageText {
                    page: 1,
                    total_pages: 1,
                    content: text,
                }]
            };
            let tables = tables_from_pages(&text);
            return Ok(ExtractedContent {
                text,
                images: Vec::new(),
                tables,
            });
        }

        info!("Processing PDF document: {}", self.path.display());
        let pdf = lopdf::Document::load(&self.path).map_err(|e| {
            anyhow::anyhow!("Failed to parse PDF {}: {}", self.path.display(), e)
        })?;

        let text = extract_page_texts(&pdf, &self.path)?;
        if text.is_empty() {
            warn!("Extracted PDF content is empty or contains only whitespace");
        }
        let images = extract_images(&pdf);
        let tables = pdf_tables(&pdf);

        Ok(ExtractedContent {
            text,
            images,
            tables,
        })
    }
}

fn has_pdf_header(path: &Path) -> Result<bool> {
    let mut header = [0u8; 5];
    let mut file = fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let read = file.read(&mut header)?;
    Ok(&header[..read] == PDF_MAGIC)
}

/// Per-page text through lopdf, falling back to pdf-extract when no page is readable
fn extract_page_texts(pdf: &lopdf::Document, path: &Path) -> Result<Vec<PageText>> {
    let pages = pdf.get_pages();
    let total_pages = pages.len() as u32;

    let mut texts = Vec::new();
    let mut failures = 0usize;
    for &page in pages.keys() {
        match pdf.extract_text(&[page]) {
            Ok(raw) => {
                let content = normalize_whitespace(&raw);
                if !content.is_empty() {
                    texts.push(PageText {
                        page,
                        total_pages,
                        content,
                    });
                }
            }
            Err(e) => {
                debug!("lopdf could not read text of page {}: {}", page, e);
                failures += 1;
            }
        }
    }

    if texts.is_empty() && failures > 0 {
        info!("Falling back to whole-document text extraction");
        let raw = pdf_extract::extract_text(path)
            .with_context(|| format!("Failed to extract text from PDF: {}", path.display()))?;
        return Ok(split_form_feeds(&raw, total_pages));
    }

    Ok(texts)
}

/// Split whole-document text on form feeds, one entry per non-empty page
fn split_form_feeds(raw: &str, total_pages: u32) -> Vec<PageText> {
    let parts: Vec<&str> = raw.split('\u{000c}').collect();
    let total_pages = total_pages.max(parts.len() as u32);

    parts
        .into_iter()
        .enumerate()
        .filter_map(|(index, part)| {
            let content = normalize_whitespace(part);
            (!content.is_empty()).then(|| PageText {
                page: index as u32 + 1,
                total_pages,
                content,
            })
        })
        .collect()
}

fn tables_from_pages(pages: &[PageText]) -> Vec<ExtractedTable> {
    pages
        .iter()
        .flat_map(|page| {
            detect_tables(&page.content)
                .into_iter()
                .enumerate()
                .map(move |(table_index, table)| ExtractedTable {
                    page: page.page,
                    table_index,
                    table,
                })
        })
        .collect()
}

/// Tables on each PDF page, detected from lines rebuilt from text positions
fn pdf_tables(pdf: &lopdf::Document) -> Vec<ExtractedTable> {
    let mut tables = Vec::new();

    for (page, page_id) in pdf.get_pages() {
        let runs = match page_runs(pdf, page_id) {
            Ok(runs) => runs,
            Err(e) => {
                debug!("Could not lay out page {} for table detection: {:#}", page, e);
                continue;
            }
        };

        let lines = layout_lines(&runs);
        tables.extend(
            detect_tables(&lines)
                .into_iter()
                .enumerate()
                .map(|(table_index, table)| ExtractedTable {
                    page,
                    table_index,
                    table,
                }),
        );
    }

    tables
}

fn extract_images(pdf: &lopdf::Document) -> Vec<ExtractedImage> {
    let mut images = Vec::new();

    for (page, page_id) in pdf.get_pages() {
        let Some(resources) = page_resources(pdf, page_id) else {
            continue;
        };
        let xobjects = match resources.get(b"XObject").and_then(|obj| resolve(pdf, obj)) {
            Ok(obj) => match obj.as_dict() {
                Ok(dict) => dict,
                Err(_) => continue,
            },
            Err(_) => continue,
        };

        let mut image_index = 0;
        for (name, object) in xobjects.iter() {
            let stream = match resolve(pdf, object).and_then(Object::as_stream) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(
                        "Error extracting image {} from page {}: {}",
                        String::from_utf8_lossy(name),
                        page,
                        e
                    );
                    continue;
                }
            };

            let is_image = stream
                .dict
                .get(b"Subtype")
                .and_then(Object::as_name)
                .map(|subtype| subtype == &b"Image"[..])
                .unwrap_or(false);
            if !is_image {
                continue;
            }

            let width = stream.dict.get(b"Width").and_then(Object::as_i64).unwrap_or(0);
            let height = stream.dict.get(b"Height").and_then(Object::as_i64).unwrap_or(0);

            images.push(ExtractedImage {
                page,
                image_index,
                format: image_format(pdf, &stream.dict).to_string(),
                width,
                height,
                data: STANDARD.encode(&stream.content),
            });
            image_index += 1;
        }
    }

    images
}

/// Look up a page's resources, following inherited values up the page tree
fn page_resources(pdf: &lopdf::Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut current = pdf.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_PAGE_TREE_DEPTH {
        if let Ok(resources) = current.get(b"Resources") {
            return resolve(pdf, resources).ok()?.as_dict().ok();
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = pdf.get_dictionary(parent).ok()?;
    }
    None
}

fn resolve<'a>(pdf: &'a lopdf::Document, object: &'a Object) -> lopdf::Result<&'a Object> {
    match object {
        Object::Reference(id) => pdf.get_object(*id),
        other => Ok(other),
    }
}

/// File format implied by the last filter applied to an image stream
fn image_format(pdf: &lopdf::Document, dict: &Dictionary) -> &'static str {
    let filter = match dict.get(b"Filter").and_then(|obj| resolve(pdf, obj)) {
        Ok(Object::Name(name)) => Some(name.as_slice()),
        Ok(Object::Array(filters)) => filters.last().and_then(|f| f.as_name().ok()),
        _ => None,
    };
    format_for_filter(filter)
}

fn format_for_filter(filter: Option<&[u8]>) -> &'static str {
    match filter {
        Some(b"DCTDecode") => "jpeg",
        Some(b"JPXDecode") => "jpx",
        Some(b"JBIG2Decode") => "jbig2",
        Some(b"CCITTFaxDecode") => "tiff",
        _ => "raw",
    }
}

/// Normalize whitespace in text (remove multiple consecutive spaces, newlines, etc.)
///
/// Runs of two or more spaces inside a line are kept at two so that table
/// columns stay detectable.
fn normalize_whitespace(text: &str) -> String {
    let result = text.replace('\r', "");

    let mut normalized = String::with_capacity(result.len());
    let mut newline_count = 0;
    let mut space_run = 0;

    for c in result.chars() {
        if c == '\n' {
            newline_count += 1;
            space_run = 0;
            continue;
        }

        if newline_count > 0 {
            // Add at most two newlines (paragraph break)
            normalized.push_str(if newline_count >= 2 { "\n\n" } else { "\n" });
            newline_count = 0;
        }

        if c == ' ' {
            space_run += 1;
            if space_run <= 2 {
                normalized.push(c);
            }
        } else {
            space_run = 0;
            normalized.push(c);
        }
    }

    normalized
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
