//! Turning uploaded files into task context and image attachments.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{Error, Result};
use crate::state::ImageAttachment;

/// A classified input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// Textual material, already wrapped with its file-name banner.
    Text(String),
    Image(ImageAttachment),
}

impl Attachment {
    /// Reads and classifies a file by extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::Attachment {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        Self::from_bytes(&name, &bytes).map_err(|reason| Error::Attachment {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Classifies already-read content by file name.
    ///
    /// PDFs contribute their extracted text, images are base64-encoded, and
    /// everything else must be UTF-8 text.
    pub fn from_bytes(name: &str, bytes: &[u8]) -> std::result::Result<Self, String> {
        if let Some(mime_type) = image_mime_type(name) {
            return Ok(Attachment::Image(ImageAttachment::new(
                mime_type,
                STANDARD.encode(bytes),
            )));
        }

        let text = if has_extension(name, "pdf") {
            pdf_text(bytes)?
        } else {
            std::str::from_utf8(bytes)
                .map_err(|_| "file type not supported or unreadable".to_string())?
                .to_string()
        };
        Ok(Attachment::Text(banner(name, &text)))
    }
}

fn banner(name: &str, text: &str) -> String {
    format!("--- FILE CONTENT ({}) ---\n{}\n----------------", name, text)
}

fn pdf_text(bytes: &[u8]) -> std::result::Result<String, String> {
    // The extractor panics on some malformed documents.
    let extracted =
        std::panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)));
    match extracted {
        Ok(Ok(text)) => Ok(text.trim().to_string()),
        Ok(Err(e)) => Err(format!("unreadable PDF: {}", e)),
        Err(_) => Err("unreadable PDF: extractor failed".to_string()),
    }
}

fn has_extension(name: &str, wanted: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(wanted))
}

/// Reads every path, skipping (with a warning) files that cannot be used.
pub fn collect(paths: &[PathBuf]) -> Vec<Attachment> {
    paths
        .iter()
        .filter_map(|path| match Attachment::from_path(path) {
            Ok(attachment) => Some(attachment),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping attachment");
                None
            }
        })
        .collect()
}

fn image_mime_type(name: &str) -> Option<&'static str> {
    let extension = Path::new(name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Concatenates text attachments into one context and collects images in order.
pub fn assemble(attachments: Vec<Attachment>) -> (String, Vec<ImageAttachment>) {
    let mut context = String::new();
    let mut images = Vec::new();

    for attachment in attachments {
        match attachment {
            Attachment::Text(text) => {
                context.push_str(&text);
                context.push('\n');
            }
            Attachment::Image(image) => images.push(image),
        }
    }

    (context, images)
}
