use std::path::{Path, PathBuf};

use base64::Engine as _;
use tracing::debug;

use maidx_core::{Document, DocumentParseError, ImageRef};

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "csv", "json", "html", "htm"];

/// Extension → MIME type for images sent as data URIs.
fn image_mime(extension: &str) -> Option<&'static str> {
    Some(match extension {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        _ => return None,
    })
}

/// Read every input file, in order. Failures stay in place so the batch
/// can report them next to the successful documents.
pub async fn load_documents(paths: &[PathBuf]) -> Vec<Result<Document, DocumentParseError>> {
    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        documents.push(load_document(path).await);
    }
    documents
}

pub async fn load_document(path: &Path) -> Result<Document, DocumentParseError> {
    let id = path.display().to_string();
    let fail = |message: String| DocumentParseError {
        document_id: id.clone(),
        message,
    };

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let document = if TEXT_EXTENSIONS.contains(&extension.as_str()) {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| fail(format!("cannot read file: {e}")))?;
        Document::from_text(id.clone(), String::from_utf8_lossy(&bytes).into_owned())
    } else if let Some(mime) = image_mime(&extension) {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| fail(format!("cannot read file: {e}")))?;
        let payload = base64::engine::general_purpose::STANDARD.encode(&bytes);
        Document::from_text(id.clone(), String::new()).with_image(ImageRef {
            mime_type: mime.to_string(),
            data_uri: format!("data:{mime};base64,{payload}"),
        })
    } else {
        return Err(fail(format!("unsupported file type '.{extension}'")));
    };

    if document.is_empty() {
        return Err(fail("document has no content".to_string()));
    }
    debug!(document_id = %id, chars = document.text.len(), images = document.images.len(), "Document loaded");
    Ok(document)
}
