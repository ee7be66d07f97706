use serde::{Deserialize, Serialize};

/// Normalized content of one input file, as produced by the document parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier (usually the file path).
    pub id: String,
    /// Short display name used in prompts and output file names.
    pub name: String,
    pub text: String,
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

/// An image attached to a document, carried as a data URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub mime_type: String,
    /// `data:<mime>;base64,<payload>`
    pub data_uri: String,
}

impl Document {
    pub fn from_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        let id = id.into();
        let name = display_name(&id);
        Self {
            id,
            name,
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.images.push(image);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.images.is_empty()
    }
}

/// Last path component of an identifier.
fn display_name(id: &str) -> String {
    std::path::Path::new(id)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_from_path() {
        let doc = Document::from_text("/data/in/invoice-1.txt", "hello");
        assert_eq!(doc.name, "invoice-1.txt");
        assert!(!doc.is_empty());
    }

    #[test]
    fn test_empty_document() {
        assert!(Document::from_text("a", "  \n").is_empty());
        let with_image = Document::from_text("a", "").with_image(ImageRef {
            mime_type: "image/png".to_string(),
            data_uri: "data:image/png;base64,AAAA".to_string(),
        });
        assert!(!with_image.is_empty());
    }
}
