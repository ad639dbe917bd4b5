use crate::error::{ExtractError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Upload size ceiling enforced by the service (16 MB per request).
pub const MAX_UPLOAD_BYTES: u64 = 16 * 1024 * 1024;

/// A file the user picked for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

impl FileHandle {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExtractError::Validation(format!("File not found: {}", path.display()))
            } else {
                ExtractError::Validation(format!("Could not read file {}: {}", path.display(), e))
            }
        })?;
        if !metadata.is_file() {
            return Err(ExtractError::Validation(format!(
                "Not a regular file: {}",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();
        Ok(Self {
            mime_type: guess_mime_type(path).to_string(),
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
        })
    }
}

/// MIME type from the file extension; the service only sniffs images.
pub fn guess_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Files selected for the next upload, in selection order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileBatch {
    files: Vec<FileHandle>,
}

impl FileBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, file: FileHandle) {
        self.files.push(file);
    }

    /// Removes the file at `index`; an index past the end leaves the batch untouched.
    pub fn remove(&mut self, index: usize) -> Option<FileHandle> {
        if index < self.files.len() {
            Some(self.files.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    pub fn files(&self) -> &[FileHandle] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str) -> FileHandle {
        FileHandle {
            path: PathBuf::from(name),
            name: name.to_string(),
            size: 10,
            mime_type: guess_mime_type(Path::new(name)).to_string(),
        }
    }

    #[test]
    fn remove_by_index_keeps_relative_order() {
        let mut batch = FileBatch::new();
        for n in ["a.png", "b.jpg", "c.pdf", "d.png"] {
            batch.add(handle(n));
        }
        let removed = batch.remove(2).unwrap();
        assert_eq!(removed.name, "c.pdf");
        let names: Vec<_> = batch.files().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.jpg", "d.png"]);
        assert!(batch.remove(10).is_none());
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.total_bytes(), 30);
    }

    #[test]
    fn mime_type_from_extension() {
        assert_eq!(guess_mime_type(Path::new("scan.JPG")), "image/jpeg");
        assert_eq!(guess_mime_type(Path::new("doc.pdf")), "application/pdf");
        assert_eq!(guess_mime_type(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn missing_file_is_a_validation_error() {
        let err = FileHandle::from_path("/definitely/not/here.png").unwrap_err();
        assert!(err.is_validation());
    }
}
