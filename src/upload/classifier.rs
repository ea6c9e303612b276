//! File Classifier
//!
//! Maps a filename to a [`FileCategory`] by extension and enforces the
//! per-category size ceiling. Content sniffing is best-effort: it is reported
//! next to the result but never rejects a file whose extension is known.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::types::{UploadError, MAX_FILE_SIZE};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Category of an uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Images,
    Videos,
    Code,
    Documents,
    Binaries,
    Databases,
    Unknown,
}

impl FileCategory {
    /// All categories with a recognized extension set
    pub const KNOWN: [FileCategory; 6] = [
        FileCategory::Images,
        FileCategory::Videos,
        FileCategory::Code,
        FileCategory::Documents,
        FileCategory::Binaries,
        FileCategory::Databases,
    ];

    /// Recognized extensions, lowercase, without the dot
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Images => &["jpg", "jpeg", "png", "gif", "webp", "svg"],
            Self::Videos => &["mp4", "mov", "avi", "mkv", "webm"],
            Self::Code => &[
                "html", "css", "js", "ts", "jsx", "tsx", "py", "json", "xml", "yaml", "yml",
            ],
            Self::Documents => &["pdf", "txt", "md", "doc", "docx"],
            Self::Binaries => &["zip", "tar", "gz", "exe", "dll", "so"],
            Self::Databases => &["sqlite", "db", "mdb", "accdb", "sql"],
            Self::Unknown => &[],
        }
    }

    /// Maximum allowed size in bytes before the global cap is applied
    pub fn max_size(self) -> u64 {
        match self {
            Self::Images => 500 * MIB,
            Self::Videos => 2 * GIB,
            Self::Code => 100 * MIB,
            Self::Documents => 100 * MIB,
            Self::Binaries => 5 * GIB,
            Self::Databases => 10 * GIB,
            Self::Unknown => 0,
        }
    }

    /// Look up the category owning an extension (case-insensitive)
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        Self::KNOWN
            .into_iter()
            .find(|category| category.extensions().contains(&ext.as_str()))
    }

    /// Detect a category from magic bytes
    pub fn from_magic_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }

        if bytes.starts_with(b"\x89PNG")
            || bytes.starts_with(b"\xFF\xD8\xFF")
            || bytes.starts_with(b"GIF8")
            || (bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP")
        {
            return Some(Self::Images);
        }

        // ISO base media (mp4, mov) carries "ftyp" at offset 4; Matroska/WebM starts with EBML
        if (bytes.len() >= 8 && &bytes[4..8] == b"ftyp") || bytes.starts_with(b"\x1A\x45\xDF\xA3") {
            return Some(Self::Videos);
        }

        if bytes.starts_with(b"%PDF") {
            return Some(Self::Documents);
        }

        if bytes.starts_with(b"SQLite format 3\0") {
            return Some(Self::Databases);
        }

        // ZIP also covers docx and friends, so a mismatch here is only informational
        if bytes.starts_with(b"PK\x03\x04")
            || bytes.starts_with(b"\x1F\x8B")
            || bytes.starts_with(b"\x7FELF")
            || bytes.starts_with(b"MZ")
        {
            return Some(Self::Binaries);
        }

        None
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Images => "images",
            Self::Videos => "videos",
            Self::Code => "code",
            Self::Documents => "documents",
            Self::Binaries => "binaries",
            Self::Databases => "databases",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Why a file was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFailure {
    UnrecognizedExtension,
    TooLargeForCategory { size: u64, max: u64 },
}

/// Outcome of classifying a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub filename: String,
    pub category: FileCategory,
    pub valid: bool,
    pub error: Option<ValidationFailure>,
    /// Category suggested by the content sample, if any
    pub sniffed: Option<FileCategory>,
}

impl Classification {
    /// Convert into the category or the matching [`UploadError`]
    pub fn into_result(self) -> Result<FileCategory, UploadError> {
        match self.error {
            None => Ok(self.category),
            Some(ValidationFailure::UnrecognizedExtension) => {
                Err(UploadError::InvalidFileType(self.filename))
            }
            Some(ValidationFailure::TooLargeForCategory { size, max }) => {
                Err(UploadError::FileTooLarge {
                    category: self.category,
                    size,
                    max,
                })
            }
        }
    }
}

/// Classifies files against the static category table
#[derive(Debug, Clone, Copy)]
pub struct FileClassifier {
    max_file_size: u64,
}

impl FileClassifier {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    /// Effective ceiling for a category
    pub fn limit_for(&self, category: FileCategory) -> u64 {
        category.max_size().min(self.max_file_size)
    }

    /// Classify a file by name, known size and an optional content sample
    pub fn classify(&self, filename: &str, size: Option<u64>, sample: &[u8]) -> Classification {
        let sniffed = FileCategory::from_magic_bytes(sample);

        let category = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(FileCategory::from_extension);

        let Some(category) = category else {
            return Classification {
                filename: filename.to_string(),
                category: FileCategory::Unknown,
                valid: false,
                error: Some(ValidationFailure::UnrecognizedExtension),
                sniffed,
            };
        };

        if let Some(sniffed) = sniffed.filter(|s| *s != category) {
            tracing::debug!(
                filename = %filename,
                category = %category,
                sniffed = %sniffed,
                "Content sample disagrees with extension"
            );
        }

        let max = self.limit_for(category);
        let error = size
            .filter(|size| *size > max)
            .map(|size| ValidationFailure::TooLargeForCategory { size, max });

        Classification {
            filename: filename.to_string(),
            category,
            valid: error.is_none(),
            error,
            sniffed,
        }
    }
}

impl Default for FileClassifier {
    fn default() -> Self {
        Self::new(MAX_FILE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_extension_maps_to_its_category() {
        let classifier = FileClassifier::default();
        for category in FileCategory::KNOWN {
            for ext in category.extensions() {
                let result = classifier.classify(&format!("file.{}", ext), Some(1), b"");
                assert!(result.valid, "{} should be valid", ext);
                assert_eq!(result.category, category, "extension {}", ext);
            }
        }
    }

    #[test]
    fn test_extension_sets_are_disjoint() {
        for a in FileCategory::KNOWN {
            for b in FileCategory::KNOWN {
                if a == b {
                    continue;
                }
                for ext in a.extensions() {
                    assert!(!b.extensions().contains(ext), "{} in {} and {}", ext, a, b);
                }
            }
        }
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        let classifier = FileClassifier::default();
        let result = classifier.classify("Holiday.JPG", None, b"");
        assert!(result.valid);
        assert_eq!(result.category, FileCategory::Images);
    }

    #[test]
    fn test_unrecognized_extension() {
        let classifier = FileClassifier::default();
        for name in ["malware.bat", "README", ".gitignore", "archive.rar"] {
            let result = classifier.classify(name, Some(10), b"");
            assert!(!result.valid, "{} should be invalid", name);
            assert_eq!(result.category, FileCategory::Unknown);
            assert_eq!(result.error, Some(ValidationFailure::UnrecognizedExtension));
            assert!(matches!(
                result.into_result(),
                Err(UploadError::InvalidFileType(_))
            ));
        }
    }

    #[test]
    fn test_too_large_for_category() {
        let classifier = FileClassifier::default();
        let result = classifier.classify("photo.png", Some(600 * 1000 * 1000), b"");
        assert!(!result.valid);
        assert_eq!(result.category, FileCategory::Images);
        assert!(matches!(
            result.into_result(),
            Err(UploadError::FileTooLarge {
                category: FileCategory::Images,
                ..
            })
        ));
    }

    #[test]
    fn test_size_at_limit_is_accepted() {
        let classifier = FileClassifier::default();
        let result = classifier.classify("photo.png", Some(500 * MIB), b"");
        assert!(result.valid);
    }

    #[test]
    fn test_global_cap_applies() {
        let classifier = FileClassifier::new(GIB);
        assert_eq!(classifier.limit_for(FileCategory::Databases), GIB);
        assert_eq!(classifier.limit_for(FileCategory::Images), 500 * MIB);
        assert!(!classifier.classify("dump.sql", Some(GIB + 1), b"").valid);
    }

    #[test]
    fn test_sniff_never_rejects_known_extension() {
        let classifier = FileClassifier::default();
        let result = classifier.classify("report.docx", None, b"PK\x03\x04rest-of-zip");
        assert!(result.valid);
        assert_eq!(result.category, FileCategory::Documents);
        assert_eq!(result.sniffed, Some(FileCategory::Binaries));
    }

    #[test]
    fn test_magic_bytes() {
        assert_eq!(
            FileCategory::from_magic_bytes(b"\x89PNG\r\n\x1a\n"),
            Some(FileCategory::Images)
        );
        assert_eq!(
            FileCategory::from_magic_bytes(b"%PDF-1.7"),
            Some(FileCategory::Documents)
        );
        assert_eq!(
            FileCategory::from_magic_bytes(b"\0\0\0\x18ftypmp42"),
            Some(FileCategory::Videos)
        );
        assert_eq!(
            FileCategory::from_magic_bytes(b"SQLite format 3\0"),
            Some(FileCategory::Databases)
        );
        assert_eq!(FileCategory::from_magic_bytes(b"abc"), None);
        assert_eq!(FileCategory::from_magic_bytes(b"plain text"), None);
    }
}
