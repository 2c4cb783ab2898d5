//! Archive compression schemes and mailbox storage formats.
//!
//! The compression scheme is a closed enum rather than a stringly-typed code
//! table: every scheme maps exhaustively to a file extension, a content type,
//! and a concrete writer. The numeric codes accepted by `from_code` are the
//! legacy wire values kept for compatibility with old export requests
//! ("0" = gzip, "1" = bzip2, "2" = plain tar).

use bzip2::write::BzEncoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Write};

/// Compression applied to the final archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Gzip,
    Bzip2,
    None,
}

impl Compression {
    /// File extension for the archive, without a leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Compression::Gzip => "tar.gz",
            Compression::Bzip2 => "tar.bz2",
            Compression::None => "tar",
        }
    }

    /// MIME type served alongside the finished archive.
    pub fn content_type(self) -> &'static str {
        match self {
            Compression::Gzip => "application/x-gzip",
            Compression::Bzip2 => "application/x-bzip2",
            Compression::None => "application/x-tar",
        }
    }

    /// Canonical config string for this scheme.
    pub fn as_str(self) -> &'static str {
        match self {
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
            Compression::None => "none",
        }
    }

    /// Parse a config string or a legacy numeric code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "gzip" | "gz" | "0" => Some(Compression::Gzip),
            "bzip2" | "bz2" | "1" => Some(Compression::Bzip2),
            "none" | "tar" | "2" => Some(Compression::None),
            _ => None,
        }
    }

    /// Wrap an open archive file in the scheme's encoder.
    pub fn wrap(self, file: File) -> ArchiveWriter {
        match self {
            Compression::Gzip => {
                ArchiveWriter::Gzip(GzEncoder::new(file, flate2::Compression::default()))
            }
            Compression::Bzip2 => {
                ArchiveWriter::Bzip2(BzEncoder::new(file, bzip2::Compression::default()))
            }
            Compression::None => ArchiveWriter::Plain(file),
        }
    }
}

/// On-disk layout of the exported mailbox inside the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// One folder per inbox, one file per message (the staging form as-is).
    #[default]
    Maildir,
    /// A single consolidated mbox container.
    Mbox,
}

impl StorageFormat {
    /// Parse a config string or a legacy numeric code ("0" = maildir, "1" = mbox).
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "maildir" | "0" => Some(StorageFormat::Maildir),
            "mbox" | "1" => Some(StorageFormat::Mbox),
            _ => None,
        }
    }
}

/// Writer chain for one archive file, closed with an explicit `finish`.
pub enum ArchiveWriter {
    Plain(File),
    Gzip(GzEncoder<File>),
    Bzip2(BzEncoder<File>),
}

impl ArchiveWriter {
    /// Flush the encoder trailer and hand back the underlying file.
    pub fn finish(self) -> io::Result<File> {
        match self {
            ArchiveWriter::Plain(mut file) => {
                file.flush()?;
                Ok(file)
            }
            ArchiveWriter::Gzip(enc) => enc.finish(),
            ArchiveWriter::Bzip2(enc) => enc.finish(),
        }
    }
}

impl Write for ArchiveWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ArchiveWriter::Plain(w) => w.write(buf),
            ArchiveWriter::Gzip(w) => w.write(buf),
            ArchiveWriter::Bzip2(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ArchiveWriter::Plain(w) => w.flush(),
            ArchiveWriter::Gzip(w) => w.flush(),
            ArchiveWriter::Bzip2(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_mapping() {
        assert_eq!(Compression::Gzip.extension(), "tar.gz");
        assert_eq!(Compression::Bzip2.extension(), "tar.bz2");
        assert_eq!(Compression::None.extension(), "tar");
    }

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(Compression::Gzip.content_type(), "application/x-gzip");
        assert_eq!(Compression::Bzip2.content_type(), "application/x-bzip2");
        assert_eq!(Compression::None.content_type(), "application/x-tar");
    }

    #[test]
    fn test_legacy_codes() {
        assert_eq!(Compression::from_code("0"), Some(Compression::Gzip));
        assert_eq!(Compression::from_code("1"), Some(Compression::Bzip2));
        assert_eq!(Compression::from_code("2"), Some(Compression::None));
        assert_eq!(Compression::from_code("zstd"), None);

        assert_eq!(StorageFormat::from_code("0"), Some(StorageFormat::Maildir));
        assert_eq!(StorageFormat::from_code("mbox"), Some(StorageFormat::Mbox));
        assert_eq!(StorageFormat::from_code("pst"), None);
    }

    #[test]
    fn test_code_parsing_is_case_insensitive() {
        assert_eq!(Compression::from_code(" Gzip "), Some(Compression::Gzip));
        assert_eq!(StorageFormat::from_code("MBOX"), Some(StorageFormat::Mbox));
    }
}
