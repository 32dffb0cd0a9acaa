//! Compression detection from archive magic bytes.

use depot_core::error::{DepotError, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Bytes that must be readable for detection (the tar `ustar` magic ends at 262).
pub const HEADER_LEN: usize = 263;

/// Archive compression format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Bzip2,
    Gzip,
    Xz,
    Lzma,
    /// Uncompressed tar
    None,
}

impl Compression {
    /// Canonical file extension for the format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Bzip2 => ".tar.bz2",
            Self::Gzip => ".tar.gz",
            Self::Xz => ".tar.xz",
            Self::Lzma => ".tar.lzma",
            Self::None => ".tar",
        }
    }

    /// Classify an archive header.
    pub fn sniff(header: &[u8]) -> Option<Self> {
        if header.len() < HEADER_LEN {
            return None;
        }
        if header.starts_with(b"BZ") {
            Some(Self::Bzip2)
        } else if header.starts_with(&[0x1f, 0x8b]) {
            Some(Self::Gzip)
        } else if header.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Some(Self::Xz)
        } else if header[0] <= 0xe0 && header[1..6] == [b'7', b'z', b'X', b'Z', 0x00] {
            Some(Self::Lzma)
        } else if &header[257..262] == b"ustar" {
            Some(Self::None)
        } else {
            None
        }
    }

    /// Wrap `reader` in the matching decompressor.
    pub fn decoder<'a, R: Read + 'a>(&self, reader: R) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Self::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
            Self::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            Self::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
            Self::Lzma => {
                let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX).map_err(|e| {
                    DepotError::ExtractionFailed(format!("failed to set up lzma decoder: {}", e))
                })?;
                Box::new(xz2::read::XzDecoder::new_stream(reader, stream))
            }
            Self::None => Box::new(reader),
        })
    }

    /// Open `path` and return a reader over the decompressed tar stream.
    pub fn open(&self, path: &Path) -> Result<Box<dyn Read>> {
        let file = File::open(path).map_err(|e| {
            DepotError::ExtractionFailed(format!("failed to open {}: {}", path.display(), e))
        })?;
        self.decoder(BufReader::new(file))
    }
}

/// Detect the compression of the archive at `path`.
pub fn detect(path: &Path) -> Result<Compression> {
    let mut file = File::open(path)?;
    let mut header = [0u8; HEADER_LEN];
    if let Err(e) = file.read_exact(&mut header) {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(DepotError::UnsupportedCompression(format!(
                "{} is shorter than {} bytes",
                path.display(),
                HEADER_LEN
            )));
        }
        return Err(e.into());
    }

    Compression::sniff(&header).ok_or_else(|| {
        DepotError::UnsupportedCompression(format!(
            "unrecognised archive header in {}",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn header_with(prefix: &[u8]) -> Vec<u8> {
        let mut header = vec![0u8; HEADER_LEN];
        header[..prefix.len()].copy_from_slice(prefix);
        header
    }

    #[test]
    fn test_sniff_magic_table() {
        assert_eq!(Compression::sniff(&header_with(b"BZh9")), Some(Compression::Bzip2));
        assert_eq!(Compression::sniff(&header_with(&[0x1f, 0x8b, 0x08])), Some(Compression::Gzip));
        assert_eq!(
            Compression::sniff(&header_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00])),
            Some(Compression::Xz)
        );
        assert_eq!(
            Compression::sniff(&header_with(&[0x5d, b'7', b'z', b'X', b'Z', 0x00])),
            Some(Compression::Lzma)
        );

        let mut tar = vec![0u8; HEADER_LEN];
        tar[257..262].copy_from_slice(b"ustar");
        assert_eq!(Compression::sniff(&tar), Some(Compression::None));
    }

    #[test]
    fn test_sniff_lzma_first_byte_bound() {
        assert_eq!(
            Compression::sniff(&header_with(&[0xe1, b'7', b'z', b'X', b'Z', 0x00])),
            None
        );
    }

    #[test]
    fn test_sniff_unknown() {
        assert_eq!(Compression::sniff(&header_with(b"PK\x03\x04")), None);
        assert_eq!(Compression::sniff(&[0x1f, 0x8b]), None);
    }

    #[test]
    fn test_extensions() {
        assert_eq!(Compression::Gzip.extension(), ".tar.gz");
        assert_eq!(Compression::None.extension(), ".tar");
        assert_eq!(Compression::Lzma.extension(), ".tar.lzma");
    }

    #[test]
    fn test_detect_short_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("short");
        std::fs::write(&path, [0x1f, 0x8b, 0x08]).unwrap();
        assert!(matches!(
            detect(&path),
            Err(DepotError::UnsupportedCompression(_))
        ));
    }

    #[test]
    fn test_detect_real_gzip() {
        use flate2::write::GzEncoder;
        use std::io::Write;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blob.gz");
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::none());
        encoder.write_all(&[7u8; 1024]).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        assert_eq!(detect(&path).unwrap(), Compression::Gzip);
    }
}
