use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use thiserror::Error;

/// Maximum inflated bytes for a single ZIP entry.
pub const MAX_PART_BYTES: u64 = 256 * 1024 * 1024; // 256 MiB

/// Maximum inflated bytes across every entry of one workbook.
pub const MAX_TOTAL_BYTES: u64 = 1024 * 1024 * 1024; // 1 GiB

#[derive(Debug, Error)]
pub enum XlsxError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml error: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("utf-8 error in {part}: {source}")]
    Utf8 {
        part: String,
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("missing xlsx part: {0}")]
    MissingPart(String),
    #[error("invalid xlsx: {0}")]
    Invalid(String),
    #[error("xlsx part is too large to load safely: {part} is {size} bytes (max {max} bytes)")]
    PartTooLarge { part: String, size: u64, max: u64 },
    #[error("xlsx package is too large to load safely: {total} bytes uncompressed (max {max})")]
    PackageTooLarge { total: u64, max: u64 },
    #[error("worksheet not found: {0}")]
    SheetNotFound(String),
}

/// Size limits applied while inflating a package.
#[derive(Debug, Clone, Copy)]
pub struct XlsxLimits {
    /// Maximum allowed uncompressed bytes for any single part.
    pub max_part_bytes: u64,
    /// Maximum allowed uncompressed bytes across the whole package.
    pub max_total_bytes: u64,
}

impl Default for XlsxLimits {
    fn default() -> Self {
        Self {
            max_part_bytes: MAX_PART_BYTES,
            max_total_bytes: MAX_TOTAL_BYTES,
        }
    }
}

/// Every part of an XLSX package, inflated into memory.
#[derive(Debug, Clone, Default)]
pub struct XlsxPackage {
    parts: BTreeMap<String, Arc<[u8]>>,
}

impl XlsxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, XlsxError> {
        Self::from_bytes_limited(bytes, XlsxLimits::default())
    }

    pub fn from_bytes_limited(bytes: &[u8], limits: XlsxLimits) -> Result<Self, XlsxError> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;

        let mut parts = BTreeMap::new();
        let mut total = 0u64;
        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            if !file.is_file() {
                continue;
            }

            let name = file.name().trim_start_matches('/').to_string();
            let declared = file.size();
            let remaining = limits.max_total_bytes.saturating_sub(total);
            let buf = read_part(&mut file, declared, &name, limits.max_part_bytes, remaining)
                .map_err(|err| match err {
                    ReadLimit::Part(size) => XlsxError::PartTooLarge {
                        part: name.clone(),
                        size,
                        max: limits.max_part_bytes,
                    },
                    ReadLimit::Total(size) => XlsxError::PackageTooLarge {
                        total: total.saturating_add(size),
                        max: limits.max_total_bytes,
                    },
                    ReadLimit::Io(err) => XlsxError::Io(err),
                })?;
            total = total.saturating_add(buf.len() as u64);
            parts.insert(name, Arc::from(buf));
        }

        Ok(Self { parts })
    }

    /// Look up a part by name. Leading `/`, `\` separators, and ASCII case are tolerated.
    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.shared_part(name).map(|bytes| &**bytes)
    }

    /// Like [`XlsxPackage::part`], returning a shared handle to the bytes.
    pub fn shared_part(&self, name: &str) -> Option<&Arc<[u8]>> {
        let name = name.trim_start_matches('/');
        if let Some(bytes) = self.parts.get(name) {
            return Some(bytes);
        }
        self.parts
            .iter()
            .find(|(key, _)| part_names_equivalent(key, name))
            .map(|(_, bytes)| bytes)
    }

    pub fn part_str(&self, name: &str) -> Result<Option<&str>, XlsxError> {
        let Some(bytes) = self.part(name) else {
            return Ok(None);
        };
        std::str::from_utf8(bytes)
            .map(Some)
            .map_err(|source| XlsxError::Utf8 {
                part: name.to_string(),
                source,
            })
    }

    pub fn required_part_str(&self, name: &str) -> Result<&str, XlsxError> {
        self.part_str(name)?
            .ok_or_else(|| XlsxError::MissingPart(name.to_string()))
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }
}

fn part_names_equivalent(a: &str, b: &str) -> bool {
    let a = a.trim_start_matches(['/', '\\']);
    let b = b.trim_start_matches(['/', '\\']);
    a.len() == b.len()
        && a.bytes().zip(b.bytes()).all(|(x, y)| {
            let x = if x == b'\\' { b'/' } else { x };
            let y = if y == b'\\' { b'/' } else { y };
            x.eq_ignore_ascii_case(&y)
        })
}

enum ReadLimit {
    Part(u64),
    Total(u64),
    Io(std::io::Error),
}

/// Inflate one entry without trusting its declared size.
fn read_part<R: Read>(
    reader: &mut R,
    declared: u64,
    part: &str,
    max_part_bytes: u64,
    remaining_total: u64,
) -> Result<Vec<u8>, ReadLimit> {
    if declared > max_part_bytes {
        return Err(ReadLimit::Part(declared));
    }
    if declared > remaining_total {
        return Err(ReadLimit::Total(declared));
    }

    let limit = max_part_bytes.min(remaining_total);
    let mut buf = Vec::with_capacity(declared.min(limit) as usize);
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut buf)
        .map_err(ReadLimit::Io)?;

    let read = buf.len() as u64;
    if read > max_part_bytes {
        log::warn!("{part}: inflated past its declared size of {declared} bytes");
        return Err(ReadLimit::Part(read));
    }
    if read > remaining_total {
        return Err(ReadLimit::Total(read));
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn zip_with(parts: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in parts {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn part_lookup_tolerates_case_and_leading_slash() {
        let pkg = XlsxPackage::from_bytes(&zip_with(&[("xl/workbook.xml", b"<w/>".as_slice())])).unwrap();
        assert_eq!(pkg.part("xl/workbook.xml"), Some(&b"<w/>"[..]));
        assert_eq!(pkg.part("/XL/Workbook.xml"), Some(&b"<w/>"[..]));
        assert!(pkg.part("xl/styles.xml").is_none());
    }

    #[test]
    fn rejects_parts_over_the_part_limit() {
        let bytes = zip_with(&[("a.xml", [b'x'; 32].as_slice())]);
        let limits = XlsxLimits {
            max_part_bytes: 10,
            max_total_bytes: 100,
        };
        let err = XlsxPackage::from_bytes_limited(&bytes, limits).unwrap_err();
        assert!(matches!(err, XlsxError::PartTooLarge { size: 32, .. }), "{err}");
    }

    #[test]
    fn rejects_packages_over_the_total_limit() {
        let bytes = zip_with(&[("a.xml", [b'x'; 8].as_slice()), ("b.xml", [b'y'; 8].as_slice())]);
        let limits = XlsxLimits {
            max_part_bytes: 10,
            max_total_bytes: 12,
        };
        let err = XlsxPackage::from_bytes_limited(&bytes, limits).unwrap_err();
        assert!(matches!(err, XlsxError::PackageTooLarge { max: 12, .. }), "{err}");
    }

    #[test]
    fn invalid_utf8_is_reported_with_the_part_name() {
        let pkg = XlsxPackage::from_bytes(&zip_with(&[("bad.xml", [0xff, 0xfe].as_slice())])).unwrap();
        let err = pkg.part_str("bad.xml").unwrap_err();
        assert!(err.to_string().contains("bad.xml"), "{err}");
    }
}
