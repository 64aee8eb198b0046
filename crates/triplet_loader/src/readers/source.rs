use crate::error::{LoaderError, Result};
use flate2::read::{DeflateDecoder, MultiGzDecoder};
use flate2::CrcReader;
use std::fs::File;
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use zip::{CompressionMethod, ZipArchive};

/// Line iterator handed out by [`LineSource::open`].
pub type LineIter = Box<dyn Iterator<Item = Result<String>> + Send>;

const READ_BUFFER_BYTES: usize = 1 << 20;

/// On-disk encoding of a source file, detected from its suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Plain,
    Gzip,
    /// Only the first archive member is read.
    Zip,
}

impl SourceFormat {
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("gz") => SourceFormat::Gzip,
            Some("zip") => SourceFormat::Zip,
            _ => SourceFormat::Plain,
        }
    }
}

/// Reads a TSV source line by line, decompressing `.gz` and `.zip` inputs
/// transparently. Skips blank lines.
///
/// Every call to [`open`](Self::open) starts a fresh pass from the beginning
/// of the file; there is no seeking or random access.
///
/// # Example
/// ```ignore
/// let source = LineSource::new("mentions.tsv.gz");
/// for line in source.open()? {
///     let line = line?;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct LineSource {
    path: PathBuf,
    format: SourceFormat,
}

impl LineSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = SourceFormat::detect(&path);
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    /// Opens a new single-pass iterator over the non-blank lines of the source.
    ///
    /// # Errors
    /// - `SourceAccess` if the file cannot be opened.
    /// - `UnsupportedSource` for an empty zip archive or an unsupported member compression.
    /// - Read failures surface lazily as `Decode` items carrying the 1-based line number.
    pub fn open(&self) -> Result<LineIter> {
        let reader: Box<dyn Read + Send> = match self.format {
            SourceFormat::Plain => Box::new(self.open_file()?),
            SourceFormat::Gzip => Box::new(MultiGzDecoder::new(self.open_file()?)),
            SourceFormat::Zip => self.open_first_member()?,
        };

        let path = self.path.clone();
        // Ends after the first error; a failing reader may fail forever.
        let iter = BufReader::with_capacity(READ_BUFFER_BYTES, reader)
            .lines()
            .enumerate()
            .scan(false, move |failed, (line_num, line)| {
                if *failed {
                    return None;
                }
                Some(match line {
                    Ok(text) if text.trim().is_empty() => None,
                    Ok(text) => Some(Ok(text)),
                    Err(source) => {
                        *failed = true;
                        Some(Err(LoaderError::Decode {
                            path: path.clone(),
                            line: line_num + 1,
                            source,
                        }))
                    }
                })
            })
            .flatten();
        Ok(Box::new(iter))
    }

    /// Counts the non-blank lines with a full pass over the source.
    pub fn count_lines(&self) -> Result<usize> {
        self.open()?
            .try_fold(0usize, |count, line| line.map(|_| count + 1))
    }

    fn open_file(&self) -> Result<File> {
        File::open(&self.path).map_err(|source| LoaderError::SourceAccess {
            path: self.path.clone(),
            source,
        })
    }

    fn unsupported(&self, reason: impl Into<String>) -> LoaderError {
        LoaderError::UnsupportedSource {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    /// Streams the first archive member straight from its data offset so the
    /// member is never buffered in full. The CRC-32 of the decompressed bytes
    /// is checked when the member ends.
    fn open_first_member(&self) -> Result<Box<dyn Read + Send>> {
        let mut archive = ZipArchive::new(self.open_file()?)
            .map_err(|e| self.unsupported(format!("not a readable zip archive: {}", e)))?;

        if archive.len() == 0 {
            return Err(self.unsupported("zip archive has no members"));
        }

        let (name, data_start, compressed_size, method, crc32) = {
            let member = archive
                .by_index_raw(0)
                .map_err(|e| self.unsupported(format!("cannot read first member: {}", e)))?;
            if member.encrypted() {
                return Err(self.unsupported(format!("member '{}' is encrypted", member.name())));
            }
            (
                member.name().to_string(),
                member.data_start(),
                member.compressed_size(),
                member.compression(),
                member.crc32(),
            )
        };

        let mut file = archive.into_inner();
        file.seek(SeekFrom::Start(data_start))
            .map_err(|source| LoaderError::SourceAccess {
                path: self.path.clone(),
                source,
            })?;
        let body = file.take(compressed_size);

        match method {
            CompressionMethod::Stored => Ok(Box::new(CrcChecked::new(body, crc32))),
            CompressionMethod::Deflated => {
                Ok(Box::new(CrcChecked::new(DeflateDecoder::new(body), crc32)))
            }
            other => Err(self.unsupported(format!(
                "member '{}' uses unsupported compression {:?}",
                name, other
            ))),
        }
    }
}

/// Fails the read that reaches end of stream when the bytes seen so far do
/// not match the expected CRC-32.
struct CrcChecked<R> {
    inner: CrcReader<R>,
    expected: u32,
}

impl<R: Read> CrcChecked<R> {
    fn new(inner: R, expected: u32) -> Self {
        Self {
            inner: CrcReader::new(inner),
            expected,
        }
    }
}

impl<R: Read> Read for CrcChecked<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() && self.inner.crc().sum() != self.expected {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "zip member CRC-32 mismatch: expected {:08x}, got {:08x}",
                    self.expected,
                    self.inner.crc().sum()
                ),
            ));
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::ChunkGrouper;
    use crate::stats::LoaderStats;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::unstable::write::FileOptionsExt;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const CONTENT: &str = "Q1\tleft a\tm\tright a\nQ1\tleft b\tm\tright b\n\nQ2\tleft c\tm\tright c\n";

    fn expected() -> Vec<String> {
        vec![
            "Q1\tleft a\tm\tright a".to_string(),
            "Q1\tleft b\tm\tright b".to_string(),
            "Q2\tleft c\tm\tright c".to_string(),
        ]
    }

    fn write_plain(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("data.tsv");
        std::fs::write(&path, CONTENT).unwrap();
        path
    }

    fn write_gzip(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("data.tsv.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(CONTENT.as_bytes()).unwrap();
        encoder.finish().unwrap();
        path
    }

    fn write_zip(dir: &TempDir, method: CompressionMethod) -> PathBuf {
        let path = dir.path().join(format!("data_{:?}.zip", method));
        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        let options = SimpleFileOptions::default().compression_method(method);
        writer.start_file("data.tsv", options).unwrap();
        writer.write_all(CONTENT.as_bytes()).unwrap();
        writer.start_file("ignored.tsv", options).unwrap();
        writer.write_all(b"Z9\tnever\tm\tread\n").unwrap();
        writer.finish().unwrap();
        path
    }

    fn read_all(path: &Path) -> anyhow::Result<Vec<String>> {
        Ok(LineSource::new(path).open()?.collect::<Result<_>>()?)
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(SourceFormat::detect(Path::new("a.tsv")), SourceFormat::Plain);
        assert_eq!(SourceFormat::detect(Path::new("a.tsv.gz")), SourceFormat::Gzip);
        assert_eq!(SourceFormat::detect(Path::new("a.zip")), SourceFormat::Zip);
        assert_eq!(SourceFormat::detect(Path::new("gz")), SourceFormat::Plain);
    }

    #[test]
    fn test_all_formats_yield_identical_lines() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let plain = read_all(&write_plain(&dir))?;
        let gzip = read_all(&write_gzip(&dir))?;
        let deflated = read_all(&write_zip(&dir, CompressionMethod::Deflated))?;
        let stored = read_all(&write_zip(&dir, CompressionMethod::Stored))?;

        assert_eq!(plain, expected());
        assert_eq!(gzip, plain);
        assert_eq!(deflated, plain);
        assert_eq!(stored, plain);
        Ok(())
    }

    #[test]
    fn test_each_open_restarts_from_beginning() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let source = LineSource::new(write_gzip(&dir));

        let first = source.open()?.next().unwrap()?;
        let again = source.open()?.next().unwrap()?;
        assert_eq!(first, again);
        assert_eq!(source.count_lines()?, 3);
        Ok(())
    }

    #[test]
    fn test_crlf_line_endings_are_stripped() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("crlf.tsv");
        std::fs::write(&path, "A\tx\tm\ty\r\nB\tx\tm\ty\r\n")?;

        assert_eq!(read_all(&path)?, vec!["A\tx\tm\ty", "B\tx\tm\ty"]);
        Ok(())
    }

    #[test]
    fn test_missing_file_is_source_access_error() {
        let result = LineSource::new("/definitely/not/here.tsv").open();
        assert!(matches!(result, Err(LoaderError::SourceAccess { .. })));
    }

    #[test]
    fn test_empty_zip_is_unsupported() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("empty.zip");
        ZipWriter::new(File::create(&path)?).finish()?;

        let result = LineSource::new(&path).open();
        assert!(matches!(result, Err(LoaderError::UnsupportedSource { .. })));
        Ok(())
    }

    #[test]
    fn test_corrupt_gzip_surfaces_decode_error() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("broken.tsv.gz");
        std::fs::write(&path, b"this is not gzip data")?;

        let first = LineSource::new(&path).open()?.next();
        assert!(matches!(first, Some(Err(LoaderError::Decode { line: 1, .. }))));

        // Nothing follows the first error
        let mut lines = LineSource::new(&path).open()?;
        assert!(lines.next().is_some_and(|line| line.is_err()));
        assert!(lines.next().is_none());
        Ok(())
    }

    #[test]
    fn test_damaged_stored_zip_member_fails_crc() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = write_zip(&dir, CompressionMethod::Stored);

        // Flip one byte of the member body in place; sizes stay valid
        let mut bytes = std::fs::read(&path)?;
        let at = bytes
            .windows(6)
            .position(|w| w == b"left b")
            .expect("member body is stored uncompressed");
        bytes[at] = b'L';
        std::fs::write(&path, bytes)?;

        let results: Vec<_> = LineSource::new(&path).open()?.collect();
        let (last, lines) = results.split_last().unwrap();
        assert!(lines.iter().all(|line| line.is_ok()));
        assert!(matches!(last, Err(LoaderError::Decode { .. })));
        Ok(())
    }

    #[test]
    fn test_encrypted_zip_member_is_unsupported() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("secret.zip");
        let mut writer = ZipWriter::new(File::create(&path)?);
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .with_deprecated_encryption(b"hunter2");
        writer.start_file("data.tsv", options)?;
        writer.write_all(CONTENT.as_bytes())?;
        writer.finish()?;

        let result = LineSource::new(&path).open();
        assert!(matches!(result, Err(LoaderError::UnsupportedSource { .. })));
        Ok(())
    }

    #[test]
    fn test_invalid_utf8_is_decode_error_with_line() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("latin1.tsv");
        let mut bytes = b"Q1\tleft a\tm\tright a\n".to_vec();
        bytes.extend_from_slice(b"Q1\tleft \xff\xfe\tm\tright b\n");
        bytes.extend_from_slice(b"Q2\tleft c\tm\tright c\n");
        std::fs::write(&path, bytes)?;

        let mut lines = LineSource::new(&path).open()?;
        assert_eq!(lines.next().transpose()?, Some("Q1\tleft a\tm\tright a".to_string()));
        assert!(matches!(lines.next(), Some(Err(LoaderError::Decode { line: 2, .. }))));
        assert!(lines.next().is_none());

        // The grouper reports the error once and stops
        let stats = LoaderStats::new();
        let mut chunks = ChunkGrouper::new(LineSource::new(&path).open()?, 10, stats.clone())?;
        assert!(matches!(chunks.next(), Some(Err(LoaderError::Decode { line: 2, .. }))));
        assert!(chunks.next().is_none());
        assert_eq!(stats.snapshot().chunks_read, 0);
        Ok(())
    }
}
