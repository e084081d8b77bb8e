use super::record::{DumpParseError, DumpRecord};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const READ_BUFFER_SIZE: usize = 256 * 1024;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One line of a dump, with its parse outcome.
#[derive(Debug)]
pub struct DumpLine {
    /// 1-based line number within the file.
    pub line_number: u64,
    pub record: Result<DumpRecord, DumpParseError>,
}

/// Where the reader stands after the last emitted line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamPosition {
    pub line_offset: u64,
    /// Only meaningful for uncompressed files, where it can be seeked to.
    pub byte_offset: Option<u64>,
}

/// Counts bytes pulled from the underlying file, so progress of a compressed
/// dump can be measured against its on-disk size.
struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Streams a tab-separated dump one line at a time.
///
/// Holds at most one line plus the read buffer in memory. Gzip input is
/// detected by its magic bytes and decoded transparently.
pub struct DumpReader {
    path: PathBuf,
    inner: Box<dyn BufRead + Send>,
    compressed: bool,
    source_bytes_read: Arc<AtomicU64>,
    total_bytes: u64,
    line_offset: u64,
    byte_offset: u64,
    buf: Vec<u8>,
}

impl DumpReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let total_bytes = file.metadata()?.len();

        let mut magic = [0u8; 2];
        let compressed = match file.read_exact(&mut magic) {
            Ok(()) => magic == GZIP_MAGIC,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
            Err(e) => return Err(e),
        };
        file.seek(SeekFrom::Start(0))?;

        let source_bytes_read = Arc::new(AtomicU64::new(0));
        let inner: Box<dyn BufRead + Send> = if compressed {
            let counted = CountingReader {
                inner: file,
                count: source_bytes_read.clone(),
            };
            Box::new(BufReader::with_capacity(
                READ_BUFFER_SIZE,
                MultiGzDecoder::new(counted),
            ))
        } else {
            Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, file))
        };

        Ok(Self {
            path: path.to_path_buf(),
            inner,
            compressed,
            source_bytes_read,
            total_bytes,
            line_offset: 0,
            byte_offset: 0,
            buf: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// On-disk size of the dump file.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// On-disk bytes consumed so far; compressed bytes for gzip input.
    pub fn source_bytes_read(&self) -> u64 {
        if self.compressed {
            self.source_bytes_read.load(Ordering::Relaxed)
        } else {
            self.byte_offset
        }
    }

    pub fn position(&self) -> StreamPosition {
        StreamPosition {
            line_offset: self.line_offset,
            byte_offset: (!self.compressed).then_some(self.byte_offset),
        }
    }

    /// Positions the reader so the next emitted line is line `position.line_offset + 1`.
    ///
    /// Uncompressed files seek straight to the byte offset when one is given;
    /// otherwise lines are skipped by count. Must be called before reading.
    pub fn resume_at(&mut self, position: StreamPosition) -> io::Result<()> {
        if position.line_offset == 0 {
            return Ok(());
        }

        if let (false, Some(byte_offset)) = (self.compressed, position.byte_offset) {
            if byte_offset <= self.total_bytes {
                let mut file = File::open(&self.path)?;
                file.seek(SeekFrom::Start(byte_offset))?;
                self.inner = Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, file));
                self.line_offset = position.line_offset;
                self.byte_offset = byte_offset;
                return Ok(());
            }
        }

        while self.line_offset < position.line_offset {
            if self.read_raw_line()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Reads the next raw line into the internal buffer, without its terminator.
    fn read_raw_line(&mut self) -> io::Result<Option<()>> {
        self.buf.clear();
        let n = self.inner.read_until(b'\n', &mut self.buf)?;
        if n == 0 {
            return Ok(None);
        }
        self.line_offset += 1;
        self.byte_offset += n as u64;
        while matches!(self.buf.last(), Some(b'\n') | Some(b'\r')) {
            self.buf.pop();
        }
        Ok(Some(()))
    }

    /// Returns the next non-blank line, or `None` at end of stream.
    ///
    /// I/O errors (including corrupt gzip data) are returned as `Err` and
    /// should be treated as fatal; malformed lines are reported in `DumpLine::record`.
    pub fn next_line(&mut self) -> io::Result<Option<DumpLine>> {
        loop {
            if self.read_raw_line()?.is_none() {
                return Ok(None);
            }
            if self.buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let record = match std::str::from_utf8(&self.buf) {
                Ok(line) => DumpRecord::parse(line),
                Err(_) => Err(DumpParseError::InvalidEncoding),
            };
            return Ok(Some(DumpLine {
                line_number: self.line_offset,
                record,
            }));
        }
    }
}

impl Iterator for DumpReader {
    type Item = io::Result<DumpLine>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::RecordType;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn author_line(key: &str, name: &str) -> String {
        format!(
            "/type/author\t{}\t1\t2020-01-01T00:00:00\t{{\"name\": \"{}\"}}\n",
            key, name
        )
    }

    fn write_plain(dir: &TempDir, lines: &[String]) -> PathBuf {
        let path = dir.path().join("dump.txt");
        std::fs::write(&path, lines.concat()).unwrap();
        path
    }

    fn write_gzip(dir: &TempDir, lines: &[String]) -> PathBuf {
        let path = dir.path().join("dump.txt.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(lines.concat().as_bytes()).unwrap();
        encoder.finish().unwrap();
        path
    }

    fn keys(reader: DumpReader) -> Vec<String> {
        reader
            .map(|line| line.unwrap().record.unwrap().key)
            .collect()
    }

    #[test]
    fn test_reads_all_lines_and_reports_bad_ones() {
        let dir = TempDir::new().unwrap();
        let path = write_plain(
            &dir,
            &[
                author_line("K1", "A"),
                "garbage\n".to_string(),
                "\n".to_string(),
                author_line("K2", "B"),
            ],
        );

        let lines: Vec<DumpLine> = DumpReader::open(&path)
            .unwrap()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].line_number, 1);
        assert_eq!(
            lines[0].record.as_ref().unwrap().record_type,
            RecordType::Author
        );
        assert!(lines[1].record.is_err());
        assert_eq!(lines[2].line_number, 4);
    }

    #[test]
    fn test_resume_by_byte_offset() {
        let dir = TempDir::new().unwrap();
        let lines: Vec<String> = (0..10).map(|i| author_line(&format!("K{}", i), "x")).collect();
        let path = write_plain(&dir, &lines);

        let mut reader = DumpReader::open(&path).unwrap();
        for _ in 0..4 {
            reader.next_line().unwrap().unwrap();
        }
        let position = reader.position();
        assert_eq!(position.line_offset, 4);
        assert!(position.byte_offset.is_some());

        let mut resumed = DumpReader::open(&path).unwrap();
        resumed.resume_at(position).unwrap();
        let first = resumed.next_line().unwrap().unwrap();
        assert_eq!(first.line_number, 5);
        assert_eq!(first.record.unwrap().key, "K4");
    }

    #[test]
    fn test_resume_by_line_count_without_byte_offset() {
        let dir = TempDir::new().unwrap();
        let lines: Vec<String> = (0..5).map(|i| author_line(&format!("K{}", i), "x")).collect();
        let path = write_plain(&dir, &lines);

        let mut reader = DumpReader::open(&path).unwrap();
        reader
            .resume_at(StreamPosition {
                line_offset: 3,
                byte_offset: None,
            })
            .unwrap();
        assert_eq!(keys(reader), vec!["K3", "K4"]);
    }

    #[test]
    fn test_gzip_is_transparent_and_resumes_by_count() {
        let dir = TempDir::new().unwrap();
        let lines: Vec<String> = (0..6).map(|i| author_line(&format!("K{}", i), "x")).collect();
        let path = write_gzip(&dir, &lines);

        let reader = DumpReader::open(&path).unwrap();
        assert!(reader.is_compressed());
        assert_eq!(keys(reader).len(), 6);

        let mut reader = DumpReader::open(&path).unwrap();
        reader
            .resume_at(StreamPosition {
                line_offset: 4,
                byte_offset: Some(12345),
            })
            .unwrap();
        assert_eq!(reader.position().byte_offset, None);
        assert_eq!(keys(reader), vec!["K4", "K5"]);
    }

    #[test]
    fn test_source_bytes_reach_total_at_end() {
        let dir = TempDir::new().unwrap();
        let lines: Vec<String> = (0..3).map(|i| author_line(&format!("K{}", i), "x")).collect();
        let path = write_plain(&dir, &lines);

        let mut reader = DumpReader::open(&path).unwrap();
        while reader.next_line().unwrap().is_some() {}
        assert_eq!(reader.source_bytes_read(), reader.total_bytes());
    }

    #[test]
    fn test_invalid_utf8_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, b"/type/author\tK\xff\t1\t2020\t{}\n").unwrap();

        let line = DumpReader::open(&path).unwrap().next_line().unwrap().unwrap();
        assert!(matches!(line.record, Err(DumpParseError::InvalidEncoding)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(DumpReader::open(Path::new("/nonexistent/dump.txt")).is_err());
    }
}
