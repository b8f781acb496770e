//! Line sources for scan dumps.
//!
//! [`LineSource`] opens a dump and yields raw lines, decompressing gzip on the
//! fly when the file name ends in `.gz`. [`Decoder`] turns those lines into
//! [`Record`]s, logging and skipping lines that are not valid JSON.

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::record::{InputFormat, Record};
use crate::Result;

/// Buffer size for reading dump files.
const READ_BUFFER_SIZE: usize = 1 << 20;

/// Lazy, single-pass sequence of raw lines from a dump file.
pub struct LineSource {
    reader: Box<dyn BufRead + Send>,
    compressed: bool,
}

impl LineSource {
    /// Open a dump file.
    ///
    /// Files whose name ends in `.gz` are decompressed while reading. A file is
    /// assumed to be either fully compressed or not at all.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let compressed = is_gzip_path(path);

        let reader: Box<dyn BufRead + Send> = if compressed {
            Box::new(BufReader::with_capacity(
                READ_BUFFER_SIZE,
                MultiGzDecoder::new(BufReader::new(file)),
            ))
        } else {
            Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, file))
        };

        log::info!(
            "Opened {:?}{}",
            path,
            if compressed { " (gzip)" } else { "" }
        );

        Ok(Self { reader, compressed })
    }

    /// Build a line source over an uncompressed reader.
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            reader: Box::new(BufReader::new(reader)),
            compressed: false,
        }
    }

    /// Whether the source is being decompressed.
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }
}

impl Iterator for LineSource {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line) {
            Ok(0) => None,
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                }
                Some(Ok(line))
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

fn is_gzip_path(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "gz")
}

/// Decode one line in the given format.
pub fn decode_line(format: InputFormat, line: &[u8]) -> serde_json::Result<Record> {
    format.decode(line)
}

/// Adapter decoding raw lines into records.
///
/// Only source errors are yielded; lines that fail to decode are logged,
/// counted and dropped.
pub struct Decoder<I> {
    lines: I,
    format: InputFormat,
    line_no: u64,
    malformed: u64,
}

impl<I> Decoder<I>
where
    I: Iterator<Item = Result<Vec<u8>>>,
{
    pub fn new(lines: I, format: InputFormat) -> Self {
        Self {
            lines,
            format,
            line_no: 0,
            malformed: 0,
        }
    }

    /// Number of lines dropped because they did not decode.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Number of lines read so far.
    pub fn lines_read(&self) -> u64 {
        self.line_no
    }
}

impl<I> Iterator for Decoder<I>
where
    I: Iterator<Item = Result<Vec<u8>>>,
{
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            self.line_no += 1;

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match decode_line(self.format, &line) {
                Ok(record) => return Some(Ok(record)),
                Err(e) => {
                    self.malformed += 1;
                    log::warn!("Skipping line {}: {}", self.line_no, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};

    const DNS_LINES: &str = concat!(
        r#"{"timestamp":"1","name":"a.example.com","type":"a","value":"10.0.0.1"}"#,
        "\n",
        r#"{"timestamp":"2","name":"b.example.com","type":"a","value":"10.0.0.2"}"#,
        "\r\n",
        r#"{"timestamp":"3","name":"c.example.com","type":"cname","value":"a.example.com"}"#,
    );

    #[test]
    fn test_lines_strip_terminators() {
        let lines: Vec<Vec<u8>> = LineSource::from_reader(Cursor::new("a\nb\r\nc"))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(lines, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_open_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fdns.json");
        std::fs::write(&path, DNS_LINES).unwrap();

        let source = LineSource::open(&path).unwrap();
        assert!(!source.is_compressed());
        assert_eq!(source.count(), 3);
    }

    #[test]
    fn test_open_gzip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fdns.json.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(DNS_LINES.as_bytes()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let source = LineSource::open(&path).unwrap();
        assert!(source.is_compressed());

        let records: Vec<Record> = Decoder::new(source, InputFormat::Rapid7Fdns)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].domain(), "c.example.com");
    }

    #[test]
    fn test_corrupt_gzip_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json.gz");
        std::fs::write(&path, b"definitely not gzip").unwrap();

        let mut source = LineSource::open(&path).unwrap();
        assert!(matches!(source.next(), Some(Err(crate::Error::Io(_)))));
    }

    #[test]
    fn test_open_missing_file() {
        let result = LineSource::open("/nonexistent/dump.json");
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }

    #[test]
    fn test_malformed_line_skipped() {
        let input = concat!(
            r#"{"name":"a.example.com","value":"10.0.0.1"}"#,
            "\n",
            "{broken\n",
            r#"{"name":"b.example.com","value":"10.0.0.2"}"#,
            "\n",
        );
        let mut decoder = Decoder::new(
            LineSource::from_reader(Cursor::new(input)),
            InputFormat::Rapid7Fdns,
        );

        let first = decoder.next().unwrap().unwrap();
        let second = decoder.next().unwrap().unwrap();
        assert!(decoder.next().is_none());

        assert_eq!(first.domain(), "a.example.com");
        assert_eq!(second.domain(), "b.example.com");
        assert_eq!(decoder.malformed(), 1);
        assert_eq!(decoder.lines_read(), 3);
    }

    #[test]
    fn test_blank_lines_not_counted_as_malformed() {
        let input = "\n   \n{\"name\":\"x.org\"}\n";
        let mut decoder = Decoder::new(
            LineSource::from_reader(Cursor::new(input)),
            InputFormat::Rapid7Fdns,
        );
        assert_eq!(decoder.by_ref().count(), 1);
        assert_eq!(decoder.malformed(), 0);
    }
}
