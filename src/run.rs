//! Sorted runs stored on file system.
//!
//! A run is a newline-delimited file of fixed-length records in ascending order. Source runs are produced by the
//! sorting workers, intermediate runs by the grouped merge passes. Both kinds live in the same directory and are
//! told apart by their file names.

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use crate::record::{Record, SEPARATOR};

const SOURCE_PREFIX: &str = "run_";
const INTERMEDIATE_PREFIX: &str = "merge_";
const RUN_SUFFIX: &str = ".txt";

/// Run identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RunId {
    /// Run spilled from the chunk with the given sequence id.
    Source(u64),
    /// Output of a grouped merge pass.
    Intermediate { pass: u32, group: u32 },
}

impl RunId {
    /// Returns run file name.
    pub fn file_name(&self) -> String {
        match self {
            RunId::Source(seq) => format!("{}{:06}{}", SOURCE_PREFIX, seq, RUN_SUFFIX),
            RunId::Intermediate { pass, group } => {
                format!("{}{:02}_{:04}{}", INTERMEDIATE_PREFIX, pass, group, RUN_SUFFIX)
            }
        }
    }

    /// Returns run file path inside the run directory.
    pub fn path(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }

    /// Parses a source run file name.
    pub fn parse_source(file_name: &str) -> Option<RunId> {
        let seq = file_name.strip_prefix(SOURCE_PREFIX)?.strip_suffix(RUN_SUFFIX)?;
        if seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        seq.parse().ok().map(RunId::Source)
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Enumerates source runs of a directory in sequence order. Intermediate runs and unrelated files are skipped.
pub fn list_runs(dir: &Path) -> io::Result<Vec<RunId>> {
    let mut runs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(run) = entry.file_name().to_str().and_then(RunId::parse_source) {
            runs.push(run);
        }
    }
    runs.sort();

    return Ok(runs);
}

/// Writes records to a new run file.
///
/// Records are written to a temporary file in the run directory first, the file is renamed to the run name only
/// after all the data has been flushed. A failed write never leaves a file that looks like a complete run.
pub fn write_run<'a, I>(dir: &Path, id: RunId, records: I, buf_size: usize) -> io::Result<PathBuf>
where
    I: IntoIterator<Item = &'a Record>,
{
    let path = id.path(dir);
    let mut writer = RunWriter::create(dir, buf_size)?;
    for record in records {
        writer.write(record)?;
    }
    writer.persist(&path)?;

    return Ok(path);
}

/// Buffered writer of a run that is published under its final name on [`RunWriter::persist`].
pub struct RunWriter {
    writer: io::BufWriter<tempfile::NamedTempFile>,
    written: u64,
}

impl RunWriter {
    /// Creates an unnamed run in the directory.
    pub fn create(dir: &Path, buf_size: usize) -> io::Result<Self> {
        let tmp_file = tempfile::Builder::new().prefix(".partial_").tempfile_in(dir)?;

        return Ok(RunWriter {
            writer: io::BufWriter::with_capacity(buf_size, tmp_file),
            written: 0,
        });
    }

    /// Appends a record followed by the separator.
    pub fn write(&mut self, record: &Record) -> io::Result<()> {
        self.writer.write_all(record.as_bytes())?;
        self.writer.write_all(&[SEPARATOR])?;
        self.written += 1;

        return Ok(());
    }

    /// Number of records written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes the data and renames the file to `path`.
    pub fn persist(self, path: &Path) -> io::Result<()> {
        let tmp_file = self.writer.into_inner().map_err(|err| err.into_error())?;
        tmp_file.persist(path).map_err(|err| err.error)?;

        return Ok(());
    }
}

/// Run reading error kind.
#[derive(Debug)]
pub enum RunReadErrorKind {
    /// Common I/O error.
    IO(io::Error),
    /// A record of unexpected length.
    InvalidLength { line: u64, length: usize },
    /// The last record is not terminated by a separator.
    Truncated { line: u64 },
}

/// Run reading error. Always fatal to the merge consuming the run.
#[derive(Debug)]
pub struct RunReadError {
    pub path: PathBuf,
    pub kind: RunReadErrorKind,
}

impl Error for RunReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            RunReadErrorKind::IO(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for RunReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RunReadErrorKind::IO(err) => write!(f, "{}: read failed: {}", self.path.display(), err),
            RunReadErrorKind::InvalidLength { line, length } => {
                write!(f, "{}:{}: unexpected record length {}", self.path.display(), line, length)
            }
            RunReadErrorKind::Truncated { line } => {
                write!(f, "{}:{}: truncated record", self.path.display(), line)
            }
        }
    }
}

/// Buffered forward-only run cursor.
///
/// The cursor keeps a single scan position in the run file and a lookahead buffer of up to `buffer_lines` records
/// which is refilled from that position once drained.
pub struct RunReader {
    path: PathBuf,
    reader: io::BufReader<fs::File>,
    record_length: usize,
    buffer_lines: usize,
    buffer: VecDeque<Record>,
    scratch: Vec<u8>,
    lines_read: u64,
    exhausted: bool,
}

impl RunReader {
    /// Opens a run file.
    ///
    /// # Arguments
    /// * `path` - Run file path
    /// * `record_length` - Expected record length; records of any other length are reported as errors
    /// * `buffer_lines` - Lookahead buffer size in records
    /// * `buf_size` - File read buffer size in bytes
    pub fn open(path: &Path, record_length: usize, buffer_lines: usize, buf_size: usize) -> io::Result<Self> {
        let file = fs::File::open(path)?;

        return Ok(RunReader {
            path: path.to_path_buf(),
            reader: io::BufReader::with_capacity(buf_size, file),
            record_length,
            buffer_lines: buffer_lines.max(1),
            buffer: VecDeque::with_capacity(buffer_lines.max(1)),
            scratch: Vec::with_capacity(record_length + 1),
            lines_read: 0,
            exhausted: false,
        });
    }

    /// Returns the run file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tops the lookahead buffer up to `buffer_lines` records from the current scan position. Buffered records are
    /// kept. Returns the number of records added, which is less than the free buffer space only when the run is
    /// exhausted.
    pub fn fill_buffer(&mut self) -> Result<usize, RunReadError> {
        let wanted = self.buffer_lines.saturating_sub(self.buffer.len());
        let mut read = 0;

        while read < wanted && !self.exhausted {
            match self.read_record()? {
                Some(record) => {
                    self.buffer.push_back(record);
                    read += 1;
                }
                None => self.exhausted = true,
            }
        }
        log::trace!("{}: buffered {} records", self.path.display(), read);

        return Ok(read);
    }

    /// Returns the next unconsumed record without consuming it.
    pub fn peek_head(&mut self) -> Result<Option<&Record>, RunReadError> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill_buffer()?;
        }

        return Ok(self.buffer.front());
    }

    /// Consumes and returns the next record.
    pub fn next_record(&mut self) -> Result<Option<Record>, RunReadError> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill_buffer()?;
        }

        return Ok(self.buffer.pop_front());
    }

    fn read_record(&mut self) -> Result<Option<Record>, RunReadError> {
        self.scratch.clear();
        let read = self
            .reader
            .read_until(SEPARATOR, &mut self.scratch)
            .map_err(|err| self.error(RunReadErrorKind::IO(err)))?;
        if read == 0 {
            return Ok(None);
        }
        self.lines_read += 1;

        let line = match self.scratch.split_last() {
            Some((&SEPARATOR, line)) => line,
            _ => return Err(self.error(RunReadErrorKind::Truncated { line: self.lines_read })),
        };
        if line.len() != self.record_length {
            return Err(self.error(RunReadErrorKind::InvalidLength {
                line: self.lines_read,
                length: line.len(),
            }));
        }

        // the scratch buffer is reused by the next read, so the record gets its own copy
        return Ok(Some(Record::from(line)));
    }

    fn error(&self, kind: RunReadErrorKind) -> RunReadError {
        RunReadError {
            path: self.path.clone(),
            kind,
        }
    }
}

impl Iterator for RunReader {
    type Item = Result<Record, RunReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use rstest::*;

    use super::{list_runs, write_run, RunId, RunReadErrorKind, RunReader};
    use crate::record::Record;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn records(count: usize) -> Vec<Record> {
        (0..count).map(|i| Record::from(format!("{:08}", i).into_bytes())).collect()
    }

    fn read_all(path: &Path, buffer_lines: usize) -> Vec<Record> {
        let reader = RunReader::open(path, 8, buffer_lines, 64).unwrap();
        let restored: Result<Vec<Record>, _> = reader.collect();
        restored.unwrap()
    }

    #[rstest]
    #[case(RunId::Source(7), "run_000007.txt")]
    #[case(RunId::Source(1234567), "run_1234567.txt")]
    #[case(RunId::Intermediate { pass: 1, group: 3 }, "merge_01_0003.txt")]
    fn test_run_file_name(#[case] id: RunId, #[case] expected: &str) {
        assert_eq!(id.file_name(), expected);
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(10)]
    #[case(1000)]
    fn test_run_roundtrip(tmp_dir: tempfile::TempDir, #[case] buffer_lines: usize) {
        let saved = records(10);
        let path = write_run(tmp_dir.path(), RunId::Source(0), &saved, 16).unwrap();

        assert_eq!(read_all(&path, buffer_lines), saved);
        // a fresh cursor yields the same sequence
        assert_eq!(read_all(&path, buffer_lines), saved);
    }

    #[rstest]
    fn test_fill_buffer(tmp_dir: tempfile::TempDir) {
        let saved = records(7);
        let path = write_run(tmp_dir.path(), RunId::Source(0), &saved, 16).unwrap();

        let mut reader = RunReader::open(&path, 8, 3, 64).unwrap();
        assert_eq!(reader.fill_buffer().unwrap(), 3);
        assert_eq!(reader.peek_head().unwrap(), Some(&saved[0]));
        assert_eq!(reader.peek_head().unwrap(), Some(&saved[0]));

        let mut restored = Vec::new();
        for _ in 0..3 {
            restored.push(reader.next_record().unwrap().unwrap());
        }
        assert_eq!(reader.fill_buffer().unwrap(), 3);
        for _ in 0..3 {
            restored.push(reader.next_record().unwrap().unwrap());
        }
        assert_eq!(reader.fill_buffer().unwrap(), 1);
        restored.push(reader.next_record().unwrap().unwrap());

        assert_eq!(reader.fill_buffer().unwrap(), 0);
        assert_eq!(reader.peek_head().unwrap(), None);
        assert!(reader.next_record().unwrap().is_none());
        assert_eq!(restored, saved);
    }

    #[rstest]
    fn test_fill_buffer_keeps_buffered_records(tmp_dir: tempfile::TempDir) {
        let saved = records(5);
        let path = write_run(tmp_dir.path(), RunId::Source(0), &saved, 16).unwrap();

        let mut reader = RunReader::open(&path, 8, 3, 64).unwrap();
        assert_eq!(reader.next_record().unwrap(), Some(saved[0].clone()));
        assert_eq!(reader.fill_buffer().unwrap(), 1);
        assert_eq!(reader.fill_buffer().unwrap(), 0);
        assert_eq!(reader.next_record().unwrap(), Some(saved[1].clone()));
        assert_eq!(reader.fill_buffer().unwrap(), 1);

        let rest: Vec<Record> = reader.map(Result::unwrap).collect();
        assert_eq!(rest, saved[2..]);
    }

    #[rstest]
    fn test_empty_run(tmp_dir: tempfile::TempDir) {
        let path = write_run(tmp_dir.path(), RunId::Source(0), &Vec::<Record>::new(), 16).unwrap();
        assert!(read_all(&path, 4).is_empty());
    }

    #[rstest]
    #[case(b"00000000\n0000001\n".to_vec(), 2)]
    #[case(b"00000000\n000000010\n".to_vec(), 2)]
    fn test_invalid_length(tmp_dir: tempfile::TempDir, #[case] content: Vec<u8>, #[case] expected_line: u64) {
        let path = tmp_dir.path().join("run_000000.txt");
        fs::write(&path, content).unwrap();

        let mut reader = RunReader::open(&path, 8, 4, 64).unwrap();
        let err = reader.fill_buffer().unwrap_err();
        assert_eq!(err.path, reader.path());
        match err.kind {
            RunReadErrorKind::InvalidLength { line, .. } => assert_eq!(line, expected_line),
            kind => panic!("unexpected error: {:?}", kind),
        }
    }

    #[rstest]
    fn test_truncated_run(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("run_000000.txt");
        fs::write(&path, b"00000000\n00000001\n0000").unwrap();

        let reader = RunReader::open(&path, 8, 1, 64).unwrap();
        let result: Vec<_> = reader.collect();

        assert_eq!(result.len(), 3);
        assert!(result[0].is_ok());
        assert!(result[1].is_ok());
        match &result[2] {
            Err(err) => assert!(matches!(err.kind, RunReadErrorKind::Truncated { line: 3 })),
            Ok(record) => panic!("unexpected record: {:?}", record),
        }
    }

    #[rstest]
    fn test_list_runs(tmp_dir: tempfile::TempDir) {
        for id in [
            RunId::Source(2),
            RunId::Source(0),
            RunId::Intermediate { pass: 0, group: 0 },
            RunId::Source(10),
        ] {
            write_run(tmp_dir.path(), id, &records(1), 16).unwrap();
        }
        fs::write(tmp_dir.path().join("run_abc.txt"), b"").unwrap();
        fs::write(tmp_dir.path().join("notes.txt"), b"").unwrap();

        let runs = list_runs(tmp_dir.path()).unwrap();
        assert_eq!(runs, vec![RunId::Source(0), RunId::Source(2), RunId::Source(10)]);
    }
}
