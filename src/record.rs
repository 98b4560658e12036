//! Fixed-length records and input line validation.

use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display};

/// Default record length in bytes.
pub const DEFAULT_RECORD_LENGTH: usize = 32;

/// Record separator used by input, run and output files.
pub const SEPARATOR: u8 = b'\n';

/// An immutable fixed-length record. Records are ordered byte-lexicographically.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Record(Box<[u8]>);

impl Record {
    /// Returns record bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns record length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for Record {
    fn from(bytes: &[u8]) -> Self {
        Record(bytes.into())
    }
}

impl From<Vec<u8>> for Record {
    fn from(bytes: Vec<u8>) -> Self {
        Record(bytes.into_boxed_slice())
    }
}

impl AsRef<[u8]> for Record {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record({:?})", String::from_utf8_lossy(&self.0))
    }
}

/// Line rejected by the validator. The line is dropped by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidRecord {
    /// Actual line length.
    pub length: usize,
    /// Expected record length.
    pub expected: usize,
}

impl Error for InvalidRecord {}

impl Display for InvalidRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid record length: {} (expected {})",
            self.length, self.expected
        )
    }
}

/// Accepts only lines of exactly `record_length` bytes.
#[derive(Debug, Clone, Copy)]
pub struct RecordValidator {
    record_length: usize,
}

impl RecordValidator {
    pub fn new(record_length: usize) -> Self {
        RecordValidator { record_length }
    }

    pub fn record_length(&self) -> usize {
        self.record_length
    }

    /// Validates a line already stripped of its separator and surrounding whitespace.
    pub fn validate(&self, line: &[u8]) -> Result<Record, InvalidRecord> {
        if line.len() == self.record_length {
            Ok(Record::from(line))
        } else {
            Err(InvalidRecord {
                length: line.len(),
                expected: self.record_length,
            })
        }
    }

    /// Strips a raw input line and validates it.
    pub fn validate_raw(&self, raw: &[u8]) -> Result<Record, InvalidRecord> {
        self.validate(strip_line(raw))
    }
}

impl Default for RecordValidator {
    fn default() -> Self {
        RecordValidator::new(DEFAULT_RECORD_LENGTH)
    }
}

/// Strips leading and trailing whitespace, including the record separator. Lines that are valid UTF-8 are trimmed
/// of Unicode whitespace, other lines of ASCII whitespace and vertical tab only.
pub fn strip_line(raw: &[u8]) -> &[u8] {
    if let Ok(line) = std::str::from_utf8(raw) {
        return line.trim().as_bytes();
    }

    let start = raw
        .iter()
        .position(|b| !is_space(*b))
        .unwrap_or(raw.len());
    let end = raw
        .iter()
        .rposition(|b| !is_space(*b))
        .map_or(start, |pos| pos + 1);

    return &raw[start..end];
}

fn is_space(b: u8) -> bool {
    b.is_ascii_whitespace() || b == 0x0B
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{strip_line, InvalidRecord, Record, RecordValidator};

    #[rstest]
    #[case(b"abc\n", b"abc")]
    #[case(b"  abc \r\n", b"abc")]
    #[case(b"\t\n", b"")]
    #[case(b"", b"")]
    #[case(b"a b\n", b"a b")]
    #[case(b"\x0babc\x0b\n", b"abc")]
    #[case("\u{85}abc\u{3000}\n".as_bytes(), b"abc")]
    #[case(b"\xff abc \n", b"\xff abc")]
    #[case(b" \x0b\xffabc\x0c\n", b"\xffabc")]
    fn test_strip_line(#[case] raw: &[u8], #[case] expected: &[u8]) {
        assert_eq!(strip_line(raw), expected);
    }

    #[rstest]
    #[case(b"aaaa\n", Ok(Record::from(&b"aaaa"[..])))]
    #[case(b" bbbb \n", Ok(Record::from(&b"bbbb"[..])))]
    #[case(b"abc\n", Err(InvalidRecord { length: 3, expected: 4 }))]
    #[case(b"abcde\n", Err(InvalidRecord { length: 5, expected: 4 }))]
    #[case(b"\n", Err(InvalidRecord { length: 0, expected: 4 }))]
    #[case(b"abcd\x0b\n", Ok(Record::from(&b"abcd"[..])))]
    #[case("abcd\u{a0}\n".as_bytes(), Ok(Record::from(&b"abcd"[..])))]
    #[case("\u{a0}abc\n".as_bytes(), Err(InvalidRecord { length: 3, expected: 4 }))]
    #[case("ab\u{a0}\n".as_bytes(), Err(InvalidRecord { length: 2, expected: 4 }))]
    fn test_validator(#[case] raw: &[u8], #[case] expected: Result<Record, InvalidRecord>) {
        let validator = RecordValidator::new(4);
        assert_eq!(validator.validate_raw(raw), expected);
    }

    #[test]
    fn test_record_order_is_bytewise() {
        let mut records = vec![
            Record::from(&b"b"[..]),
            Record::from(&b"B"[..]),
            Record::from(&b"a"[..]),
            Record::from(&b"0"[..]),
        ];
        records.sort();

        let actual: Vec<&[u8]> = records.iter().map(Record::as_bytes).collect();
        assert_eq!(actual, vec![&b"0"[..], b"B", b"a", b"b"]);
    }
}
