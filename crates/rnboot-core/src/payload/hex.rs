//! Intel HEX parsing.
//!
//! Turns a textual HEX image into the ordered list of data records the
//! updater writes. Records are kept in file order, with extended segment and
//! linear offsets already applied to their addresses.
//!
//! ```text
//! :LLAAAATT[DD...]CC
//!  |  |   |   |    +- checksum (two's complement of the byte sum)
//!  |  |   |   +------ LL data bytes
//!  |  |   +---------- record type (00..05)
//!  |  +-------------- 16-bit address, big-endian
//!  +----------------- data length
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, instrument};

/// Shortest possible record: ':' + length + address + type + checksum.
pub const MIN_RECORD_LEN: usize = 11;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("line {line}: malformed record ({reason})")]
    Malformed { line: usize, reason: &'static str },
    #[error("line {line}: record length incorrect (expected {expected} characters, got {actual})")]
    LengthMismatch {
        line: usize,
        expected: usize,
        actual: usize,
    },
    #[error("line {line}: checksum is not correct (byte sum 0x{sum:02X})")]
    BadChecksum { line: usize, sum: u8 },
    #[error("line {line}: invalid record type 0x{record_type:02X}")]
    UnknownType { line: usize, record_type: u8 },
    #[error("line {line}: record found after EOF record")]
    DataAfterEof { line: usize },
    #[error("no EOF record in hex file")]
    MissingEof,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Intel HEX record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Data,
    EndOfFile,
    ExtSegmentAddr,
    StartSegmentAddr,
    ExtLinearAddr,
    StartLinearAddr,
}

impl RecordType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(RecordType::Data),
            0x01 => Some(RecordType::EndOfFile),
            0x02 => Some(RecordType::ExtSegmentAddr),
            0x03 => Some(RecordType::StartSegmentAddr),
            0x04 => Some(RecordType::ExtLinearAddr),
            0x05 => Some(RecordType::StartLinearAddr),
            _ => None,
        }
    }

    /// Payload size the record type requires, if fixed.
    fn payload_len(self) -> Option<usize> {
        match self {
            RecordType::ExtSegmentAddr | RecordType::ExtLinearAddr => Some(2),
            RecordType::StartSegmentAddr | RecordType::StartLinearAddr => Some(4),
            RecordType::Data | RecordType::EndOfFile => None,
        }
    }
}

/// A block of bytes at an absolute address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    address: u32,
    data: Vec<u8>,
}

impl HexRecord {
    pub fn new(address: u32, data: Vec<u8>) -> Self {
        Self { address, data }
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// One past the last byte of the record.
    pub fn end_address(&self) -> u32 {
        self.address.wrapping_add(self.data.len() as u32)
    }
}

/// Entry point from a start address record. The two kinds share storage;
/// the last one in the file wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAddress {
    /// CS:IP from a type 03 record, packed as `CS << 16 | IP`.
    Segment(u32),
    /// EIP from a type 05 record.
    Linear(u32),
}

/// A parsed HEX image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HexFile {
    records: Vec<HexRecord>,
    start_address: Option<StartAddress>,
    has_eof: bool,
}

impl HexFile {
    /// Parse HEX text held in memory.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        Self::from_reader(text.as_bytes())
    }

    /// Parse from any buffered reader, one line at a time.
    pub fn from_reader<R: BufRead>(mut reader: R) -> Result<Self, ParseError> {
        let mut parser = HexParser::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            parser.feed_line(&line)?;
        }
        parser.finish()
    }

    /// Open and parse a HEX file from disk.
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ParseError> {
        let file = File::open(path.as_ref())?;
        let hex = Self::from_reader(BufReader::new(file))?;
        debug!(
            records = hex.num_records(),
            bytes = hex.total_bytes(),
            "Parsed HEX file"
        );
        Ok(hex)
    }

    pub fn records(&self) -> &[HexRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HexRecord> {
        self.records.iter()
    }

    pub fn num_records(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_eof(&self) -> bool {
        self.has_eof
    }

    pub fn start_address(&self) -> Option<StartAddress> {
        self.start_address
    }

    /// Total number of data bytes across all records.
    pub fn total_bytes(&self) -> usize {
        self.records.iter().map(HexRecord::len).sum()
    }

    /// Lowest start and highest end address covered by any record.
    pub fn address_range(&self) -> Option<(u32, u32)> {
        let start = self.records.iter().map(HexRecord::address).min()?;
        let end = self.records.iter().map(HexRecord::end_address).max()?;
        Some((start, end))
    }
}

impl<'a> IntoIterator for &'a HexFile {
    type Item = &'a HexRecord;
    type IntoIter = std::slice::Iter<'a, HexRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Incremental parser. Feed it lines in order, then call [`finish`].
///
/// [`finish`]: HexParser::finish
#[derive(Debug, Default)]
pub struct HexParser {
    file: HexFile,
    ext_segment_addr: u16,
    ext_linear_addr: u16,
    line: usize,
}

struct RawRecord {
    record_type: RecordType,
    address: u16,
    data: Vec<u8>,
}

impl HexParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one line. Trailing CR/LF is ignored and blank lines skipped.
    pub fn feed_line(&mut self, raw: &[u8]) -> Result<(), ParseError> {
        self.line += 1;
        let line = trim_line_end(raw);
        if line.is_empty() {
            return Ok(());
        }
        if self.file.has_eof {
            return Err(ParseError::DataAfterEof { line: self.line });
        }

        let record = parse_record(self.line, line)?;
        let data = record.data;
        match record.record_type {
            RecordType::Data => {
                let address = (u32::from(record.address)
                    + u32::from(self.ext_segment_addr) * 16)
                    | (u32::from(self.ext_linear_addr) << 16);
                self.file.records.push(HexRecord { address, data });
            }
            RecordType::EndOfFile => self.file.has_eof = true,
            RecordType::ExtSegmentAddr => self.ext_segment_addr = be_u16(&data),
            RecordType::ExtLinearAddr => self.ext_linear_addr = be_u16(&data),
            RecordType::StartSegmentAddr => {
                self.file.start_address = Some(StartAddress::Segment(be_u32(&data)))
            }
            RecordType::StartLinearAddr => {
                self.file.start_address = Some(StartAddress::Linear(be_u32(&data)))
            }
        }
        Ok(())
    }

    /// Finish parsing. Fails if no EOF record was seen.
    pub fn finish(self) -> Result<HexFile, ParseError> {
        if !self.file.has_eof {
            return Err(ParseError::MissingEof);
        }
        Ok(self.file)
    }
}

fn trim_line_end(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b'\r' | b'\n'] = line {
        line = rest;
    }
    line
}

fn parse_record(line_no: usize, line: &[u8]) -> Result<RawRecord, ParseError> {
    let malformed = |reason| ParseError::Malformed {
        line: line_no,
        reason,
    };

    if line[0] != b':' {
        return Err(malformed("does not start with ':'"));
    }
    if line.len() < MIN_RECORD_LEN {
        return Err(malformed("not long enough"));
    }

    let length = hex_byte(&line[1..3]).ok_or_else(|| malformed("length not a valid number"))?;
    let expected = MIN_RECORD_LEN + 2 * length as usize;
    if line.len() != expected {
        return Err(ParseError::LengthMismatch {
            line: line_no,
            expected,
            actual: line.len(),
        });
    }

    let addr_hi = hex_byte(&line[3..5]).ok_or_else(|| malformed("address not a valid number"))?;
    let addr_lo = hex_byte(&line[5..7]).ok_or_else(|| malformed("address not a valid number"))?;

    let type_byte = hex_byte(&line[7..9]).ok_or_else(|| malformed("type not a valid number"))?;
    let record_type = RecordType::from_u8(type_byte).ok_or(ParseError::UnknownType {
        line: line_no,
        record_type: type_byte,
    })?;

    let checksum = hex_byte(&line[expected - 2..])
        .ok_or_else(|| malformed("checksum is not a valid number"))?;

    let data = line[9..expected - 2]
        .chunks_exact(2)
        .map(hex_byte)
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| malformed("invalid data"))?;

    let sum = data
        .iter()
        .fold(length.wrapping_add(addr_hi).wrapping_add(addr_lo), |sum, b| {
            sum.wrapping_add(*b)
        })
        .wrapping_add(type_byte)
        .wrapping_add(checksum);
    if sum != 0 {
        return Err(ParseError::BadChecksum { line: line_no, sum });
    }

    if record_type
        .payload_len()
        .is_some_and(|required| data.len() != required)
    {
        return Err(malformed("address record has wrong payload size"));
    }

    Ok(RawRecord {
        record_type,
        address: u16::from_be_bytes([addr_hi, addr_lo]),
        data,
    })
}

fn hex_byte(pair: &[u8]) -> Option<u8> {
    let hi = (pair[0] as char).to_digit(16)?;
    let lo = (pair[1] as char).to_digit(16)?;
    Some(((hi << 4) | lo) as u8)
}

fn be_u16(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[0], data[1]])
}

fn be_u32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a record line with a correct checksum.
    fn record(record_type: u8, address: u16, data: &[u8]) -> String {
        let [hi, lo] = address.to_be_bytes();
        let mut bytes = vec![data.len() as u8, hi, lo, record_type];
        bytes.extend_from_slice(data);
        let sum = bytes.iter().fold(0u8, |s, b| s.wrapping_add(*b));
        bytes.push(sum.wrapping_neg());
        let body: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
        format!(":{}", body)
    }

    const EOF: &str = ":00000001FF";

    #[test]
    fn test_single_data_record() {
        let data: Vec<u8> = (0..16).collect();
        let text = format!("{}\n{}\n", record(0x00, 0x0000, &data), EOF);
        let hex = HexFile::parse(&text).unwrap();

        assert!(hex.has_eof());
        assert_eq!(hex.num_records(), 1);
        assert_eq!(hex.records()[0].address(), 0);
        assert_eq!(hex.records()[0].data(), &data[..]);
        assert_eq!(hex.total_bytes(), 16);
        assert_eq!(hex.address_range(), Some((0, 16)));
    }

    #[test]
    fn test_known_line() {
        let text = ":0B0010006164647265737320676170A7\n:00000001FF\n";
        let hex = HexFile::parse(text).unwrap();
        assert_eq!(hex.records()[0].address(), 0x0010);
        assert_eq!(hex.records()[0].data(), b"address gap");
    }

    #[test]
    fn test_records_roundtrip_in_file_order() {
        let records = [
            (0x0400u16, vec![0xAAu8, 0xBB, 0xCC]),
            (0x0100, vec![0x01]),
            (0xFFF0, (0..=0xFF).collect::<Vec<u8>>()[..16].to_vec()),
            (0x0200, vec![]),
        ];
        let mut text = String::new();
        for (address, data) in &records {
            text.push_str(&record(0x00, *address, data));
            text.push('\n');
        }
        text.push_str(EOF);

        let hex = HexFile::parse(&text).unwrap();
        assert_eq!(hex.num_records(), records.len());
        for (parsed, (address, data)) in hex.iter().zip(records.iter()) {
            assert_eq!(parsed.address(), u32::from(*address));
            assert_eq!(parsed.data(), &data[..]);
        }
    }

    #[test]
    fn test_max_length_record() {
        let data = vec![0x5A; 255];
        let text = format!("{}\n{}", record(0x00, 0x1000, &data), EOF);
        let hex = HexFile::parse(&text).unwrap();
        assert_eq!(hex.records()[0].len(), 255);
    }

    #[test]
    fn test_lowercase_and_crlf() {
        let text = format!(
            "{}\r\n\r\n{}\r\n",
            record(0x00, 0x00AB, &[0xDE, 0xAD]).to_lowercase(),
            EOF
        );
        let hex = HexFile::parse(&text).unwrap();
        assert_eq!(hex.records()[0].address(), 0xAB);
        assert_eq!(hex.records()[0].data(), &[0xDE, 0xAD]);
    }

    #[test]
    fn test_single_byte_corruption_fails_checksum() {
        let line = record(0x00, 0x1234, &[0x10, 0x20, 0x30, 0x40]);
        // Every byte but the length, which the length check catches first.
        // A data type of 0x00 bumped to 0x01 is still a known type.
        for byte in [1usize, 2, 3, 4, 5, 6, 7, 8] {
            let offset = 1 + byte * 2;
            let original = hex_byte(&line.as_bytes()[offset..offset + 2]).unwrap();
            let corrupted = format!(
                "{}{:02X}{}",
                &line[..offset],
                original.wrapping_add(1),
                &line[offset + 2..]
            );
            let text = format!("{}\n{}", corrupted, EOF);
            assert!(
                matches!(
                    HexFile::parse(&text),
                    Err(ParseError::BadChecksum { line: 1, .. })
                ),
                "byte {} corruption not detected",
                byte
            );
        }
    }

    #[test]
    fn test_ext_linear_applies_only_forward() {
        let text = [
            record(0x00, 0x0010, &[0x01]),
            record(0x04, 0x0000, &[0x00, 0x30]),
            record(0x00, 0x0000, &[0x02]),
            EOF.to_string(),
        ]
        .join("\n");
        let hex = HexFile::parse(&text).unwrap();
        assert_eq!(hex.records()[0].address(), 0x0000_0010);
        assert_eq!(hex.records()[1].address(), 0x0030_0000);
    }

    #[test]
    fn test_ext_segment_address() {
        let text = [
            record(0x02, 0x0000, &[0x10, 0x00]),
            record(0x00, 0x0004, &[0x01]),
            EOF.to_string(),
        ]
        .join("\n");
        let hex = HexFile::parse(&text).unwrap();
        assert_eq!(hex.records()[0].address(), 0x0001_0004);
    }

    #[test]
    fn test_start_addresses() {
        let text = [record(0x05, 0, &[0x00, 0x00, 0x03, 0x00]), EOF.to_string()].join("\n");
        let hex = HexFile::parse(&text).unwrap();
        assert_eq!(hex.start_address(), Some(StartAddress::Linear(0x300)));
        assert!(hex.is_empty());

        let text = [record(0x03, 0, &[0x12, 0x34, 0x56, 0x78]), EOF.to_string()].join("\n");
        let hex = HexFile::parse(&text).unwrap();
        assert_eq!(
            hex.start_address(),
            Some(StartAddress::Segment(0x1234_5678))
        );
    }

    #[test]
    fn test_data_after_eof() {
        let text = format!("{}\n{}\n", EOF, record(0x00, 0, &[1, 2]));
        assert!(matches!(
            HexFile::parse(&text),
            Err(ParseError::DataAfterEof { line: 2 })
        ));
    }

    #[test]
    fn test_blank_lines_after_eof_allowed() {
        let text = format!("{}\n{}\n\n\r\n", record(0x00, 0, &[1]), EOF);
        assert!(HexFile::parse(&text).is_ok());
    }

    #[test]
    fn test_missing_eof() {
        let text = record(0x00, 0, &[1, 2, 3]);
        assert!(matches!(
            HexFile::parse(&text),
            Err(ParseError::MissingEof)
        ));
        assert!(matches!(HexFile::parse(""), Err(ParseError::MissingEof)));
    }

    #[test]
    fn test_malformed_lines() {
        for text in [
            "00000001FF",
            ":0000001F",
            ":0G000001FF",
            ":00000001FZ",
            ":01000000ZZ00",
        ] {
            assert!(
                matches!(HexFile::parse(text), Err(ParseError::Malformed { line: 1, .. })),
                "{:?} should be malformed",
                text
            );
        }
    }

    #[test]
    fn test_length_mismatch() {
        // Declares 2 data bytes but carries 1.
        assert!(matches!(
            HexFile::parse(":0200000001FD\n:00000001FF"),
            Err(ParseError::LengthMismatch {
                line: 1,
                expected: 15,
                actual: 13
            })
        ));
    }

    #[test]
    fn test_unknown_type() {
        assert!(matches!(
            HexFile::parse(":00000006FA"),
            Err(ParseError::UnknownType {
                line: 1,
                record_type: 6
            })
        ));
    }

    #[test]
    fn test_wrong_address_payload_size() {
        let text = format!("{}\n{}", record(0x04, 0, &[0x00]), EOF);
        assert!(matches!(
            HexFile::parse(&text),
            Err(ParseError::Malformed { line: 1, .. })
        ));
    }

    #[test]
    fn test_streaming_parser() {
        let mut parser = HexParser::new();
        parser.feed_line(record(0x00, 8, &[9]).as_bytes()).unwrap();
        parser.feed_line(b"\n").unwrap();
        parser.feed_line(EOF.as_bytes()).unwrap();
        let hex = parser.finish().unwrap();
        assert_eq!(hex.records(), &[HexRecord::new(8, vec![9])]);
    }
}
