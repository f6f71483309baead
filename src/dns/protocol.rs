//! Implements the subset of the DNS wire protocol an authoritative
//! responder needs: query parsing and response serialization.

use std::fmt;
use std::net::Ipv4Addr;

use derive_more::{Display, Error, From};
use serde_derive::Deserialize;

use crate::dns::buffer::PacketBuffer;

/// NAME field of every answer record: a compression pointer to the question
/// name, which always starts right after the fixed 12-byte header.
pub const QUESTION_NAME_POINTER: u16 = 0xC00C;

/// Byte length of the fixed DNS header
pub const HEADER_SIZE: usize = 12;

#[derive(Debug, Display, From, Error)]
pub enum ProtocolError {
    Buffer(crate::dns::buffer::BufferError),
    #[display(fmt = "query advertises no question")]
    #[from(ignore)]
    NoQuestion,
    #[display(fmt = "record value {:?} is not a valid IPv4 address", value)]
    #[from(ignore)]
    InvalidRdata { value: String },
}

type Result<T> = std::result::Result<T, ProtocolError>;

/// `QueryType` represents the requested record type of a query.
///
/// Only address queries are answered; every other code is retained as
/// `Unknown` so it can be echoed back in the response's question section.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum QueryType {
    Unknown(u16),
    A, // 1
}

impl QueryType {
    pub fn to_num(&self) -> u16 {
        match *self {
            QueryType::Unknown(x) => x,
            QueryType::A => 1,
        }
    }

    pub fn from_num(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            _ => QueryType::Unknown(num),
        }
    }
}

/// The kind tag under which records are grouped inside a zone.
///
/// Doubles as the JSON key in zone files (`"a"`). Adding a record kind means
/// adding a variant here and handling it exhaustively wherever the compiler
/// points.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    A,
}

impl RecordKind {
    /// The kind a question type maps to, if the server answers it at all
    pub fn from_qtype(qtype: QueryType) -> Option<RecordKind> {
        match qtype {
            QueryType::A => Some(RecordKind::A),
            QueryType::Unknown(_) => None,
        }
    }

    pub fn to_qtype(self) -> QueryType {
        match self {
            RecordKind::A => QueryType::A,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RecordKind::A => write!(f, "A"),
        }
    }
}

/// A single record as configured in a zone file.
///
/// The TTL is relayed to clients verbatim; this server never expires
/// anything itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ZoneRecord {
    pub ttl: u32,
    pub value: String,
}

impl ZoneRecord {
    /// Parse the record value as a dotted-quad IPv4 address
    pub fn address(&self) -> Result<Ipv4Addr> {
        self.value
            .parse::<Ipv4Addr>()
            .map_err(|_| ProtocolError::InvalidRdata {
                value: self.value.clone(),
            })
    }

    /// Serialize this record as an answer resource record.
    ///
    /// Layout: NAME (pointer to the question), TYPE, CLASS, TTL, RDLENGTH,
    /// RDATA. For an A record RDLENGTH is 4 and RDATA is the address octets.
    pub fn write_answer<T: PacketBuffer>(&self, kind: RecordKind, buffer: &mut T) -> Result<usize> {
        let start_pos = buffer.pos();

        buffer.write_u16(QUESTION_NAME_POINTER)?;

        match kind {
            RecordKind::A => {
                let addr = self.address()?;

                buffer.write_u16(QueryType::A.to_num())?;
                buffer.write_u16(1)?;
                buffer.write_u32(self.ttl)?;
                buffer.write_u16(4)?;

                let octets = addr.octets();
                buffer.write_u8(octets[0])?;
                buffer.write_u8(octets[1])?;
                buffer.write_u8(octets[2])?;
                buffer.write_u8(octets[3])?;
            }
        }

        Ok(buffer.pos() - start_pos)
    }
}

/// The result code for a DNS query
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResultCode {
    NOERROR = 0,
    FORMERR = 1,
    SERVFAIL = 2,
    NXDOMAIN = 3,
    NOTIMP = 4,
    REFUSED = 5,
}

impl Default for ResultCode {
    fn default() -> Self {
        ResultCode::NOERROR
    }
}

impl ResultCode {
    pub fn from_num(num: u8) -> ResultCode {
        match num {
            1 => ResultCode::FORMERR,
            2 => ResultCode::SERVFAIL,
            3 => ResultCode::NXDOMAIN,
            4 => ResultCode::NOTIMP,
            5 => ResultCode::REFUSED,
            _ => ResultCode::NOERROR,
        }
    }
}

/// Representation of a DNS header
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16, // 16 bits

    pub recursion_desired: bool,    // 1 bit
    pub truncated_message: bool,    // 1 bit
    pub authoritative_answer: bool, // 1 bit
    pub opcode: u8,                 // 4 bits
    pub response: bool,             // 1 bit

    pub rescode: ResultCode,       // 4 bits
    pub z: u8,                     // 3 bits
    pub recursion_available: bool, // 1 bit

    pub questions: u16,             // 16 bits
    pub answers: u16,               // 16 bits
    pub authoritative_entries: u16, // 16 bits
    pub resource_entries: u16,      // 16 bits
}

impl DnsHeader {
    pub fn new() -> DnsHeader {
        DnsHeader::default()
    }

    /// Header for the response to `request`: the transaction id and opcode
    /// carry over, everything else is fixed. This server is authoritative
    /// for every zone it knows, never truncates, and never recurses.
    pub fn response_to(request: &DnsHeader, answers: u16) -> DnsHeader {
        DnsHeader {
            id: request.id,
            response: true,
            opcode: request.opcode,
            authoritative_answer: true,
            questions: 1,
            answers,
            ..DnsHeader::default()
        }
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_u16(self.id)?;

        buffer.write_u8(
            (self.recursion_desired as u8)
                | ((self.truncated_message as u8) << 1)
                | ((self.authoritative_answer as u8) << 2)
                | (self.opcode << 3)
                | ((self.response as u8) << 7),
        )?;

        buffer.write_u8(
            (self.rescode as u8)
                | (self.z << 4)
                | ((self.recursion_available as u8) << 7),
        )?;

        buffer.write_u16(self.questions)?;
        buffer.write_u16(self.answers)?;
        buffer.write_u16(self.authoritative_entries)?;
        buffer.write_u16(self.resource_entries)?;

        Ok(())
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        self.id = buffer.read_u16()?;

        let flags = buffer.read_u16()?;
        let a = (flags >> 8) as u8;
        let b = (flags & 0xFF) as u8;
        self.recursion_desired = (a & (1 << 0)) > 0;
        self.truncated_message = (a & (1 << 1)) > 0;
        self.authoritative_answer = (a & (1 << 2)) > 0;
        self.opcode = (a >> 3) & 0x0F;
        self.response = (a & (1 << 7)) > 0;

        self.rescode = ResultCode::from_num(b & 0x0F);
        self.z = (b >> 4) & 0x07;
        self.recursion_available = (b & (1 << 7)) > 0;

        self.questions = buffer.read_u16()?;
        self.answers = buffer.read_u16()?;
        self.authoritative_entries = buffer.read_u16()?;
        self.resource_entries = buffer.read_u16()?;

        Ok(())
    }
}

/// Representation of a DNS question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub labels: Vec<String>,
    pub qtype: QueryType,
}

impl DnsQuestion {
    pub fn new(labels: Vec<String>, qtype: QueryType) -> DnsQuestion {
        DnsQuestion { labels, qtype }
    }

    /// The question name as a dot-joined string, used as the zone lookup key
    pub fn name(&self) -> String {
        self.labels.join(".")
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_qname(&self.labels)?;
        buffer.write_u16(self.qtype.to_num())?;
        buffer.write_u16(1)?; // class IN

        Ok(())
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        buffer.read_qname(&mut self.labels)?;
        self.qtype = QueryType::from_num(buffer.read_u16()?);
        let _ = buffer.read_u16()?; // class

        Ok(())
    }
}

impl fmt::Display for DnsQuestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.name(), self.qtype)
    }
}

/// A parsed inbound query: the header plus its single question.
///
/// Request-scoped; built fresh for every datagram and dropped once the
/// response has been serialized.
#[derive(Debug, Clone)]
pub struct DnsQuery {
    pub header: DnsHeader,
    pub question: DnsQuestion,
}

impl DnsQuery {
    /// Parse a raw query. Exactly one question is read, starting at offset
    /// 12; multi-question messages are outside this server's contract and
    /// any questions past the first are ignored.
    pub fn from_buffer<T: PacketBuffer>(buffer: &mut T) -> Result<DnsQuery> {
        let mut header = DnsHeader::new();
        header.read(buffer)?;

        if header.questions == 0 {
            return Err(ProtocolError::NoQuestion);
        }

        let mut question = DnsQuestion::new(Vec::new(), QueryType::Unknown(0));
        question.read(buffer)?;

        Ok(DnsQuery { header, question })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::buffer::{BytePacketBuffer, VectorPacketBuffer};

    use proptest::prelude::*;

    fn labels(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|x| x.to_string()).collect()
    }

    fn header_bytes(header: &DnsHeader) -> Vec<u8> {
        let mut buffer = VectorPacketBuffer::new();
        header.write(&mut buffer).unwrap();
        buffer.bytes().to_vec()
    }

    #[test]
    fn test_response_header_flags() {
        let mut request = DnsHeader::new();
        request.id = 0xBEEF;
        request.opcode = 2;
        request.recursion_desired = true;
        request.questions = 1;

        let bytes = header_bytes(&DnsHeader::response_to(&request, 3));

        assert_eq!(
            vec![
                0xBE, 0xEF, // id copied
                0x94, 0x00, // QR=1 opcode=2 AA=1 TC=0 RD=0, RA=0 Z=0 RCODE=0
                0x00, 0x01, // one question
                0x00, 0x03, // three answers
                0x00, 0x00, // no authority records
                0x00, 0x00, // no additional records
            ],
            bytes
        );
    }

    #[test]
    fn test_header_write_is_pure() {
        let header = DnsHeader::response_to(
            &DnsHeader {
                id: 77,
                opcode: 1,
                ..DnsHeader::default()
            },
            2,
        );

        let first = header_bytes(&header);
        let second = header_bytes(&header);
        assert_eq!(first, second);
        assert_eq!(HEADER_SIZE, first.len());
    }

    #[test]
    fn test_header_roundtrip() {
        let mut header = DnsHeader::new();
        header.id = 1337;
        header.opcode = 4;
        header.response = true;
        header.authoritative_answer = true;
        header.rescode = ResultCode::NXDOMAIN;
        header.questions = 1;
        header.answers = 2;

        let mut buffer = VectorPacketBuffer::new();
        header.write(&mut buffer).unwrap();
        buffer.seek(0).unwrap();

        let mut parsed = DnsHeader::new();
        parsed.read(&mut buffer).unwrap();
        assert_eq!(header, parsed);
    }

    #[test]
    fn test_question_encoding_appends_terminator_and_class() {
        let question = DnsQuestion::new(labels(&["example", "com"]), QueryType::A);

        let mut buffer = VectorPacketBuffer::new();
        question.write(&mut buffer).unwrap();

        assert_eq!(
            vec![
                7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm',
                0, // name terminator
                0, 1, // type A
                0, 1, // class IN
            ],
            buffer.bytes().to_vec()
        );
    }

    #[test]
    fn test_record_kind_query_type_mapping() {
        assert_eq!(Some(RecordKind::A), RecordKind::from_qtype(QueryType::A));
        assert_eq!(None, RecordKind::from_qtype(QueryType::Unknown(28)));
        assert_eq!(QueryType::A, RecordKind::A.to_qtype());
    }

    #[test]
    fn test_answer_record_encoding() {
        let record = ZoneRecord {
            ttl: 300,
            value: "93.184.216.34".to_string(),
        };

        let mut buffer = VectorPacketBuffer::new();
        let len = record.write_answer(RecordKind::A, &mut buffer).unwrap();

        assert_eq!(
            vec![
                0xC0, 0x0C, // pointer to the question name
                0, 1, // type A
                0, 1, // class IN
                0, 0, 1, 44, // ttl 300, big-endian
                0, 4, // rdlength
                93, 184, 216, 34, // rdata
            ],
            buffer.bytes().to_vec()
        );
        assert_eq!(len, buffer.bytes().len());
    }

    #[test]
    fn test_answer_record_rejects_bad_address() {
        let record = ZoneRecord {
            ttl: 60,
            value: "10.0.0.256".to_string(),
        };

        let mut buffer = VectorPacketBuffer::new();
        match record.write_answer(RecordKind::A, &mut buffer) {
            Err(ProtocolError::InvalidRdata { value }) => assert_eq!("10.0.0.256", value),
            other => panic!("expected InvalidRdata, got {:?}", other),
        }
    }

    #[test]
    fn test_query_with_zero_questions_is_rejected() {
        let mut buffer = VectorPacketBuffer::new();
        DnsHeader::new().write(&mut buffer).unwrap();
        buffer.seek(0).unwrap();

        match DnsQuery::from_buffer(&mut buffer) {
            Err(ProtocolError::NoQuestion) => {}
            other => panic!("expected NoQuestion, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_query_is_rejected() {
        // A header promising a question, then a label length that runs past
        // the end of the message
        let mut raw = vec![0u8; HEADER_SIZE];
        raw[1] = 0x2A; // id
        raw[5] = 1; // qdcount
        raw.push(42); // label of 42 bytes, none present

        let mut buffer = VectorPacketBuffer::new();
        for b in &raw {
            buffer.write_u8(*b).unwrap();
        }
        buffer.seek(0).unwrap();

        match DnsQuery::from_buffer(&mut buffer) {
            Err(ProtocolError::Buffer(_)) => {}
            other => panic!("expected buffer error, got {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn prop_query_roundtrip(
            id in any::<u16>(),
            parts in proptest::collection::vec("[a-z][a-z0-9-]{0,14}", 1..5),
            qtype_num in 1u16..300,
        ) {
            let question = DnsQuestion::new(
                parts.clone(),
                QueryType::from_num(qtype_num),
            );

            let mut header = DnsHeader::new();
            header.id = id;
            header.questions = 1;

            let mut out = VectorPacketBuffer::new();
            header.write(&mut out).unwrap();
            question.write(&mut out).unwrap();

            let mut inbound = BytePacketBuffer::from_slice(out.bytes());
            let query = DnsQuery::from_buffer(&mut inbound).unwrap();

            prop_assert_eq!(id, query.header.id);
            prop_assert_eq!(parts, query.question.labels);
            prop_assert_eq!(qtype_num, query.question.qtype.to_num());
        }
    }
}
