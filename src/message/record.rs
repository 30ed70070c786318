use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::util::{be_u48, put_u48};
use super::ProtocolVersion;
use crate::Error;

/// Size of the DTLS record header: type, version, epoch, 48-bit sequence, length.
pub const RECORD_HEADER_SIZE: usize = 13;

/// Largest record sequence number before the per-epoch counter must not be
/// used anymore (RFC 6347 Section 4.1).
pub const MAX_SEQUENCE_NUMBER: u64 = (1 << 48) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
}

impl ContentType {
    pub fn from_u8(value: u8) -> Result<Self, Error> {
        match value {
            20 => Ok(ContentType::ChangeCipherSpec),
            21 => Ok(ContentType::Alert),
            22 => Ok(ContentType::Handshake),
            23 => Ok(ContentType::ApplicationData),
            _ => Err(Error::InvalidContentType(value)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
        }
    }
}

/// The 13-byte DTLS record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub epoch: u16,
    pub sequence_number: u64,
    pub length: u16,
}

impl RecordHeader {
    /// Decode a record header from the front of `input`.
    ///
    /// Fails with `BufferTooSmall`, `InvalidContentType` or
    /// `UnsupportedVersion` without touching bytes past the header.
    pub fn unmarshal(input: &[u8]) -> Result<RecordHeader, Error> {
        if input.len() < RECORD_HEADER_SIZE {
            return Err(Error::BufferTooSmall);
        }

        let content_type = ContentType::from_u8(input[0])?;
        let version = ProtocolVersion::from_bytes(input[1], input[2])
            .ok_or(Error::UnsupportedVersion(input[1], input[2]))?;
        let epoch = u16::from_be_bytes([input[3], input[4]]);
        let mut sequence_number = 0u64;
        for b in &input[5..11] {
            sequence_number = (sequence_number << 8) | u64::from(*b);
        }
        let length = u16::from_be_bytes([input[11], input[12]]);

        Ok(RecordHeader {
            content_type,
            version,
            epoch,
            sequence_number,
            length,
        })
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.content_type.as_u8());
        self.version.serialize(output);
        output.extend_from_slice(&self.epoch.to_be_bytes());
        put_u48(output, self.sequence_number);
        output.extend_from_slice(&self.length.to_be_bytes());
    }
}

/// A full record: header plus the (possibly encrypted) fragment bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtlsRecord {
    pub header: RecordHeader,
    pub fragment: Vec<u8>,
}

impl DtlsRecord {
    pub fn unmarshal(input: &[u8]) -> Result<DtlsRecord, Error> {
        let header = RecordHeader::unmarshal(input)?;
        let end = RECORD_HEADER_SIZE + header.length as usize;
        if input.len() < end {
            return Err(Error::InvalidPacketLength);
        }
        Ok(DtlsRecord {
            header,
            fragment: input[RECORD_HEADER_SIZE..end].to_vec(),
        })
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.header.serialize(output);
        output.extend_from_slice(&self.fragment);
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], DtlsRecord> {
        let (input, ct) = be_u8(input)?;
        let content_type = ContentType::from_u8(ct).map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
        })?;
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, epoch) = be_u16(input)?;
        let (input, sequence_number) = be_u48(input)?;
        let (input, length) = be_u16(input)?;
        let (input, fragment) = take(length as usize)(input)?;

        Ok((
            input,
            DtlsRecord {
                header: RecordHeader {
                    content_type,
                    version,
                    epoch,
                    sequence_number,
                    length,
                },
                fragment: fragment.to_vec(),
            },
        ))
    }
}

/// Split one UDP payload into the distinct records it contains.
///
/// RFC 6347 Section 4.2.3 permits multiple records per datagram. Returns
/// `InvalidPacketLength` if a declared record length overruns the buffer.
/// This only consults the length field; broken headers inside individual
/// records are left for the per-record decode to reject.
pub fn unpack_datagram(buf: &[u8]) -> Result<Vec<&[u8]>, Error> {
    let mut out = Vec::new();
    let mut offset = 0usize;

    while offset < buf.len() {
        let remaining = &buf[offset..];
        if remaining.len() < RECORD_HEADER_SIZE {
            return Err(Error::InvalidPacketLength);
        }
        let length = u16::from_be_bytes([remaining[11], remaining[12]]) as usize;
        let end = RECORD_HEADER_SIZE + length;
        if remaining.len() < end {
            return Err(Error::InvalidPacketLength);
        }
        out.push(&remaining[..end]);
        offset += end;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &[u8] = &[
        0x16, // ContentType::Handshake
        0xFE, 0xFD, // ProtocolVersion::DTLS1_2
        0x00, 0x01, // epoch
        0x00, 0x00, 0x00, 0x00, 0x00, 0x01, // sequence_number
        0x00, 0x08, // length
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // fragment
    ];

    #[test]
    fn roundtrip() {
        let record = DtlsRecord::unmarshal(RECORD).unwrap();
        assert_eq!(record.header.content_type, ContentType::Handshake);
        assert_eq!(record.header.epoch, 1);
        assert_eq!(record.header.sequence_number, 1);
        assert_eq!(record.header.length, 8);

        let mut serialized = Vec::new();
        record.serialize(&mut serialized);
        assert_eq!(serialized, RECORD);
    }

    #[test]
    fn header_too_short() {
        // One byte less than the header size must fail cleanly.
        assert_eq!(
            RecordHeader::unmarshal(&RECORD[..12]),
            Err(Error::BufferTooSmall)
        );
    }

    #[test]
    fn bad_content_type() {
        let mut buf = RECORD.to_vec();
        buf[0] = 99;
        assert_eq!(
            RecordHeader::unmarshal(&buf),
            Err(Error::InvalidContentType(99))
        );
    }

    #[test]
    fn bad_version() {
        let mut buf = RECORD.to_vec();
        buf[1] = 0x03;
        buf[2] = 0x03;
        assert_eq!(
            RecordHeader::unmarshal(&buf),
            Err(Error::UnsupportedVersion(0x03, 0x03))
        );
    }

    #[test]
    fn unpack_two_records() {
        let mut buf = RECORD.to_vec();
        buf.extend_from_slice(RECORD);
        let records = unpack_datagram(&buf).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], RECORD);
        assert_eq!(records[1], RECORD);
    }

    #[test]
    fn unpack_overrun() {
        let mut buf = RECORD.to_vec();
        // Declare more content than the datagram holds.
        buf[12] = 0xFF;
        assert_eq!(unpack_datagram(&buf), Err(Error::InvalidPacketLength));
    }

    #[test]
    fn unpack_trailing_garbage() {
        let mut buf = RECORD.to_vec();
        buf.extend_from_slice(&[0x16, 0xFE]);
        assert_eq!(unpack_datagram(&buf), Err(Error::InvalidPacketLength));
    }
}
