use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::extensions::{
    AlpnExt, ServerNameExt, SignatureAlgorithmsExt, SupportedGroupsExt, UseSrtpExt,
};

const EXT_SERVER_NAME: u16 = 0;
const EXT_SUPPORTED_GROUPS: u16 = 10;
const EXT_EC_POINT_FORMATS: u16 = 11;
const EXT_SIGNATURE_ALGORITHMS: u16 = 13;
const EXT_USE_SRTP: u16 = 14;
const EXT_ALPN: u16 = 16;
const EXT_EXTENDED_MASTER_SECRET: u16 = 23;
const EXT_RENEGOTIATION_INFO: u16 = 0xFF01;

const POINT_FORMAT_UNCOMPRESSED: u8 = 0;

/// Hello extensions this implementation understands. Anything else is carried
/// opaquely so serialization round-trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    ServerName(ServerNameExt),
    SupportedGroups(SupportedGroupsExt),
    EcPointFormats,
    SignatureAlgorithms(SignatureAlgorithmsExt),
    UseSrtp(UseSrtpExt),
    Alpn(AlpnExt),
    ExtendedMasterSecret,
    RenegotiationInfo,
    Unknown(u16, Vec<u8>),
}

impl Extension {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Extension> {
        let (input, ext_type) = be_u16(input)?;
        let (input, length) = be_u16(input)?;
        let (input, data) = take(length)(input)?;

        let ext = match ext_type {
            EXT_SERVER_NAME => Extension::ServerName(ServerNameExt::parse(data)?.1),
            EXT_SUPPORTED_GROUPS => Extension::SupportedGroups(SupportedGroupsExt::parse(data)?.1),
            EXT_EC_POINT_FORMATS => {
                // We only produce uncompressed points; accept any offer.
                let (rest, count) = be_u8(data)?;
                let _ = take(count)(rest)?;
                Extension::EcPointFormats
            }
            EXT_SIGNATURE_ALGORITHMS => {
                Extension::SignatureAlgorithms(SignatureAlgorithmsExt::parse(data)?.1)
            }
            EXT_USE_SRTP => Extension::UseSrtp(UseSrtpExt::parse(data)?.1),
            EXT_ALPN => Extension::Alpn(AlpnExt::parse(data)?.1),
            EXT_EXTENDED_MASTER_SECRET => Extension::ExtendedMasterSecret,
            EXT_RENEGOTIATION_INFO => Extension::RenegotiationInfo,
            _ => Extension::Unknown(ext_type, data.to_vec()),
        };

        Ok((input, ext))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        let mut data = Vec::new();
        let ext_type = match self {
            Extension::ServerName(ext) => {
                ext.serialize(&mut data);
                EXT_SERVER_NAME
            }
            Extension::SupportedGroups(ext) => {
                ext.serialize(&mut data);
                EXT_SUPPORTED_GROUPS
            }
            Extension::EcPointFormats => {
                data.push(1);
                data.push(POINT_FORMAT_UNCOMPRESSED);
                EXT_EC_POINT_FORMATS
            }
            Extension::SignatureAlgorithms(ext) => {
                ext.serialize(&mut data);
                EXT_SIGNATURE_ALGORITHMS
            }
            Extension::UseSrtp(ext) => {
                ext.serialize(&mut data);
                EXT_USE_SRTP
            }
            Extension::Alpn(ext) => {
                ext.serialize(&mut data);
                EXT_ALPN
            }
            Extension::ExtendedMasterSecret => EXT_EXTENDED_MASTER_SECRET,
            Extension::RenegotiationInfo => {
                // renegotiated_connection, empty (RFC 5746).
                data.push(0);
                EXT_RENEGOTIATION_INFO
            }
            Extension::Unknown(ext_type, bytes) => {
                data.extend_from_slice(bytes);
                *ext_type
            }
        };

        output.extend_from_slice(&ext_type.to_be_bytes());
        output.extend_from_slice(&(data.len() as u16).to_be_bytes());
        output.extend_from_slice(&data);
    }
}

/// Parse the optional extensions block at the tail of a hello message. An
/// absent block is valid and yields an empty list.
pub fn parse_extensions(input: &[u8]) -> IResult<&[u8], Vec<Extension>> {
    if input.is_empty() {
        return Ok((input, Vec::new()));
    }

    let (input, total) = be_u16(input)?;
    let (input, mut data) = take(total)(input)?;

    let mut extensions = Vec::new();
    while !data.is_empty() {
        let (rest, ext) = Extension::parse(data)?;
        extensions.push(ext);
        data = rest;
    }

    Ok((input, extensions))
}

/// Serialize an extensions block; nothing is written for an empty list.
pub fn serialize_extensions(extensions: &[Extension], output: &mut Vec<u8>) {
    if extensions.is_empty() {
        return;
    }

    let mut data = Vec::new();
    for ext in extensions {
        ext.serialize(&mut data);
    }
    output.extend_from_slice(&(data.len() as u16).to_be_bytes());
    output.extend_from_slice(&data);
}

#[cfg(test)]
mod tests {
    use super::super::extensions::default_signature_schemes;
    use super::*;

    #[test]
    fn block_roundtrip() {
        let extensions = vec![
            Extension::SignatureAlgorithms(SignatureAlgorithmsExt::new(
                &default_signature_schemes(),
            )),
            Extension::ExtendedMasterSecret,
            Extension::RenegotiationInfo,
            Extension::Unknown(0x1234, vec![0xAB, 0xCD]),
        ];

        let mut out = Vec::new();
        serialize_extensions(&extensions, &mut out);

        let (rest, parsed) = parse_extensions(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, extensions);
    }

    #[test]
    fn absent_block() {
        let (_, parsed) = parse_extensions(&[]).unwrap();
        assert!(parsed.is_empty());
    }
}
