use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::extension::{parse_extensions, serialize_extensions, Extension};
use super::{ProtocolVersion, Random};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub version: ProtocolVersion,
    pub random: Random,
    pub session_id: Vec<u8>,
    pub cipher_suite: u16,
    pub compression_method: u8,
    pub extensions: Vec<Extension>,
}

impl ServerHello {
    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerHello> {
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;

        let (input, session_id_len) = be_u8(input)?;
        let (input, session_id) = take(session_id_len)(input)?;

        let (input, cipher_suite) = be_u16(input)?;
        let (input, compression_method) = be_u8(input)?;
        let (input, extensions) = parse_extensions(input)?;

        Ok((
            input,
            ServerHello {
                version,
                random,
                session_id: session_id.to_vec(),
                cipher_suite,
                compression_method,
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.version.serialize(output);
        self.random.serialize(output);

        output.push(self.session_id.len() as u8);
        output.extend_from_slice(&self.session_id);

        output.extend_from_slice(&self.cipher_suite.to_be_bytes());
        output.push(self.compression_method);

        serialize_extensions(&self.extensions, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let hello = ServerHello {
            version: ProtocolVersion::DTLS1_2,
            random: Random::generate(),
            session_id: vec![0xAA, 0xBB],
            cipher_suite: 0xC02B,
            compression_method: 0,
            extensions: vec![Extension::RenegotiationInfo],
        };

        let mut out = Vec::new();
        hello.serialize(&mut out);
        let (rest, parsed) = ServerHello::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, hello);
    }
}
