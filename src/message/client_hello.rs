use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;
use tinyvec::ArrayVec;

use super::extension::{parse_extensions, serialize_extensions, Extension};
use super::{ProtocolVersion, Random};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub version: ProtocolVersion,
    pub random: Random,
    pub session_id: Vec<u8>,
    pub cookie: Vec<u8>,
    /// Raw cipher suite ids, client preference order. Kept raw so unknown
    /// suites survive a reserialize.
    pub cipher_suites: ArrayVec<[u16; 32]>,
    pub compression_methods: ArrayVec<[u8; 4]>,
    pub extensions: Vec<Extension>,
}

impl ClientHello {
    pub fn parse(input: &[u8]) -> IResult<&[u8], ClientHello> {
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;

        let (input, session_id_len) = be_u8(input)?;
        let (input, session_id) = take(session_id_len)(input)?;

        let (input, cookie_len) = be_u8(input)?;
        let (input, cookie) = take(cookie_len)(input)?;

        let (input, suites_len) = be_u16(input)?;
        let (input, mut suite_data) = take(suites_len)(input)?;
        let mut cipher_suites = ArrayVec::default();
        while !suite_data.is_empty() {
            let (rest, id) = be_u16(suite_data)?;
            if cipher_suites.len() < cipher_suites.capacity() {
                cipher_suites.push(id);
            }
            suite_data = rest;
        }

        let (input, compression_len) = be_u8(input)?;
        let (input, compression_data) = take(compression_len)(input)?;
        let mut compression_methods = ArrayVec::default();
        for method in compression_data {
            if compression_methods.len() < compression_methods.capacity() {
                compression_methods.push(*method);
            }
        }

        let (input, extensions) = parse_extensions(input)?;

        Ok((
            input,
            ClientHello {
                version,
                random,
                session_id: session_id.to_vec(),
                cookie: cookie.to_vec(),
                cipher_suites,
                compression_methods,
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.version.serialize(output);
        self.random.serialize(output);

        output.push(self.session_id.len() as u8);
        output.extend_from_slice(&self.session_id);

        output.push(self.cookie.len() as u8);
        output.extend_from_slice(&self.cookie);

        output.extend_from_slice(&((self.cipher_suites.len() * 2) as u16).to_be_bytes());
        for id in &self.cipher_suites {
            output.extend_from_slice(&id.to_be_bytes());
        }

        output.push(self.compression_methods.len() as u8);
        output.extend_from_slice(&self.compression_methods);

        serialize_extensions(&self.extensions, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinyvec::array_vec;

    #[test]
    fn roundtrip() {
        let hello = ClientHello {
            version: ProtocolVersion::DTLS1_2,
            random: Random::generate(),
            session_id: vec![],
            cookie: vec![0xBB; 20],
            cipher_suites: array_vec![0xC02B, 0xC02F],
            compression_methods: array_vec![[u8; 4] => 0],
            extensions: vec![Extension::ExtendedMasterSecret],
        };

        let mut out = Vec::new();
        hello.serialize(&mut out);
        let (rest, parsed) = ClientHello::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, hello);
    }
}
