use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use crate::crypto::KeyExchangeAlgorithm;

/// ClientKeyExchange: an ephemeral public key for ECDHE suites, a PSK
/// identity for PSK suites.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientKeyExchange {
    pub public_key: Vec<u8>,
    pub identity: Option<Vec<u8>>,
}

impl ClientKeyExchange {
    pub fn parse(input: &[u8], algorithm: KeyExchangeAlgorithm) -> IResult<&[u8], Self> {
        match algorithm {
            KeyExchangeAlgorithm::Ecdhe => {
                let (input, key_len) = be_u8(input)?;
                let (input, public_key) = take(key_len)(input)?;
                Ok((
                    input,
                    ClientKeyExchange {
                        public_key: public_key.to_vec(),
                        identity: None,
                    },
                ))
            }
            KeyExchangeAlgorithm::Psk => {
                let (input, identity_len) = be_u16(input)?;
                let (input, identity) = take(identity_len)(input)?;
                Ok((
                    input,
                    ClientKeyExchange {
                        public_key: Vec::new(),
                        identity: Some(identity.to_vec()),
                    },
                ))
            }
        }
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        if let Some(identity) = &self.identity {
            output.extend_from_slice(&(identity.len() as u16).to_be_bytes());
            output.extend_from_slice(identity);
        } else {
            output.push(self.public_key.len() as u8);
            output.extend_from_slice(&self.public_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdhe_roundtrip() {
        let cke = ClientKeyExchange {
            public_key: vec![0xAB; 32],
            identity: None,
        };
        let mut out = Vec::new();
        cke.serialize(&mut out);
        assert_eq!(out.len(), 33);

        let (rest, parsed) = ClientKeyExchange::parse(&out, KeyExchangeAlgorithm::Ecdhe).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, cke);
    }

    #[test]
    fn psk_roundtrip() {
        let cke = ClientKeyExchange {
            public_key: Vec::new(),
            identity: Some(b"client-1".to_vec()),
        };
        let mut out = Vec::new();
        cke.serialize(&mut out);

        let (rest, parsed) = ClientKeyExchange::parse(&out, KeyExchangeAlgorithm::Psk).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, cke);
    }
}
