use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::extensions::{HashAlgorithm, NamedCurve, SignatureAlgorithm, SignatureHashAlgorithm};
use crate::crypto::KeyExchangeAlgorithm;

const CURVE_TYPE_NAMED_CURVE: u8 = 3;

/// ServerKeyExchange. The wire layout depends on the negotiated key exchange:
/// ECDHE suites carry signed curve parameters (RFC 8422 Section 5.4), PSK
/// suites carry only an identity hint (RFC 4279 Section 2).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerKeyExchange {
    pub identity_hint: Option<Vec<u8>>,
    pub named_curve: Option<NamedCurve>,
    pub public_key: Vec<u8>,
    pub signature_scheme: Option<SignatureHashAlgorithm>,
    pub signature: Vec<u8>,
}

impl ServerKeyExchange {
    pub fn parse(input: &[u8], algorithm: KeyExchangeAlgorithm) -> IResult<&[u8], Self> {
        match algorithm {
            KeyExchangeAlgorithm::Psk => {
                let (input, hint_len) = be_u16(input)?;
                let (input, hint) = take(hint_len)(input)?;
                Ok((
                    input,
                    ServerKeyExchange {
                        identity_hint: Some(hint.to_vec()),
                        ..Default::default()
                    },
                ))
            }
            KeyExchangeAlgorithm::Ecdhe => {
                let (input, curve_type) = be_u8(input)?;
                if curve_type != CURVE_TYPE_NAMED_CURVE {
                    return Err(nom::Err::Error(nom::error::Error::new(
                        input,
                        nom::error::ErrorKind::Tag,
                    )));
                }
                let (input, curve) = be_u16(input)?;
                let named_curve = NamedCurve::from_u16(curve).ok_or_else(|| {
                    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
                })?;

                let (input, key_len) = be_u8(input)?;
                let (input, public_key) = take(key_len)(input)?;

                let (input, hash) = be_u8(input)?;
                let (input, sig_alg) = be_u8(input)?;
                let scheme = match (HashAlgorithm::from_u8(hash), SignatureAlgorithm::from_u8(sig_alg)) {
                    (Some(hash), Some(signature)) => SignatureHashAlgorithm { hash, signature },
                    _ => {
                        return Err(nom::Err::Error(nom::error::Error::new(
                            input,
                            nom::error::ErrorKind::Tag,
                        )))
                    }
                };

                let (input, sig_len) = be_u16(input)?;
                let (input, signature) = take(sig_len)(input)?;

                Ok((
                    input,
                    ServerKeyExchange {
                        identity_hint: None,
                        named_curve: Some(named_curve),
                        public_key: public_key.to_vec(),
                        signature_scheme: Some(scheme),
                        signature: signature.to_vec(),
                    },
                ))
            }
        }
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        if let Some(hint) = &self.identity_hint {
            output.extend_from_slice(&(hint.len() as u16).to_be_bytes());
            output.extend_from_slice(hint);
            return;
        }

        let curve = self.named_curve.unwrap_or_default();
        output.push(CURVE_TYPE_NAMED_CURVE);
        output.extend_from_slice(&curve.as_u16().to_be_bytes());
        output.push(self.public_key.len() as u8);
        output.extend_from_slice(&self.public_key);

        if let Some(scheme) = self.signature_scheme {
            output.push(scheme.hash.as_u8());
            output.push(scheme.signature.as_u8());
            output.extend_from_slice(&(self.signature.len() as u16).to_be_bytes());
            output.extend_from_slice(&self.signature);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdhe_roundtrip() {
        let ske = ServerKeyExchange {
            identity_hint: None,
            named_curve: Some(NamedCurve::X25519),
            public_key: vec![0x04; 32],
            signature_scheme: Some(SignatureHashAlgorithm::ECDSA_SHA256),
            signature: vec![0x30, 0x45, 0x02, 0x20],
        };

        let mut out = Vec::new();
        ske.serialize(&mut out);
        let (rest, parsed) = ServerKeyExchange::parse(&out, KeyExchangeAlgorithm::Ecdhe).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ske);
    }

    #[test]
    fn psk_roundtrip() {
        let ske = ServerKeyExchange {
            identity_hint: Some(b"hint".to_vec()),
            ..Default::default()
        };

        let mut out = Vec::new();
        ske.serialize(&mut out);
        assert_eq!(out, [0x00, 0x04, b'h', b'i', b'n', b't']);

        let (rest, parsed) = ServerKeyExchange::parse(&out, KeyExchangeAlgorithm::Psk).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ske);
    }
}
