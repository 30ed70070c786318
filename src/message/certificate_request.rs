use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;
use tinyvec::ArrayVec;

use super::extensions::{HashAlgorithm, SignatureAlgorithm, SignatureHashAlgorithm};

/// Client certificate types (RFC 5246 Section 7.4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientCertificateType {
    RsaSign = 1,
    #[default]
    EcdsaSign = 64,
}

impl ClientCertificateType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ClientCertificateType::RsaSign),
            64 => Some(ClientCertificateType::EcdsaSign),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CertificateRequest {
    pub certificate_types: ArrayVec<[ClientCertificateType; 4]>,
    pub signature_schemes: ArrayVec<[SignatureHashAlgorithm; 8]>,
    /// DER-encoded distinguished names of acceptable CAs; empty means any.
    pub certificate_authorities: Vec<Vec<u8>>,
}

impl CertificateRequest {
    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateRequest> {
        let (input, types_len) = be_u8(input)?;
        let (input, types_data) = take(types_len)(input)?;
        let mut certificate_types = ArrayVec::default();
        for value in types_data {
            if let Some(t) = ClientCertificateType::from_u8(*value) {
                if certificate_types.len() < certificate_types.capacity() {
                    certificate_types.push(t);
                }
            }
        }

        let (input, schemes_len) = be_u16(input)?;
        let (input, mut schemes_data) = take(schemes_len)(input)?;
        let mut signature_schemes = ArrayVec::default();
        while !schemes_data.is_empty() {
            let (rest, hash) = be_u8(schemes_data)?;
            let (rest, signature) = be_u8(rest)?;
            if let (Some(hash), Some(signature)) = (
                HashAlgorithm::from_u8(hash),
                SignatureAlgorithm::from_u8(signature),
            ) {
                if signature_schemes.len() < signature_schemes.capacity() {
                    signature_schemes.push(SignatureHashAlgorithm { hash, signature });
                }
            }
            schemes_data = rest;
        }

        let (input, cas_len) = be_u16(input)?;
        let (input, mut cas_data) = take(cas_len)(input)?;
        let mut certificate_authorities = Vec::new();
        while !cas_data.is_empty() {
            let (rest, name_len) = be_u16(cas_data)?;
            let (rest, name) = take(name_len)(rest)?;
            certificate_authorities.push(name.to_vec());
            cas_data = rest;
        }

        Ok((
            input,
            CertificateRequest {
                certificate_types,
                signature_schemes,
                certificate_authorities,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.certificate_types.len() as u8);
        for t in &self.certificate_types {
            output.push(t.as_u8());
        }

        output.extend_from_slice(&((self.signature_schemes.len() * 2) as u16).to_be_bytes());
        for scheme in &self.signature_schemes {
            output.push(scheme.hash.as_u8());
            output.push(scheme.signature.as_u8());
        }

        let cas_len: usize = self.certificate_authorities.iter().map(|n| 2 + n.len()).sum();
        output.extend_from_slice(&(cas_len as u16).to_be_bytes());
        for name in &self.certificate_authorities {
            output.extend_from_slice(&(name.len() as u16).to_be_bytes());
            output.extend_from_slice(name);
        }
    }
}
