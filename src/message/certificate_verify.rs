use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::extensions::{HashAlgorithm, SignatureAlgorithm, SignatureHashAlgorithm};

/// CertificateVerify: proof of possession of the private key matching the
/// client certificate, signed over the handshake transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerify {
    pub scheme: SignatureHashAlgorithm,
    pub signature: Vec<u8>,
}

impl CertificateVerify {
    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateVerify> {
        let (input, hash) = be_u8(input)?;
        let (input, sig_alg) = be_u8(input)?;
        let scheme = match (
            HashAlgorithm::from_u8(hash),
            SignatureAlgorithm::from_u8(sig_alg),
        ) {
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
            CertificateVerify {
                scheme,
                signature: signature.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.scheme.hash.as_u8());
        output.push(self.scheme.signature.as_u8());
        output.extend_from_slice(&(self.signature.len() as u16).to_be_bytes());
        output.extend_from_slice(&self.signature);
    }
}
