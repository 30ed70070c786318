use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;
use tinyvec::ArrayVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256 = 4,
    Sha384 = 5,
}

impl HashAlgorithm {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            4 => Some(HashAlgorithm::Sha256),
            5 => Some(HashAlgorithm::Sha384),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureAlgorithm {
    #[default]
    Rsa = 1,
    Ecdsa = 3,
}

impl SignatureAlgorithm {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(SignatureAlgorithm::Rsa),
            3 => Some(SignatureAlgorithm::Ecdsa),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// A (hash, signature) pair from the signature_algorithms extension
/// (RFC 5246 Section 7.4.1.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignatureHashAlgorithm {
    pub hash: HashAlgorithm,
    pub signature: SignatureAlgorithm,
}

impl SignatureHashAlgorithm {
    pub const ECDSA_SHA256: SignatureHashAlgorithm = SignatureHashAlgorithm {
        hash: HashAlgorithm::Sha256,
        signature: SignatureAlgorithm::Ecdsa,
    };
    pub const RSA_SHA256: SignatureHashAlgorithm = SignatureHashAlgorithm {
        hash: HashAlgorithm::Sha256,
        signature: SignatureAlgorithm::Rsa,
    };
}

/// Schemes this implementation advertises by default.
pub fn default_signature_schemes() -> ArrayVec<[SignatureHashAlgorithm; 8]> {
    let mut out = ArrayVec::default();
    out.push(SignatureHashAlgorithm::ECDSA_SHA256);
    out.push(SignatureHashAlgorithm::RSA_SHA256);
    out
}

/// Whether `pair` is one of the locally advertised schemes. Any signature the
/// peer presents must use an advertised pair before it is trusted.
pub fn is_advertised_scheme(local: &[SignatureHashAlgorithm], pair: SignatureHashAlgorithm) -> bool {
    local.contains(&pair)
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignatureAlgorithmsExt {
    pub schemes: ArrayVec<[SignatureHashAlgorithm; 8]>,
}

impl SignatureAlgorithmsExt {
    pub fn new(schemes: &[SignatureHashAlgorithm]) -> Self {
        let mut out = SignatureAlgorithmsExt::default();
        out.schemes.extend_from_slice(schemes);
        out
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SignatureAlgorithmsExt> {
        let (input, length) = be_u16(input)?;
        let (input, mut data) = take(length)(input)?;

        let mut schemes = ArrayVec::default();
        while !data.is_empty() {
            let (rest, hash) = be_u8(data)?;
            let (rest, signature) = be_u8(rest)?;
            // Unknown pairs are skipped; we only negotiate what we implement.
            if let (Some(hash), Some(signature)) = (
                HashAlgorithm::from_u8(hash),
                SignatureAlgorithm::from_u8(signature),
            ) {
                if schemes.len() < schemes.capacity() {
                    schemes.push(SignatureHashAlgorithm { hash, signature });
                }
            }
            data = rest;
        }

        Ok((input, SignatureAlgorithmsExt { schemes }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&((self.schemes.len() * 2) as u16).to_be_bytes());
        for scheme in &self.schemes {
            output.push(scheme.hash.as_u8());
            output.push(scheme.signature.as_u8());
        }
    }
}
