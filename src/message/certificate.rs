use nom::bytes::complete::take;
use nom::number::complete::be_u24;
use nom::IResult;

use super::util::put_u24;

/// Certificate message: a chain of DER certificates, leaf first. An empty
/// chain is a valid reply to a CertificateRequest the client cannot satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Certificate {
    pub certificates: Vec<Vec<u8>>,
}

impl Certificate {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Certificate> {
        let (input, total) = be_u24(input)?;
        let (input, mut data) = take(total)(input)?;

        let mut certificates = Vec::new();
        while !data.is_empty() {
            let (rest, length) = be_u24(data)?;
            let (rest, cert) = take(length)(rest)?;
            certificates.push(cert.to_vec());
            data = rest;
        }

        Ok((input, Certificate { certificates }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        let total: usize = self.certificates.iter().map(|c| 3 + c.len()).sum();
        put_u24(output, total as u32);
        for cert in &self.certificates {
            put_u24(output, cert.len() as u32);
            output.extend_from_slice(cert);
        }
    }
}
