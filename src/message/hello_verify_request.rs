use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom::IResult;

use super::ProtocolVersion;

/// HelloVerifyRequest (RFC 6347 Section 4.2.1): carries the stateless cookie
/// the client must echo before the server commits any state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloVerifyRequest {
    pub version: ProtocolVersion,
    pub cookie: Vec<u8>,
}

impl HelloVerifyRequest {
    pub fn parse(input: &[u8]) -> IResult<&[u8], HelloVerifyRequest> {
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, cookie_len) = be_u8(input)?;
        let (input, cookie) = take(cookie_len)(input)?;

        Ok((
            input,
            HelloVerifyRequest {
                version,
                cookie: cookie.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.version.serialize(output);
        output.push(self.cookie.len() as u8);
        output.extend_from_slice(&self.cookie);
    }
}
