use nom::combinator::rest;
use nom::IResult;

/// Finished: the verify_data proving both sides observed the same transcript.
/// 12 bytes for every TLS 1.2 PRF, but the length is taken from the handshake
/// header rather than assumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

impl Finished {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Finished> {
        let (input, verify_data) = rest(input)?;
        Ok((
            input,
            Finished {
                verify_data: verify_data.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.verify_data);
    }
}

/// ChangeCipherSpec: a single 0x01 byte on its own record content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeCipherSpec;

impl ChangeCipherSpec {
    pub fn unmarshal(input: &[u8]) -> Option<ChangeCipherSpec> {
        if input == [0x01] {
            Some(ChangeCipherSpec)
        } else {
            None
        }
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(0x01);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_roundtrip() {
        let finished = Finished {
            verify_data: vec![0u8; 12],
        };
        let mut out = Vec::new();
        finished.serialize(&mut out);
        let (rest, parsed) = Finished::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, finished);
    }

    #[test]
    fn ccs_is_one_byte() {
        let mut out = Vec::new();
        ChangeCipherSpec.serialize(&mut out);
        assert_eq!(out, [0x01]);
        assert!(ChangeCipherSpec::unmarshal(&out).is_some());
        assert!(ChangeCipherSpec::unmarshal(&[0x02]).is_none());
        assert!(ChangeCipherSpec::unmarshal(&[0x01, 0x01]).is_none());
    }
}
