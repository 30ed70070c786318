use nom::bytes::complete::take;
use nom::IResult;
use rand::rngs::OsRng;
use rand::RngCore;

pub const RANDOM_LENGTH: usize = 32;

/// The 32-byte handshake random (gmt_unix_time + 28 opaque bytes on the wire,
/// treated as opaque here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Random(pub [u8; RANDOM_LENGTH]);

impl Random {
    pub fn generate() -> Self {
        let mut bytes = [0u8; RANDOM_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Random(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; RANDOM_LENGTH]
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Random> {
        let (input, bytes) = take(RANDOM_LENGTH)(input)?;
        let mut random = [0u8; RANDOM_LENGTH];
        random.copy_from_slice(bytes);
        Ok((input, Random(random)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let random = Random::generate();
        assert!(!random.is_empty());

        let mut out = Vec::new();
        random.serialize(&mut out);
        let (rest, parsed) = Random::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, random);
    }
}
