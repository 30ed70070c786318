use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;
use tinyvec::ArrayVec;

/// DTLS-SRTP protection profile identifiers from RFC 5764 Section 4.1.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SrtpProfile {
    #[default]
    Aes128CmSha1_80 = 0x0001,
    AeadAes128Gcm = 0x0007,
}

impl SrtpProfile {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(SrtpProfile::Aes128CmSha1_80),
            0x0007 => Some(SrtpProfile::AeadAes128Gcm),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> u16 {
        *self as u16
    }
}

/// The use_srtp extension (RFC 5764).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UseSrtpExt {
    pub profiles: ArrayVec<[SrtpProfile; 8]>,
    pub mki: Vec<u8>,
}

impl UseSrtpExt {
    pub fn new(profiles: &[SrtpProfile]) -> Self {
        let mut out = UseSrtpExt::default();
        out.profiles.extend_from_slice(profiles);
        out
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], UseSrtpExt> {
        let (input, profiles_length) = be_u16(input)?;
        let (input, mut profile_data) = take(profiles_length)(input)?;

        let mut profiles = ArrayVec::default();
        while !profile_data.is_empty() {
            let (rest, value) = be_u16(profile_data)?;
            // Unrecognized profiles are skipped, not an error. The peer may
            // offer profiles we do not implement.
            if let Some(profile) = SrtpProfile::from_u16(value) {
                if profiles.len() < profiles.capacity() {
                    profiles.push(profile);
                }
            }
            profile_data = rest;
        }

        let (input, mki_length) = be_u8(input)?;
        let (input, mki) = take(mki_length)(input)?;

        Ok((
            input,
            UseSrtpExt {
                profiles,
                mki: mki.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&((self.profiles.len() * 2) as u16).to_be_bytes());
        for profile in &self.profiles {
            output.extend_from_slice(&profile.as_u16().to_be_bytes());
        }
        output.push(self.mki.len() as u8);
        output.extend_from_slice(&self.mki);
    }
}

/// First of `remote` profiles that `local` also supports.
pub fn find_matching_srtp_profile(
    remote: &[SrtpProfile],
    local: &[SrtpProfile],
) -> Option<SrtpProfile> {
    remote
        .iter()
        .find(|profile| local.contains(profile))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let ext = UseSrtpExt::new(&[SrtpProfile::AeadAes128Gcm, SrtpProfile::Aes128CmSha1_80]);

        let mut out = Vec::new();
        ext.serialize(&mut out);
        assert_eq!(out, [0x00, 0x04, 0x00, 0x07, 0x00, 0x01, 0x00]);

        let (rest, parsed) = UseSrtpExt::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);
    }

    #[test]
    fn profile_matching() {
        let remote = [SrtpProfile::AeadAes128Gcm];
        let local = [SrtpProfile::Aes128CmSha1_80, SrtpProfile::AeadAes128Gcm];
        assert_eq!(
            find_matching_srtp_profile(&remote, &local),
            Some(SrtpProfile::AeadAes128Gcm)
        );
        assert_eq!(find_matching_srtp_profile(&remote, &[]), None);
    }
}
