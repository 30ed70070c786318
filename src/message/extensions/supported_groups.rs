use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::IResult;
use tinyvec::ArrayVec;

/// Elliptic curve groups (RFC 8422) this implementation can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamedCurve {
    Secp256r1 = 0x0017,
    #[default]
    X25519 = 0x001D,
}

impl NamedCurve {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0017 => Some(NamedCurve::Secp256r1),
            0x001D => Some(NamedCurve::X25519),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> u16 {
        *self as u16
    }
}

pub fn default_curves() -> ArrayVec<[NamedCurve; 4]> {
    let mut out = ArrayVec::default();
    out.push(NamedCurve::X25519);
    out.push(NamedCurve::Secp256r1);
    out
}

/// The supported_groups (elliptic_curves) extension.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SupportedGroupsExt {
    pub curves: ArrayVec<[NamedCurve; 4]>,
}

impl SupportedGroupsExt {
    pub fn new(curves: &[NamedCurve]) -> Self {
        let mut out = SupportedGroupsExt::default();
        out.curves.extend_from_slice(curves);
        out
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SupportedGroupsExt> {
        let (input, length) = be_u16(input)?;
        let (input, mut data) = take(length)(input)?;

        let mut curves = ArrayVec::default();
        while !data.is_empty() {
            let (rest, value) = be_u16(data)?;
            if let Some(curve) = NamedCurve::from_u16(value) {
                if curves.len() < curves.capacity() {
                    curves.push(curve);
                }
            }
            data = rest;
        }

        Ok((input, SupportedGroupsExt { curves }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&((self.curves.len() * 2) as u16).to_be_bytes());
        for curve in &self.curves {
            output.extend_from_slice(&curve.as_u16().to_be_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let ext = SupportedGroupsExt::new(&default_curves());
        let mut out = Vec::new();
        ext.serialize(&mut out);
        assert_eq!(out, [0x00, 0x04, 0x00, 0x1D, 0x00, 0x17]);

        let (rest, parsed) = SupportedGroupsExt::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);
    }
}
