use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

/// Application-Layer Protocol Negotiation extension (RFC 7301).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AlpnExt {
    pub protocols: Vec<String>,
}

impl AlpnExt {
    pub fn new(protocols: &[String]) -> Self {
        AlpnExt {
            protocols: protocols.to_vec(),
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], AlpnExt> {
        let (input, length) = be_u16(input)?;
        let (input, mut data) = take(length)(input)?;

        let mut protocols = Vec::new();
        while !data.is_empty() {
            let (rest, name_len) = be_u8(data)?;
            let (rest, name) = take(name_len)(rest)?;
            let name = std::str::from_utf8(name).map_err(|_| {
                nom::Err::Error(nom::error::Error::new(rest, nom::error::ErrorKind::Char))
            })?;
            protocols.push(name.to_string());
            data = rest;
        }

        if protocols.is_empty() {
            // An ALPN extension with zero protocols is malformed.
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Verify,
            )));
        }

        Ok((input, AlpnExt { protocols }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        let list_len: usize = self.protocols.iter().map(|p| 1 + p.len()).sum();
        output.extend_from_slice(&(list_len as u16).to_be_bytes());
        for protocol in &self.protocols {
            output.push(protocol.len() as u8);
            output.extend_from_slice(protocol.as_bytes());
        }
    }
}

/// Server-side protocol selection: first locally supported protocol the peer
/// offered. `None` when the peer offered nothing; an error when there is an
/// offer but no overlap (RFC 7301 Section 3.2 mandates no_application_protocol).
pub fn alpn_protocol_selection(local: &[String], peer: &[String]) -> Result<Option<String>, ()> {
    if local.is_empty() || peer.is_empty() {
        return Ok(None);
    }
    for protocol in local {
        if peer.contains(protocol) {
            return Ok(Some(protocol.clone()));
        }
    }
    Err(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let ext = AlpnExt::new(&["h2".to_string(), "http/1.1".to_string()]);
        let mut out = Vec::new();
        ext.serialize(&mut out);

        let (rest, parsed) = AlpnExt::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);
    }

    #[test]
    fn selection() {
        let local = vec!["webrtc".to_string(), "h2".to_string()];
        let peer = vec!["h2".to_string()];
        assert_eq!(
            alpn_protocol_selection(&local, &peer),
            Ok(Some("h2".to_string()))
        );
        assert_eq!(alpn_protocol_selection(&local, &[]), Ok(None));
        assert!(alpn_protocol_selection(&local, &["spdy".to_string()]).is_err());
    }
}
