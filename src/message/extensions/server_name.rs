use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

const NAME_TYPE_HOST_NAME: u8 = 0;

/// Server Name Indication extension (RFC 6066 Section 3), host_name only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerNameExt {
    pub server_name: String,
}

impl ServerNameExt {
    pub fn new(server_name: &str) -> Self {
        ServerNameExt {
            server_name: server_name.to_string(),
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerNameExt> {
        let (input, list_length) = be_u16(input)?;
        let (input, mut data) = take(list_length)(input)?;

        while !data.is_empty() {
            let (rest, name_type) = be_u8(data)?;
            let (rest, name_len) = be_u16(rest)?;
            let (rest, name) = take(name_len)(rest)?;
            if name_type == NAME_TYPE_HOST_NAME {
                let name = std::str::from_utf8(name).map_err(|_| {
                    nom::Err::Error(nom::error::Error::new(rest, nom::error::ErrorKind::Char))
                })?;
                return Ok((
                    input,
                    ServerNameExt {
                        server_name: name.to_string(),
                    },
                ));
            }
            data = rest;
        }

        Ok((input, ServerNameExt::default()))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        let name = self.server_name.as_bytes();
        output.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
        output.push(NAME_TYPE_HOST_NAME);
        output.extend_from_slice(&(name.len() as u16).to_be_bytes());
        output.extend_from_slice(name);
    }
}
