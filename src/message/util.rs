use nom::bytes::complete::take;
use nom::IResult;

/// Parse a 48-bit big-endian integer (DTLS record sequence numbers).
pub fn be_u48(input: &[u8]) -> IResult<&[u8], u64> {
    let (input, bytes) = take(6usize)(input)?;
    let mut value = 0u64;
    for b in bytes {
        value = (value << 8) | u64::from(*b);
    }
    Ok((input, value))
}

/// Append a 48-bit big-endian integer.
pub fn put_u48(output: &mut Vec<u8>, value: u64) {
    output.extend_from_slice(&value.to_be_bytes()[2..]);
}

/// Append a 24-bit big-endian integer.
pub fn put_u24(output: &mut Vec<u8>, value: u32) {
    output.extend_from_slice(&value.to_be_bytes()[1..]);
}
