use crate::shared::{CorrelationId, ProtocolError, TransportError, TransportResult, HEADER_SIZE};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

/// Parsed frame header. The length field on the wire counts the header
/// itself, so the payload length is what remains after subtracting it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameHeader {
    pub payload_len: usize,
    pub correlation: CorrelationId,
}

impl FrameHeader {
    /// Parse the 8 staged header bytes. The total length field must cover
    /// at least the header.
    #[inline]
    pub fn read(raw: &[u8; HEADER_SIZE]) -> Result<FrameHeader, ProtocolError> {
        let total = LittleEndian::read_u32(&raw[..4]);
        let correlation = LittleEndian::read_u32(&raw[4..]);

        if (total as usize) < HEADER_SIZE {
            return Err(ProtocolError::FrameTooShort(total));
        }

        Ok(FrameHeader {
            payload_len: total as usize - HEADER_SIZE,
            correlation,
        })
    }
}

/// Frame the payload with the 8 byte header carrying the total length and
/// the correlation id. The result is one contiguous buffer so the socket
/// submission is a single write.
pub fn encode_frame(correlation: CorrelationId, payload: &[u8]) -> TransportResult<Vec<u8>> {
    let total = HEADER_SIZE + payload.len();

    if total > u32::max_value() as usize {
        return Err(TransportError::BadArgument("payload exceeds the frame length field"));
    }

    let mut frame = Vec::with_capacity(total);
    frame.write_u32::<LittleEndian>(total as u32)?;
    frame.write_u32::<LittleEndian>(correlation)?;
    frame.extend_from_slice(payload);

    Ok(frame)
}
