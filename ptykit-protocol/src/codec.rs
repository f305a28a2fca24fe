//! Message codec for helper IPC framing
//!
//! Frames are a big-endian `u32` length followed by a bincode payload.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::ConsoleListResponse;

/// Maximum frame size (1 MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Codec for [`ConsoleListResponse`] frames
///
/// The helper encodes with it, the host decodes with it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleListCodec;

impl ConsoleListCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ConsoleListCodec {
    type Item = ConsoleListResponse;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_message(src)
    }
}

impl Encoder<ConsoleListResponse> for ConsoleListCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ConsoleListResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(&item, dst)
    }
}

/// Decode a length-prefixed message
fn decode_message<T: serde::de::DeserializeOwned>(
    src: &mut BytesMut,
) -> Result<Option<T>, CodecError> {
    if src.len() < 4 {
        return Ok(None);
    }

    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    if src.len() < 4 + len {
        src.reserve(4 + len - src.len());
        return Ok(None);
    }

    src.advance(4);
    let data = src.split_to(len);

    let msg: T = bincode::deserialize(&data)?;
    Ok(Some(msg))
}

/// Encode a length-prefixed message
fn encode_message<T: serde::Serialize>(item: &T, dst: &mut BytesMut) -> Result<(), CodecError> {
    let data = bincode::serialize(item)?;

    if data.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    dst.reserve(4 + data.len());
    dst.put_u32(data.len() as u32);
    dst.put_slice(&data);
    Ok(())
}

/// Encode a single response into a standalone frame
///
/// Used by the helper, which writes its one frame with blocking stdout.
pub fn encode_frame(item: &ConsoleListResponse) -> Result<Vec<u8>, CodecError> {
    let mut buf = BytesMut::new();
    encode_message(item, &mut buf)?;
    Ok(buf.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ProcessRecord;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    fn sample() -> ConsoleListResponse {
        ConsoleListResponse::Processes {
            target_pid: 4100,
            processes: vec![
                ProcessRecord::new(4100, "cmd.exe"),
                ProcessRecord::new(4188, "conhost.exe"),
                ProcessRecord::new(5012, "python.exe"),
            ],
        }
    }

    #[test]
    fn test_response_roundtrip_preserves_order() {
        let mut codec = ConsoleListCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(sample(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, sample());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_process_list() {
        let mut codec = ConsoleListCodec::new();
        let msg = ConsoleListResponse::Processes {
            target_pid: 1,
            processes: Vec::new(),
        };

        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(msg));
    }

    #[test]
    fn test_partial_message() {
        let mut codec = ConsoleListCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(sample(), &mut buf).unwrap();

        let mut partial = buf.split_to(6);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(buf);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn test_short_length_prefix() {
        let mut codec = ConsoleListCodec::new();
        let mut buf = BytesMut::from(&[0u8, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_message_too_large_on_decode() {
        let mut codec = ConsoleListCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_MESSAGE_SIZE + 1) as u32);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_garbage_payload_is_an_error() {
        let mut codec = ConsoleListCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        buf.put_slice(&[0xff, 0xff, 0xff]);

        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Bincode(_))));
    }

    #[test]
    fn test_encode_frame_matches_codec() {
        let mut codec = ConsoleListCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(sample(), &mut buf).unwrap();

        assert_eq!(encode_frame(&sample()).unwrap(), buf.to_vec());
    }

    #[tokio::test]
    async fn test_framed_read_over_byte_stream() {
        let frame = encode_frame(&sample()).unwrap();
        let mut framed = FramedRead::new(&frame[..], ConsoleListCodec::new());

        let first = framed.next().await.unwrap().unwrap();
        assert_eq!(first, sample());
        assert!(framed.next().await.is_none());
    }
}
