//! `tokio-util` codecs for the control and data connections.
use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::{ChannelError, ProtocolError};
use crate::wire::{DEFAULT_MAX_FRAME_SIZE, WireMessage};

/// Frames [`WireMessage`]s on an async control stream.
#[derive(Debug, Clone)]
pub struct WireCodec {
    max_frame_size: usize,
}

impl WireCodec {
    pub fn new(max_frame_size: usize) -> WireCodec {
        WireCodec { max_frame_size }
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        WireCodec::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for WireCodec {
    type Item = WireMessage;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(WireMessage::decode(src, self.max_frame_size)?)
    }
}

impl Encoder<WireMessage> for WireCodec {
    type Error = ChannelError;

    fn encode(&mut self, item: WireMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = item.encoded_len();
        if length > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                max: self.max_frame_size,
                got: length,
            }
            .into());
        }
        dst.reserve(length);
        dst.put_u16(length as u16);
        dst.put_u8(item.command as u8);
        dst.put_slice(&item.data);
        Ok(())
    }
}

/// Codec for acquisition packages on the data link: a 4-byte big-endian
/// length followed by the package.
pub fn data_link_codec(max_package_len: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_package_len)
        .new_codec()
}
