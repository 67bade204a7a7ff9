use bitflags::bitflags;
use futures_core::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::transport::{Message, Transport};
use crate::{
    bson::Document,
    error::{ErrorKind, Result},
};

/// The largest message a server will send unless its handshake says otherwise.
pub(crate) const DEFAULT_MAX_MESSAGE_SIZE_BYTES: i32 = 48 * 1024 * 1024;

/// The wire protocol op codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OpCode {
    Message = 2013,
}

impl OpCode {
    /// Attempt to infer the op code based on the numeric value.
    fn from_i32(i: i32) -> Result<Self> {
        match i {
            2013 => Ok(OpCode::Message),
            other => Err(ErrorKind::InvalidResponse {
                message: format!("Invalid wire protocol opcode: {}", other),
            }
            .into()),
        }
    }
}

/// The header for any wire protocol message.
#[derive(Debug)]
pub(crate) struct Header {
    pub(crate) length: i32,
    pub(crate) request_id: i32,
    pub(crate) response_to: i32,
    pub(crate) op_code: OpCode,
}

impl Header {
    pub(crate) const LENGTH: usize = 4 * std::mem::size_of::<i32>();

    /// Serializes the Header and writes the bytes to `stream`.
    pub(crate) async fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut W) -> Result<()> {
        stream.write_i32_le(self.length).await?;
        stream.write_i32_le(self.request_id).await?;
        stream.write_i32_le(self.response_to).await?;
        stream.write_i32_le(self.op_code as i32).await?;

        Ok(())
    }

    /// Reads bytes from `stream` and deserializes them into a header.
    pub(crate) async fn read_from<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Self> {
        let length = stream.read_i32_le().await?;
        let request_id = stream.read_i32_le().await?;
        let response_to = stream.read_i32_le().await?;
        let op_code = OpCode::from_i32(stream.read_i32_le().await?)?;
        Ok(Self {
            length,
            request_id,
            response_to,
            op_code,
        })
    }
}

bitflags! {
    /// Represents the bitwise flags for an OP_MSG as defined in the spec.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct MessageFlags: u32 {
        const CHECKSUM_PRESENT = 0b_0000_0000_0000_0000_0000_0000_0000_0001;
        const MORE_TO_COME     = 0b_0000_0000_0000_0000_0000_0000_0000_0010;
        const EXHAUST_ALLOWED  = 0b_0000_0000_0000_0001_0000_0000_0000_0000;
    }
}

/// Writes `message` as an OP_MSG with a single kind 0 section.
pub(crate) async fn write_op_msg<W: AsyncWrite + Unpin>(
    stream: &mut W,
    message: &Message,
) -> Result<()> {
    let mut payload = Vec::new();
    message.document.to_writer(&mut payload)?;

    let total_length = Header::LENGTH
        + std::mem::size_of::<u32>()
        + std::mem::size_of::<u8>()
        + payload.len();

    let header = Header {
        length: i32::try_from(total_length).map_err(|_| ErrorKind::InvalidArgument {
            message: format!("message of {} bytes is too large to send", total_length),
        })?,
        request_id: message.request_id,
        response_to: message.response_to,
        op_code: OpCode::Message,
    };

    header.write_to(stream).await?;
    stream.write_u32_le(MessageFlags::empty().bits()).await?;
    stream.write_u8(0).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;

    Ok(())
}

/// Reads one OP_MSG and returns its kind 0 document.
pub(crate) async fn read_op_msg<R: AsyncRead + Unpin>(
    stream: &mut R,
    max_message_size_bytes: i32,
) -> Result<Message> {
    let header = Header::read_from(stream).await?;
    if header.length > max_message_size_bytes {
        return Err(ErrorKind::InvalidResponse {
            message: format!(
                "Message length {} over maximum {}",
                header.length, max_message_size_bytes
            ),
        }
        .into());
    }

    let remaining = usize::try_from(header.length)
        .ok()
        .and_then(|len| len.checked_sub(Header::LENGTH))
        .ok_or_else(|| ErrorKind::InvalidResponse {
            message: format!("invalid message length {}", header.length),
        })?;
    let mut buf = vec![0u8; remaining];
    stream.read_exact(&mut buf).await?;

    let mut reader = buf.as_slice();
    let flags = MessageFlags::from_bits_truncate(reader.read_u32_le().await?);

    let mut document = None;
    while reader.len() > checksum_len(flags) {
        let kind = reader.read_u8().await?;
        match kind {
            0 => {
                document = Some(Document::from_reader(&mut reader)?);
            }
            1 => {
                // Document sequences only appear in requests; skip them if a server sends one.
                let size = reader.read_i32_le().await?;
                let skip = usize::try_from(size).unwrap_or(0).saturating_sub(4);
                if skip > reader.len() {
                    break;
                }
                reader = &reader[skip..];
            }
            other => {
                return Err(ErrorKind::InvalidResponse {
                    message: format!("invalid OP_MSG section kind: {}", other),
                }
                .into());
            }
        }
    }

    let document = document.ok_or_else(|| ErrorKind::InvalidResponse {
        message: "no response received from server".to_string(),
    })?;

    Ok(Message {
        request_id: header.request_id,
        response_to: header.response_to,
        document,
    })
}

fn checksum_len(flags: MessageFlags) -> usize {
    if flags.contains(MessageFlags::CHECKSUM_PRESENT) {
        std::mem::size_of::<u32>()
    } else {
        0
    }
}

/// A [`Transport`] over any async byte stream (plain TCP or TLS).
pub(crate) struct StreamTransport<S> {
    stream: S,
    max_message_size_bytes: i32,
}

impl<S> StreamTransport<S> {
    pub(crate) fn new(stream: S) -> Self {
        Self {
            stream,
            max_message_size_bytes: DEFAULT_MAX_MESSAGE_SIZE_BYTES,
        }
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn send<'a>(&'a mut self, message: Message) -> BoxFuture<'a, Result<Message>> {
        Box::pin(async move {
            write_op_msg(&mut self.stream, &message).await?;
            read_op_msg(&mut self.stream, self.max_message_size_bytes).await
        })
    }

    fn close<'a>(&'a mut self) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let _ = self.stream.shutdown().await;
        })
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{read_op_msg, write_op_msg, Header, DEFAULT_MAX_MESSAGE_SIZE_BYTES};
    use crate::{bson::doc, cmap::transport::Message};

    #[tokio::test]
    async fn op_msg_layout() {
        let message = Message::request(7, doc! { "ping": 1, "$db": "admin" });
        let mut bytes = Vec::new();
        write_op_msg(&mut bytes, &message).await.unwrap();

        let length = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(length as usize, bytes.len());
        assert_eq!(i32::from_le_bytes(bytes[4..8].try_into().unwrap()), 7);
        assert_eq!(i32::from_le_bytes(bytes[12..16].try_into().unwrap()), 2013);
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 0);
        assert_eq!(bytes[Header::LENGTH + 4], 0);

        let read = read_op_msg(&mut bytes.as_slice(), DEFAULT_MAX_MESSAGE_SIZE_BYTES)
            .await
            .unwrap();
        assert_eq!(read, message);
    }

    #[tokio::test]
    async fn oversized_message_rejected() {
        let message = Message::request(1, doc! { "payload": "x".repeat(128) });
        let mut bytes = Vec::new();
        write_op_msg(&mut bytes, &message).await.unwrap();

        let result = read_op_msg(&mut bytes.as_slice(), 32).await;
        assert!(result.is_err());
    }
}
