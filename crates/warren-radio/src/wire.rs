//! The HTTP-shaped wire frames exchanged over the overlay, with a
//! length-prefixed CBOR codec for the request/response protocol.

use std::io;

use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use libp2p::{request_response, StreamProtocol};
use serde::{Deserialize, Serialize};

use warren_proto::MAX_FRAME_SIZE;

/// Maximum encoded size of a [`ResponseFrame`]; responses carry a bare status.
const MAX_RESPONSE_SIZE: usize = 64;

/// A request carried over the overlay. Shaped like the HTTP request the
/// route table speaks in: method, versioned path, opaque body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

/// The in-band reply to a [`RequestFrame`]. Receivers acknowledge with
/// `204 No Content` before processing; actual responses travel as separate
/// requests in the opposite direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub status: u16,
}

pub const STATUS_NO_CONTENT: u16 = 204;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;

// ============================================================================
// Length-prefixed CBOR codec
// ============================================================================

/// 4-byte LE length prefix followed by the CBOR encoding of the frame.
#[derive(Clone, Default)]
pub struct WpcCodec;

#[async_trait]
impl request_response::Codec for WpcCodec {
    type Protocol = StreamProtocol;
    type Request = RequestFrame;
    type Response = ResponseFrame;

    async fn read_request<T>(&mut self, _: &Self::Protocol, io: &mut T)
        -> io::Result<Self::Request>
    where T: AsyncRead + Unpin + Send {
        decode(&read_framed(io, MAX_FRAME_SIZE).await?)
    }

    async fn read_response<T>(&mut self, _: &Self::Protocol, io: &mut T)
        -> io::Result<Self::Response>
    where T: AsyncRead + Unpin + Send {
        decode(&read_framed(io, MAX_RESPONSE_SIZE).await?)
    }

    async fn write_request<T>(&mut self, _: &Self::Protocol, io: &mut T, req: Self::Request)
        -> io::Result<()>
    where T: AsyncWrite + Unpin + Send {
        write_framed(io, &encode(&req)?).await
    }

    async fn write_response<T>(&mut self, _: &Self::Protocol, io: &mut T, res: Self::Response)
        -> io::Result<()>
    where T: AsyncWrite + Unpin + Send {
        write_framed(io, &encode(&res)?).await
    }
}

fn encode<T: Serialize>(value: &T) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    Ok(buf)
}

fn decode<T: serde::de::DeserializeOwned>(buf: &[u8]) -> io::Result<T> {
    ciborium::from_reader(buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

async fn read_framed<T: AsyncRead + Unpin>(io: &mut T, max: usize) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame exceeds limit"));
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn write_framed<T: AsyncWrite + Unpin>(io: &mut T, data: &[u8]) -> io::Result<()> {
    io.write_all(&(data.len() as u32).to_le_bytes()).await?;
    io.write_all(data).await?;
    io.flush().await
}
