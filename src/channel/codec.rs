// src/channel/codec.rs

//! Framing used on process pipes.
//!
//! Every frame starts with a one-byte tag. Variable-size fields are a
//! big-endian `u32` length followed by that many bytes.
//!
//! | tag    | frame       | body                       |
//! |--------|-------------|----------------------------|
//! | `0x01` | `Param`     | name chunk, value chunk    |
//! | `0x02` | `ParamsEnd` | (none)                     |
//! | `0x10` | `Data`      | payload chunk              |
//! | `0x11` | `Stop`      | (none)                     |
//!
//! A process worker first receives its parameters as `Param` frames closed by
//! `ParamsEnd`; after that only `Data` / `Stop` flow in either direction.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::channel::Message;
use crate::params::ParameterSet;

const TAG_PARAM: u8 = 0x01;
const TAG_PARAMS_END: u8 = 0x02;
const TAG_DATA: u8 = 0x10;
const TAG_STOP: u8 = 0x11;

/// Upper bound on a single length-prefixed chunk.
pub const MAX_CHUNK_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    Param { name: String, value: Vec<u8> },
    ParamsEnd,
    Message(Message),
}

/// Write one frame. Oversized fields are rejected with `InvalidInput` before
/// any byte is written, so the stream stays on a frame boundary.
pub(crate) async fn write_frame<W>(writer: &mut W, frame: &Frame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match frame {
        Frame::Param { name, value } => {
            check_chunk_len(name.len())?;
            check_chunk_len(value.len())?;
        }
        Frame::Message(Message::Data(payload)) => check_chunk_len(payload.len())?,
        Frame::ParamsEnd | Frame::Message(Message::Stop) => {}
    }

    match frame {
        Frame::Param { name, value } => {
            writer.write_u8(TAG_PARAM).await?;
            write_chunk(writer, name.as_bytes()).await?;
            write_chunk(writer, value).await?;
        }
        Frame::ParamsEnd => writer.write_u8(TAG_PARAMS_END).await?,
        Frame::Message(Message::Data(payload)) => {
            writer.write_u8(TAG_DATA).await?;
            write_chunk(writer, payload).await?;
        }
        Frame::Message(Message::Stop) => writer.write_u8(TAG_STOP).await?,
    }
    writer.flush().await
}

/// Read the next frame. `Ok(None)` means the stream ended cleanly on a frame
/// boundary.
pub(crate) async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let tag = match reader.read_u8().await {
        Ok(tag) => tag,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    let frame = match tag {
        TAG_PARAM => {
            let name = String::from_utf8(read_chunk(reader).await?).map_err(|e| {
                io::Error::new(io::ErrorKind::InvalidData, format!("parameter name: {e}"))
            })?;
            let value = read_chunk(reader).await?;
            Frame::Param { name, value }
        }
        TAG_PARAMS_END => Frame::ParamsEnd,
        TAG_DATA => Frame::Message(Message::Data(read_chunk(reader).await?)),
        TAG_STOP => Frame::Message(Message::Stop),
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown frame tag 0x{other:02x}"),
            ));
        }
    };

    Ok(Some(frame))
}

/// Send a parameter snapshot followed by `ParamsEnd`.
pub(crate) async fn write_parameters<W>(writer: &mut W, params: &ParameterSet) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for (name, value) in params.iter() {
        let frame = Frame::Param {
            name: name.to_string(),
            value: value.to_vec(),
        };
        write_frame(writer, &frame).await?;
    }
    write_frame(writer, &Frame::ParamsEnd).await
}

/// Read `Param` frames up to and including `ParamsEnd`.
pub(crate) async fn read_parameters<R>(reader: &mut R) -> io::Result<ParameterSet>
where
    R: AsyncRead + Unpin,
{
    let mut params = ParameterSet::new();
    loop {
        match read_frame(reader).await? {
            Some(Frame::Param { name, value }) => {
                params.set(name, value);
            }
            Some(Frame::ParamsEnd) => return Ok(params),
            Some(Frame::Message(msg)) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("expected parameter frame, got {msg:?}"),
                ));
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended before ParamsEnd",
                ));
            }
        }
    }
}

async fn write_chunk<W>(writer: &mut W, bytes: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    check_chunk_len(bytes.len())?;
    writer.write_u32(bytes.len() as u32).await?;
    writer.write_all(bytes).await
}

fn check_chunk_len(len: usize) -> io::Result<()> {
    if len > MAX_CHUNK_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("chunk of {len} bytes exceeds limit of {MAX_CHUNK_LEN}"),
        ));
    }
    Ok(())
}

async fn read_chunk<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_CHUNK_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("chunk of {len} bytes exceeds limit of {MAX_CHUNK_LEN}"),
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}
