//! Balancer↔Worker control channel: an 8-byte big-endian length prefix
//! followed by a JSON payload (§4.4, §6 "Worker control frames"). JSON
//! stands in for the original pickle framing per the design notes —
//! only the `(signal, session, sid, error)` shape is load-bearing.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::models::Session;

const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("frame of {0} bytes exceeds the maximum of {MAX_FRAME_LEN}")]
    TooLarge(u64),
    #[error("control channel closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] serde_json::Error),
}

pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), FramingError> {
    writer.write_all(&(payload.len() as u64).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>, FramingError> {
    let mut len_buf = [0u8; 8];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FramingError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = u64::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(FramingError::TooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Balancer → Worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlCommand {
    Create { sid: String, session: Box<Session> },
    Delete { sid: String },
    Stop,
}

/// Worker → Balancer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum WorkerSignal {
    Connected { sid: String, session: Box<Session> },
    Failed { sid: String, reason: String },
    Deleted { sid: String, session: Option<Box<Session>>, error: Option<String> },
    Disconnected { sid: String, session: Box<Session> },
    Update { sid: String, session: Box<Session> },
    Crashed,
}

pub async fn write_command<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    command: &ControlCommand,
) -> Result<(), FramingError> {
    write_frame(writer, &serde_json::to_vec(command)?).await
}

pub async fn read_command<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<ControlCommand, FramingError> {
    Ok(serde_json::from_slice(&read_frame(reader).await?)?)
}

pub async fn write_signal<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    signal: &WorkerSignal,
) -> Result<(), FramingError> {
    write_frame(writer, &serde_json::to_vec(signal)?).await
}

pub async fn read_signal<R: AsyncReadExt + Unpin>(
    reader: &mut R,
) -> Result<WorkerSignal, FramingError> {
    Ok(serde_json::from_slice(&read_frame(reader).await?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn frame_round_trips_through_a_pipe() {
        let (mut a, mut b) = duplex(4096);
        write_frame(&mut a, b"hello").await.unwrap();
        let got = read_frame(&mut b).await.unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn read_frame_reports_closed_on_eof() {
        let (a, mut b) = duplex(4096);
        drop(a);
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, FramingError::Closed));
    }

    #[tokio::test]
    async fn control_command_round_trips() {
        let (mut a, mut b) = duplex(8192);
        let cmd = ControlCommand::Delete { sid: "abc".into() };
        write_command(&mut a, &cmd).await.unwrap();
        let got = read_command(&mut b).await.unwrap();
        assert!(matches!(got, ControlCommand::Delete { sid } if sid == "abc"));
    }
}
