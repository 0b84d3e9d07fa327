use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::protocol::{Request, Response};
use crate::control::{read_frame, write_frame, FramingError};
use crate::models::Track;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Remote(String),
    #[error("unexpected response from extractor")]
    UnexpectedResponse,
}

/// Bot-side client holding one long-lived socket behind a lock, so only
/// one request is ever in flight per connection (§4.7).
pub struct Client {
    addr: (String, u16),
    socket: Mutex<Option<TcpStream>>,
}

impl Client {
    pub fn new(host: String, port: u16) -> Self {
        Client { addr: (host, port), socket: Mutex::new(None) }
    }

    async fn request(&self, request: Request) -> Result<Response, ExtractorError> {
        let mut guard = self.socket.lock().await;
        if guard.is_none() {
            *guard = Some(TcpStream::connect(&self.addr).await?);
        }
        let stream = guard.as_mut().expect("just connected");
        if let Err(err) = write_frame(stream, &serde_json::to_vec(&request).map_err(FramingError::from)?).await {
            *guard = None;
            return Err(err.into());
        }
        match read_frame(stream).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).map_err(FramingError::from)?),
            Err(err) => {
                *guard = None;
                Err(err.into())
            }
        }
    }

    pub async fn extract(&self, url: &str) -> Result<Track, ExtractorError> {
        match self.request(Request::Extract { url: url.to_string() }).await? {
            Response::Track { track } => Ok(track),
            Response::Error { message } => Err(ExtractorError::Remote(message)),
            _ => Err(ExtractorError::UnexpectedResponse),
        }
    }

    pub async fn search(&self, text: &str) -> Result<Vec<Track>, ExtractorError> {
        match self.request(Request::Search { text: text.to_string() }).await? {
            Response::Tracks { tracks } => Ok(tracks),
            Response::Error { message } => Err(ExtractorError::Remote(message)),
            _ => Err(ExtractorError::UnexpectedResponse),
        }
    }

    pub async fn shutdown(&self) -> Result<(), ExtractorError> {
        self.request(Request::Shutdown).await?;
        *self.socket.lock().await = None;
        Ok(())
    }
}
