//! Length-prefixed TCP RPC server for media-info extraction (§4.7),
//! grounded in `original_source/service/bot/extractor.py`'s
//! `ExtractorRequestHandler`: a semaphore-guarded pool of extractor
//! backends, one task per connection, one task per request.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, Semaphore};
use tracing::{info, warn};

use super::protocol::{Request, Response};
use super::youtube::YoutubeExtractor;
use crate::control::{read_frame, write_frame};

pub struct ExtractorServer {
    listener: TcpListener,
    pool: Arc<Semaphore>,
    shutdown: Arc<Notify>,
}

impl ExtractorServer {
    pub async fn bind(addr: &str, pool_size: usize) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(ExtractorServer { listener, pool: Arc::new(Semaphore::new(pool_size)), shutdown: Arc::new(Notify::new()) })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until a `shutdown` request is served on any of
    /// them, at which point the whole server stops (§4.7 "closes the server").
    pub async fn run(self) -> std::io::Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    info!(%peer, "extractor accepted connection");
                    let pool = self.pool.clone();
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, pool, shutdown).await {
                            warn!(%err, "extractor connection ended with an error");
                        }
                    });
                }
                _ = self.shutdown.notified() => return Ok(()),
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, pool: Arc<Semaphore>, shutdown: Arc<Notify>) -> anyhow::Result<()> {
    loop {
        let frame = match read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(_) => return Ok(()),
        };
        let request: Request = serde_json::from_slice(&frame)?;
        if matches!(request, Request::Shutdown) {
            write_frame(&mut stream, &serde_json::to_vec(&Response::ShutdownAck)?).await?;
            shutdown.notify_one();
            return Ok(());
        }

        let permit = pool.clone().acquire_owned().await?;
        let response = execute(request).await;
        drop(permit);
        write_frame(&mut stream, &serde_json::to_vec(&response)?).await?;
    }
}

async fn execute(request: Request) -> Response {
    let extractor = YoutubeExtractor::new();
    match request {
        Request::Extract { url } => match extractor.extract(&url).await {
            Ok(track) => Response::Track { track },
            Err(err) => Response::Error { message: err.to_string() },
        },
        Request::Search { text } => match extractor.search(&text).await {
            Ok(tracks) => Response::Tracks { tracks },
            Err(err) => Response::Error { message: err.to_string() },
        },
        Request::Shutdown => Response::ShutdownAck,
    }
}
