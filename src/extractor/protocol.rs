//! Wire shape for the extractor RPC (§4.7, §6 "Worker control frames"
//! sibling protocol): a length-prefixed JSON request/response pair over a
//! plain TCP socket, substituting the source's pickled `(verb, payload)`
//! tuples per §9's framing note.

use serde::{Deserialize, Serialize};

use crate::models::Track;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum Request {
    Extract { url: String },
    Search { text: String },
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Track { track: Track },
    Tracks { tracks: Vec<Track> },
    Error { message: String },
    ShutdownAck,
}
