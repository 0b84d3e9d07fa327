use serde::{Deserialize, Serialize};

/// A playable unit resolved by an extractor backend (§3 `Track`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub title: String,
    pub duration_sec: u32,
    pub origin_id: String,
    pub origin_url: String,
    pub stream_url: String,
}
