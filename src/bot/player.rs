use std::time::Instant;

use thiserror::Error;

use crate::models::Track;

pub const DEFAULT_QUEUE_LIMIT: usize = 20;
pub const DEFAULT_DURATION_LIMIT: u32 = 720;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlayerError {
    #[error("queue is empty")]
    EmptyQueue,
    #[error("track duration exceeds {0} seconds limit")]
    TrackDuration(u32),
    #[error("queue exceeds limit of {0} tracks")]
    QueueLimit(usize),
}

/// One Bot's music-queue state (§3 "Bot in-memory" `player`, §4.5 "Player
/// contract").
pub struct Player {
    pub duration_limit: u32,
    pub queue_limit: usize,
    pub queue: Vec<Track>,
    pub current_track: Option<Track>,
    pub timestamp: Option<Instant>,
    pub repeat: bool,
    pub paused: bool,
}

impl Player {
    pub fn new(duration_limit: u32, queue_limit: usize) -> Self {
        Player {
            duration_limit,
            queue_limit,
            queue: Vec::new(),
            current_track: None,
            timestamp: None,
            repeat: false,
            paused: false,
        }
    }

    pub fn set_timestamp(&mut self) {
        self.timestamp = Some(Instant::now());
    }

    pub fn reset_timestamp(&mut self) {
        self.timestamp = None;
    }

    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn unpause(&mut self) {
        self.paused = false;
    }

    pub fn add_track(
        &mut self,
        track: Track,
        index: Option<usize>,
        extend_queue: bool,
        extend_duration: bool,
    ) -> Result<(), PlayerError> {
        if track.duration_sec > self.duration_limit && !extend_duration {
            return Err(PlayerError::TrackDuration(self.duration_limit));
        }
        if self.queue.len() >= self.queue_limit && !extend_queue {
            return Err(PlayerError::QueueLimit(self.queue_limit));
        }
        match index {
            Some(index) => self.queue.insert(index.min(self.queue.len()), track),
            None => self.queue.push(track),
        }
        Ok(())
    }

    pub fn pop_track(&mut self, index: usize) -> Result<Track, PlayerError> {
        if self.queue.is_empty() {
            return Err(PlayerError::EmptyQueue);
        }
        if index >= self.queue.len() {
            return Err(PlayerError::EmptyQueue);
        }
        Ok(self.queue.remove(index))
    }

    /// "Playing" per §4.5: `monotonic_now < timestamp + current_track.duration`.
    pub fn is_playing(&self) -> bool {
        match (&self.current_track, self.timestamp) {
            (Some(track), Some(timestamp)) => {
                Instant::now() < timestamp + std::time::Duration::from_secs(track.duration_sec as u64)
            }
            _ => false,
        }
    }

    /// `repeat` re-uses `current_track`; otherwise pops the next queued
    /// track. Returns `Ok(None)` when there is nothing to play (§8
    /// scenario F).
    pub fn next_track(&mut self) -> Result<Option<Track>, PlayerError> {
        if self.repeat {
            if let Some(track) = self.current_track.clone() {
                return Ok(Some(track));
            }
        }
        match self.pop_track(0) {
            Ok(track) => Ok(Some(track)),
            Err(PlayerError::EmptyQueue) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(duration_sec: u32) -> Track {
        Track {
            title: "t".into(),
            duration_sec,
            origin_id: "id".into(),
            origin_url: "https://example.com".into(),
            stream_url: "https://example.com/stream".into(),
        }
    }

    #[test]
    fn add_track_rejects_over_duration_without_extension() {
        let mut player = Player::new(DEFAULT_DURATION_LIMIT, DEFAULT_QUEUE_LIMIT);
        let err = player.add_track(track(1000), None, false, false).unwrap_err();
        assert_eq!(err, PlayerError::TrackDuration(DEFAULT_DURATION_LIMIT));
    }

    #[test]
    fn add_track_allows_over_duration_with_extension() {
        let mut player = Player::new(DEFAULT_DURATION_LIMIT, DEFAULT_QUEUE_LIMIT);
        player.add_track(track(1000), None, false, true).unwrap();
        assert_eq!(player.queue.len(), 1);
    }

    #[test]
    fn next_track_without_repeat_drains_queue_then_clears_current() {
        let mut player = Player::new(DEFAULT_DURATION_LIMIT, DEFAULT_QUEUE_LIMIT);
        player.add_track(track(10), None, false, false).unwrap();
        player.current_track = player.next_track().unwrap();
        assert!(player.current_track.is_some());
        player.current_track = player.next_track().unwrap();
        assert!(player.current_track.is_none());
    }

    #[test]
    fn repeat_reuses_current_track() {
        let mut player = Player::new(DEFAULT_DURATION_LIMIT, DEFAULT_QUEUE_LIMIT);
        player.repeat = true;
        player.current_track = Some(track(10));
        let next = player.next_track().unwrap();
        assert_eq!(next, player.current_track);
    }
}
