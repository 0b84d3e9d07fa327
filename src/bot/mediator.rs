use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::chat::User;

/// Single-threaded FIFO outbound sender (§4.5 "Rate-limited message
/// sender"): messages are queued here and drained by a routine that
/// respects [`SEND_DELAY`] between consecutive HTTP sends (§8 property 4,
/// "send-delay law").
pub struct MessageSender {
    queue: VecDeque<(String, Option<User>, Option<String>)>,
    last_send: Option<Instant>,
}

impl MessageSender {
    pub const SEND_DELAY: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        MessageSender { queue: VecDeque::new(), last_send: None }
    }

    pub fn enqueue(&mut self, text: String, user: Option<User>, url: Option<String>) {
        self.queue.push_back((text, user, url));
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn due(&self) -> bool {
        match self.last_send {
            Some(last) => Instant::now() >= last + Self::SEND_DELAY,
            None => true,
        }
    }

    /// Pops the head of the queue if enough time has elapsed since the
    /// previous send; the caller is responsible for calling
    /// [`mark_sent`](Self::mark_sent) once the HTTP call completes.
    pub fn pop_due(&mut self) -> Option<(String, Option<User>, Option<String>)> {
        if self.queue.is_empty() || !self.due() {
            return None;
        }
        self.queue.pop_front()
    }

    pub fn mark_sent(&mut self) {
        self.last_send = Some(Instant::now());
    }
}

impl Default for MessageSender {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn withholds_until_send_delay_elapses() {
        let mut sender = MessageSender::new();
        sender.enqueue("hi".into(), None, None);
        let first = sender.pop_due();
        assert!(first.is_some());
        sender.mark_sent();
        sender.enqueue("again".into(), None, None);
        assert!(sender.pop_due().is_none());
    }

    #[test]
    fn fifo_ordering_is_preserved() {
        let mut sender = MessageSender::new();
        sender.enqueue("first".into(), None, None);
        sender.enqueue("second".into(), None, None);
        let (text, _, _) = sender.pop_due().unwrap();
        assert_eq!(text, "first");
    }
}
