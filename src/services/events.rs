use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Typed events published to the UI layer. A `tokio::sync::broadcast`
/// channel is used rather than an mpsc since multiple UI surfaces (CLI
/// watch mode, a future desktop shell) may subscribe concurrently and each
/// must see every event, not compete for one.
#[derive(Debug, Clone)]
pub enum Event {
    AlsSaved { project: String, path: String, at: DateTime<Utc> },
    ProjectDiff { project_id: String, added: Vec<String>, modified: Vec<String>, deleted: Vec<String> },
    PushDone { project: String },
    Log(String),
}

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publishing is fire-and-forget: a `SendError` only means there are no
    /// subscribers right now, which is a normal and expected state (e.g.
    /// running outside `watch` mode), not a failure.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(Event::PushDone { project: "proj".to_string() });

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, Event::PushDone { project } if project == "proj"));
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event::Log("hello".to_string()));
    }
}
