use futures::stream::{self, Stream};
use log::warn;
use tokio::sync::broadcast;

use crate::channel::types::{ChannelEvent, ChannelState};

/**
 * How many events may queue up behind a slow subscriber before it starts
 * losing the oldest ones.
 */
const BUS_CAPACITY: usize = 256;

/// Publish/subscribe bus between the channel and its observers.
///
/// The session publishes state changes and decoded inbound messages here;
/// any number of subscribers consume them as streams. Events published while
/// no subscriber exists are dropped.
pub struct EventBus {
    tx: broadcast::Sender<ChannelEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        EventBus { tx }
    }

    pub fn publish(&self, event: ChannelEvent) {
        // a send error only means there is no subscriber right now
        let _ = self.tx.send(event);
    }

    /// Every channel event, in publish order. The stream ends when the bus
    /// is dropped.
    pub fn events(&self) -> impl Stream<Item = ChannelEvent> + Send {
        let rx = self.tx.subscribe();

        stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event subscriber lagged; skipped {} events", skipped);
                    },
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    /// Decoded inbound messages only, in arrival order. The stream ends when
    /// the channel disconnects.
    pub fn messages(&self) -> impl Stream<Item = String> + Send {
        let rx = self.tx.subscribe();

        stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(ChannelEvent::Message(message)) => return Some((message, rx)),
                    Ok(ChannelEvent::StateChange(ChannelState::Disconnected)) => return None,
                    Ok(ChannelEvent::StateChange(_)) => {},
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Message subscriber lagged; skipped {} events", skipped);
                    },
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
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
    use futures::StreamExt;

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let mut events = Box::pin(bus.events());

        bus.publish(ChannelEvent::StateChange(ChannelState::Connecting));
        bus.publish(ChannelEvent::StateChange(ChannelState::Connected));

        assert_eq!(
            events.next().await,
            Some(ChannelEvent::StateChange(ChannelState::Connecting)),
        );
        assert_eq!(
            events.next().await,
            Some(ChannelEvent::StateChange(ChannelState::Connected)),
        );
    }

    #[tokio::test]
    async fn message_stream_filters_state_changes_and_ends_on_disconnect() {
        let bus = EventBus::new();
        let mut messages = Box::pin(bus.messages());

        bus.publish(ChannelEvent::StateChange(ChannelState::Connected));
        bus.publish(ChannelEvent::Message(String::from("Hi")));
        bus.publish(ChannelEvent::StateChange(ChannelState::Disconnected));

        assert_eq!(messages.next().await.as_deref(), Some("Hi"));
        assert_eq!(messages.next().await, None);
    }

    #[tokio::test]
    async fn event_stream_ends_when_the_bus_is_dropped() {
        let bus = EventBus::new();
        let mut events = Box::pin(bus.events());

        drop(bus);

        assert_eq!(events.next().await, None);
    }
}
