//! The realtime publisher: an in-process fan-out of [`payloads::RealtimeEvent`]s.
//!
//! HTTP/WebSocket presentation is out of scope and no websocket crate is
//! wired in. This implements the "Realtime publisher" component as a trait
//! with a `tokio::sync::broadcast`-backed default, so a transport adapter
//! (a WebSocket/SSE handler subscribing per-auction) can be added later
//! without touching the admission or lifecycle use cases.

use payloads::{AuctionId, RealtimeEvent};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;

/// Published best-effort: publishing never fails the caller. A channel with
/// no subscribers simply drops the event (`broadcast::Sender::send` returns
/// an error when there are zero receivers, which we ignore).
pub trait EventPublisher: Send + Sync {
    fn publish(&self, auction_id: AuctionId, event: RealtimeEvent);
}

const CHANNEL_CAPACITY: usize = 256;

/// Per-auction broadcast channels, created lazily on first publish or
/// subscribe.
pub struct BroadcastPublisher {
    channels: RwLock<HashMap<AuctionId, broadcast::Sender<RealtimeEvent>>>,
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastPublisher {
    pub fn new() -> Self {
        Self { channels: RwLock::new(HashMap::new()) }
    }

    /// Subscribe to one auction's events. Intended for a future transport
    /// adapter; unused by the core use cases themselves.
    pub fn subscribe(&self, auction_id: AuctionId) -> broadcast::Receiver<RealtimeEvent> {
        let mut channels = self.channels.write().unwrap();
        channels
            .entry(auction_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, auction_id: AuctionId, event: RealtimeEvent) {
        let mut channels = self.channels.write().unwrap();
        let sender = channels
            .entry(auction_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        // Err means no receivers; publishing is best-effort so we drop it.
        let _ = sender.send(event);
    }
}
