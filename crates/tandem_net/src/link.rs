//! Peer link abstraction
//!
//! A [`PeerLink`] is one remote participant reached over two channels. Sends
//! on a channel that is not [`ChannelState::Open`] are dropped silently: both
//! channels are legitimately unready while a connection is being set up, and
//! callers must never assume delivery.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};
use tandem_core::PeerId;

/// Logical channel on a peer link.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Ordered, retransmitted, in-order delivery.
    Reliable,
    /// Unordered, at-most-once, best effort.
    Unreliable,
}

impl Channel {
    #[inline]
    fn index(self) -> usize {
        match self {
            Channel::Reliable => 0,
            Channel::Unreliable => 1,
        }
    }
}

/// Readiness of one channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Delivery callback for one channel.
pub type MessageHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    /// Sends dropped because the channel was not open or the link lost them.
    pub messages_dropped: u64,
    pub messages_received: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub reliable: ChannelStats,
    pub unreliable: ChannelStats,
}

impl LinkStats {
    pub fn channel(&self, channel: Channel) -> &ChannelStats {
        match channel {
            Channel::Reliable => &self.reliable,
            Channel::Unreliable => &self.unreliable,
        }
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut ChannelStats {
        match channel {
            Channel::Reliable => &mut self.reliable,
            Channel::Unreliable => &mut self.unreliable,
        }
    }
}

/// A point-to-point link to one remote peer.
pub trait PeerLink: Send + Sync {
    /// The peer on the other end.
    fn remote(&self) -> PeerId;

    fn state(&self, channel: Channel) -> ChannelState;

    /// Sends `bytes` on `channel`. Dropped silently unless the channel is open.
    fn send(&self, channel: Channel, bytes: &[u8]);

    /// Installs (or replaces) the delivery callback for `channel`.
    fn set_handler(&self, channel: Channel, handler: MessageHandler);

    fn stats(&self) -> LinkStats;

    fn send_reliable(&self, bytes: &[u8]) {
        self.send(Channel::Reliable, bytes);
    }

    fn send_unreliable(&self, bytes: &[u8]) {
        self.send(Channel::Unreliable, bytes);
    }

    fn on_reliable_message(&self, handler: MessageHandler) {
        self.set_handler(Channel::Reliable, handler);
    }

    fn on_unreliable_message(&self, handler: MessageHandler) {
        self.set_handler(Channel::Unreliable, handler);
    }
}

/// Channel states, handlers and counters shared between a link and its
/// delivery tasks.
pub(crate) struct LinkShared {
    states: Mutex<[ChannelState; 2]>,
    handlers: RwLock<[Option<MessageHandler>; 2]>,
    stats: Mutex<LinkStats>,
}

impl LinkShared {
    pub(crate) fn new(initial: ChannelState) -> Self {
        Self {
            states: Mutex::new([initial; 2]),
            handlers: RwLock::new([None, None]),
            stats: Mutex::new(LinkStats::default()),
        }
    }

    pub(crate) fn state(&self, channel: Channel) -> ChannelState {
        match self.states.lock() {
            Ok(states) => states[channel.index()],
            Err(_) => ChannelState::Closed,
        }
    }

    pub(crate) fn set_state(&self, channel: Channel, state: ChannelState) {
        if let Ok(mut states) = self.states.lock() {
            states[channel.index()] = state;
        }
    }

    pub(crate) fn close_all(&self) {
        self.set_state(Channel::Reliable, ChannelState::Closed);
        self.set_state(Channel::Unreliable, ChannelState::Closed);
    }

    pub(crate) fn is_open(&self, channel: Channel) -> bool {
        self.state(channel) == ChannelState::Open
    }

    pub(crate) fn set_handler(&self, channel: Channel, handler: MessageHandler) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers[channel.index()] = Some(handler);
        }
    }

    pub(crate) fn record_sent(&self, channel: Channel, len: usize) {
        if let Ok(mut stats) = self.stats.lock() {
            let entry = stats.channel_mut(channel);
            entry.messages_sent += 1;
            entry.bytes_sent += len as u64;
        }
    }

    pub(crate) fn record_dropped(&self, channel: Channel) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.channel_mut(channel).messages_dropped += 1;
        }
    }

    pub(crate) fn stats(&self) -> LinkStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    /// Hands an inbound message to the installed handler, if any.
    pub(crate) fn deliver(&self, channel: Channel, bytes: Vec<u8>) {
        let handler = match self.handlers.read() {
            Ok(handlers) => handlers[channel.index()].clone(),
            Err(_) => None,
        };
        if let Ok(mut stats) = self.stats.lock() {
            stats.channel_mut(channel).messages_received += 1;
        }
        match handler {
            Some(handler) => handler(bytes),
            None => tracing::trace!(?channel, len = bytes.len(), "no handler installed, dropping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn shared_state_tracks_channels_independently() {
        let shared = LinkShared::new(ChannelState::Connecting);
        shared.set_state(Channel::Unreliable, ChannelState::Open);
        assert!(!shared.is_open(Channel::Reliable));
        assert!(shared.is_open(Channel::Unreliable));
        shared.close_all();
        assert_eq!(shared.state(Channel::Unreliable), ChannelState::Closed);
    }

    #[test]
    fn deliver_invokes_handler_and_counts() {
        let shared = LinkShared::new(ChannelState::Open);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        shared.set_handler(
            Channel::Reliable,
            Arc::new(move |bytes| {
                counter.fetch_add(bytes.len(), Ordering::SeqCst);
            }),
        );
        shared.deliver(Channel::Reliable, vec![1, 2, 3]);
        shared.deliver(Channel::Unreliable, vec![9]);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(shared.stats().reliable.messages_received, 1);
        assert_eq!(shared.stats().unreliable.messages_received, 1);
    }
}
