//! Outbound delivery capability handed to the engine
//!
//! The engine never talks to sockets. It describes deliveries as `Outbound`
//! messages; the transport resolves rooms to addresses and sends them.
//! Every method returns immediately.

use log::error;
use shared::{ConnectionId, GameId, ServerEvent};
use tokio::sync::mpsc;

pub trait Broadcaster: Send + Sync {
    fn join(&self, room: &GameId, connection_id: ConnectionId);
    fn leave(&self, room: &GameId, connection_id: ConnectionId);
    fn send(&self, connection_id: ConnectionId, event: ServerEvent);
    fn broadcast(&self, room: &GameId, event: ServerEvent);
}

/// Deliveries queued for the network sender task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Join {
        room: GameId,
        connection_id: ConnectionId,
    },
    Leave {
        room: GameId,
        connection_id: ConnectionId,
    },
    Send {
        connection_id: ConnectionId,
        event: ServerEvent,
    },
    Broadcast {
        room: GameId,
        event: ServerEvent,
    },
}

#[derive(Clone)]
pub struct ChannelBroadcaster {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelBroadcaster {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn queue(&self, message: Outbound) {
        if let Err(e) = self.tx.send(message) {
            error!("Failed to queue outbound message: {}", e);
        }
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn join(&self, room: &GameId, connection_id: ConnectionId) {
        self.queue(Outbound::Join {
            room: room.clone(),
            connection_id,
        });
    }

    fn leave(&self, room: &GameId, connection_id: ConnectionId) {
        self.queue(Outbound::Leave {
            room: room.clone(),
            connection_id,
        });
    }

    fn send(&self, connection_id: ConnectionId, event: ServerEvent) {
        self.queue(Outbound::Send {
            connection_id,
            event,
        });
    }

    fn broadcast(&self, room: &GameId, event: ServerEvent) {
        self.queue(Outbound::Broadcast {
            room: room.clone(),
            event,
        });
    }
}
