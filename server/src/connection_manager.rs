//! Connection tracking and room membership for the race server
//!
//! This module handles the server-side bookkeeping of UDP peers, including:
//! - Connection lifecycle (connect, disconnect, timeout)
//! - Address lookup for routing incoming datagrams to a connection id
//! - Room membership used to fan session events out to their players
//! - Connection capacity management
//!
//! The engine never sees addresses. It names connections by id and rooms by
//! game id, and the network sender resolves both through this manager.

use log::info;
use shared::{ConnectionId, GameId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected peer
#[derive(Debug)]
pub struct Connection {
    /// Unique connection identifier assigned by the server
    pub id: ConnectionId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this peer
    pub last_seen: Instant,
    /// Session room this connection receives broadcasts for
    pub room: Option<GameId>,
}

impl Connection {
    pub fn new(id: ConnectionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            room: None,
        }
    }

    /// Records activity from this peer
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if no packets have been received from this peer within
    /// `timeout`, indicating a likely disconnect.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected peers and the rooms they listen to
///
/// Connection ids start from 1 and are never reused while the server runs,
/// so a late delivery for a departed connection can never reach a newcomer.
pub struct ConnectionManager {
    /// Connected peers indexed by their unique id
    connections: HashMap<ConnectionId, Connection>,
    /// Next available id for new connections
    next_connection_id: ConnectionId,
    /// Maximum number of concurrent connections allowed
    max_connections: usize,
}

impl ConnectionManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            next_connection_id: 1,
            max_connections,
        }
    }

    /// Attempts to add a new connection
    ///
    /// Returns Some(connection_id) if successful, None if the server is at
    /// capacity.
    pub fn add(&mut self, addr: SocketAddr) -> Option<ConnectionId> {
        if self.connections.len() >= self.max_connections {
            return None;
        }

        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;

        info!("Connection {} opened from {}", connection_id, addr);
        self.connections
            .insert(connection_id, Connection::new(connection_id, addr));

        Some(connection_id)
    }

    /// Removes a connection. Returns true if it was found.
    pub fn remove(&mut self, connection_id: ConnectionId) -> bool {
        if let Some(connection) = self.connections.remove(&connection_id) {
            info!("Connection {} closed ({})", connection.id, connection.addr);
            true
        } else {
            false
        }
    }

    /// Finds a connection id by its network address
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<ConnectionId> {
        self.connections
            .values()
            .find(|connection| connection.addr == addr)
            .map(|connection| connection.id)
    }

    pub fn addr_of(&self, connection_id: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&connection_id).map(|c| c.addr)
    }

    /// Updates the activity timestamp. Returns false for unknown ids.
    pub fn touch(&mut self, connection_id: ConnectionId) -> bool {
        match self.connections.get_mut(&connection_id) {
            Some(connection) => {
                connection.touch();
                true
            }
            None => false,
        }
    }

    /// Puts a connection in `room`, replacing any previous room
    pub fn join_room(&mut self, connection_id: ConnectionId, room: GameId) -> bool {
        match self.connections.get_mut(&connection_id) {
            Some(connection) => {
                connection.room = Some(room);
                true
            }
            None => false,
        }
    }

    /// Takes a connection out of `room`; a newer room is left alone
    pub fn leave_room(&mut self, connection_id: ConnectionId, room: &GameId) {
        if let Some(connection) = self.connections.get_mut(&connection_id) {
            if connection.room.as_ref() == Some(room) {
                connection.room = None;
            }
        }
    }

    /// Ids and addresses of every connection listening to `room`
    pub fn room_members(&self, room: &GameId) -> Vec<(ConnectionId, SocketAddr)> {
        self.connections
            .values()
            .filter(|connection| connection.room.as_ref() == Some(room))
            .map(|connection| (connection.id, connection.addr))
            .collect()
    }

    /// Removes connections that have been silent for longer than `timeout`
    /// and returns their ids so the engine can treat them as leaving.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<ConnectionId> {
        let timed_out: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|connection| connection.is_timed_out(timeout))
            .map(|connection| connection.id)
            .collect();

        for connection_id in &timed_out {
            self.remove(*connection_id);
        }

        timed_out
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
