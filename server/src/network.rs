//! Server network layer handling UDP communications and engine coordination

use crate::broadcast::{ChannelBroadcaster, Outbound};
use crate::config::{EngineConfig, ServerConfig};
use crate::connection_manager::ConnectionManager;
use crate::engine::SyncEngine;
use crate::store::GameStore;
use crate::words::WordSource;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{ConnectionId, Packet, CLIENT_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Largest datagram the server accepts from a client
const RECV_BUFFER_SIZE: usize = 2048;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ConnectionTimeout {
        connection_id: ConnectionId,
    },
    Shutdown,
}

/// Direct replies queued by the main loop for the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// Main server coordinating networking and the session engine
pub struct Server {
    socket: Arc<UdpSocket>,
    connections: Arc<RwLock<ConnectionManager>>,
    engine: SyncEngine,
    client_timeout: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
    outbound_rx: Option<mpsc::UnboundedReceiver<Outbound>>,
}

impl Server {
    pub async fn new(
        config: &ServerConfig,
        engine_config: EngineConfig,
        store: Arc<dyn GameStore>,
        words: Arc<dyn WordSource>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(&config.address).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let (broadcaster, outbound_rx) = ChannelBroadcaster::channel();
        let engine = SyncEngine::new(engine_config, store, words, Arc::new(broadcaster));

        Ok(Server {
            socket,
            connections: Arc::new(RwLock::new(ConnectionManager::new(config.max_clients))),
            engine,
            client_timeout: config.client_timeout,
            server_tx,
            server_rx,
            game_tx,
            game_rx: Some(game_rx),
            outbound_rx: Some(outbound_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Sender for control messages; `ServerMessage::Shutdown` stops `run`
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; RECV_BUFFER_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains direct replies and engine deliveries
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let connections = Arc::clone(&self.connections);
        let (Some(mut game_rx), Some(mut outbound_rx)) =
            (self.game_rx.take(), self.outbound_rx.take())
        else {
            warn!("Network sender already running");
            return;
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = game_rx.recv() => match message {
                        Some(GameMessage::SendPacket { packet, addr }) => {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send packet to {}: {}", addr, e);
                            }
                        }
                        None => break,
                    },
                    outbound = outbound_rx.recv() => match outbound {
                        Some(outbound) => Self::deliver(&socket, &connections, outbound).await,
                        None => break,
                    },
                }
            }
            debug!("Network sender stopped");
        });
    }

    /// Resolves an engine delivery to addresses and sends it
    async fn deliver(
        socket: &UdpSocket,
        connections: &RwLock<ConnectionManager>,
        outbound: Outbound,
    ) {
        match outbound {
            Outbound::Join {
                room,
                connection_id,
            } => {
                if !connections.write().await.join_room(connection_id, room) {
                    debug!("Connection {} gone before joining its room", connection_id);
                }
            }
            Outbound::Leave {
                room,
                connection_id,
            } => {
                connections.write().await.leave_room(connection_id, &room);
            }
            Outbound::Send {
                connection_id,
                event,
            } => {
                let addr = connections.read().await.addr_of(connection_id);
                let Some(addr) = addr else {
                    debug!("Dropping event for closed connection {}", connection_id);
                    return;
                };
                if let Err(e) = Self::send_packet_impl(socket, &Packet::Server(event), addr).await
                {
                    error!("Failed to send to connection {}: {}", connection_id, e);
                }
            }
            Outbound::Broadcast { room, event } => {
                let members = connections.read().await.room_members(&room);
                if members.is_empty() {
                    return;
                }

                let data = match serialize(&Packet::Server(event)) {
                    Ok(data) => data,
                    Err(e) => {
                        error!("Failed to encode broadcast for room {}: {}", room, e);
                        return;
                    }
                };
                for (connection_id, addr) in members {
                    if let Err(e) = socket.send_to(&data, addr).await {
                        error!("Failed to send to connection {}: {}", connection_id, e);
                    }
                }
            }
        }
    }

    /// Spawns task that monitors connection timeouts
    fn spawn_timeout_checker(&self) {
        let connections = Arc::clone(&self.connections);
        let server_tx = self.server_tx.clone();
        let timeout = self.client_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut connections_guard = connections.write().await;
                    connections_guard.check_timeouts(timeout)
                };

                for connection_id in timed_out {
                    info!("Connection {} timed out", connection_id);
                    if let Err(e) =
                        server_tx.send(ServerMessage::ConnectionTimeout { connection_id })
                    {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Processes an incoming packet
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != CLIENT_VERSION {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // Remove existing connection if present
                let existing = self.connections.read().await.find_by_addr(addr);
                if let Some(existing_id) = existing {
                    info!("Replacing connection {} from {}", existing_id, addr);
                    self.connections.write().await.remove(existing_id);
                    self.engine.disconnect(existing_id).await;
                }

                let connection_id = self.connections.write().await.add(addr);
                let response = match connection_id {
                    Some(client_id) => Packet::Connected { client_id },
                    None => Packet::Disconnected {
                        reason: "Server full".to_string(),
                    },
                };
                self.send_packet(response, addr);
            }

            Packet::Heartbeat => {
                let mut connections = self.connections.write().await;
                if let Some(connection_id) = connections.find_by_addr(addr) {
                    connections.touch(connection_id);
                }
            }

            Packet::Event(event) => {
                let connection_id = {
                    let mut connections = self.connections.write().await;
                    let connection_id = connections.find_by_addr(addr);
                    if let Some(connection_id) = connection_id {
                        connections.touch(connection_id);
                    }
                    connection_id
                };

                match connection_id {
                    Some(connection_id) => self.engine.handle(connection_id, event).await,
                    None => warn!("Event from unconnected address {}", addr),
                }
            }

            Packet::Disconnect => {
                let connection_id = self.connections.read().await.find_by_addr(addr);
                if let Some(connection_id) = connection_id {
                    self.connections.write().await.remove(connection_id);
                    self.engine.disconnect(connection_id).await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Main server loop. Events are applied one at a time in arrival order,
    /// so each connection's requests reach the engine in the order sent.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Server started successfully");

        loop {
            match self.server_rx.recv().await {
                Some(ServerMessage::PacketReceived { packet, addr }) => {
                    self.handle_packet(packet, addr).await;
                }
                Some(ServerMessage::ConnectionTimeout { connection_id }) => {
                    self.engine.disconnect(connection_id).await;
                }
                Some(ServerMessage::Shutdown) | None => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
