use bincode::{deserialize, serialize};
use shared::{ClientEvent, GameSnapshot, Packet, Phase, ServerEvent, TimerUpdate, CLIENT_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

async fn send(
    socket: &UdpSocket,
    server_addr: SocketAddr,
    packet: &Packet,
) -> Result<(), Box<dyn std::error::Error>> {
    socket.send_to(&serialize(packet)?, server_addr).await?;
    Ok(())
}

async fn recv(socket: &UdpSocket) -> Result<Packet, Box<dyn std::error::Error>> {
    let mut buf = vec![0u8; 65_536];
    let (len, _) = timeout(RECV_TIMEOUT, socket.recv_from(&mut buf)).await??;
    Ok(deserialize::<Packet>(&buf[0..len])?)
}

fn print_results(snapshot: &GameSnapshot) {
    for player in &snapshot.players {
        match player.wpm {
            Some(wpm) => println!("  {}: {} wpm", player.nickname, wpm),
            None => println!("  {}: unfinished", player.nickname),
        }
    }
}

/// Plays one solo race against a running server: creates a game, starts the
/// countdown, types every word and prints the result.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:3000".to_string())
        .parse::<SocketAddr>()?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    println!("Sending connection request to {}", server_addr);
    send(
        &socket,
        server_addr,
        &Packet::Connect {
            client_version: CLIENT_VERSION,
        },
    )
    .await?;

    match recv(&socket).await? {
        Packet::Connected { client_id } => println!("Connected with client ID: {}", client_id),
        other => {
            println!("Expected Connected but got: {:?}", other);
            return Ok(());
        }
    }

    let create = ClientEvent::CreateGame {
        nickname: "test_client".to_string(),
    };
    send(&socket, server_addr, &Packet::Event(create)).await?;

    let mut typing = false;
    let mut game_id = String::new();

    loop {
        let event = match recv(&socket).await? {
            Packet::Server(event) => event,
            other => {
                println!("Unexpected packet: {:?}", other);
                continue;
            }
        };

        match event {
            ServerEvent::UpdateGame(snapshot) => {
                game_id = snapshot.id.to_string();
                println!("Created game {} with {} words", game_id, snapshot.words.len());
                if let Some(leader) = snapshot.leader() {
                    let start = ClientEvent::StartTimer {
                        player_id: leader.id,
                        game_id: game_id.clone(),
                    };
                    send(&socket, server_addr, &Packet::Event(start)).await?;
                }
            }
            ServerEvent::Timer(TimerUpdate::Countdown { countdown, message }) => {
                println!("{} {}", message, countdown);
            }
            ServerEvent::Timer(TimerUpdate::Remaining { remaining, message }) => {
                println!("{} {}", message, remaining);
            }
            ServerEvent::UpdateGameState(snapshot) => match snapshot.phase {
                Phase::InProgress if !typing => {
                    typing = true;
                    println!("Race started: {}", snapshot.words.join(" "));
                    for index in 0..snapshot.words.len() as u32 {
                        sleep(Duration::from_millis(250)).await;
                        let input = ClientEvent::UserInput {
                            current_word_index: index,
                            typed_word_count: index + 1,
                            game_id: game_id.clone(),
                        };
                        send(&socket, server_addr, &Packet::Event(input)).await?;
                    }
                }
                Phase::Over => {
                    println!("Race over");
                    print_results(&snapshot);
                    break;
                }
                _ => {}
            },
            ServerEvent::Done => println!("Finished!"),
            ServerEvent::Error(message) => println!("Server error: {}", message),
        }
    }

    println!("Sending disconnect request");
    send(&socket, server_addr, &Packet::Disconnect).await?;
    println!("Test client finished");

    Ok(())
}
