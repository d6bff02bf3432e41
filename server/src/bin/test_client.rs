use clap::Parser;
use rand::Rng;
use shared::{decode, encode, Envelope, Message, PlayerId, MAX_DATAGRAM_SIZE};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep, timeout_at, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about = "Connects to a server and wanders around", long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:22122")]
    server: SocketAddr,

    /// Name to register under
    #[arg(short = 'n', long, default_value = "wanderer")]
    name: String,

    /// Seconds to stay connected
    #[arg(short = 'd', long, default_value = "10")]
    duration: u64,
}

async fn send(socket: &UdpSocket, server: SocketAddr, envelope: &Envelope) -> Result<(), Box<dyn std::error::Error>> {
    socket.send_to(&encode(envelope)?, server).await?;
    Ok(())
}

/// Sends `PlayerConnect` until the server acknowledges it
async fn connect(socket: &UdpSocket, args: &Args) -> Result<PlayerId, Box<dyn std::error::Error>> {
    let hello = Envelope::anonymous(Message::PlayerConnect {
        name: args.name.clone(),
    });
    let mut buf = [0u8; MAX_DATAGRAM_SIZE + 1];

    for attempt in 1..=5 {
        println!("Connecting to {} as {:?} (attempt {})", args.server, args.name, attempt);
        send(socket, args.server, &hello).await?;

        let deadline = Instant::now() + Duration::from_secs(1);
        while let Ok(received) = timeout_at(deadline, socket.recv_from(&mut buf)).await {
            let (len, _) = received?;
            match decode(&buf[..len]) {
                Ok(Envelope {
                    message: Message::PlayerId { player_id },
                    ..
                }) => return Ok(player_id),
                Ok(other) => println!("Ignoring {:?} while connecting", other.message_type()),
                Err(e) => println!("Failed to decode reply: {}", e),
            }
        }
    }

    Err(format!("no acknowledgement from {}", args.server).into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    let player_id = connect(&socket, &args).await?;
    println!("Connected as player {}", player_id);

    let mut rng = rand::thread_rng();
    let (mut x, mut y) = (0.0f32, 0.0f32);
    let mut buf = [0u8; MAX_DATAGRAM_SIZE + 1];
    let mut step = interval(Duration::from_millis(100));
    let mut heartbeat = interval(Duration::from_secs(1));
    let mut chatted = false;
    let finish = sleep(Duration::from_secs(args.duration));
    tokio::pin!(finish);

    loop {
        tokio::select! {
            _ = &mut finish => break,
            _ = step.tick() => {
                x += rng.gen_range(-1.0..=1.0);
                y += rng.gen_range(-1.0..=1.0);
                send(&socket, args.server, &Envelope::from_player(player_id, Message::UpdatePosition { x, y })).await?;

                if !chatted {
                    let contents = format!("hello from {}", args.name);
                    send(&socket, args.server, &Envelope::from_player(player_id, Message::Chat { contents })).await?;
                    chatted = true;
                }
            }
            _ = heartbeat.tick() => {
                send(&socket, args.server, &Envelope::from_player(player_id, Message::Heartbeat)).await?;
            }
            received = socket.recv_from(&mut buf) => {
                let (len, _) = received?;
                match decode(&buf[..len]) {
                    Ok(envelope) => match envelope.message {
                        Message::UpdatePosition { x, y } => {
                            println!("  {} at ({:.2}, {:.2})", envelope.client_id, x, y)
                        }
                        Message::Chat { contents } => println!("[{}] {}", envelope.client_id, contents),
                        Message::PlayerInit { name, x, y, .. } => {
                            println!("Welcome back {} at ({:.2}, {:.2})", name, x, y)
                        }
                        other => println!("Received {:?}", other),
                    },
                    Err(e) => println!("Failed to decode broadcast: {}", e),
                }
            }
        }
    }

    println!("Test client finished");
    Ok(())
}
