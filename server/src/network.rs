//! Server network layer: UDP ingress, the outbound sender and tick wiring

use crate::config::ServerConfig;
use crate::dispatcher::{MessageContext, MessageDispatcher};
use crate::error::ServerError;
use crate::handlers::register_default_handlers;
use crate::outbox::{Outbound, Outbox};
use crate::registration::RegistrationService;
use crate::session::{Session, SessionRegistry};
use crate::store::PlayerStore;
use crate::ticks::{persist_players, run_broadcast_loop, run_persistence_loop};
use log::{debug, error, info, warn};
use shared::{decode, MessageType, MAX_DATAGRAM_SIZE};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};

/// Upper bound on how long an idle session outlives its timeout
const MAX_EXPIRY_SWEEP: Duration = Duration::from_secs(1);
const MIN_EXPIRY_SWEEP: Duration = Duration::from_millis(10);

/// State shared by the ingress loop, the handlers and the tick loops
pub struct ServerState {
    pub registry: Arc<SessionRegistry>,
    pub registration: RegistrationService,
    pub store: Arc<dyn PlayerStore>,
    pub outbox: Outbox,
}

impl ServerState {
    /// Builds the state around `store`, returning the receiving end of the outbox
    pub fn new(store: Arc<dyn PlayerStore>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbox, outbound_rx) = Outbox::channel();
        let state = Self {
            registry: Arc::new(SessionRegistry::new()),
            registration: RegistrationService::new(Arc::clone(&store)),
            store,
            outbox,
        };
        (state, outbound_rx)
    }
}

/// Per-datagram processing: decode, resolve the sender, dispatch
pub struct Ingress {
    state: Arc<ServerState>,
    dispatcher: MessageDispatcher<ServerState>,
}

impl Ingress {
    /// Ingress with the standard handler set
    pub fn new(state: Arc<ServerState>) -> Self {
        let mut dispatcher = MessageDispatcher::new();
        register_default_handlers(&mut dispatcher);
        Self::with_dispatcher(state, dispatcher)
    }

    pub fn with_dispatcher(
        state: Arc<ServerState>,
        dispatcher: MessageDispatcher<ServerState>,
    ) -> Self {
        Self { state, dispatcher }
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn shared_state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Handles one datagram received from `source`
    ///
    /// Every error is scoped to this datagram; the caller logs it and keeps
    /// receiving.
    pub fn handle_datagram(&self, bytes: &[u8], source: SocketAddr) -> Result<(), ServerError> {
        let envelope = decode(bytes)?;
        let message_type = envelope.message_type();

        let session = envelope
            .sender_id()
            .and_then(|player_id| self.state.registry.find_by_player_id(player_id))
            .filter(|session| {
                if session.addr != source {
                    warn!(
                        "{} claiming player {} came from {} instead of {}",
                        message_type, session.player_id, source, session.addr
                    );
                    return false;
                }
                true
            });

        if session.is_none() && message_type != MessageType::PlayerConnect {
            return Err(ServerError::UnknownSender {
                addr: source,
                message_type,
            });
        }

        if session.is_some() {
            self.state.registry.touch(source);
        }

        let context = MessageContext {
            envelope,
            session,
            source,
        };
        self.dispatcher.dispatch(&self.state, &context)
    }

    /// Drops the session bound to `addr`, if any
    pub fn disconnect(&self, addr: SocketAddr) -> Option<Session> {
        let session = self.state.registry.remove(addr)?;
        info!(
            "Player {} at {} disconnected (unreachable)",
            session.player_id, addr
        );
        Some(session)
    }
}

/// Whether a send error means the peer can no longer be reached
pub fn is_unreachable(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

/// Main server coordinating the ingress loop and its background tasks
pub struct Server {
    socket: Arc<UdpSocket>,
    config: ServerConfig,
    ingress: Ingress,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("socket", &self.socket)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Binds the UDP socket from `config` and builds the server state
    ///
    /// Nothing runs until [`Server::run`] or [`Server::run_until`] is called.
    /// Failing to bind is the one fatal startup error.
    pub async fn bind(config: ServerConfig, store: Arc<dyn PlayerStore>) -> Result<Self, ServerError> {
        let addr = config.bind_addr();
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("Server listening on {}", addr);

        let (state, outbound_rx) = ServerState::new(store);
        Ok(Self {
            socket: Arc::new(socket),
            config,
            ingress: Ingress::new(Arc::new(state)),
            outbound_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn state(&self) -> Arc<ServerState> {
        self.ingress.shared_state()
    }

    /// Runs until the process exits
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the ingress loop and background tasks until `shutdown` resolves,
    /// then stops the tasks and flushes connected players to the store
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let Server {
            socket,
            config,
            ingress,
            outbound_rx,
        } = self;
        let state = ingress.shared_state();

        let (unreachable_tx, mut unreachable_rx) = mpsc::unbounded_channel();
        let send_socket = Arc::clone(&socket);
        let sender = tokio::spawn(run_sender(
            move |addr, datagram: Arc<[u8]>| {
                let socket = Arc::clone(&send_socket);
                async move { socket.send_to(&datagram, addr).await }
            },
            outbound_rx,
            unreachable_tx,
        ));
        let broadcast = tokio::spawn(run_broadcast_loop(
            Arc::clone(&state.registry),
            state.outbox.clone(),
            config.broadcast_interval,
        ));
        let (stop_persistence, persistence_stopped) = watch::channel(false);
        let persistence = tokio::spawn(run_persistence_loop(
            Arc::clone(&state.registry),
            Arc::clone(&state.store),
            config.save_interval,
            persistence_stopped,
        ));

        let idle_timeout = config.idle_timeout;
        let mut expiry = interval(
            idle_timeout
                .unwrap_or(MAX_EXPIRY_SWEEP)
                .clamp(MIN_EXPIRY_SWEEP, MAX_EXPIRY_SWEEP),
        );
        expiry.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // One byte of headroom so oversized datagrams reach the decoder whole
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                received = socket.recv_from(&mut buffer) => match received {
                    Ok((len, source)) => {
                        if let Err(e) = ingress.handle_datagram(&buffer[..len], source) {
                            debug!("Dropped datagram from {}: {}", source, e);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                Some(addr) = unreachable_rx.recv() => {
                    ingress.disconnect(addr);
                }
                _ = expiry.tick(), if idle_timeout.is_some() => {
                    if let Some(timeout) = idle_timeout {
                        state.registry.expire_idle(timeout);
                    }
                }
            }
        }

        broadcast.abort();

        // A periodic save still in flight must land before the final one
        let _ = stop_persistence.send(true);
        if let Err(e) = persistence.await {
            error!("Persistence task failed: {}", e);
        }

        let registry = Arc::clone(&state.registry);
        let store = Arc::clone(&state.store);
        match tokio::task::spawn_blocking(move || persist_players(&registry, store.as_ref())).await {
            Ok(Ok(saved)) => info!("Saved {} players before shutdown", saved),
            Ok(Err(e)) => error!("{}", ServerError::StoreUnavailable(e)),
            Err(e) => error!("Final save failed: {}", e),
        }

        sender.abort();
        Ok(())
    }
}

/// Drains the outbox through `send`, reporting unreachable peers
///
/// Only errors for which [`is_unreachable`] holds are reported; anything else
/// is logged and the datagram is dropped. Whether a closed peer ever shows up
/// here depends on the platform: Linux does not surface ICMP errors on an
/// unconnected UDP socket, so there such peers leave through idle expiry.
async fn run_sender<S, Fut>(
    mut send: S,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    unreachable: mpsc::UnboundedSender<SocketAddr>,
) where
    S: FnMut(SocketAddr, Arc<[u8]>) -> Fut,
    Fut: Future<Output = io::Result<usize>>,
{
    while let Some(Outbound { addr, datagram }) = outbound.recv().await {
        let Err(source) = send(addr, datagram).await else {
            continue;
        };

        let lost = is_unreachable(&source);
        let failure = ServerError::SendFailure { addr, source };
        if !lost {
            warn!("{}", failure);
            continue;
        }

        debug!("{}", failure);
        if unreachable.send(addr).is_err() {
            break;
        }
    }
}
