//! Server-side handlers for client messages
//!
//! Each handler receives the shared `ServerState` and the context of one
//! inbound message. Handlers mutate in-memory session state or queue
//! outbound datagrams; none of them writes to the player store, which is
//! left to the persistence tick.

use crate::dispatcher::{MessageContext, MessageDispatcher};
use crate::error::ServerError;
use crate::network::ServerState;
use crate::session::Session;
use log::{debug, info, warn};
use shared::{encode, normalize_name, Envelope, Message, MessageType, Player};
use std::sync::Arc;

/// Wires the standard handler set into `dispatcher`
///
/// `None` and `Heartbeat` deliberately have no handlers.
pub fn register_default_handlers(dispatcher: &mut MessageDispatcher<ServerState>) {
    dispatcher.register(MessageType::PlayerConnect, handle_player_connect);
    dispatcher.register(MessageType::SetName, handle_set_name);
    dispatcher.register(MessageType::UpdatePosition, handle_update_position);
    dispatcher.register(MessageType::Chat, handle_chat);
}

/// Registers the requested name and binds the sender endpoint to the player
pub fn handle_player_connect(state: &ServerState, ctx: &MessageContext) -> Result<(), ServerError> {
    let Message::PlayerConnect { name } = &ctx.envelope.message else {
        return Ok(());
    };

    // A client whose ack was lost retries from the same endpoint
    if let Some(existing) = state.registry.find_by_endpoint(ctx.source) {
        if !names_player(state, &existing, name) {
            return Err(ServerError::DuplicateSession {
                addr: ctx.source,
                player_id: existing.player_id,
            });
        }
        debug!("Repeating welcome for player {} at {}", existing.player_id, ctx.source);
        return send_welcome(state, &existing);
    }

    let registration = state.registration.register(name);
    let Some(player) = registration.player else {
        return Err(ServerError::RegistrationFailed { name: name.clone() });
    };

    let session = Session::new(ctx.source, player);
    state
        .registry
        .add(session.clone())
        .map_err(|duplicate| ServerError::DuplicateSession {
            addr: duplicate.addr,
            player_id: duplicate.player_id,
        })?;

    info!(
        "Player {} ({:?}) connected from {} [{:?}]",
        session.player_id,
        session.player().name,
        ctx.source,
        registration.status
    );
    send_welcome(state, &session)
}

/// Whether a connect for `name` refers to the player already bound to `session`
///
/// Matches the session's current name, or the stored one when the player has
/// renamed since connecting. Never creates anything.
fn names_player(state: &ServerState, session: &Session, name: &str) -> bool {
    let Some(name) = normalize_name(name) else {
        return false;
    };
    if session.player().name == name {
        return true;
    }
    matches!(
        state.store.get_by_name(name),
        Ok(Some(stored)) if stored.id == session.player_id
    )
}

/// Sends the `PlayerId` acknowledgement followed by the full player state
fn send_welcome(state: &ServerState, session: &Session) -> Result<(), ServerError> {
    let player: Player = session.player();

    state.outbox.send(
        session.addr,
        &Envelope::from_player(
            player.id,
            Message::PlayerId {
                player_id: player.id,
            },
        ),
    )?;
    state.outbox.send(
        session.addr,
        &Envelope::from_player(
            player.id,
            Message::PlayerInit {
                player_id: player.id,
                name: player.name,
                x: player.x,
                y: player.y,
            },
        ),
    )
}

/// Renames the sender's player in memory
///
/// The new name is validated like a connect name and reaches the store on
/// the next persistence tick. Messages from unbound endpoints are ignored.
pub fn handle_set_name(_state: &ServerState, ctx: &MessageContext) -> Result<(), ServerError> {
    let (Some(session), Message::SetName { name }) = (&ctx.session, &ctx.envelope.message) else {
        return Ok(());
    };

    let Some(name) = normalize_name(name) else {
        return Err(ServerError::InvalidName(name.clone()));
    };

    debug!("Player {} renamed to {:?}", session.player_id, name);
    session.set_name(name);
    Ok(())
}

/// Records the sender's reported position
///
/// Coordinates are taken as given; the broadcast tick relays them to
/// everyone. Messages from unbound endpoints are ignored.
pub fn handle_update_position(
    _state: &ServerState,
    ctx: &MessageContext,
) -> Result<(), ServerError> {
    let (Some(session), Message::UpdatePosition { x, y }) = (&ctx.session, &ctx.envelope.message)
    else {
        return Ok(());
    };

    session.set_position(*x, *y);
    Ok(())
}

/// Relays a chat line to every connected session, the sender included
pub fn handle_chat(state: &ServerState, ctx: &MessageContext) -> Result<(), ServerError> {
    let (Some(session), Message::Chat { contents }) = (&ctx.session, &ctx.envelope.message) else {
        return Ok(());
    };

    let envelope = Envelope::from_player(
        session.player_id,
        Message::Chat {
            contents: contents.clone(),
        },
    );
    let datagram: Arc<[u8]> = encode(&envelope)?.into();

    for recipient in state.registry.snapshot() {
        if let Err(e) = state
            .outbox
            .send_datagram(recipient.addr, Arc::clone(&datagram))
        {
            warn!("Dropped chat for {}: {}", recipient.addr, e);
        }
    }
    Ok(())
}
