//! Routing of decoded messages to handlers by message type

use crate::error::ServerError;
use crate::session::Session;
use log::{debug, warn};
use shared::{Envelope, MessageType};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Everything a handler knows about one inbound message
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub envelope: Envelope,
    /// Session of the sender, absent during the connect handshake
    pub session: Option<Session>,
    /// Endpoint the datagram came from
    pub source: SocketAddr,
}

impl MessageContext {
    pub fn message_type(&self) -> MessageType {
        self.envelope.message_type()
    }
}

pub type Handler<S> = Box<dyn Fn(&S, &MessageContext) -> Result<(), ServerError> + Send + Sync>;

/// Table from message type to the ordered handlers for that type
pub struct MessageDispatcher<S> {
    handlers: HashMap<MessageType, Vec<Handler<S>>>,
}

impl<S> Default for MessageDispatcher<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<S> MessageDispatcher<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the list invoked for `message_type`
    pub fn register<F>(&mut self, message_type: MessageType, handler: F)
    where
        F: Fn(&S, &MessageContext) -> Result<(), ServerError> + Send + Sync + 'static,
    {
        debug!("Registered handler for {}", message_type);
        self.handlers
            .entry(message_type)
            .or_default()
            .push(Box::new(handler));
    }

    #[cfg(test)]
    pub(crate) fn handler_count(&self, message_type: MessageType) -> usize {
        self.handlers.get(&message_type).map_or(0, Vec::len)
    }

    /// Runs the handlers for the context's message type in order
    ///
    /// A type with no handlers is a no-op. The first failing handler stops
    /// the rest from running and its error is returned after being logged.
    pub fn dispatch(&self, state: &S, context: &MessageContext) -> Result<(), ServerError> {
        let message_type = context.message_type();
        let Some(handlers) = self.handlers.get(&message_type) else {
            return Ok(());
        };

        for (index, handler) in handlers.iter().enumerate() {
            if let Err(e) = handler(state, context) {
                warn!(
                    "Handler {} for {} from {} failed: {}",
                    index, message_type, context.source, e
                );
                return Err(e);
            }
        }
        Ok(())
    }
}
