//! Transport-agnostic event channel between one client and the scheduler
//!
//! The transport owns a [`ChannelRemote`] and only ever enqueues decoded client
//! messages into it. The scheduler owns the [`EventChannel`] and drains it once per
//! tick, so no state is mutated outside the tick.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::protocol::{ClientMsg, ServerMsg};

/// Outbound traffic for the transport
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Msg(ServerMsg),
    /// Server-initiated disconnect
    Close,
}

/// Channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel is closed")]
    Closed,
}

/// Server half of a client channel
pub struct EventChannel {
    inbound: mpsc::UnboundedReceiver<ClientMsg>,
    outbound: mpsc::UnboundedSender<Outbound>,
    connected: bool,
}

/// Transport half of a client channel
pub struct ChannelRemote {
    /// Dropping this sender signals a disconnect
    pub inbound: mpsc::UnboundedSender<ClientMsg>,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl EventChannel {
    /// Create a connected channel and its transport half
    pub fn pair() -> (EventChannel, ChannelRemote) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let channel = EventChannel {
            inbound: inbound_rx,
            outbound: outbound_tx,
            connected: true,
        };
        let remote = ChannelRemote {
            inbound: inbound_tx,
            outbound: outbound_rx,
        };

        (channel, remote)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Queue a message for the client
    pub fn send(&mut self, msg: ServerMsg) -> Result<(), ChannelError> {
        if !self.connected {
            return Err(ChannelError::Closed);
        }
        if self.outbound.send(Outbound::Msg(msg)).is_err() {
            self.connected = false;
            return Err(ChannelError::Closed);
        }
        Ok(())
    }

    /// Ask the transport to disconnect; the channel is dead afterwards
    pub fn close(&mut self) {
        if self.connected {
            let _ = self.outbound.send(Outbound::Close);
            self.connected = false;
        }
        self.inbound.close();
    }

    /// Take everything the client sent since the last call.
    /// Detects a transport-side disconnect once the queue runs dry.
    pub fn drain(&mut self) -> Vec<ClientMsg> {
        let mut messages = Vec::new();

        if !self.connected {
            return messages;
        }

        loop {
            match self.inbound.try_recv() {
                Ok(msg) => messages.push(msg),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.connected = false;
                    break;
                }
            }
        }

        messages
    }
}

#[cfg(test)]
impl ChannelRemote {
    /// Everything the server queued for this client so far
    pub fn received(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = self.outbound.try_recv() {
            out.push(item);
        }
        out
    }

    /// Server messages only, in send order
    pub fn messages(&mut self) -> Vec<ServerMsg> {
        self.received()
            .into_iter()
            .filter_map(|item| match item {
                Outbound::Msg(msg) => Some(msg),
                Outbound::Close => None,
            })
            .collect()
    }

    pub fn submit(&self, msg: ClientMsg) {
        let _ = self.inbound.send(msg);
    }
}
