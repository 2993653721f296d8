//! Out-of-band message channel: numbered messages and their acknowledgments.
//!
//! Inbound items queue in arrival order. The application pops one at a time;
//! the popped item is "current" until the next pop. Every `*msg` gets exactly
//! one `*ack`: explicit from the application, or an implicit ignore-ack when the
//! next item is popped first.

use std::collections::VecDeque;

use crate::addr::NetAddr;
use crate::socket::SocketKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Msg,
    Ack,
}

/// One queued inbound item.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: u32,
    pub kind: MessageKind,
    pub text: String,
    pub(crate) socket: SocketKey,
    pub(crate) reply: NetAddr,
}

impl Message {
    /// Address acknowledgments go to.
    pub fn sender(&self) -> &NetAddr {
        &self.reply
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("message already acknowledged")]
    AlreadyAcked,
    #[error("no current message")]
    NoCurrent,
    #[error("acknowledgments are not acknowledged")]
    IsAck,
    #[error("message text contains a newline")]
    Multiline,
}

#[derive(Debug, Default)]
pub struct MessageChannel {
    queue: VecDeque<Message>,
    current: Option<Message>,
    acked: bool,
    last_id: u32,
}

impl MessageChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, msg: Message) {
        self.queue.push_back(msg);
    }

    /// Next outgoing id. Never 0, which means "no message".
    pub(crate) fn next_id(&mut self) -> u32 {
        self.last_id = self.last_id.wrapping_add(1);
        if self.last_id == 0 {
            self.last_id = 1;
        }
        self.last_id
    }

    /// Latch the acknowledgment of the current message. The first caller wins;
    /// every later call fails until another message is popped.
    pub(crate) fn take_ack(&mut self) -> Result<&Message, MessageError> {
        if self.acked {
            return Err(MessageError::AlreadyAcked);
        }
        self.acked = true;
        let cur = self.current.as_ref().ok_or(MessageError::NoCurrent)?;
        if cur.kind == MessageKind::Ack {
            return Err(MessageError::IsAck);
        }
        Ok(cur)
    }

    /// Drop the current item and make the queue head current.
    pub(crate) fn advance(&mut self) -> Option<&Message> {
        self.current = self.queue.pop_front();
        if self.current.is_some() {
            self.acked = false;
        }
        self.current.as_ref()
    }

    pub fn pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn current(&self) -> Option<&Message> {
        self.current.as_ref()
    }

    /// Id of the current message, 0 when there is none.
    pub fn current_id(&self) -> u32 {
        self.current.as_ref().map_or(0, |m| m.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{Family, NetAddr, UnixName};

    fn msg(id: u32, kind: MessageKind) -> Message {
        Message {
            id,
            kind,
            text: format!("m{}", id),
            socket: SocketKey::public(Family::Unix),
            reply: NetAddr::Unix(UnixName::Abstract(b"peer".to_vec())),
        }
    }

    #[test]
    fn first_ack_wins() {
        let mut ch = MessageChannel::new();
        ch.push(msg(1, MessageKind::Msg));
        assert!(ch.pending());
        assert_eq!(ch.advance().map(|m| m.id), Some(1));
        assert!(ch.take_ack().is_ok());
        assert!(matches!(ch.take_ack(), Err(MessageError::AlreadyAcked)));
        assert_eq!(ch.current_id(), 1);
    }

    #[test]
    fn ack_items_are_not_acked() {
        let mut ch = MessageChannel::new();
        ch.push(msg(9, MessageKind::Ack));
        ch.advance();
        assert!(matches!(ch.take_ack(), Err(MessageError::IsAck)));
    }

    #[test]
    fn empty_pop_clears_current() {
        let mut ch = MessageChannel::new();
        ch.push(msg(1, MessageKind::Msg));
        ch.advance();
        assert!(ch.advance().is_none());
        assert_eq!(ch.current_id(), 0);
        assert!(ch.take_ack().is_err());
    }

    #[test]
    fn ids_skip_zero() {
        let mut ch = MessageChannel::new();
        ch.last_id = u32::MAX;
        assert_eq!(ch.next_id(), 1);
        assert_eq!(ch.next_id(), 2);
    }
}
