use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::ws::channel::Params;
use crate::ws::message::{Event, EventKind, Outbound, ServerMessage};

pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;
pub type ChannelHandler = Arc<dyn Fn(&Params, &Value) + Send + Sync>;
pub type MessageHandler = Arc<dyn Fn(&ServerMessage) + Send + Sync>;

/// Returned on registration; pass to `off` to remove the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Handlers keyed by event type, by channel name, and for protocol messages.
///
/// Several handlers may share a key; they run in registration order.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    next_id: u64,
    events: HashMap<EventKind, Vec<(HandlerId, EventHandler)>>,
    channels: HashMap<String, Vec<(HandlerId, ChannelHandler)>>,
    messages: Vec<(HandlerId, MessageHandler)>,
}

/// Handlers selected for one frame, invoked after the registry lock is released.
pub(crate) enum Dispatch {
    Event(Event, Vec<EventHandler>),
    Message {
        message: ServerMessage,
        channel: Vec<ChannelHandler>,
        generic: Vec<MessageHandler>,
    },
}

impl HandlerRegistry {
    fn next_id(&mut self) -> HandlerId {
        self.next_id += 1;
        HandlerId(self.next_id)
    }

    pub(crate) fn on_event(&mut self, kind: EventKind, handler: EventHandler) -> HandlerId {
        let id = self.next_id();
        self.events.entry(kind).or_default().push((id, handler));
        id
    }

    pub(crate) fn on_channel(&mut self, channel: &str, handler: ChannelHandler) -> HandlerId {
        let id = self.next_id();
        self.channels
            .entry(channel.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    pub(crate) fn on_message(&mut self, handler: MessageHandler) -> HandlerId {
        let id = self.next_id();
        self.messages.push((id, handler));
        id
    }

    pub(crate) fn off(&mut self, id: HandlerId) -> bool {
        let mut removed = false;
        for list in self.events.values_mut() {
            removed |= remove(list, id);
        }
        for list in self.channels.values_mut() {
            removed |= remove(list, id);
        }
        removed |= remove(&mut self.messages, id);
        self.events.retain(|_, list| !list.is_empty());
        self.channels.retain(|_, list| !list.is_empty());
        removed
    }

    pub(crate) fn select(&self, frame: Outbound) -> Dispatch {
        match frame {
            Outbound::Event(event) => {
                let handlers = self
                    .events
                    .get(&event.kind)
                    .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                    .unwrap_or_default();
                Dispatch::Event(event, handlers)
            }
            Outbound::Message(message) => {
                let channel = match &message {
                    ServerMessage::Broadcast { channel, .. } => self
                        .channels
                        .get(channel)
                        .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                        .unwrap_or_default(),
                    _ => Vec::new(),
                };
                let generic = self.messages.iter().map(|(_, h)| h.clone()).collect();
                Dispatch::Message {
                    message,
                    channel,
                    generic,
                }
            }
        }
    }
}

impl Dispatch {
    pub(crate) fn run(self) {
        match self {
            Dispatch::Event(event, handlers) => {
                for handler in handlers {
                    handler(&event);
                }
            }
            Dispatch::Message {
                message,
                channel,
                generic,
            } => {
                if let ServerMessage::Broadcast { params, data, .. } = &message {
                    for handler in channel {
                        handler(params, data);
                    }
                }
                for handler in generic {
                    handler(&message);
                }
            }
        }
    }
}

fn remove<H>(list: &mut Vec<(HandlerId, H)>, id: HandlerId) -> bool {
    let before = list.len();
    list.retain(|(hid, _)| *hid != id);
    list.len() != before
}
