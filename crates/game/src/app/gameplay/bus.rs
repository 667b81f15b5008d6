use std::collections::HashMap;

use engine::{EntityId, Vec3};
use tracing::debug;

use super::combat::MeleeDamage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum MessageKind {
    MeleeDamage,
    ReachDestination,
    DialogueOpened,
    DialogueClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Message {
    MeleeDamage(MeleeDamage),
    ReachDestination { entity_id: EntityId, position: Vec3 },
    DialogueOpened { entity_id: EntityId },
    DialogueClosed { entity_id: EntityId },
}

impl Message {
    pub(crate) fn kind(&self) -> MessageKind {
        match self {
            Self::MeleeDamage(_) => MessageKind::MeleeDamage,
            Self::ReachDestination { .. } => MessageKind::ReachDestination,
            Self::DialogueOpened { .. } => MessageKind::DialogueOpened,
            Self::DialogueClosed { .. } => MessageKind::DialogueClosed,
        }
    }

    fn publisher(&self) -> EntityId {
        match self {
            Self::MeleeDamage(damage) => damage.sender,
            Self::ReachDestination { entity_id, .. }
            | Self::DialogueOpened { entity_id }
            | Self::DialogueClosed { entity_id } => *entity_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Delivery {
    pub(crate) recipient: EntityId,
    pub(crate) message: Message,
}

/// One subscriber list per message kind. Published messages are queued and
/// handed out by [`dispatch`](Self::dispatch) in publish order, each to its
/// kind's subscribers in subscription order.
#[derive(Debug, Default)]
pub(crate) struct MessageBus {
    subscribers: HashMap<MessageKind, Vec<EntityId>>,
    queue: Vec<Message>,
}

impl MessageBus {
    pub(crate) fn subscribe(&mut self, kind: MessageKind, entity_id: EntityId) {
        let list = self.subscribers.entry(kind).or_default();
        if !list.contains(&entity_id) {
            list.push(entity_id);
        }
    }

    pub(crate) fn unsubscribe_all(&mut self, entity_id: EntityId) {
        for list in self.subscribers.values_mut() {
            list.retain(|subscriber| *subscriber != entity_id);
        }
        self.queue.retain(|message| message.publisher() != entity_id);
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self, kind: MessageKind) -> usize {
        self.subscribers.get(&kind).map_or(0, Vec::len)
    }

    pub(crate) fn publish(&mut self, message: Message) {
        self.queue.push(message);
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn dispatch(&mut self) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for message in std::mem::take(&mut self.queue) {
            let Some(list) = self.subscribers.get(&message.kind()) else {
                debug!(kind = ?message.kind(), "message_without_subscribers");
                continue;
            };
            deliveries.extend(list.iter().map(|recipient| Delivery {
                recipient: *recipient,
                message: message.clone(),
            }));
        }
        deliveries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_fans_out_in_subscription_order_and_empties_queue() {
        let mut bus = MessageBus::default();
        bus.subscribe(MessageKind::DialogueOpened, EntityId(4));
        bus.subscribe(MessageKind::DialogueOpened, EntityId(2));
        bus.subscribe(MessageKind::DialogueOpened, EntityId(4));
        bus.publish(Message::DialogueOpened {
            entity_id: EntityId(9),
        });

        let recipients: Vec<_> = bus
            .dispatch()
            .into_iter()
            .map(|delivery| delivery.recipient)
            .collect();
        assert_eq!(recipients, vec![EntityId(4), EntityId(2)]);
        assert!(bus.is_idle());
        assert!(bus.dispatch().is_empty());
    }

    #[test]
    fn unsubscribe_all_drops_subscriptions_and_pending_messages() {
        let mut bus = MessageBus::default();
        bus.subscribe(MessageKind::ReachDestination, EntityId(1));
        bus.subscribe(MessageKind::DialogueClosed, EntityId(1));
        bus.subscribe(MessageKind::DialogueClosed, EntityId(2));
        bus.publish(Message::ReachDestination {
            entity_id: EntityId(1),
            position: Vec3::ZERO,
        });

        bus.unsubscribe_all(EntityId(1));
        assert_eq!(bus.subscriber_count(MessageKind::ReachDestination), 0);
        assert_eq!(bus.subscriber_count(MessageKind::DialogueClosed), 1);
        assert!(bus.is_idle());
    }

    #[test]
    fn kinds_are_routed_separately() {
        let mut bus = MessageBus::default();
        bus.subscribe(MessageKind::DialogueClosed, EntityId(1));
        bus.publish(Message::DialogueOpened {
            entity_id: EntityId(3),
        });
        assert!(bus.dispatch().is_empty());
    }
}
