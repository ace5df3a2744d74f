//! Process wide pub/sub hub between the matching pipeline and websocket subscribers.
//!
//! Every subscriber owns a bounded channel. Publishing never blocks: a subscriber whose channel
//! is full is dropped on the spot and has to reconnect and resync, which keeps one slow consumer
//! from stalling the matching pipeline or the other subscribers.

use model::{order::Order, orderbook::OrderBookSnapshot, trade::Fill, TradingPair};
use primitive_types::H160;
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        RwLock,
    },
};
use tokio::sync::mpsc;

/// Outbound buffer per subscriber. Overflowing it means the consumer is broken or too slow.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Topic {
    Orderbook(TradingPair),
    Trades(TradingPair),
    Orders(H160),
}

/// Server to client messages as sent over the websocket, `{"type": ..., "data": ...}`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    OrderbookUpdate(OrderBookSnapshot),
    TradeUpdate(Fill),
    OrderUpdate(Order),
    SubscriptionSuccess(SubscriptionAck),
    UnsubscriptionSuccess(SubscriptionAck),
    Connected(ConnectedInfo),
}

#[derive(Clone, Debug, Serialize)]
pub struct SubscriptionAck {
    pub channel: String,
    pub symbol: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ConnectedInfo {
    pub version: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SubscriberId(u64);

struct Subscriber {
    sender: mpsc::Sender<ServerEvent>,
    topics: HashSet<Topic>,
}

#[derive(Default)]
pub struct EventHub {
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> (SubscriberId, mpsc::Receiver<ServerEvent>) {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers.write().unwrap().insert(
            id,
            Subscriber {
                sender,
                topics: HashSet::new(),
            },
        );
        (id, receiver)
    }

    pub fn unregister(&self, id: SubscriberId) {
        self.subscribers.write().unwrap().remove(&id);
    }

    pub fn subscribe(&self, id: SubscriberId, topic: Topic) {
        if let Some(subscriber) = self.subscribers.write().unwrap().get_mut(&id) {
            subscriber.topics.insert(topic);
        }
    }

    pub fn unsubscribe(&self, id: SubscriberId, topic: &Topic) {
        if let Some(subscriber) = self.subscribers.write().unwrap().get_mut(&id) {
            subscriber.topics.remove(topic);
        }
    }

    /// Delivers the event to every subscriber of the topic in publish order. Subscribers whose
    /// channel is full or gone are dropped.
    pub fn publish(&self, topic: &Topic, event: ServerEvent) {
        let mut dropped = Vec::new();
        {
            let subscribers = self.subscribers.read().unwrap();
            for (id, subscriber) in subscribers.iter() {
                if !subscriber.topics.contains(topic) {
                    continue;
                }
                if subscriber.sender.try_send(event.clone()).is_err() {
                    dropped.push(*id);
                }
            }
        }
        if !dropped.is_empty() {
            let mut subscribers = self.subscribers.write().unwrap();
            for id in dropped {
                tracing::warn!(?id, "dropping slow event subscriber");
                subscribers.remove(&id);
            }
        }
    }

    pub fn publish_depth(&self, snapshot: &OrderBookSnapshot) {
        self.publish(
            &Topic::Orderbook(snapshot.trading_pair.clone()),
            ServerEvent::OrderbookUpdate(snapshot.clone()),
        );
    }

    pub fn publish_fill(&self, fill: &Fill) {
        self.publish(
            &Topic::Trades(fill.trading_pair.clone()),
            ServerEvent::TradeUpdate(fill.clone()),
        );
    }

    pub fn publish_order(&self, order: &Order) {
        self.publish(
            &Topic::Orders(order.creation.user_address),
            ServerEvent::OrderUpdate(order.clone()),
        );
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }
}
