//! The `/ws` endpoint: one duplex connection per subscriber carrying subscription control
//! messages inbound and hub events outbound, with a keep-alive ping.

use crate::events::{
    ConnectedInfo, EventHub, ServerEvent, SubscriberId, SubscriptionAck, Topic,
};
use futures::{SinkExt, StreamExt};
use model::TradingPair;
use serde::Deserialize;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use warp::ws::{Message, WebSocket};
use warp::{Filter, Rejection, Reply};

/// Keep-alive ping cadence and the window within which the peer has to pong back.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Action {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Channel {
    Orderbook,
    Trades,
    Orders,
}

#[derive(Debug, Deserialize)]
struct ClientMessage {
    action: Action,
    channel: Channel,
    symbol: String,
}

pub fn websocket(
    hub: Arc<EventHub>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("ws").and(warp::ws()).map(move |ws: warp::ws::Ws| {
        let hub = hub.clone();
        ws.on_upgrade(move |socket| handle_connection(socket, hub))
    })
}

async fn handle_connection(socket: WebSocket, hub: Arc<EventHub>) {
    let (mut sink, mut stream) = socket.split();
    let (subscriber_id, mut events) = hub.register();

    if send_event(
        &mut sink,
        &ServerEvent::Connected(ConnectedInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
    .await
    .is_err()
    {
        hub.unregister(subscriber_id);
        return;
    }

    let mut keep_alive = tokio::time::interval(KEEP_ALIVE_INTERVAL);
    // The first tick completes immediately.
    keep_alive.tick().await;
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if send_event(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                // The hub dropped us for being too slow.
                None => break,
            },
            message = stream.next() => match message {
                Some(Ok(message)) => {
                    if message.is_pong() {
                        last_pong = Instant::now();
                    } else if message.is_close() {
                        break;
                    } else if let Ok(text) = message.to_str() {
                        if let Some(ack) =
                            handle_client_message(&hub, subscriber_id, text)
                        {
                            if send_event(&mut sink, &ack).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some(Err(err)) => {
                    tracing::debug!(?err, "websocket receive error");
                    break;
                }
                None => break,
            },
            _ = keep_alive.tick() => {
                if last_pong.elapsed() > KEEP_ALIVE_INTERVAL + PONG_TIMEOUT {
                    tracing::debug!("closing unresponsive websocket subscriber");
                    break;
                }
                if sink.send(Message::ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    hub.unregister(subscriber_id);
}

async fn send_event(
    sink: &mut (impl futures::Sink<Message, Error = warp::Error> + Unpin),
    event: &ServerEvent,
) -> Result<(), ()> {
    // Serialization of our own event types cannot fail.
    let text = serde_json::to_string(event).unwrap();
    sink.send(Message::text(text)).await.map_err(|_| ())
}

/// Applies a subscribe/unsubscribe request and returns the acknowledgement to send back, or
/// None when the message is not understood.
fn handle_client_message(
    hub: &EventHub,
    subscriber_id: SubscriberId,
    text: &str,
) -> Option<ServerEvent> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            tracing::debug!(?err, "ignoring malformed websocket message");
            return None;
        }
    };
    let topic = topic_for(&message)?;
    let ack = SubscriptionAck {
        channel: format!("{:?}", message.channel).to_lowercase(),
        symbol: message.symbol.clone(),
    };
    match message.action {
        Action::Subscribe => {
            hub.subscribe(subscriber_id, topic);
            Some(ServerEvent::SubscriptionSuccess(ack))
        }
        Action::Unsubscribe => {
            hub.unsubscribe(subscriber_id, &topic);
            Some(ServerEvent::UnsubscriptionSuccess(ack))
        }
    }
}

fn topic_for(message: &ClientMessage) -> Option<Topic> {
    match message.channel {
        Channel::Orderbook => {
            let pair: TradingPair = message.symbol.parse().ok()?;
            Some(Topic::Orderbook(pair))
        }
        Channel::Trades => {
            let pair: TradingPair = message.symbol.parse().ok()?;
            Some(Topic::Trades(pair))
        }
        Channel::Orders => {
            let address = message.symbol.strip_prefix("0x").unwrap_or(&message.symbol);
            let user = address.parse().ok()?;
            Some(Topic::Orders(user))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::H160;

    fn message(action: &str, channel: &str, symbol: &str) -> String {
        format!(
            r#"{{"action": "{}", "channel": "{}", "symbol": "{}"}}"#,
            action, channel, symbol
        )
    }

    #[test]
    fn subscribe_message_maps_to_topic_and_ack() {
        let hub = EventHub::new();
        let (id, _receiver) = hub.register();
        let ack = handle_client_message(&hub, id, &message("subscribe", "orderbook", "WETH-USDC"))
            .unwrap();
        assert!(matches!(ack, ServerEvent::SubscriptionSuccess(_)));
    }

    #[test]
    fn unsubscribe_acknowledges() {
        let hub = EventHub::new();
        let (id, _receiver) = hub.register();
        let topic = Topic::Trades("WETH-USDC".parse().unwrap());
        hub.subscribe(id, topic);
        let ack = handle_client_message(&hub, id, &message("unsubscribe", "trades", "WETH-USDC"))
            .unwrap();
        assert!(matches!(ack, ServerEvent::UnsubscriptionSuccess(_)));
    }

    #[test]
    fn orders_channel_takes_an_address() {
        let message = serde_json::from_str::<ClientMessage>(&message(
            "subscribe",
            "orders",
            "0x0000000000000000000000000000000000000005",
        ))
        .unwrap();
        assert_eq!(
            topic_for(&message),
            Some(Topic::Orders(H160::from_low_u64_be(5)))
        );
    }

    #[test]
    fn malformed_messages_are_ignored() {
        let hub = EventHub::new();
        let (id, _receiver) = hub.register();
        assert!(handle_client_message(&hub, id, "not json").is_none());
        assert!(
            handle_client_message(&hub, id, &message("subscribe", "orderbook", "WETHUSDC"))
                .is_none()
        );
    }

    #[test]
    fn server_events_serialize_with_type_and_data() {
        let event = ServerEvent::SubscriptionSuccess(SubscriptionAck {
            channel: "trades".to_string(),
            symbol: "WETH-USDC".to_string(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "subscription_success");
        assert_eq!(value["data"]["channel"], "trades");
    }
}
