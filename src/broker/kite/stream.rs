//! Kite order-update websocket.

use super::types::{Order, SocketMessage};
use crate::broker::types::FillEvent;
use crate::config::{BrokerConfig, DispatcherConfig};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Order-update stream client.
pub struct KiteOrderStream {
    url: String,
    capacity: usize,
    connect_timeout: Duration,
}

impl KiteOrderStream {
    pub fn new(broker: &BrokerConfig, dispatcher: &DispatcherConfig) -> Self {
        let url = format!(
            "{}?api_key={}&access_token={}",
            broker.ws_url.trim_end_matches('/'),
            broker.api_key,
            broker.access_token
        );

        Self {
            url,
            capacity: dispatcher.channel_capacity,
            connect_timeout: Duration::from_secs(dispatcher.connect_timeout_secs),
        }
    }

    /// Connect and forward order updates until the socket closes.
    ///
    /// The returned receiver ends when the connection is lost; the stream is
    /// not restarted.
    pub async fn connect(&self) -> Result<mpsc::Receiver<FillEvent>> {
        info!("Connecting to order-update socket");

        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .context("Timed out connecting to order-update socket")?
            .context("Failed to connect to order-update socket")?;

        let (_write, mut read) = ws_stream.split();
        let (tx, rx) = mpsc::channel(self.capacity);

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = parse_order_update(text.as_str()) {
                            if tx.send(event).await.is_err() {
                                warn!("Order-update receiver dropped");
                                return;
                            }
                        }
                    }
                    Ok(Message::Ping(_)) => {
                        debug!("Received ping");
                    }
                    Ok(Message::Close(_)) => {
                        info!("Order-update socket closed by server");
                        return;
                    }
                    Err(e) => {
                        error!("Order-update socket error: {}", e);
                        return;
                    }
                    // Binary frames carry market ticks.
                    _ => {}
                }
            }
        });

        Ok(rx)
    }
}

/// Parse one text frame; `None` for anything that is not an order update.
pub fn parse_order_update(text: &str) -> Option<FillEvent> {
    let message: SocketMessage = serde_json::from_str(text).ok()?;
    if message.kind != "order" {
        return None;
    }

    match serde_json::from_value::<Order>(message.data?) {
        Ok(order) => order.to_fill_event(),
        Err(e) => {
            warn!(error = %e, "Malformed order update");
            None
        }
    }
}
