//! Kite Connect REST client.

use super::types::{Envelope, Order, PlaceOrderData, PlaceTriggerData, Positions, Trigger};
use crate::broker::traits::{
    OrderBookSource, OrderSubmitter, PositionSource, SubmitError, TriggerSource,
};
use crate::broker::types::*;
use crate::config::BrokerConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

const API_VERSION: &str = "3";
const REGULAR_VARIETY: &str = "regular";
const DAY_VALIDITY: &str = "DAY";

/// Kite Connect API client.
pub struct KiteClient {
    http: Client,
    base_url: String,
    api_key: String,
    access_token: String,
}

impl KiteClient {
    /// Create a new client from configuration.
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            access_token: config.access_token.clone(),
        })
    }

    fn authorization(&self) -> String {
        format!("token {}:{}", self.api_key, self.access_token)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .header("X-Kite-Version", API_VERSION)
            .header("Authorization", self.authorization())
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .header("X-Kite-Version", API_VERSION)
            .header("Authorization", self.authorization())
    }

    async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let envelope: Envelope<T> = response
            .json()
            .await
            .context("Failed to parse Kite response")?;
        envelope.into_data().map_err(|msg| anyhow!(msg))
    }

    /// All standing (GTT) orders of the account.
    #[instrument(skip(self))]
    pub async fn get_triggers(&self) -> Result<Vec<Trigger>> {
        let response = self
            .get("/gtt/triggers")
            .send()
            .await
            .context("Failed to fetch triggers")?;
        Self::read_envelope(response).await
    }

    /// The day's order book.
    #[instrument(skip(self))]
    pub async fn get_orders(&self) -> Result<Vec<Order>> {
        let response = self
            .get("/orders")
            .send()
            .await
            .context("Failed to fetch orders")?;
        Self::read_envelope(response).await
    }

    /// Net and day positions of the account.
    #[instrument(skip(self))]
    pub async fn get_positions(&self) -> Result<Positions> {
        let response = self
            .get("/portfolio/positions")
            .send()
            .await
            .context("Failed to fetch positions")?;
        Self::read_envelope(response).await
    }

    async fn place_regular(&self, intent: &OrderIntent) -> Result<String, SubmitError> {
        let mut form = vec![
            ("tradingsymbol", intent.symbol().to_string()),
            ("exchange", intent.exchange().to_string()),
            ("transaction_type", intent.side().to_string()),
            ("order_type", intent.order_type().as_str().to_string()),
            ("quantity", intent.quantity().to_string()),
            ("product", intent.product().to_string()),
            ("validity", DAY_VALIDITY.to_string()),
        ];
        if let Some(price) = intent.price() {
            form.push(("price", price.to_string()));
        }
        if let Some(tag) = intent.tag() {
            form.push(("tag", tag.to_string()));
        }

        let response = self
            .post(&format!("/orders/{}", REGULAR_VARIETY))
            .form(&form)
            .send()
            .await
            .map_err(|e| SubmitError::Transport(e.to_string()))?;

        let envelope: Envelope<PlaceOrderData> = response
            .json()
            .await
            .map_err(|e| SubmitError::Transport(e.to_string()))?;
        let data = envelope.into_data().map_err(SubmitError::Rejected)?;
        Ok(data.order_id)
    }

    async fn place_trigger(&self, intent: &OrderIntent) -> Result<String, SubmitError> {
        let legs: Vec<TriggerLeg> = match *intent.class() {
            OrderClass::SingleTrigger {
                trigger_price,
                limit_price,
            } => vec![TriggerLeg {
                trigger_price,
                limit_price,
            }],
            OrderClass::TwoLegTrigger { lower, upper } => vec![lower, upper],
            OrderClass::Immediate => return Err(SubmitError::Rejected("not a standing order".into())),
        };
        let kind = if legs.len() == 1 { "single" } else { "two-leg" };
        let last_price = intent.price().unwrap_or(legs[0].trigger_price);

        let condition = json!({
            "exchange": intent.exchange(),
            "tradingsymbol": intent.symbol(),
            "trigger_values": legs.iter().map(|l| as_number(l.trigger_price)).collect::<Vec<_>>(),
            "last_price": as_number(last_price),
        });
        let orders: Vec<_> = legs
            .iter()
            .map(|leg| {
                json!({
                    "exchange": intent.exchange(),
                    "tradingsymbol": intent.symbol(),
                    "transaction_type": intent.side().as_str(),
                    "quantity": intent.quantity(),
                    "order_type": OrderType::Limit.as_str(),
                    "product": intent.product(),
                    "price": as_number(leg.limit_price),
                })
            })
            .collect();

        let form = [
            ("type", kind.to_string()),
            ("condition", condition.to_string()),
            ("orders", serde_json::Value::from(orders).to_string()),
        ];

        let response = self
            .post("/gtt/triggers")
            .form(&form)
            .send()
            .await
            .map_err(|e| SubmitError::Transport(e.to_string()))?;

        let envelope: Envelope<PlaceTriggerData> = response
            .json()
            .await
            .map_err(|e| SubmitError::Transport(e.to_string()))?;
        let data = envelope.into_data().map_err(SubmitError::Rejected)?;
        Ok(data.trigger_id.to_string())
    }
}

/// The trigger endpoint expects JSON numbers, not decimal strings.
fn as_number(value: Decimal) -> serde_json::Value {
    value
        .to_f64()
        .map(serde_json::Value::from)
        .unwrap_or(serde_json::Value::Null)
}

#[async_trait]
impl OrderSubmitter for KiteClient {
    #[instrument(skip(self, intent), fields(symbol = intent.symbol(), side = %intent.side()))]
    async fn submit(&self, intent: &OrderIntent) -> Result<SubmitReceipt, SubmitError> {
        let receipt = if intent.class().is_standing() {
            SubmitReceipt::Standing(self.place_trigger(intent).await?)
        } else {
            SubmitReceipt::Order(self.place_regular(intent).await?)
        };

        if receipt.id().trim().is_empty() {
            return Err(SubmitError::MissingIdentifier);
        }
        debug!(id = receipt.id(), "Kite accepted order");
        Ok(receipt)
    }
}

#[async_trait]
impl TriggerSource for KiteClient {
    async fn poll(&self) -> Result<Vec<TriggerFired>> {
        Ok(self
            .get_triggers()
            .await?
            .iter()
            .filter_map(Trigger::to_fired)
            .collect())
    }
}

#[async_trait]
impl OrderBookSource for KiteClient {
    async fn order_updates(&self) -> Result<Vec<FillEvent>> {
        Ok(self
            .get_orders()
            .await?
            .iter()
            .filter_map(Order::to_fill_event)
            .collect())
    }
}

#[async_trait]
impl PositionSource for KiteClient {
    async fn positions(&self) -> Result<Vec<Position>> {
        Ok(self
            .get_positions()
            .await?
            .net
            .into_iter()
            .map(Position::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> KiteClient {
        KiteClient::new(&BrokerConfig {
            api_key: "key".to_string(),
            access_token: "token".to_string(),
            api_url: server.uri(),
            ..BrokerConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_regular_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/regular"))
            .and(header("Authorization", "token key:token"))
            .and(body_string_contains("transaction_type=BUY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"order_id": "151220000000000"}
            })))
            .mount(&server)
            .await;

        let intent = OrderIntent::market("NSE", "INFY", OrderSide::Buy, 10, Some("link:a")).unwrap();
        let receipt = client_for(&server).submit(&intent).await.unwrap();
        assert_eq!(receipt, SubmitReceipt::Order("151220000000000".to_string()));
    }

    #[tokio::test]
    async fn test_submit_standing_order_returns_trigger_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gtt/triggers"))
            .and(body_string_contains("type=single"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"trigger_id": 4242}
            })))
            .mount(&server)
            .await;

        let intent = OrderIntent::market("NSE", "INFY", OrderSide::Buy, 10, Some("link:a"))
            .unwrap()
            .with_class(OrderClass::SingleTrigger {
                trigger_price: dec!(1500),
                limit_price: dec!(1502),
            })
            .unwrap();
        let receipt = client_for(&server).submit(&intent).await.unwrap();
        assert_eq!(receipt, SubmitReceipt::Standing("4242".to_string()));
    }

    #[tokio::test]
    async fn test_rejection_maps_to_submit_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/regular"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "status": "error",
                "message": "Insufficient funds",
                "error_type": "MarginException"
            })))
            .mount(&server)
            .await;

        let intent = OrderIntent::market("NSE", "INFY", OrderSide::Buy, 10, None).unwrap();
        let err = client_for(&server).submit(&intent).await.unwrap_err();
        assert!(matches!(err, SubmitError::Rejected(msg) if msg == "Insufficient funds"));
    }

    #[tokio::test]
    async fn test_poll_reports_only_triggered() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gtt/triggers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": [
                    {"id": 1, "status": "active", "orders": []},
                    {"id": 2, "status": "triggered",
                     "orders": [{"result": {"order_result": {"order_id": "C2"}}}]}
                ]
            })))
            .mount(&server)
            .await;

        let fired = client_for(&server).poll().await.unwrap();
        assert_eq!(
            fired,
            vec![TriggerFired {
                standing_id: "2".to_string(),
                child_id: "C2".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_order_book_updates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": [
                    {"order_id": "B1", "status": "COMPLETE", "transaction_type": "BUY", "filled_quantity": 10},
                    {"order_id": "X1", "status": "OPEN", "transaction_type": "SHORT", "filled_quantity": 0}
                ]
            })))
            .mount(&server)
            .await;

        let updates = client_for(&server).order_updates().await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].order_id, "B1");
    }

    #[tokio::test]
    async fn test_positions_read_net_book() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/portfolio/positions"))
            .and(header("X-Kite-Version", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {
                    "net": [
                        {"tradingsymbol": "NIFTY25JANFUT", "exchange": "NFO", "product": "NRML", "quantity": -50},
                        {"tradingsymbol": "INFY", "exchange": "NSE", "product": "CNC", "quantity": 10}
                    ],
                    "day": []
                }
            })))
            .mount(&server)
            .await;

        let positions = client_for(&server).positions().await.unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].symbol, "NIFTY25JANFUT");
        assert_eq!(positions[0].quantity, -50);
        assert_eq!(positions[1].product, "CNC");
    }
}
