//! Order intents, broker events and identifiers shared by the linker.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Tag marking an intent as an unconditional, unlinked order.
pub const EXIT_TAG: &str = "exit";
/// Tag prefix carrying the link group of an intent (`link:<group>`).
pub const LINK_TAG_PREFIX: &str = "link:";

pub const DEFAULT_PRODUCT: &str = "NRML";

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Parse a broker transaction type ("BUY"/"SELL", any case).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(OrderSide::Buy),
            "SELL" => Some(OrderSide::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        }
    }
}

/// One leg of a standing (triggered) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerLeg {
    pub trigger_price: Decimal,
    pub limit_price: Decimal,
}

/// How the broker executes an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderClass {
    /// Executes on submission.
    #[default]
    Immediate,
    /// Standing order with a single trigger.
    SingleTrigger {
        trigger_price: Decimal,
        limit_price: Decimal,
    },
    /// Standing order with two legs (one-cancels-other).
    TwoLegTrigger { lower: TriggerLeg, upper: TriggerLeg },
}

impl OrderClass {
    /// Standing orders fire later under a broker-assigned child id.
    pub fn is_standing(&self) -> bool {
        !matches!(self, OrderClass::Immediate)
    }
}

/// Correlation key grouping buy intents with their dependent sells.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkKey(String);

impl LinkKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for a `link:<group>` tag: one group correlates one instrument.
    pub fn for_group(exchange: &str, symbol: &str, group: &str) -> Self {
        Self(format!(
            "{}:{}:{}",
            exchange.trim().to_ascii_uppercase(),
            symbol.trim().to_ascii_uppercase(),
            group.trim()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LinkKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Intent kind, decided once when the intent is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "link_key", rename_all = "snake_case")]
pub enum IntentKind {
    /// Plain order with no correlation.
    Immediate,
    /// Participates in linking under the given key.
    Linked(LinkKey),
    /// Unconditional order that never touches the linker.
    Exit,
}

impl IntentKind {
    /// Classify a raw tag.
    pub fn from_tag(tag: Option<&str>, exchange: &str, symbol: &str) -> Result<Self, IntentError> {
        let Some(tag) = tag.map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(IntentKind::Immediate);
        };

        if tag.eq_ignore_ascii_case(EXIT_TAG) {
            return Ok(IntentKind::Exit);
        }

        match tag.strip_prefix(LINK_TAG_PREFIX) {
            Some(group) if group.trim().is_empty() => Err(IntentError::EmptyLinkGroup),
            Some(group) => Ok(IntentKind::Linked(LinkKey::for_group(exchange, symbol, group))),
            None => Ok(IntentKind::Immediate),
        }
    }

    pub fn link_key(&self) -> Option<&LinkKey> {
        match self {
            IntentKind::Linked(key) => Some(key),
            _ => None,
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, IntentKind::Exit)
    }
}

/// Errors raised while building an [`OrderIntent`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntentError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("quantity must be greater than zero")]
    ZeroQuantity,
    #[error("LIMIT orders require a price")]
    MissingPrice,
    #[error("two-leg trigger prices must differ")]
    EqualTriggerPrices,
    #[error("link tag carries an empty group")]
    EmptyLinkGroup,
    #[error("SELL {symbol} has neither a link tag nor the exit tag")]
    UnlinkedSell { symbol: String },
}

/// Raw, unvalidated intent as it arrives from an upload or a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRow {
    pub symbol: String,
    pub exchange: String,
    #[serde(alias = "txn_type")]
    pub side: OrderSide,
    #[serde(alias = "qty")]
    pub quantity: u64,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub class: OrderClass,
    #[serde(default)]
    pub tag: Option<String>,
}

/// Immutable, validated description of a single order to submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IntentRow", into = "IntentRow")]
pub struct OrderIntent {
    symbol: String,
    exchange: String,
    side: OrderSide,
    quantity: u64,
    order_type: OrderType,
    price: Option<Decimal>,
    product: String,
    class: OrderClass,
    kind: IntentKind,
    tag: Option<String>,
}

impl OrderIntent {
    /// Market order shorthand.
    pub fn market(
        exchange: &str,
        symbol: &str,
        side: OrderSide,
        quantity: u64,
        tag: Option<&str>,
    ) -> Result<Self, IntentError> {
        Self::try_from(IntentRow {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            side,
            quantity,
            order_type: OrderType::Market,
            price: None,
            product: None,
            class: OrderClass::Immediate,
            tag: tag.map(str::to_string),
        })
    }

    /// Same intent with a different order class.
    pub fn with_class(&self, class: OrderClass) -> Result<Self, IntentError> {
        let mut row = IntentRow::from(self.clone());
        row.class = class;
        Self::try_from(row)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn price(&self) -> Option<Decimal> {
        self.price
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn class(&self) -> &OrderClass {
        &self.class
    }

    pub fn kind(&self) -> &IntentKind {
        &self.kind
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

impl TryFrom<IntentRow> for OrderIntent {
    type Error = IntentError;

    fn try_from(row: IntentRow) -> Result<Self, Self::Error> {
        let symbol = row.symbol.trim().to_ascii_uppercase();
        let exchange = row.exchange.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(IntentError::EmptyField("symbol"));
        }
        if exchange.is_empty() {
            return Err(IntentError::EmptyField("exchange"));
        }
        if row.quantity == 0 {
            return Err(IntentError::ZeroQuantity);
        }

        let price = match (row.class, row.order_type) {
            (OrderClass::TwoLegTrigger { lower, upper }, _)
                if lower.trigger_price == upper.trigger_price =>
            {
                return Err(IntentError::EqualTriggerPrices);
            }
            // Standing orders carry their prices on the legs; any flat price is a reference.
            (class, _) if class.is_standing() => row.price,
            (_, OrderType::Market) => None,
            (_, OrderType::Limit) => Some(row.price.ok_or(IntentError::MissingPrice)?),
        };

        let kind = IntentKind::from_tag(row.tag.as_deref(), &exchange, &symbol)?;
        if row.side == OrderSide::Sell && kind == IntentKind::Immediate {
            return Err(IntentError::UnlinkedSell { symbol });
        }

        let product = row
            .product
            .map(|p| p.trim().to_ascii_uppercase())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PRODUCT.to_string());

        Ok(Self {
            symbol,
            exchange,
            side: row.side,
            quantity: row.quantity,
            order_type: row.order_type,
            price,
            product,
            class: row.class,
            kind,
            tag: row.tag.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
        })
    }
}

impl From<OrderIntent> for IntentRow {
    fn from(intent: OrderIntent) -> Self {
        Self {
            symbol: intent.symbol,
            exchange: intent.exchange,
            side: intent.side,
            quantity: intent.quantity,
            order_type: intent.order_type,
            price: intent.price,
            product: Some(intent.product),
            class: intent.class,
            tag: intent.tag,
        }
    }
}

/// Order status as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderStatus {
    Open,
    Complete,
    Cancelled,
    Rejected,
    Other(String),
}

impl OrderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::Open => "OPEN",
            OrderStatus::Complete => "COMPLETE",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Other(s) => s,
        }
    }
}

impl From<&str> for OrderStatus {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "OPEN" => OrderStatus::Open,
            "COMPLETE" => OrderStatus::Complete,
            "CANCELLED" => OrderStatus::Cancelled,
            "REJECTED" => OrderStatus::Rejected,
            other => OrderStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for OrderStatus {
    fn from(value: String) -> Self {
        OrderStatus::from(value.as_str())
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single order update from the broker's fill stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillEvent {
    pub fill_id: String,
    pub order_id: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub filled_quantity: u64,
}

impl FillEvent {
    /// Build an event for a broker update that has no native event id.
    ///
    /// The id is derived from the update contents, so redelivery of the same
    /// update (from the stream or from an order-book poll) yields the same id.
    pub fn from_order_update(
        order_id: impl Into<String>,
        side: OrderSide,
        status: OrderStatus,
        filled_quantity: u64,
    ) -> Self {
        let order_id = order_id.into();
        Self {
            fill_id: format!("{}:{}:{}", order_id, status, filled_quantity),
            order_id,
            side,
            status,
            filled_quantity,
        }
    }

    /// Only completed buys feed the credit ledger.
    pub fn is_completed_buy(&self) -> bool {
        self.side == OrderSide::Buy && self.status == OrderStatus::Complete
    }
}

/// Net open quantity in one instrument and product. Negative is short.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub exchange: String,
    pub symbol: String,
    pub product: String,
    pub quantity: i64,
}

/// A standing order observed in the fired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerFired {
    pub standing_id: String,
    pub child_id: String,
}

/// Identifier returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum SubmitReceipt {
    /// Execution order id (immediate orders).
    Order(String),
    /// Standing order id (conditional orders, not yet fired).
    Standing(String),
}

impl SubmitReceipt {
    pub fn id(&self) -> &str {
        match self {
            SubmitReceipt::Order(id) | SubmitReceipt::Standing(id) => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_link_tag_derives_instrument_scoped_key() {
        let intent = OrderIntent::market("nfo", " nifty25janfut ", OrderSide::Buy, 50, Some("link:g1"))
            .unwrap();

        assert_eq!(intent.symbol(), "NIFTY25JANFUT");
        assert_eq!(
            intent.kind(),
            &IntentKind::Linked(LinkKey::new("NFO:NIFTY25JANFUT:g1"))
        );
        assert_eq!(intent.product(), "NRML");
    }

    #[test]
    fn test_exit_tag_is_case_insensitive() {
        let intent = OrderIntent::market("NSE", "INFY", OrderSide::Sell, 10, Some("EXIT")).unwrap();
        assert!(intent.kind().is_exit());
        assert!(intent.kind().link_key().is_none());
    }

    #[test]
    fn test_unlinked_sell_is_rejected() {
        let err = OrderIntent::market("NSE", "INFY", OrderSide::Sell, 10, None).unwrap_err();
        assert_eq!(
            err,
            IntentError::UnlinkedSell {
                symbol: "INFY".to_string()
            }
        );

        let err = OrderIntent::market("NSE", "INFY", OrderSide::Sell, 10, Some("hedge")).unwrap_err();
        assert!(matches!(err, IntentError::UnlinkedSell { .. }));
    }

    #[test]
    fn test_unlinked_buy_is_immediate() {
        let intent = OrderIntent::market("NSE", "INFY", OrderSide::Buy, 10, None).unwrap();
        assert_eq!(intent.kind(), &IntentKind::Immediate);
    }

    #[test]
    fn test_empty_link_group_rejected() {
        let err = OrderIntent::market("NSE", "INFY", OrderSide::Buy, 1, Some("link:  ")).unwrap_err();
        assert_eq!(err, IntentError::EmptyLinkGroup);
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let err = OrderIntent::market("NSE", "INFY", OrderSide::Buy, 0, None).unwrap_err();
        assert_eq!(err, IntentError::ZeroQuantity);
    }

    #[test]
    fn test_limit_requires_price_and_market_drops_it() {
        let row = IntentRow {
            symbol: "INFY".into(),
            exchange: "NSE".into(),
            side: OrderSide::Buy,
            quantity: 5,
            order_type: OrderType::Limit,
            price: None,
            product: None,
            class: OrderClass::Immediate,
            tag: None,
        };
        assert_eq!(
            OrderIntent::try_from(row.clone()).unwrap_err(),
            IntentError::MissingPrice
        );

        let market = OrderIntent::try_from(IntentRow {
            order_type: OrderType::Market,
            price: Some(dec!(1500)),
            ..row
        })
        .unwrap();
        assert_eq!(market.price(), None);
    }

    #[test]
    fn test_two_leg_trigger_prices_must_differ() {
        let leg = TriggerLeg {
            trigger_price: dec!(100),
            limit_price: dec!(101),
        };
        let intent = OrderIntent::market("NSE", "INFY", OrderSide::Buy, 5, None).unwrap();
        let err = intent
            .with_class(OrderClass::TwoLegTrigger {
                lower: leg,
                upper: leg,
            })
            .unwrap_err();
        assert_eq!(err, IntentError::EqualTriggerPrices);
    }

    #[test]
    fn test_intent_json_parsing() {
        let json = r#"[
            {"symbol": "infy", "exchange": "nse", "txn_type": "BUY", "qty": 10,
             "class": {"type": "single_trigger", "trigger_price": "1500", "limit_price": "1502.5"},
             "tag": "link:a"},
            {"symbol": "INFY", "exchange": "NSE", "side": "SELL", "quantity": 10,
             "order_type": "LIMIT", "price": "1600", "tag": "link:a"}
        ]"#;

        let intents: Vec<OrderIntent> = serde_json::from_str(json).unwrap();
        assert_eq!(intents.len(), 2);
        assert!(intents[0].class().is_standing());
        assert_eq!(intents[0].kind().link_key(), intents[1].kind().link_key());
        assert_eq!(intents[1].price(), Some(dec!(1600)));
    }

    #[test]
    fn test_invalid_json_intent_surfaces_error() {
        let json = r#"{"symbol": "INFY", "exchange": "NSE", "side": "SELL", "quantity": 3}"#;
        let err = serde_json::from_str::<OrderIntent>(json).unwrap_err();
        assert!(err.to_string().contains("neither a link tag"));
    }

    #[test]
    fn test_fill_event_id_is_stable_across_redelivery() {
        let a = FillEvent::from_order_update("B1", OrderSide::Buy, OrderStatus::Complete, 10);
        let b = FillEvent::from_order_update("B1", OrderSide::Buy, "complete".into(), 10);
        assert_eq!(a.fill_id, b.fill_id);
        assert!(a.is_completed_buy());

        let sell = FillEvent::from_order_update("S1", OrderSide::Sell, OrderStatus::Complete, 10);
        assert!(!sell.is_completed_buy());
    }

    #[test]
    fn test_order_status_roundtrip_unknown() {
        let status = OrderStatus::from("TRIGGER PENDING");
        assert_eq!(status, OrderStatus::Other("TRIGGER PENDING".to_string()));
        assert_eq!(String::from(status), "TRIGGER PENDING");
    }
}
