//! Flatten orders built from open positions.

use crate::broker::{OrderIntent, OrderSide, Position, PositionSource, DEFAULT_PRODUCT, EXIT_TAG};
use anyhow::{Context, Result};
use tracing::{info, warn};

/// Exit intents that close every open NRML position.
///
/// Longs are sold and shorts bought back at market, tagged `exit` so they
/// bypass the linker. A non-empty `symbols` list restricts the result to
/// those trading symbols.
pub fn build_exit_intents(positions: &[Position], symbols: &[String]) -> Vec<OrderIntent> {
    positions
        .iter()
        .filter(|p| p.product.eq_ignore_ascii_case(DEFAULT_PRODUCT) && p.quantity != 0)
        .filter(|p| symbols.is_empty() || symbols.iter().any(|s| s.eq_ignore_ascii_case(&p.symbol)))
        .filter_map(|p| {
            let side = if p.quantity > 0 {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            };
            match OrderIntent::market(
                &p.exchange,
                &p.symbol,
                side,
                p.quantity.unsigned_abs(),
                Some(EXIT_TAG),
            ) {
                Ok(intent) => Some(intent),
                Err(e) => {
                    warn!(symbol = %p.symbol, error = %e, "Skipping unusable position");
                    None
                }
            }
        })
        .collect()
}

/// Fetch positions and build their exit intents.
pub async fn flatten_intents(source: &dyn PositionSource, symbols: &[String]) -> Result<Vec<OrderIntent>> {
    let positions = source.positions().await.context("Failed to fetch positions")?;
    let intents = build_exit_intents(&positions, symbols);
    info!(
        positions = positions.len(),
        exits = intents.len(),
        "Built flatten orders"
    );
    Ok(intents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{IntentKind, OrderSubmitter, PaperBroker};
    use crate::config::ExecutionConfig;
    use crate::linker::Linker;
    use crate::placement::{PlacementOrchestrator, PlacementStatus};
    use std::sync::Arc;

    fn position(symbol: &str, product: &str, quantity: i64) -> Position {
        Position {
            exchange: "NFO".to_string(),
            symbol: symbol.to_string(),
            product: product.to_string(),
            quantity,
        }
    }

    #[test]
    fn test_long_sells_and_short_buys() {
        let intents = build_exit_intents(
            &[position("NIFTYFUT", "NRML", 50), position("BANKFUT", "NRML", -15)],
            &[],
        );

        assert_eq!(intents.len(), 2);
        assert_eq!(intents[0].side(), OrderSide::Sell);
        assert_eq!(intents[0].quantity(), 50);
        assert_eq!(intents[1].side(), OrderSide::Buy);
        assert_eq!(intents[1].quantity(), 15);
        assert!(intents.iter().all(|i| *i.kind() == IntentKind::Exit));
        assert!(intents.iter().all(|i| i.product() == "NRML"));
    }

    #[test]
    fn test_skips_flat_and_other_products() {
        let intents = build_exit_intents(
            &[
                position("NIFTYFUT", "NRML", 0),
                position("INFY", "CNC", 10),
                position("SBIN", "MIS", -5),
            ],
            &[],
        );
        assert!(intents.is_empty());
    }

    #[test]
    fn test_symbol_filter() {
        let positions = [position("NIFTYFUT", "NRML", 50), position("BANKFUT", "NRML", 25)];
        let intents = build_exit_intents(&positions, &["niftyfut".to_string()]);

        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].symbol(), "NIFTYFUT");
    }

    #[tokio::test]
    async fn test_flatten_closes_paper_positions_without_linking() {
        let (broker, _rx) = PaperBroker::new();
        let broker = Arc::new(broker);

        let long = OrderIntent::market("NSE", "INFY", OrderSide::Buy, 10, None).unwrap();
        let receipt = broker.submit(&long).await.unwrap();
        broker.fill(receipt.id(), 10).await.unwrap();

        let intents = flatten_intents(broker.as_ref(), &[]).await.unwrap();
        assert_eq!(intents.len(), 1);

        let linker = Arc::new(Linker::new());
        let orchestrator = PlacementOrchestrator::new(
            broker.clone(),
            Arc::clone(&linker),
            ExecutionConfig {
                place_pause_ms: 0,
                ..ExecutionConfig::default()
            },
        );
        let report = orchestrator.execute_batch(&intents).await.unwrap();
        assert_eq!(report.count(PlacementStatus::Placed), 1);

        broker.simulate_step().await;
        assert!(broker.positions().await.unwrap().is_empty());
        assert_eq!(linker.pending_sell_count(), 0);
        assert!(!linker.has_registrations());
    }
}
