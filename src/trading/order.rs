//! Order vocabulary shared with the order gateway.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order.
    #[strum(serialize = "BUY", serialize = "buy")]
    Buy,
    /// Sell order.
    #[strum(serialize = "SELL", serialize = "sell")]
    Sell,
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderType {
    /// Resting limit order.
    Limit,
    /// Marketable order that takes liquidity immediately.
    Market,
}

/// Order parameters for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    /// Token ID to trade.
    pub token_id: String,
    /// Order side (buy/sell).
    pub side: Side,
    /// Limit or market.
    pub order_type: OrderType,
    /// Limit price; `None` for market orders.
    pub price: Option<Decimal>,
    /// Order quantity.
    pub quantity: Decimal,
}

impl OrderRequest {
    /// Create a limit order.
    pub fn limit(token_id: impl Into<String>, side: Side, price: Decimal, quantity: Decimal) -> Self {
        Self {
            token_id: token_id.into(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity,
        }
    }

    /// Create a market order.
    pub fn market(token_id: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            token_id: token_id.into(),
            side,
            order_type: OrderType::Market,
            price: None,
            quantity,
        }
    }

    /// Validate order parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.token_id.is_empty() {
            return Err("token_id is required".to_string());
        }
        if self.quantity <= Decimal::ZERO {
            return Err("quantity must be positive".to_string());
        }
        match (self.order_type, self.price) {
            (OrderType::Limit, None) => Err("limit order requires a price".to_string()),
            (OrderType::Limit, Some(p)) if p <= Decimal::ZERO => {
                Err("price must be positive".to_string())
            }
            (OrderType::Market, Some(_)) => Err("market order must not carry a price".to_string()),
            _ => Ok(()),
        }
    }
}

/// Handle returned by the gateway for a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderHandle {
    /// Venue order ID.
    pub order_id: String,
}

impl OrderHandle {
    /// Wrap a venue order ID.
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
        }
    }
}

/// Order status from the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    /// Order is resting with no fills.
    Open,
    /// Order has some fills and is still resting.
    PartiallyFilled,
    /// Order is fully filled.
    Filled,
    /// Order was cancelled (possibly after partial fills).
    Cancelled,
    /// Order was rejected.
    Rejected,
}

impl OrderStatus {
    /// Check if status is terminal (won't change).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// Order state as reported by `poll_order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderReport {
    /// Current status.
    pub status: OrderStatus,
    /// Cumulative filled quantity.
    pub filled_qty: Decimal,
    /// Average fill price, when anything filled.
    pub fill_price: Option<Decimal>,
}

impl OrderReport {
    /// Report for an order with no fills.
    pub fn open() -> Self {
        Self {
            status: OrderStatus::Open,
            filled_qty: Decimal::ZERO,
            fill_price: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn order_request_creation() {
        let limit = OrderRequest::limit("token-123", Side::Sell, dec!(0.52), dec!(10));
        assert_eq!(limit.order_type, OrderType::Limit);
        assert_eq!(limit.price, Some(dec!(0.52)));

        let market = OrderRequest::market("token-456", Side::Buy, dec!(5));
        assert_eq!(market.order_type, OrderType::Market);
        assert_eq!(market.price, None);
    }

    #[test]
    fn order_request_validation() {
        assert!(OrderRequest::limit("t", Side::Sell, dec!(0.50), dec!(10)).validate().is_ok());
        assert!(OrderRequest::market("t", Side::Sell, dec!(10)).validate().is_ok());

        assert!(OrderRequest::limit("", Side::Sell, dec!(0.50), dec!(10)).validate().is_err());
        assert!(OrderRequest::limit("t", Side::Sell, dec!(0), dec!(10)).validate().is_err());
        assert!(OrderRequest::market("t", Side::Sell, dec!(-1)).validate().is_err());

        let mut priced_market = OrderRequest::market("t", Side::Sell, dec!(1));
        priced_market.price = Some(dec!(0.5));
        assert!(priced_market.validate().is_err());
    }

    #[test]
    fn order_status_terminal() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn order_type_from_string() {
        use std::str::FromStr;
        assert_eq!(OrderType::from_str("limit").unwrap(), OrderType::Limit);
        assert_eq!(OrderType::Market.to_string(), "market");
        assert_eq!(Side::from_str("sell").unwrap(), Side::Sell);
    }
}
