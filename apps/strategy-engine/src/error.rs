//! Structured error types for the strategy engine.
//!
//! Every error carries the name of the operation that raised it (`caller`)
//! and, where one exists, the id of the order involved, so that an error
//! forwarded over the errors channel is actionable without extra context.

use thiserror::Error;

/// Errors raised by the order/trade state machines and the strategy runtime.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// An order failed structural validation on entry.
    #[error("{caller}: invalid order (id: {order_id}): {message}")]
    InvalidOrder {
        /// Operation that raised the error.
        caller: &'static str,
        /// Id of the offending order.
        order_id: String,
        /// What failed validation.
        message: String,
    },

    /// An order side tag outside the closed `B`/`S` set.
    #[error("{caller}: unknown order side (id: {order_id}): {message}")]
    UnknownOrderSide {
        /// Operation that raised the error.
        caller: &'static str,
        /// Id of the offending order, empty when parsing a bare tag.
        order_id: String,
        /// The tag that failed to parse.
        message: String,
    },

    /// An order type tag outside the closed set.
    #[error("{caller}: unknown order type (id: {order_id}): {message}")]
    UnknownOrderType {
        /// Operation that raised the error.
        caller: &'static str,
        /// Id of the offending order, empty when parsing a bare tag.
        order_id: String,
        /// The tag that failed to parse.
        message: String,
    },

    /// An operation was applied to an order of the wrong type.
    #[error(
        "{caller}: unexpected order type (id: {order_id}): expected {expected}, actual {actual}"
    )]
    UnexpectedOrderType {
        /// Operation that raised the error.
        caller: &'static str,
        /// Id of the offending order.
        order_id: String,
        /// The type(s) the operation requires.
        expected: String,
        /// The type the order actually has.
        actual: String,
    },

    /// An operation was applied to an order in the wrong lifecycle state.
    #[error(
        "{caller}: unexpected order state (id: {order_id}): expected {expected}, actual {actual}"
    )]
    UnexpectedOrderState {
        /// Operation that raised the error.
        caller: &'static str,
        /// Id of the offending order.
        order_id: String,
        /// The state(s) the operation requires.
        expected: String,
        /// The state the order actually is in.
        actual: String,
    },

    /// Execution arithmetic violation: over-fill, non-positive fill price, etc.
    #[error("{caller}: order update failed (id: {order_id}): {message}")]
    OrderUpdate {
        /// Operation that raised the error.
        caller: &'static str,
        /// Id of the offending order.
        order_id: String,
        /// What the update violated.
        message: String,
    },

    /// Invalid mutation of a trade: closed-trade writes, duplicate order ids,
    /// cross-symbol mixing, fills for unknown ids.
    #[error("{caller}: trade operation failed (id: {order_id}): {message}")]
    TradeOperation {
        /// Operation that raised the error.
        caller: &'static str,
        /// Id of the order involved, empty when none applies.
        order_id: String,
        /// What the operation violated.
        message: String,
    },

    /// A request could not be handed to the broker.
    #[error("{caller}: request not delivered (id: {order_id}): {message}")]
    DeliveryFailure {
        /// Operation that raised the error.
        caller: &'static str,
        /// Id of the order the request concerned, empty when none applies.
        order_id: String,
        /// Why delivery failed.
        message: String,
    },
}

impl EngineError {
    /// Construct an [`EngineError::InvalidOrder`].
    #[must_use]
    pub fn invalid_order(
        caller: &'static str,
        order_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidOrder {
            caller,
            order_id: order_id.into(),
            message: message.into(),
        }
    }

    /// Construct an [`EngineError::UnexpectedOrderState`].
    #[must_use]
    pub fn unexpected_state(
        caller: &'static str,
        order_id: impl Into<String>,
        expected: impl Into<String>,
        actual: impl ToString,
    ) -> Self {
        Self::UnexpectedOrderState {
            caller,
            order_id: order_id.into(),
            expected: expected.into(),
            actual: actual.to_string(),
        }
    }

    /// Construct an [`EngineError::OrderUpdate`].
    #[must_use]
    pub fn order_update(
        caller: &'static str,
        order_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::OrderUpdate {
            caller,
            order_id: order_id.into(),
            message: message.into(),
        }
    }

    /// Construct an [`EngineError::TradeOperation`].
    #[must_use]
    pub fn trade_operation(
        caller: &'static str,
        order_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TradeOperation {
            caller,
            order_id: order_id.into(),
            message: message.into(),
        }
    }

    /// Construct an [`EngineError::DeliveryFailure`].
    #[must_use]
    pub fn delivery_failure(
        caller: &'static str,
        order_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::DeliveryFailure {
            caller,
            order_id: order_id.into(),
            message: message.into(),
        }
    }

    /// Id of the order this error concerns, if any.
    #[must_use]
    pub fn order_id(&self) -> Option<&str> {
        let id = match self {
            Self::InvalidOrder { order_id, .. }
            | Self::UnknownOrderSide { order_id, .. }
            | Self::UnknownOrderType { order_id, .. }
            | Self::UnexpectedOrderType { order_id, .. }
            | Self::UnexpectedOrderState { order_id, .. }
            | Self::OrderUpdate { order_id, .. }
            | Self::TradeOperation { order_id, .. }
            | Self::DeliveryFailure { order_id, .. } => order_id,
        };
        if id.is_empty() {
            None
        } else {
            Some(id.as_str())
        }
    }
}
