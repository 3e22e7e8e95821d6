//! Transport strategy abstraction
//!
//! A strategy is one concrete way of asking one upstream for a price.

use crate::{
    catalog::Subject,
    error::StrategyFailure,
    types::{AuthToken, PriceQuote, StrategyId},
};
use async_trait::async_trait;

/// Trait for transport strategies
///
/// Implementations wrap exactly one upstream configuration (Tonnel listing
/// search, Portal search with a token, stickers.tools stats, ...). They make a
/// single attempt: retries, pacing and token refresh belong to the selector.
#[async_trait]
pub trait TransportStrategy: Send + Sync {
    /// Stable identifier used in logs, metrics and subject capabilities
    fn id(&self) -> StrategyId;

    /// Whether `attempt` must be given a token from the auth manager
    fn requires_auth(&self) -> bool {
        false
    }

    /// Makes one attempt at pricing `subject`
    ///
    /// # Arguments
    /// * `subject` - The subject to price
    /// * `auth` - Token for authenticated upstreams, `None` otherwise
    ///
    /// # Returns
    /// A quote, or a failure tagged with its error kind
    async fn attempt(
        &self,
        subject: &Subject,
        auth: Option<&AuthToken>,
    ) -> Result<PriceQuote, StrategyFailure>;
}
