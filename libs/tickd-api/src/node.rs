use std::future::Future;
use std::pin::Pin;

use crate::error::IngestError;
use crate::types::{StartFrom, TickRecord};

/// One live subscription to an upstream tick stream.
///
/// Implemented transport-side. The API crate defines only the trait,
/// without a tokio dependency.
pub trait TickSubscription: Send {
    /// Next record in tick order. `Ok(None)` = clean upstream close.
    fn next(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<TickRecord>, IngestError>> + Send + '_>>;
}

/// Client for one upstream node protocol.
///
/// The connection manager doesn't know concrete transports; one call is
/// one subscription attempt against one candidate node.
pub trait NodeClient: Send + Sync {
    /// Connect to `node` and subscribe to the tick stream starting at
    /// `start`. Errors carry a kind: `Io` attempts are retried by the
    /// caller, `Protocol` ones are fatal.
    #[allow(clippy::type_complexity)]
    fn subscribe(
        &self,
        node: &str,
        start: StartFrom,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn TickSubscription>, IngestError>> + Send + '_>>;
}
