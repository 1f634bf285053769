//! Hookrelay - webhook fan-out relay.
//!
//! Webhooks arrive at `POST /w/{address}`. Each address maps to any number of
//! targets; for every target the payload is run through that target's jq
//! filter and the result is delivered to the sink named by the target's kind
//! (currently Trello card comments).
//!
//! ## Architecture
//!
//! ```text
//! POST /w/{address} → routing → dispatch ─┬─ filter → sink
//!          │                              ├─ filter → sink
//!          └→ recent-request log          └─ filter → sink
//! ```

pub mod config;
pub mod dispatch;
pub mod filter;
pub mod identity;
pub mod policy;
pub mod recent;
pub mod routing;
pub mod sink;
pub mod trello;
pub mod util;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{DispatchError, DispatchOutcome, FanOutDispatcher};
pub use filter::{FilterError, FilterEvaluator, JqEvaluator};
pub use identity::{IdentityError, IdentityVerifier, TrelloIdentity};
pub use recent::{RecentLogError, RecentRequestLog};
pub use routing::{EndpointStore, EndpointTarget, RoutingError};
pub use sink::{Sink, SinkError, SinkRegistry, TrelloCommentSink};
pub use trello::TrelloApi;
pub use web::{router, AppState};
