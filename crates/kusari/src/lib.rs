//! Fetch a list of remote resources strictly one after another.
//!
//! ```text
//! ┌──────────────┐   resume()   ┌─────────────────────────┐  FetchRequest  ┌───────────┐
//! │              ├──────────────►                         ├────────────────►           │
//! │    Caller    │   cancel()   │        Sequencer        │                │  Fetcher  │
//! │              ├──────────────►                         ◄────────────────┤           │
//! │              │              │  [one fetch in flight]  │  ItemProgress  │           │
//! │              │  ItemResult  │                         │                │           │
//! │              ◄──────────────┤                         ◄────────────────┤           │
//! │              │   progress   │                         │ Payload | Err  │           │
//! │              ◄──────────────┤                         │                │           │
//! └──────────────┘              └─────────────────────────┘                └───────────┘
//! ```

pub mod destination;
pub mod error;
pub mod fetch;
pub mod progress;
pub mod sequencer;
pub mod target;
pub mod util;

pub use destination::{Destination, FetchDestination};
pub use error::*;
pub use fetch::{http::HttpFetcher, FetchRequest, Fetcher, Payload};
pub use progress::{AggregateProgress, ItemProgress};
pub use sequencer::{ItemResult, Sequencer, SequencerBuilder, SequencerHandle, SequencerState};
pub use target::Target;
pub use util::http::HttpClient;

// Re-export for fetcher implementations
pub use bytes::Bytes;
pub use tokio_util::sync::CancellationToken;
