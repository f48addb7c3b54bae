//! # Ratecache
//!
//! A rate-proxying cache that sits between many clients and an expensive
//! upstream pricing API. Clients ask for a room rate keyed by a
//! `(period, hotel, room)` tuple; the proxy answers from a shared Redis
//! cache in single-digit milliseconds while keeping every value fresher
//! than the cache TTL and holding the whole fleet under a daily upstream
//! call quota.
//!
//! ## How It Works
//!
//! - **Fast path**: cache hits are a single Redis `GET`, no locking.
//! - **Miss coalescing**: concurrent misses for the same tuple race for a
//!   per-key distributed lock; exactly one replica calls the upstream, the
//!   rest pick up the freshly written value.
//! - **Stale-while-revalidate**: a background task re-fetches every key
//!   ever served in one batched upstream call per cycle, so steady-state
//!   traffic never waits on the upstream at all.
//! - **Quota accounting**: a shared Redis counter tracks upstream calls
//!   across all replicas; when it reaches the configured ceiling the proxy
//!   degrades to 503 instead of overrunning the contract.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐     ┌───────────────┐      ┌────────────┐
//! │  /pricing │────▶│  RateCache    │─────▶│  Redis     │
//! │  /healthz │     │  Engine       │◀─────│  (cache,   │
//! └───────────┘     └───┬───────┬───┘      │  registry, │
//!                       │       │          │  locks,    │
//!             ┌─────────▼──┐ ┌──▼────────┐ │  counters) │
//!             │ Revalidator│ │ RateApi   │ └────────────┘
//!             │ (interval) │ │ Client    │
//!             └────────────┘ └───────────┘
//! ```
//!
//! All cross-replica state lives in Redis; replicas hold no in-process
//! copies of counters, locks, or the key registry.

pub mod config;
pub mod engine;
pub mod lock;
pub mod quota;
pub mod revalidator;
pub mod server;
pub mod store;
pub mod types;
pub mod upstream;

#[cfg(test)]
mod engine_test;
#[cfg(test)]
mod server_test;
