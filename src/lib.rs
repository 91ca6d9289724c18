//! # stationwatch
//!
//! Follow items (orders, documents, files) as they move through a set of
//! independently operated stations, and search all stations at once.
//!
//! A search fans out to every live station in parallel, isolates failures
//! per station, retries transient errors and returns results in configured
//! station order. Stations working on the same network share hold leases
//! on one reference-counted connection from the [`pool`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────────────────┐
//! │  config  │──▶│ Pipeline │──▶│ Search                 │
//! │  (TOML)  │   │ stations │   │ one worker per station │
//! └──────────┘   └────┬─────┘   └───────────┬────────────┘
//!                     │                     ▼
//!                     │             Station::do_search
//!                     │                     │
//!                     ▼                     ▼
//!              ConnectionPool ◀──── leases on shares
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`criteria`] | Search criteria and operation definitions |
//! | [`fields`] | Custom field definitions |
//! | [`models`] | Instances, item references, result sets |
//! | [`memory`] | Session-wide item reference registry |
//! | [`traits`] | Station contract and registry |
//! | [`station_folder`] | File folder station |
//! | [`pipeline`] | Ordered set of live stations |
//! | [`search`] | Concurrent search coordinator |
//! | [`retry`] | Transient failure retry policy |
//! | [`pool`] | Reference-counted share connections |
//! | [`stations`] | Station listings for the CLI |
//! | [`error`] | Typed station and pool errors |
//! | [`logging`] | Tracing setup |

pub mod config;
pub mod criteria;
pub mod error;
pub mod fields;
pub mod logging;
pub mod memory;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod retry;
pub mod search;
pub mod station_folder;
pub mod stations;
pub mod traits;
