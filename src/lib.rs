//! # Identity Graph
//!
//! A service that reconciles partial, overlapping contact observations into
//! one clustered identity graph.
//!
//! Every observation is an (email, phone) pair with at least one side
//! present. Observations that share a value belong to the same customer;
//! the resolver links their records into a cluster owned by one canonical
//! *primary* contact (the oldest record), with every other member kept as a
//! *secondary* pointing at it. An observation bridging two existing clusters
//! merges them under the older primary.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐       ┌──────────┐
//! │   CLI    │       │   HTTP   │
//! │  (idg)   │       │ /identify│
//! └────┬─────┘       └────┬─────┘
//!      │                  │
//!      ▼                  ▼
//!    ┌──────────────────────┐
//!    │       Resolver       │
//!    │ match→expand→merge→  │
//!    │  novelty→view        │
//!    └──────────┬───────────┘
//!               │ one transaction per resolve
//!               ▼
//!    ┌──────────────────────┐
//!    │     ContactStore     │
//!    │   SQLite / memory    │
//!    └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! idg init                                   # create database
//! idg identify --email a@x.com --phone 111   # resolve one observation
//! idg serve                                  # start HTTP service
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Store and resolver error taxonomies |
//! | [`store`] | Contact storage abstraction and backends |
//! | [`resolver`] | The reconciliation algorithm |
//! | [`server`] | HTTP identity service |
//! | [`identify`] | One-shot CLI resolve |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod error;
pub mod identify;
pub mod migrate;
pub mod models;
pub mod resolver;
pub mod server;
pub mod store;
