//! Federation gateway core: a single HTTP facade over many GPU clusters.
//!
//! The gateway holds no state of its own. Identities are derived from a
//! shared secret per request, cluster reads fan out concurrently and merge
//! with per-cluster failure isolation, and writes address one cluster at a
//! time.

pub mod aggregate;
pub mod api;
pub mod batch;
pub mod client;
pub mod config;
pub mod errors;
pub mod logs;
pub mod status_tree;
