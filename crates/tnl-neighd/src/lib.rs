//! Tunnel Neighbor Cache for SONiC
//!
//! Maps (interface, network address) pairs to MAC addresses for tunnel
//! endpoint forwarding. Bindings are learned by snooping ARP replies and ND
//! neighbor advertisements, served to forwarding threads through a lock-free
//! lookup, and aged out after an idle period.
//!
//! # Architecture
//!
//! ```text
//!  packet path ──▶ Snooper ──upsert──▶ ┌────────────┐ ◀──lookup── forwarding
//!                                      │ NeighCache │             threads
//!  periodic tick ─▶ AgingSweeper ─────▶│            │
//!                                      └─────┬──────┘
//!  control socket ─▶ AdminOps ──────────────▶│ (show / set / flush)
//!                                            ▼
//!                          ChangeNotifier (version, wait-for-change)
//! ```
//!
//! Writers serialize on one mutex; readers pin an epoch and never block.
//! Unlinked entries are freed by the [`ReclamationManager`] only after every
//! concurrent reader has moved on.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-3: Content of Audit Records - Structured tracing fields on every mutation
//! - SC-7: Boundary Protection - Tunnel endpoint resolution
//! - SI-4: System Monitoring - Prometheus metrics
//! - SI-10: Information Input Validation - Snooped traffic filtered by message type

pub mod admin;
pub mod aging;
pub mod cache;
pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod metrics;
pub mod notifier;
pub mod reclaim;
pub mod snoop;
pub mod tnl_neigh;
pub mod types;

pub use admin::{AdminOps, HostResolver, SystemResolver};
pub use aging::AgingSweeper;
pub use cache::{CacheOptions, NeighCache, UpsertOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TnlNeighConfig;
pub use control::{ControlReply, ControlServer};
pub use error::{Result, TnlNeighError};
pub use metrics::MetricsCollector;
pub use notifier::ChangeNotifier;
pub use reclaim::{ReclaimStats, ReclamationManager};
pub use snoop::{FlowDescriptor, FlowField, FlowWildcards, SnoopOutcome, Snooper};
pub use tnl_neigh::TnlNeigh;
pub use types::{InterfaceName, MacAddress, NeighborAddress, NeighborEntry, NeighborKey};
