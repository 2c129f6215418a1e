//! Hierarchical authorization store
//!
//! An organization tree of branches carries positions, roles and function
//! sets. Permissions resolve by walking a branch's ancestor chain and
//! filtering inherited function sets through per-branch whitelists; people
//! authenticate against stored credentials with failure counting and
//! expiry. Documents persist as JSON with debounced, crash-safe writes.
//!
//! [`keeper::Keeper`] is the entry point: construct one over a data
//! directory and call its operations. The bundled `orgward-server` binary
//! exposes the same operations over HTTP.

pub mod agents;
pub mod catalogue;
pub mod error;
pub mod ident;
pub mod keeper;
pub mod persist;
pub mod resolve;
pub mod tree;

pub use agents::{AgentRecord, AgentRegistry, MemoryAgentRegistry};
pub use error::{Fault, Reason, Result, StoreError};
pub use ident::SafeIdent;
pub use keeper::{Keeper, KeeperConfig};
pub use persist::{Documents, Saver, SaverConfig};

/// Crate version, reported by the server's info endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
