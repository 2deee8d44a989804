//! tidegrid-state — domain model and embedded state store for TideGrid.
//!
//! Holds every type that crosses a crate boundary in the autoscaler:
//! scaling targets and their horizontal/vertical/resize policies, workload
//! state as reported by the workload controller, usage samples, vertical
//! recommendations, and the per-tick decision events.
//!
//! # Architecture
//!
//! The [`StateStore`] is backed by [redb](https://docs.rs/redb). Values are
//! JSON-serialized into `&[u8]` columns. Composite keys
//! (`{target_id}:{timestamp}`) enable prefix range scans for a target's
//! decision history.
//!
//! The store is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`) and is
//! shared between the API, the supervisor, and the standalone controller.

pub mod duration;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use duration::parse_duration;
pub use error::{StateError, StateResult};
pub use store::{DECISION_RETENTION, StateStore};
pub use types::*;
