//! OIT Sync: Sync Reconciler
//!
//! Moves cached sampling data to the server. The local cache stays the
//! source of truth; server state is never merged back (last write wins).
//!
//! ```text
//! save progress ──┐
//! final step ─────┼─▶ SyncReconciler ──▶ upload staged files ──▶ push ──▶ finalize
//! reconnect ──────┘         │
//!                           └── update ──▶ SamplingCache
//! ```

pub mod error;
pub mod http;
pub mod reconciler;
pub mod remote;

pub use error::SyncError;
pub use http::{HttpJudge, HttpServer};
pub use reconciler::{Remote, SyncMode, SyncOutcome, SyncReconciler};
pub use remote::{FinalizeReceipt, Finalizer, PushPayload, SamplingServer, TemplateSource};
