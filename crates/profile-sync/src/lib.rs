//! # profile-sync
//!
//! Keeps one profile row per GitHub account in the backend database.
//!
//! - [`Identity`]: the authenticated user as reported by the session store
//! - [`derive_external_key`]: the numeric GitHub key rows are indexed by
//! - [`ProfileStore`]: table/procedure capability, with a PostgREST
//!   implementation ([`SupabaseProfileStore`]) and an in-process one
//!   ([`MemoryProfileStore`])
//! - [`ProfileReconciler`]: idempotent create-or-refresh of the row

mod error;
mod identity;
mod key;
mod memory;
mod reconciler;
mod record;
mod store;
mod supabase;

pub use error::{StoreError, StoreResult};
pub use identity::{Identity, UserMetadata};
pub use key::{derive_external_key, ExternalKey, KeyError, KeyPolicy};
pub use memory::MemoryProfileStore;
pub use reconciler::{ProfileReconciler, ReconcileOutcome, ReconcilerConfig};
pub use record::{NewProfile, ProfileFilter, ProfileRecord, RowId};
pub use store::{BearerSource, ProfileStore};
pub use supabase::SupabaseProfileStore;

#[cfg(test)]
mod tests;
