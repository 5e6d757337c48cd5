//! Reconciler integration tests.
//!
//! - `harness.rs`    - identities and a store wrapper with failure injection
//! - `reconcile.rs`  - upsert path and procedure fallback
//! - `ensure.rs`     - check-then-create path and concurrent writers

pub(crate) mod harness;
