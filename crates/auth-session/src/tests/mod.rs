//! Integration tests for the auth session and callback resolver.
//!
//! - `harness.rs`    - scripted session store and fixtures
//! - `auth_state.rs` - activation, interleaving, teardown, sign-in/out
//! - `callback.rs`   - redirect landing resolution

mod callback;
