//! Authentication session handling for profile-sync.
//!
//! This crate provides:
//! - The session store capability and a Supabase (GoTrue) implementation
//! - An explicit FSM-based auth state machine exposing `{identity, ready}`
//! - Resolution of the OAuth redirect landing into a session
//! - Local session caching (file-backed or in memory)

mod auth_fsm;
mod auth_session;
mod cache;
mod callback;
mod error;
mod store;
mod subscription;
mod supabase;
mod types;

pub use auth_fsm::session_machine;
pub use auth_fsm::{SessionMachine, SessionMachineInput, SessionMachineState, SessionPhase};
pub use auth_session::{AuthOptions, AuthSession, AuthSnapshot};
pub use cache::{FileSessionCache, MemorySessionCache, SessionCache};
pub use callback::codes as callback_codes;
pub use callback::{
    CallbackFailure, CallbackOutcome, CallbackPhase, CallbackResolver, DEFAULT_CALLBACK_TIMEOUT,
};
pub use error::{AuthError, AuthResult};
pub use profile_sync::Identity;
pub use store::SessionStore;
pub use subscription::{ListenerRegistry, SessionListener, Subscription};
pub use supabase::{RedirectHandler, SupabaseSessionStore};
pub use types::{AuthChangeEvent, AuthEventKind, Session, SessionTokens, SignInOptions};

#[cfg(test)]
mod tests;
