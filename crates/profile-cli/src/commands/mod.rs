//! CLI command implementations.

mod auth;
mod dashboard;

pub use auth::{callback, login, logout, status};
pub use dashboard::dashboard;

use tokio_util::sync::CancellationToken;

/// Token cancelled on Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });
    token
}
