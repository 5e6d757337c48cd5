//! Dashboard command.

use crate::app::App;
use crate::output::{self, OutputFormat};
use anyhow::{bail, Context, Result};
use auth_session::Identity;

/// Show the stored profile of the signed-in user.
pub async fn dashboard(app: &App, format: &OutputFormat) -> Result<()> {
    let snapshot = app.auth.activate().await;
    let Some(identity) = snapshot.identity else {
        bail!("Not signed in. Run 'profile-sync login' first");
    };

    // Activation may have scheduled creation of a missing row
    app.auth.drain_reconciliations().await;
    show_profile(app, &identity, format).await
}

pub(super) async fn show_profile(app: &App, identity: &Identity, format: &OutputFormat) -> Result<()> {
    let record = app
        .reconciler
        .lookup(identity)
        .await
        .context("Failed to load profile")?;

    match record {
        Some(record) => output::print_profile(&record, format),
        None => {
            output::print_error(
                &format!("No profile stored yet for {}", identity.handle()),
                format,
            );
            Ok(())
        }
    }
}
