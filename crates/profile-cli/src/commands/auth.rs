//! Authentication commands.

use super::{dashboard::show_profile, interrupt_token};
use crate::app::App;
use crate::callback_server::CallbackServer;
use crate::output::{self, OutputFormat};
use anyhow::{bail, Context, Result};
use auth_session::{CallbackOutcome, CallbackResolver};
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Sign in with GitHub through the browser.
pub async fn login(app: &App, port: Option<u16>, format: &OutputFormat) -> Result<()> {
    let snapshot = app.auth.activate().await;
    if let Some(identity) = &snapshot.identity {
        output::print_success(&format!("Already signed in as {}", identity.handle()), format);
        return Ok(());
    }

    let port = match port {
        Some(port) => port,
        None => app.callback_port()?,
    };
    let server = CallbackServer::bind(port, app.config.site_url()?)
        .await
        .with_context(|| format!("Failed to start callback server on port {}", port))?;

    app.auth
        .sign_in()
        .await
        .context("Failed to start GitHub sign-in")?;

    if *format == OutputFormat::Text {
        println!("Waiting for the browser to finish sign-in (Ctrl-C to abort)...");
    }
    let outcome = server.serve(Arc::new(resolver(app)), interrupt_token()).await;
    finish(app, outcome, format).await
}

/// Resolve a redirect URL pasted from the browser.
pub async fn callback(app: &App, url: &str, format: &OutputFormat) -> Result<()> {
    let url = Url::parse(url).with_context(|| format!("Invalid callback URL: {}", url))?;
    app.auth.activate().await;

    let outcome = resolver(app).resolve(&url, interrupt_token()).await;
    finish(app, outcome, format).await
}

fn resolver(app: &App) -> CallbackResolver {
    CallbackResolver::with_timeout(app.session_store.clone(), app.config.callback_timeout())
}

async fn finish(app: &App, outcome: CallbackOutcome, format: &OutputFormat) -> Result<()> {
    let target = outcome.redirect_target();
    match outcome {
        CallbackOutcome::Success(session) => {
            info!(user_id = %session.user.id, "Signed in");
            output::print_success(
                &format!("Signed in as {}", session.user.handle()),
                format,
            );
            app.auth.drain_reconciliations().await;
            show_profile(app, &session.user, format).await
        }
        CallbackOutcome::Failure(failure) => {
            bail!("Sign-in failed: {} (redirect {})", failure, target)
        }
    }
}

/// Sign out. Local session state is removed even when the server call fails.
pub async fn logout(app: &App, format: &OutputFormat) -> Result<()> {
    match app.auth.sign_out().await {
        Ok(()) => {
            output::print_success("Signed out", format);
            Ok(())
        }
        Err(e) => Err(e).context("Signed out locally, but the server sign-out failed"),
    }
}

/// Show `{identity, ready}`.
pub async fn status(app: &App, format: &OutputFormat) -> Result<()> {
    let snapshot = app.auth.activate().await;

    match format {
        OutputFormat::Text => {
            match &snapshot.identity {
                Some(identity) => {
                    println!("Auth:     signed in");
                    println!("User:     {}", identity.handle());
                    println!("User ID:  {}", identity.id);
                    if let Some(email) = &identity.email {
                        println!("Email:    {}", email);
                    }
                }
                None => println!("Auth:     not signed in"),
            }
            println!("Ready:    {}", snapshot.ready);
        }
        OutputFormat::Json => {
            output::print_json(&serde_json::json!({
                "ready": snapshot.ready,
                "signed_in": snapshot.identity.is_some(),
                "identity": snapshot.identity,
            }))?;
        }
    }

    Ok(())
}
