//! Wiring of the session store, profile store and auth session.

use anyhow::{Context, Result};
use auth_session::{
    AuthOptions, AuthSession, FileSessionCache, SessionCache, SupabaseSessionStore,
};
use profile_config::{Config, Paths, DEFAULT_CALLBACK_PORT};
use profile_sync::{ProfileReconciler, ReconcilerConfig, SupabaseProfileStore};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Everything a command needs.
pub struct App {
    pub config: Config,
    pub session_store: Arc<SupabaseSessionStore>,
    pub reconciler: Arc<ProfileReconciler>,
    pub auth: Arc<AuthSession>,
}

impl App {
    /// Validate `config` and build the client stack.
    ///
    /// `reconcile_on_load` controls whether activation creates a missing
    /// profile row for an already signed-in user.
    pub fn build(config: Config, paths: Paths, reconcile_on_load: bool) -> Result<Self> {
        config
            .validate()
            .context("Supabase is not configured (set SUPABASE_URL and SUPABASE_ANON_KEY)")?;

        let cache: Arc<dyn SessionCache> = Arc::new(FileSessionCache::new(paths.session_file()));
        let session_store = Arc::new(
            SupabaseSessionStore::new(
                &config.supabase_url,
                &config.supabase_anon_key,
                cache.clone(),
            )
            .with_redirect_handler(Box::new(|url: &Url| {
                println!("Opening GitHub sign-in in your browser:");
                println!("  {}", url);
                if let Err(e) = open::that(url.as_str()) {
                    warn!(error = %e, "Failed to open browser");
                    println!("Open the link above manually to continue.");
                }
                Ok(())
            })),
        );

        let profiles = SupabaseProfileStore::new(
            config.supabase_url.clone(),
            config.supabase_anon_key.clone(),
        )
        .with_bearer(session_store.clone());
        let reconciler = Arc::new(ProfileReconciler::with_config(
            Arc::new(profiles),
            ReconcilerConfig {
                table: config.profile_table.clone(),
                procedure: config.profile_procedure.clone(),
                ..ReconcilerConfig::default()
            },
        ));

        let options = AuthOptions {
            redirect_to: Some(config.callback_url()?.to_string()),
            scopes: config.oauth_scopes.clone(),
            reconcile_on_initial_load: reconcile_on_load,
            ..AuthOptions::default()
        };
        let auth = Arc::new(
            AuthSession::new(session_store.clone(), options)
                .with_reconciler(reconciler.clone())
                .with_cache(cache),
        );

        debug!(supabase_url = %config.supabase_url, "Client stack ready");
        Ok(Self {
            config,
            session_store,
            reconciler,
            auth,
        })
    }

    /// Port for the local callback server, taken from the site URL.
    pub fn callback_port(&self) -> Result<u16> {
        let site = self.config.site_url()?;
        Ok(site.port_or_known_default().unwrap_or(DEFAULT_CALLBACK_PORT))
    }

    /// Wait for outstanding reconciliations and tear the session down.
    pub async fn shutdown(&self) {
        let outcomes = self.auth.drain_reconciliations().await;
        for outcome in outcomes.iter().filter(|o| !o.is_success()) {
            info!(outcome = ?outcome, "Profile reconciliation did not complete");
        }
        self.auth.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            supabase_url: "https://xyz.supabase.co".to_string(),
            supabase_anon_key: "anon".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_build_requires_backend_settings() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let err = App::build(Config::default(), paths, false).err().unwrap();
        assert!(err.to_string().contains("Supabase is not configured"));
    }

    #[tokio::test]
    async fn test_build_wires_callback_target() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let mut config = config();
        config.site_url = "http://localhost:8787".to_string();

        let app = App::build(config, paths, false).unwrap();

        assert_eq!(app.callback_port().unwrap(), 8787);
        assert_eq!(app.reconciler.config().table, "users");
        assert!(!app.auth.ready());
    }
}
