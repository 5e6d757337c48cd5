//! Local HTTP listener for the OAuth redirect.
//!
//! Browsers never send the URL fragment to a server, so `/auth/callback`
//! answers with a small relay page that re-requests
//! `/auth/callback/relay?search=<query>&hash=<fragment>`. The relay handler
//! rebuilds the original redirect URL and hands it to the
//! [`CallbackResolver`].

use auth_session::{callback_codes, CallbackFailure, CallbackOutcome, CallbackResolver};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::ReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use url::Url;

/// Upper bound on how long the server waits for the browser.
pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(120);

/// How long a connection may take to send its request line and headers.
/// Browsers open speculative connections that never send anything.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

pub const CALLBACK_PATH: &str = "/auth/callback";
pub const RELAY_PATH: &str = "/auth/callback/relay";

/// Callback listener bound to `127.0.0.1`.
pub struct CallbackServer {
    listener: TcpListener,
    site_url: Url,
    timeout: Duration,
}

impl CallbackServer {
    /// Bind `127.0.0.1:<port>`. Port 0 picks a free port.
    pub async fn bind(port: u16, site_url: Url) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        info!(port = listener.local_addr()?.port(), "OAuth callback server listening");
        Ok(Self {
            listener,
            site_url,
            timeout: DEFAULT_SERVER_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until a relay request has been resolved, `cancel` fires or the
    /// server timeout elapses.
    ///
    /// Every connection is handled on its own task; connections still open
    /// when this returns are aborted.
    pub async fn serve(self, resolver: Arc<CallbackResolver>, cancel: CancellationToken) -> CallbackOutcome {
        let (tx, mut rx) = mpsc::channel::<CallbackOutcome>(1);
        let mut connections = JoinSet::new();

        let accept_loop = async {
            loop {
                tokio::select! {
                    accepted = self.listener.accept() => match accepted {
                        Ok((socket, _)) => {
                            let site_url = self.site_url.clone();
                            let resolver = resolver.clone();
                            let cancel = cancel.child_token();
                            let tx = tx.clone();
                            connections.spawn(async move {
                                if let Err(e) = handle_connection(socket, &site_url, &resolver, cancel, tx).await {
                                    error!(error = %e, "Error handling callback connection");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Accept error");
                            return CallbackOutcome::Failure(CallbackFailure::exception(e.to_string()));
                        }
                    },
                    Some(outcome) = rx.recv() => return outcome,
                    _ = cancel.cancelled() => {
                        return CallbackOutcome::Failure(CallbackFailure::new(callback_codes::CANCELLED, None));
                    }
                }
            }
        };

        let outcome = match tokio::time::timeout(self.timeout, accept_loop).await {
            Ok(outcome) => outcome,
            Err(_) => CallbackOutcome::Failure(CallbackFailure::new(
                callback_codes::TIMEOUT,
                Some("no redirect received from the browser".to_string()),
            )),
        };

        connections.shutdown().await;
        outcome
    }
}

/// Read the request line and drain the headers; nothing in them matters here.
async fn read_request_head(reader: &mut BufReader<ReadHalf<'_>>) -> io::Result<String> {
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    loop {
        let mut header = String::new();
        let read = reader.read_line(&mut header).await?;
        if read == 0 || header.trim().is_empty() {
            break;
        }
    }
    Ok(request_line)
}

/// Answer one request. The relay request reports its outcome on `outcomes`
/// once the result page has been written.
async fn handle_connection(
    mut socket: TcpStream,
    site_url: &Url,
    resolver: &CallbackResolver,
    cancel: CancellationToken,
    outcomes: mpsc::Sender<CallbackOutcome>,
) -> io::Result<()> {
    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader);

    let request_line = match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_head(&mut reader)).await {
        Ok(head) => head?,
        Err(_) => {
            debug!("Closing connection that sent no request");
            return Ok(());
        }
    };
    if request_line.is_empty() {
        return Ok(());
    }

    debug!(request = %request_line.trim(), "Received request");

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return send_response(&mut writer, 400, "Bad Request", "Bad Request").await;
    };
    if method != "GET" {
        return send_response(&mut writer, 405, "Method Not Allowed", "Method Not Allowed").await;
    }

    let Ok(request) = site_url.join(target) else {
        return send_response(&mut writer, 400, "Bad Request", "Bad Request").await;
    };

    match request.path() {
        CALLBACK_PATH => send_response(&mut writer, 200, "OK", RELAY_PAGE).await,
        RELAY_PATH => {
            let outcome = match relayed_url(site_url, &request) {
                Ok(url) => resolver.resolve(&url, cancel).await,
                Err(detail) => CallbackOutcome::Failure(CallbackFailure::exception(detail)),
            };
            let page = match &outcome {
                CallbackOutcome::Success(_) => success_page(),
                CallbackOutcome::Failure(failure) => error_page(failure),
            };
            let written = send_response(&mut writer, 200, "OK", &page).await;
            // A closed receiver means the server already stopped
            let _ = outcomes.send(outcome).await;
            written
        }
        _ => send_response(&mut writer, 404, "Not Found", "Not Found").await,
    }
}

/// Rebuild the redirect URL the provider sent the browser to.
fn relayed_url(site_url: &Url, relay: &Url) -> Result<Url, String> {
    let mut search = None;
    let mut hash = None;
    for (key, value) in relay.query_pairs() {
        match key.as_ref() {
            "search" => search = Some(value.into_owned()),
            "hash" => hash = Some(value.into_owned()),
            _ => {}
        }
    }
    if search.is_none() && hash.is_none() {
        return Err("relay request carried no callback parameters".to_string());
    }

    let mut url = site_url.join(CALLBACK_PATH).map_err(|e| e.to_string())?;
    url.set_query(search.as_deref().filter(|s| !s.is_empty()));
    url.set_fragment(hash.as_deref().filter(|s| !s.is_empty()));
    Ok(url)
}

async fn send_response(
    writer: &mut tokio::net::tcp::WriteHalf<'_>,
    status_code: u16,
    status_text: &str,
    body: &str,
) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_code,
        status_text,
        body.len(),
        body
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await
}

const RELAY_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Signing in...</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
<p>Completing sign-in...</p>
<script>
window.location.replace("/auth/callback/relay?search="
  + encodeURIComponent(window.location.search.slice(1))
  + "&hash=" + encodeURIComponent(window.location.hash.slice(1)));
</script>
</body>
</html>"#;

fn success_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head><title>profile-sync - Signed in</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px; background: #f5f5f5;">
<div style="max-width: 400px; margin: 0 auto; background: white; padding: 40px; border-radius: 8px;">
<h1 style="color: #22c55e;">Signed in with GitHub</h1>
<p style="color: #666;">You can close this window and return to the terminal.</p>
</div>
<script>setTimeout(() => window.close(), 2000);</script>
</body>
</html>"#
        .to_string()
}

fn error_page(failure: &CallbackFailure) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>profile-sync - Sign-in failed</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px; background: #f5f5f5;">
<div style="max-width: 400px; margin: 0 auto; background: white; padding: 40px; border-radius: 8px;">
<h1 style="color: #ef4444;">Sign-in failed</h1>
<p style="color: #666;">Error: {}</p>
<p style="color: #888; font-size: 14px;">You can close this window and try again.</p>
</div>
</body>
</html>"#,
        escape_html(&failure.code)
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
