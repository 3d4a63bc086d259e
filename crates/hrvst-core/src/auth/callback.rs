//! One-shot localhost responder for the OAuth authorization-code redirect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use reqwest::Url;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::AuthError;

// ============================================================================
// Constants
// ============================================================================

/// The only path the responder answers on
pub const CALLBACK_PATH: &str = "/oauth/callback";

/// Loopback interface the listener binds to
pub const CALLBACK_HOST: &str = "127.0.0.1";

/// How long in-flight callbacks get to finish rendering after teardown
/// starts, before the responder task is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

const SUCCESS_HTML: &str = "<!doctype html><html><head><title>hrvst</title></head>\
<body><h1>Login successful</h1><p>You can close this window and return to the terminal.</p></body></html>";

const FAILURE_HTML: &str = "<!doctype html><html><head><title>hrvst</title></head>\
<body><h1>Login failed</h1><p>Something went wrong with the authorization. \
Check the terminal for details, then run <code>hrvst login</code> again.</p></body></html>";

/// Query parameters of the authorization redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Validate a redirect and extract its code.
    ///
    /// Checked in order: an explicit `error`, then the state, then the
    /// code. With `state_required` unset a redirect without any state is
    /// accepted, but a state that is present still has to match exactly.
    pub fn into_code(self, expected_state: &str, state_required: bool) -> Result<String, AuthError> {
        if let Some(error) = non_empty(self.error) {
            let message = match non_empty(self.error_description) {
                Some(desc) => format!("{} ({})", error, desc),
                None => error,
            };
            return Err(AuthError::AuthorizationDenied(message));
        }

        match self.state.as_deref() {
            Some(state) if state == expected_state => {}
            None if !state_required => {}
            _ => return Err(AuthError::StateMismatch),
        }

        non_empty(self.code).ok_or(AuthError::MissingCode)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse what the user pasted after consenting: the full redirect URL, or
/// just its query string. A redirect carrying neither a code nor an error
/// fails with `MissingCode`.
pub fn parse_redirect_input(input: &str) -> Result<CallbackParams, AuthError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AuthError::MissingCode);
    }

    let params = if input.contains("://") {
        let url =
            Url::parse(input).map_err(|e| AuthError::InvalidUrl(format!("{}: {}", input, e)))?;
        params_from_url(&url)
    } else {
        let query = match input.split_once('?') {
            Some((_, query)) => query,
            None => input,
        };
        parse_query(query)?
    };

    if non_empty(params.code.clone()).is_none() && non_empty(params.error.clone()).is_none() {
        return Err(AuthError::MissingCode);
    }
    Ok(params)
}

/// Decode a raw query string. Repeated parameters keep their first value.
pub fn parse_query(query: &str) -> Result<CallbackParams, AuthError> {
    let url = Url::parse(&format!("http://localhost/?{}", query))
        .map_err(|e| AuthError::InvalidUrl(format!("{}: {}", query, e)))?;
    Ok(params_from_url(&url))
}

fn params_from_url(url: &Url) -> CallbackParams {
    let mut params = CallbackParams::default();
    for (key, value) in url.query_pairs() {
        let slot = match key.as_ref() {
            "code" => &mut params.code,
            "state" => &mut params.state,
            "error" => &mut params.error,
            "error_description" => &mut params.error_description,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.into_owned());
        }
    }
    params
}

#[derive(Clone)]
struct ResponderState {
    expected_state: Arc<str>,
    code_tx: mpsc::Sender<String>,
    error_tx: mpsc::Sender<AuthError>,
}

async fn handle_callback(
    State(state): State<ResponderState>,
    RawQuery(query): RawQuery,
) -> (StatusCode, Html<&'static str>) {
    let outcome = parse_query(query.as_deref().unwrap_or(""))
        .and_then(|params| params.into_code(&state.expected_state, true));
    match outcome {
        Ok(code) => {
            if state.code_tx.try_send(code).is_err() {
                debug!("Ignoring repeated OAuth callback");
            }
            (StatusCode::OK, Html(SUCCESS_HTML))
        }
        Err(err) => {
            warn!(error = %err, "OAuth callback rejected");
            if state.error_tx.try_send(err).is_err() {
                debug!("Ignoring repeated OAuth callback error");
            }
            (StatusCode::BAD_REQUEST, Html(FAILURE_HTML))
        }
    }
}

/// A bound listener plus the responder task serving it.
///
/// The responder lives until `wait` resolves, `shutdown` is called, or the
/// server is dropped, whichever comes first.
pub struct CallbackServer {
    addr: SocketAddr,
    code_rx: mpsc::Receiver<String>,
    error_rx: mpsc::Receiver<AuthError>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind `127.0.0.1:<port>` and start answering callbacks for `expected_state`.
    /// Port 0 picks a free port.
    pub async fn bind(port: u16, expected_state: &str) -> Result<Self, AuthError> {
        let addr = format!("{}:{}", CALLBACK_HOST, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| AuthError::CallbackBind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener
            .local_addr()
            .map_err(|source| AuthError::CallbackBind { addr, source })?;

        let (code_tx, code_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(1);
        let state = ResponderState {
            expected_state: Arc::from(expected_state),
            code_tx,
            error_tx,
        };
        let app = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                warn!(error = %e, "OAuth callback responder failed");
            }
        });
        debug!(addr = %local, "Listening for OAuth callback");

        Ok(Self {
            addr: local,
            code_rx,
            error_rx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Redirect URI pointing at this listener.
    pub fn redirect_uri(&self) -> String {
        redirect_uri(self.port())
    }

    /// Wait for the first of: a code, a callback error, or `deadline`.
    /// The responder is torn down before this returns, on every outcome.
    pub async fn wait(&mut self, deadline: Instant, timeout: Duration) -> Result<String, AuthError> {
        let outcome = tokio::select! {
            Some(code) = self.code_rx.recv() => Ok(code),
            Some(err) = self.error_rx.recv() => Err(err),
            _ = tokio::time::sleep_until(deadline) => Err(AuthError::Timeout(timeout)),
        };
        self.shutdown().await;
        outcome
    }

    /// Stop accepting connections, give in-flight requests a moment to
    /// render their page, then abort the responder.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
            debug!("OAuth callback listener closed");
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// `http://localhost:<port>/oauth/callback`
pub fn redirect_uri(port: u16) -> String {
    format!("http://localhost:{}{}", port, CALLBACK_PATH)
}
