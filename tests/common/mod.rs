//! Shared test infrastructure for integration tests
//!
//! Provides a scriptable licensing endpoint on a loopback port and a
//! logout handler that records every invocation.

#![allow(dead_code)]

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use console_warden::session::{LogoutHandler, LogoutReason};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Logout capability that records the reasons it was asked to act on.
#[derive(Default)]
pub struct RecordingLogout {
    reasons: Mutex<Vec<LogoutReason>>,
}

impl RecordingLogout {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reasons(&self) -> Vec<LogoutReason> {
        self.reasons.lock().clone()
    }
}

impl LogoutHandler for RecordingLogout {
    fn request_logout(&self, reason: LogoutReason) {
        self.reasons.lock().push(reason);
    }
}

/// What the scripted licensing endpoint answers with.
#[derive(Debug, Clone)]
pub enum Reply {
    Licensed { access_token: Option<String> },
    Denied,
    ServerError,
    GarbageBody,
}

#[derive(Clone)]
struct ServerState {
    hits: Arc<AtomicUsize>,
    reply: Arc<Mutex<Reply>>,
    last_query: Arc<Mutex<Option<String>>>,
}

/// A real licensing endpoint bound to a loopback port.
pub struct LicenseServer {
    /// Full check URL, e.g. `http://127.0.0.1:<port>/check`.
    pub url: String,
    hits: Arc<AtomicUsize>,
    reply: Arc<Mutex<Reply>>,
    last_query: Arc<Mutex<Option<String>>>,
}

impl LicenseServer {
    pub async fn spawn(initial: Reply) -> Self {
        let state = ServerState {
            hits: Arc::new(AtomicUsize::new(0)),
            reply: Arc::new(Mutex::new(initial)),
            last_query: Arc::new(Mutex::new(None)),
        };

        let app = Router::new()
            .route("/check", get(check_handler))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("http://{addr}/check"),
            hits: state.hits,
            reply: state.reply,
            last_query: state.last_query,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock() = reply;
    }

    /// Raw query string of the most recent check request.
    pub fn last_query(&self) -> Option<String> {
        self.last_query.lock().clone()
    }
}

async fn check_handler(State(state): State<ServerState>, RawQuery(query): RawQuery) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    *state.last_query.lock() = query;

    let reply = state.reply.lock().clone();
    match reply {
        Reply::Licensed { access_token } => {
            let mut body = json!({ "licensed": true });
            if let Some(token) = access_token {
                body["accessToken"] = json!(token);
            }
            axum::Json(body).into_response()
        }
        Reply::Denied => axum::Json(json!({ "licensed": false })).into_response(),
        Reply::ServerError => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        Reply::GarbageBody => (
            StatusCode::OK,
            [("content-type", "application/json")],
            "][ definitely not json",
        )
            .into_response(),
    }
}
