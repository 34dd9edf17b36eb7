//! Line-delimited JSON requests and replies
//!
//! ```text
//! {"op":"start","service":"db"}                      → {"ok":true,"state":{..}}
//! {"op":"add-alert","service":"db","alert_id":"a1"}  → {"ok":true,"state":{..}}
//! {"op":"ack","service":"db","responder":"bob"}      → {"ok":true,"state":{..}}
//! {"op":"resolve","service":"db","responder":"bob"}  → {"ok":true,"state":{..}}
//! {"op":"state","service":"db"}                      → {"ok":true,"state":{..}}
//! anything that fails                                 → {"ok":false,"error":"..","code":".."}
//! ```

use incident_coordination::{Command, IncidentError, IncidentRegistry, IncidentState};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Malformed request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Incident(#[from] IncidentError),
}

impl RequestError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "MALFORMED_REQUEST",
            Self::Incident(e) => e.code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Request {
    Start { service: String },
    AddAlert { service: String, alert_id: String },
    Ack { service: String, responder: String },
    Resolve { service: String, responder: String },
    State { service: String },
}

impl Request {
    fn op(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::AddAlert { .. } => "add-alert",
            Self::Ack { .. } => "ack",
            Self::Resolve { .. } => "resolve",
            Self::State { .. } => "state",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<IncidentState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl Reply {
    fn ok(state: IncidentState) -> Self {
        Self {
            ok: true,
            state: Some(state),
            error: None,
            code: None,
        }
    }

    fn err(error: &RequestError) -> Self {
        Self {
            ok: false,
            state: None,
            error: Some(error.to_string()),
            code: Some(error.code()),
        }
    }
}

/// Parse one input line and carry it out against the registry.
pub async fn handle_line(registry: &IncidentRegistry, line: &str) -> Reply {
    match process(registry, line).await {
        Ok(state) => Reply::ok(state),
        Err(e) => {
            warn!(code = e.code(), error = %e, "Request failed");
            Reply::err(&e)
        }
    }
}

async fn process(registry: &IncidentRegistry, line: &str) -> Result<IncidentState, RequestError> {
    let request: Request = serde_json::from_str(line)?;
    debug!(op = request.op(), "Request received");

    let state = match request {
        Request::Start { service } => registry.start(&service).await?.query(),
        Request::AddAlert { service, alert_id } => {
            registry
                .execute(&service, Command::AddAlert { alert_id })
                .await?
        }
        Request::Ack { service, responder } => {
            registry.execute(&service, Command::Ack { responder }).await?
        }
        Request::Resolve { service, responder } => {
            registry
                .execute(&service, Command::Resolve { responder })
                .await?
        }
        Request::State { service } => registry.query(&service).await?,
    };
    Ok(state)
}
