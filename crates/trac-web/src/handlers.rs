//! Axum handlers bridging HTTP to the request dispatcher

use std::sync::Arc;

use axum::{
    Form,
    body::Body,
    extract::{FromRequest, Query, State},
    http::{self, Method, StatusCode, header},
    response::{IntoResponse, Json},
};
use serde::Serialize;
use serde_json::json;
use tracing::error;
use trac_core::{Result, TracError};
use trac_versioncontrol::Rev;

use crate::ServerState;
use crate::dispatcher::RequestDispatcher;
use crate::environment::Environment;
use crate::request::{Request, Response};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub repository: String,
    pub youngest_rev: Rev,
}

pub async fn health_check(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    let repos = state.env.repository();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        repository: repos.name().to_string(),
        youngest_rev: repos.youngest_rev(),
    })
}

/// Every path other than the API goes through the dispatcher, on a
/// blocking thread since processors use the synchronous pool.
pub async fn dispatch_handler(
    State(state): State<Arc<ServerState>>,
    request: axum::extract::Request,
) -> axum::response::Response {
    let req = match to_trac_request(&state.env, request).await {
        Ok(req) => req,
        Err(e) => return error_response(&state.env, &e),
    };
    let env = Arc::clone(&state.env);
    let outcome =
        tokio::task::spawn_blocking(move || RequestDispatcher::new(&env).dispatch(req)).await;
    match outcome {
        Ok(Ok(res)) => into_http(res),
        Ok(Err(e)) => error_response(&state.env, &e),
        Err(e) => error_response(&state.env, &TracError::Internal(e.to_string())),
    }
}

/// Query string arguments, plus the form body of POST requests.
async fn to_trac_request(env: &Environment, request: axum::extract::Request) -> Result<Request> {
    let (parts, body) = request.into_parts();
    let path = urlencoding::decode(parts.uri.path())
        .map_err(|e| TracError::generic("Bad Request", e.to_string()))?;
    let mut req = Request::new(parts.method.as_str(), path.into_owned());
    req.perm = env.anonymous_permissions();
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            req.headers.insert(name.as_str().to_string(), value.to_string());
        }
    }
    let Query(query) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
        .map_err(|e| TracError::generic("Bad Request", e.body_text()))?;
    req.args.extend(query);

    let is_form = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));
    if parts.method == Method::POST && is_form {
        let request = axum::extract::Request::from_parts(parts, body);
        let Form(form) = Form::<Vec<(String, String)>>::from_request(request, &())
            .await
            .map_err(|e| TracError::generic("Bad Request", e.body_text()))?;
        req.args.extend(form);
    }
    Ok(req)
}

fn into_http(res: Response) -> axum::response::Response {
    let mut builder = http::Response::builder().status(res.status);
    for (name, value) in &res.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(res.body))
        .unwrap_or_else(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response())
}

/// Render an error page carrying the error's status.
pub fn error_response(env: &Environment, err: &TracError) -> axum::response::Response {
    error!("{:?}", err);
    let data = json!({
        "title": err.title(),
        "message": err.to_string(),
        "status": err.status(),
    });
    let mut res = Response {
        status: err.status(),
        ..Response::default()
    };
    if let Err(e) = res.render(env.renderer(), "error.html", &data) {
        error!("Unable to render error page: {:?}", e);
        res.send("text/plain;charset=utf-8", err.to_string().into_bytes());
    }
    into_http(res)
}
