use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use weft_core::errors::GatewayError;
use weft_core::events::WorkerFrame;
use weft_core::ids::{ConversationId, RequestId};

use crate::api;
use crate::bridge::{RequestContext, ResponseSink};
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CompletionParams {
    /// Preferred conversation id for worker selection.
    #[serde(default)]
    pub auth_id: Option<String>,
}

pub fn error_body(error: &GatewayError) -> Value {
    json!({
        "error": {
            "message": error.to_string(),
            "type": error.wire_type(),
            "code": error.wire_code(),
        }
    })
}

fn error_response(error: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error_body(error))).into_response()
}

/// `POST /v1/chat/completions`. Selects a worker, dispatches the synthesized
/// prompt, and bridges the worker's event stream back as either SSE chunks
/// or one aggregate object.
pub async fn chat_completions(
    State(state): State<AppState>,
    Query(params): Query<CompletionParams>,
    Json(body): Json<Value>,
) -> Response {
    state.metrics.incr_counter("requests_total", 1);

    let request = match api::parse_request(&body) {
        Ok(request) => request,
        Err(error) => {
            state.metrics.incr_counter("requests_rejected_total", 1);
            return error_response(&error);
        }
    };

    let preferred = params.auth_id.as_deref().map(ConversationId::from_raw);
    let Some(tab_id) = state.registry.select(preferred.as_ref()) else {
        state.metrics.incr_counter("requests_no_worker_total", 1);
        return error_response(&GatewayError::NoWorkerAvailable);
    };

    let prompt = api::render_prompt(&request);
    let request_id = RequestId::new();
    let created = Utc::now().timestamp();
    tracing::info!(
        request_id = %request_id,
        tab_id = %tab_id,
        stream = request.stream,
        "dispatching completion"
    );

    if request.stream {
        let (tx, rx) = mpsc::channel(state.config.max_send_queue);
        let context = RequestContext::new(
            request_id,
            tab_id.clone(),
            request.model.clone(),
            created,
            ResponseSink::Stream(tx),
        );
        if let Err(error) = state.table.bind(context) {
            return error_response(&error);
        }
        if !state.links.send(&tab_id, &WorkerFrame::new_chat(prompt)) {
            state.table.unbind(&tab_id);
            return error_response(&GatewayError::NoWorkerAvailable);
        }

        let stream = ReceiverStream::new(rx)
            .map(|item| match item {
                Ok(chunk) => {
                    Event::default().data(serde_json::to_string(&chunk).unwrap_or_default())
                }
                Err(error) => Event::default().data(error_body(&error).to_string()),
            })
            .chain(tokio_stream::once(Event::default().data("[DONE]")))
            .map(Ok::<Event, Infallible>);
        Sse::new(stream).into_response()
    } else {
        let (tx, rx) = oneshot::channel();
        let context = RequestContext::new(
            request_id,
            tab_id.clone(),
            request.model.clone(),
            created,
            ResponseSink::Aggregate(tx),
        );
        if let Err(error) = state.table.bind(context) {
            return error_response(&error);
        }
        if !state.links.send(&tab_id, &WorkerFrame::new_chat(prompt)) {
            state.table.unbind(&tab_id);
            return error_response(&GatewayError::NoWorkerAvailable);
        }

        match rx.await {
            Ok(Ok(completion)) => Json(completion).into_response(),
            Ok(Err(error)) => {
                state.metrics.incr_counter("requests_failed_total", 1);
                error_response(&error)
            }
            Err(_) => error_response(&GatewayError::AdapterInternal(
                "request context dropped without a terminal signal".into(),
            )),
        }
    }
}

/// `GET /v1/models` — the gateway fronts one vendor model.
pub async fn models(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [{
            "id": state.config.advertised_model,
            "object": "model",
            "created": Utc::now().timestamp(),
            "owned_by": "weft",
        }]
    }))
}

/// `GET /health`.
pub async fn health(State(state): State<AppState>) -> Response {
    let workers = state.registry.count();
    let in_flight = state.table.len();
    let status = if workers > 0 { "ok" } else { "degraded" };
    let code = if workers > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "status": status,
            "workers": workers,
            "in_flight": in_flight,
        })),
    )
        .into_response()
}
