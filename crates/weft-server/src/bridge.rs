use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use weft_adapter::StreamAdapter;
use weft_core::chunks::{ChatCompletion, ChatCompletionChunk, TargetChunk};
use weft_core::errors::GatewayError;
use weft_core::events::StreamEvent;
use weft_core::ids::{RequestId, TabId};

/// Where a request's chunks go: straight onto a chunked response, or held
/// until the terminal signal releases one aggregate object.
pub enum ResponseSink {
    Stream(mpsc::Sender<Result<ChatCompletionChunk, GatewayError>>),
    Aggregate(oneshot::Sender<Result<ChatCompletion, GatewayError>>),
}

/// One in-flight completion request: exactly one adapter, one worker, one
/// sink. Created at dispatch, destroyed at the terminal signal.
pub struct RequestContext {
    pub id: RequestId,
    pub tab_id: TabId,
    pub model: String,
    pub created: i64,
    pub adapter: StreamAdapter,
    sink: ResponseSink,
}

impl RequestContext {
    pub fn new(id: RequestId, tab_id: TabId, model: String, created: i64, sink: ResponseSink) -> Self {
        Self {
            id,
            tab_id,
            model,
            created,
            adapter: StreamAdapter::new(),
            sink,
        }
    }

    /// Deliver one chunk. Returns false once the caller is gone.
    fn push(&mut self, chunk: TargetChunk) -> bool {
        match &self.sink {
            ResponseSink::Stream(tx) => {
                let model = self
                    .adapter
                    .state()
                    .model
                    .clone()
                    .unwrap_or_else(|| self.model.clone());
                let wire = chunk.into_wire(&self.id, &model, self.created);
                match tx.try_send(Ok(wire)) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(request_id = %self.id, "chunk channel full, dropping chunk");
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            }
            // Aggregate requests read the final MessageState instead; the
            // chunk already mutated it.
            ResponseSink::Aggregate(_) => true,
        }
    }

    /// Terminal signal: completion.
    fn finish(self) {
        let Self {
            id,
            model,
            created,
            adapter,
            sink,
            ..
        } = self;
        match sink {
            // Dropping the sender ends the chunk stream; the HTTP layer
            // appends the end marker.
            ResponseSink::Stream(_) => {}
            ResponseSink::Aggregate(tx) => {
                let completion = adapter.into_completion(&id, &model, created);
                let _ = tx.send(Ok(completion));
            }
        }
    }

    /// Terminal signal: error.
    fn abort(self, error: GatewayError) {
        match self.sink {
            ResponseSink::Stream(tx) => {
                let _ = tx.try_send(Err(error));
            }
            ResponseSink::Aggregate(tx) => {
                let _ = tx.send(Err(error));
            }
        }
    }
}

/// In-flight requests keyed by the worker tab bound to them. One completion
/// per tab at a time; both terminal signals are idempotent and deregister
/// the entry.
#[derive(Default)]
pub struct RequestTable {
    active: DashMap<TabId, RequestContext>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the context's worker. Refused while another request holds it.
    pub fn bind(&self, context: RequestContext) -> Result<(), GatewayError> {
        match self.active.entry(context.tab_id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(tab_id = %context.tab_id, "worker already serving a request");
                Err(GatewayError::NoWorkerAvailable)
            }
            Entry::Vacant(slot) => {
                slot.insert(context);
                Ok(())
            }
        }
    }

    /// Remove a binding without signaling its sink (dispatch never happened).
    pub fn unbind(&self, tab_id: &TabId) -> Option<RequestContext> {
        self.active.remove(tab_id).map(|(_, context)| context)
    }

    /// Feed one worker event through the bound request's adapter.
    pub fn handle_event(&self, tab_id: &TabId, event: &StreamEvent) {
        let Some(mut context) = self.active.get_mut(tab_id) else {
            tracing::debug!(
                tab_id = %tab_id,
                event = event.event_type(),
                "stream event with no bound request dropped"
            );
            return;
        };

        let chunks = match context.adapter.process(event) {
            Ok(chunks) => chunks,
            Err(fault) => {
                drop(context);
                self.fail(tab_id, fault);
                return;
            }
        };

        let mut finished = false;
        let mut caller_gone = false;
        for chunk in chunks {
            let terminal = chunk.is_terminal();
            if !context.push(chunk) {
                caller_gone = true;
                break;
            }
            if terminal {
                finished = true;
            }
        }
        drop(context);

        if finished {
            self.complete(tab_id);
        } else if caller_gone {
            self.fail(tab_id, GatewayError::CallerDisconnected);
        }
    }

    /// Terminal signal: the message completed. Idempotent.
    pub fn complete(&self, tab_id: &TabId) {
        if let Some((_, context)) = self.active.remove(tab_id) {
            tracing::debug!(request_id = %context.id, tab_id = %tab_id, "request completed");
            context.finish();
        }
    }

    /// Terminal signal: the request failed. Idempotent.
    pub fn fail(&self, tab_id: &TabId, error: GatewayError) {
        if let Some((_, context)) = self.active.remove(tab_id) {
            tracing::warn!(
                request_id = %context.id,
                tab_id = %tab_id,
                error = %error,
                kind = error.error_kind(),
                "request failed"
            );
            context.abort(error);
        }
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
