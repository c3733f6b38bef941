/// Typed error taxonomy for the gateway. Every failure is isolated to the
/// owning request; nothing here is retried automatically.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed inbound worker frame. Logged; the connection stays open.
    #[error("malformed worker frame: {0}")]
    TransportParse(String),

    /// Exception while translating one event. Aborts only the owning request.
    #[error("adapter internal error: {0}")]
    AdapterInternal(String),

    /// No connected worker can service the request.
    #[error("no worker connected")]
    NoWorkerAvailable,

    /// Explicit mid-stream failure from the vendor.
    #[error("vendor error ({kind}): {message}")]
    VendorError { kind: String, message: String },

    /// The bound worker disconnected or timed out mid-request.
    #[error("worker {0} evicted")]
    WorkerEvicted(String),

    /// Rejected HTTP request body.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The HTTP caller went away mid-stream.
    #[error("caller disconnected")]
    CallerDisconnected,
}

impl GatewayError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::TransportParse(_) => "transport_parse",
            Self::AdapterInternal(_) => "adapter_internal",
            Self::NoWorkerAvailable => "no_worker",
            Self::VendorError { .. } => "vendor_error",
            Self::WorkerEvicted(_) => "worker_evicted",
            Self::InvalidRequest(_) => "invalid_request",
            Self::CallerDisconnected => "caller_disconnected",
        }
    }

    /// HTTP status the gateway surfaces for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::NoWorkerAvailable => 503,
            _ => 500,
        }
    }

    /// Wire `error.type` field.
    pub fn wire_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::NoWorkerAvailable => "service_unavailable",
            Self::VendorError { .. } => "upstream_error",
            _ => "internal_error",
        }
    }

    /// Wire `error.code` field.
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::TransportParse(_) => "TRANSPORT_PARSE_ERROR",
            Self::AdapterInternal(_) => "ADAPTER_INTERNAL_EXCEPTION",
            Self::NoWorkerAvailable => "NO_WORKER_CONNECTED",
            Self::VendorError { .. } => "VENDOR_STREAM_ERROR",
            Self::WorkerEvicted(_) => "WORKER_EVICTED",
            Self::InvalidRequest(_) => "INVALID_REQUEST_BODY",
            Self::CallerDisconnected => "CALLER_DISCONNECTED",
        }
    }
}
