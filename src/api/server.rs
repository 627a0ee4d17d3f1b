//! API Server Module
//!
//! This module implements a JSON-RPC server in front of the batch executor.
//! It provides an HTTP endpoint that accepts batches of pre-encoded requests,
//! submits them as one transaction and answers with one result per request,
//! or with the aggregate batch error.

use crate::{
    ExecutorError, RawCodec, Request, RequestId, Signer, batch::BatchExecutor,
    config::ApiConfig, correlator::Correlator,
};
use axum::{Json, Router, extract::State, routing::post};
use ethers::types::{Address, Bytes};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Error code for a batch in which at least one request failed
pub const BATCH_FAILED: i32 = -32000;
/// Error code for a transaction the ledger rejected as a whole
pub const TRANSACTION_REJECTED: i32 = -32001;
/// Error code for a finalized transaction whose enqueue events did not match
pub const ENQUEUE_MISMATCH: i32 = -32002;

const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const INTERNAL_ERROR: i32 = -32603;

/// Shared application state that is accessible across all request handlers
///
/// - `executor`: Submits batches and computes their verdicts
/// - `correlator`: Answers reply lookups and reports buffer statistics
#[derive(Clone)]
pub struct AppState {
    executor: Arc<BatchExecutor>,
    correlator: Arc<Correlator>,
}

impl AppState {
    pub fn new(executor: Arc<BatchExecutor>) -> Self {
        let correlator = Arc::clone(executor.correlator());
        Self {
            executor,
            correlator,
        }
    }
}

/// The main API server struct
pub struct Server {
    config: ApiConfig,
    state: AppState,
}

impl Server {
    /// Creates a new API server instance
    ///
    /// # Arguments
    /// * `config` - Address to listen on
    /// * `executor` - Batch executor; its correlator must already be started
    pub fn new(config: ApiConfig, executor: Arc<BatchExecutor>) -> Self {
        Self {
            config,
            state: AppState::new(executor),
        }
    }

    /// Starts the API server and serves until the listener fails
    pub async fn start(self) -> anyhow::Result<()> {
        let app = router(self.state);

        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Router with a single POST endpoint at "/" handling JSON-RPC requests
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(handle_rpc))
        .with_state(state)
}

/// JSON-RPC 2.0 request structure
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
    id: Value,
}

/// JSON-RPC 2.0 response structure
///
/// Either `result` or `error` is populated, never both.
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Value,
}

impl JsonRpcResponse {
    fn result(id: Value, result: Value) -> Json<Self> {
        Json(Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        })
    }

    fn error(id: Value, error: JsonRpcError) -> Json<Self> {
        Json(Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        })
    }
}

/// JSON-RPC error object
///
/// `data` carries structured details, e.g. the failed indices of a batch.
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl JsonRpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_params(e: serde_json::Error) -> Self {
        Self::new(INVALID_PARAMS, format!("Invalid params: {}", e))
    }
}

impl From<ExecutorError<Bytes>> for JsonRpcError {
    fn from(e: ExecutorError<Bytes>) -> Self {
        match e {
            ExecutorError::Batch(batch) => {
                let message = batch.message().to_string();
                let (failed_txs, successes) = batch.into_parts();
                Self {
                    code: BATCH_FAILED,
                    message,
                    data: Some(json!({
                        "failedTxs": failed_txs,
                        "successes": successes,
                    })),
                }
            }
            ExecutorError::TransactionRejected { reason } => {
                Self::new(TRANSACTION_REJECTED, format!("Transaction rejected: {}", reason))
            }
            e @ ExecutorError::EnqueueMismatch { .. } => Self::new(ENQUEUE_MISMATCH, e.to_string()),
            e => Self::new(INTERNAL_ERROR, e.to_string()),
        }
    }
}

/// Parameters of `submitBatch`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBatchParams {
    signer: Address,
    requests: Vec<Request>,
}

/// Parameters of `findReply`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindReplyParams {
    request_id: RequestId,
}

/// Main RPC request handler; routes by method name
async fn handle_rpc(
    State(state): State<AppState>,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    info!("Received RPC request: {}", request.method);

    let outcome = match request.method.as_str() {
        "submitBatch" => handle_submit_batch(&state, request.params).await,
        "findReply" => handle_find_reply(&state, request.params).await,
        "correlatorStats" => handle_correlator_stats(&state).await,
        _ => Err(JsonRpcError::new(METHOD_NOT_FOUND, "Method not found")),
    };

    match outcome {
        Ok(result) => JsonRpcResponse::result(request.id, result),
        Err(e) => JsonRpcResponse::error(request.id, e),
    }
}

/// Handles the "submitBatch" RPC method
///
/// Returns the reply payloads in request order. A batch with failed requests
/// is answered with `BATCH_FAILED` and `data.failedTxs` keyed by index.
async fn handle_submit_batch(state: &AppState, params: Value) -> Result<Value, JsonRpcError> {
    let params: SubmitBatchParams = serde_json::from_value(params).map_err(|e| {
        error!("Failed to deserialize batch: {}", e);
        JsonRpcError::invalid_params(e)
    })?;

    let signer = Signer::new(params.signer);
    info!(
        "Submitting batch of {} requests for {:?}",
        params.requests.len(),
        signer.account
    );

    match state.executor.submit(&signer, &RawCodec, &params.requests).await {
        Ok(results) => Ok(json!(results)),
        Err(e) => {
            warn!("Batch from {:?} failed: {}", signer.account, e);
            Err(e.into())
        }
    }
}

/// Handles the "findReply" RPC method; `null` when no reply is buffered
async fn handle_find_reply(state: &AppState, params: Value) -> Result<Value, JsonRpcError> {
    let params: FindReplyParams =
        serde_json::from_value(params).map_err(JsonRpcError::invalid_params)?;

    let reply = state.correlator.find(params.request_id).await;
    serde_json::to_value(reply).map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string()))
}

async fn handle_correlator_stats(state: &AppState) -> Result<Value, JsonRpcError> {
    let stats = state.correlator.stats().await;
    serde_json::to_value(stats).map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string()))
}
