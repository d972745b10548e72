//! JSON-RPC 2.0 protocol loop over stdio.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use crate::engine::{NewComment, NewTopic};
use crate::error::EngineError;
use crate::storage::NodeType;

use super::SharedState;

/// RPC error code for validation failures.
pub const CODE_VALIDATION: i32 = -32001;
/// RPC error code for missing topics/summaries/comments.
pub const CODE_NOT_FOUND: i32 = -32002;
/// RPC error code for submissions against a locked topic.
pub const CODE_LOCKED: i32 = -32003;
/// RPC error code for everything else.
pub const CODE_INTERNAL: i32 = -32603;

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier.
    pub id: Value,
    /// The result on success (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code (negative for predefined errors).
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Map an engine error onto the RPC error taxonomy.
    pub fn from_engine_error(id: Option<Value>, e: &EngineError) -> Self {
        Self::error(id, rpc_code(e), e.to_string())
    }
}

/// RPC code for each engine error class.
fn rpc_code(e: &EngineError) -> i32 {
    match e {
        EngineError::Validation { .. } => CODE_VALIDATION,
        EngineError::NotFound { .. } => CODE_NOT_FOUND,
        EngineError::TopicLocked { .. } => CODE_LOCKED,
        _ => CODE_INTERNAL,
    }
}

/// Parameters for `topics.tree` and `topics.stats`.
#[derive(Debug, Deserialize)]
struct TopicParams {
    topic_id: String,
}

/// Parameters for `loops.status`.
#[derive(Debug, Deserialize)]
struct LoopStatusParams {
    node_id: String,
    node_type: NodeType,
}

/// Parameters for `topics.list`.
#[derive(Debug, Deserialize)]
struct ListTopicsParams {
    #[serde(default = "default_list_limit")]
    limit: i64,
}

fn default_list_limit() -> i64 {
    50
}

/// JSON-RPC server running over stdio.
///
/// Reads line-delimited requests from stdin and writes line-delimited
/// responses to stdout; logs go to stderr so the protocol stream stays
/// clean.
pub struct RpcServer {
    state: SharedState,
}

impl RpcServer {
    /// Create a new RPC server
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Run the server using async stdio
    pub async fn run(&self) -> std::io::Result<()> {
        info!("Parliament loop server starting...");

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            // EOF reached
            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!(request = %trimmed, "Received request");

            let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    error!(error = %e, "Failed to parse request");
                    Some(JsonRpcResponse::error(
                        None,
                        -32700,
                        format!("Parse error: {}", e),
                    ))
                }
            };

            // Only send a response for requests, not notifications
            if let Some(response) = response {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "Sending response");

                stdout.write_all(response_json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle a single JSON-RPC request.
    /// Returns None for notifications (requests without id).
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        let response = match request.method.as_str() {
            "topics.create" => self.handle_create_topic(request.id, request.params).await,
            "topics.list" => self.handle_list_topics(request.id, request.params).await,
            "topics.tree" => self.handle_tree(request.id, request.params).await,
            "topics.stats" => self.handle_stats(request.id, request.params).await,
            "comments.submit" => self.handle_submit(request.id, request.params).await,
            "loops.status" => self.handle_loop_status(request.id, request.params).await,
            "ping" => JsonRpcResponse::success(request.id, Value::Object(Default::default())),
            method => {
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    return None;
                }
                error!(method = %method, "Unknown method");
                JsonRpcResponse::error(request.id, -32601, format!("Method not found: {}", method))
            }
        };

        if is_notification {
            None
        } else {
            Some(response)
        }
    }

    async fn handle_create_topic(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let request: NewTopic = match parse_params(params) {
            Ok(p) => p,
            Err(message) => return JsonRpcResponse::error(id, -32602, message),
        };

        match self.state.intake.create_topic(request).await {
            Ok(topic) => JsonRpcResponse::success(id, json!({ "topic": topic })),
            Err(e) => JsonRpcResponse::from_engine_error(id, &e),
        }
    }

    async fn handle_list_topics(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let request: ListTopicsParams = match params {
            None => ListTopicsParams {
                limit: default_list_limit(),
            },
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e)),
            },
        };

        match self.state.intake.list_topics(request.limit).await {
            Ok(topics) => JsonRpcResponse::success(id, json!({ "topics": topics })),
            Err(e) => JsonRpcResponse::from_engine_error(id, &e),
        }
    }

    async fn handle_submit(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let request: NewComment = match parse_params(params) {
            Ok(p) => p,
            Err(message) => return JsonRpcResponse::error(id, -32602, message),
        };

        match self.state.intake.submit(request).await {
            Ok(outcome) => JsonRpcResponse::success(
                id,
                json!({
                    "comment": outcome.comment,
                    "triggered": outcome.triggered,
                    "loop_status": outcome.loop_status,
                }),
            ),
            Err(e) => JsonRpcResponse::from_engine_error(id, &e),
        }
    }

    async fn handle_loop_status(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let request: LoopStatusParams = match parse_params(params) {
            Ok(p) => p,
            Err(message) => return JsonRpcResponse::error(id, -32602, message),
        };

        match self
            .state
            .evaluator
            .status(&request.node_id, request.node_type)
            .await
        {
            Ok(status) => JsonRpcResponse::success(id, json!({ "loop_status": status })),
            Err(e) => JsonRpcResponse::from_engine_error(id, &e),
        }
    }

    async fn handle_tree(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let request: TopicParams = match parse_params(params) {
            Ok(p) => p,
            Err(message) => return JsonRpcResponse::error(id, -32602, message),
        };

        match self.state.aggregator.get_tree(&request.topic_id).await {
            Ok(tree) => JsonRpcResponse::success(id, json!({ "tree": tree })),
            Err(e) => JsonRpcResponse::from_engine_error(id, &e),
        }
    }

    async fn handle_stats(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let request: TopicParams = match parse_params(params) {
            Ok(p) => p,
            Err(message) => return JsonRpcResponse::error(id, -32602, message),
        };

        match self.state.aggregator.tree_stats(&request.topic_id).await {
            Ok(stats) => JsonRpcResponse::success(id, json!({ "stats": stats })),
            Err(e) => JsonRpcResponse::from_engine_error(id, &e),
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, String> {
    match params {
        Some(p) => serde_json::from_value(p).map_err(|e| format!("Invalid params: {}", e)),
        None => Err("Missing params".to_string()),
    }
}
