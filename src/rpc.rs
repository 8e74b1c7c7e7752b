use crate::models::{BlockRange, LogEntry};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, MiddlewareError, Provider};
use ethers::types::{Address, Filter, H256};
use ethers::utils::keccak256;
use std::sync::Arc;
use thiserror::Error;

/// keccak256("Transfer(address,address,uint256)")
pub fn transfer_topic() -> H256 {
    H256::from(keccak256("Transfer(address,address,uint256)"))
}

/// JSON-RPC code nodes use when a getLogs query would exceed the result cap.
pub const LIMIT_EXCEEDED_CODE: i64 = -32005;

const LIMIT_EXCEEDED_PATTERNS: &[&str] = &[
    "more than 10000 results",
    "query returned more than",
    "response size exceeded",
];

/// Request-shape errors. Retrying the same query elsewhere in the range
/// will not help with any of these.
const MALFORMED_REQUEST_CODES: &[i64] = &[-32600, -32601, -32602];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Too many results for the requested range; shrink and retry.
    RateLimited,
    Transient,
    Fatal,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?} fetch error (code {code:?}): {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub code: Option<i64>,
    pub message: String,
}

impl FetchError {
    /// Classify a node failure once, from its JSON-RPC code (if any) and message.
    pub fn classify(code: Option<i64>, message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        let kind = if code == Some(LIMIT_EXCEEDED_CODE)
            || LIMIT_EXCEEDED_PATTERNS.iter().any(|p| lowered.contains(p))
        {
            FetchErrorKind::RateLimited
        } else if code.is_some_and(|c| MALFORMED_REQUEST_CODES.contains(&c)) {
            FetchErrorKind::Fatal
        } else {
            FetchErrorKind::Transient
        };
        Self { kind, code, message }
    }
}

/// Anything that can answer "give me the Transfer logs in this range".
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn fetch_logs(&self, range: BlockRange) -> Result<Vec<LogEntry>, FetchError>;
}

/// Client handle for one token's Transfer logs on one node.
pub struct RpcLogSource<M> {
    provider: Arc<M>,
    token: Address,
    topic0: H256,
}

impl<M: Middleware> RpcLogSource<M> {
    pub fn new(provider: Arc<M>, token: Address) -> Self {
        Self {
            provider,
            token,
            topic0: transfer_topic(),
        }
    }

    fn filter(&self, range: BlockRange) -> Filter {
        Filter::new()
            .address(self.token)
            .topic0(self.topic0)
            .from_block(range.start)
            .to_block(range.end)
    }
}

#[async_trait]
impl<M: Middleware> LogSource for RpcLogSource<M> {
    async fn fetch_logs(&self, range: BlockRange) -> Result<Vec<LogEntry>, FetchError> {
        let filter = self.filter(range);
        match self.provider.get_logs(&filter).await {
            Ok(logs) => Ok(logs.into_iter().map(LogEntry::from).collect()),
            Err(err) => Err(match err.as_error_response() {
                Some(rpc) => FetchError::classify(Some(rpc.code), rpc.message.clone()),
                None => FetchError::classify(None, err.to_string()),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid RPC url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("node at {url} is unreachable: {reason}")]
    Unreachable { url: String, reason: String },
}

/// Build the HTTP provider and make sure the node answers before any scanning
/// starts. Returns the provider together with the latest block number.
pub async fn connect(url: &str) -> Result<(Arc<Provider<Http>>, u64), ConnectError> {
    let provider = Provider::<Http>::try_from(url).map_err(|e| ConnectError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let latest = provider
        .get_block_number()
        .await
        .map_err(|e| ConnectError::Unreachable {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    log::info!("Connected to node, latest block {}", latest);
    Ok((Arc::new(provider), latest.as_u64()))
}
