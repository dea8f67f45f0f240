//! Method admission policy.
//!
//! The policy is plain immutable data handed to every request context. Deployments that
//! need more methods extend the whitelist through `[methods] allow` instead of editing
//! the sets below.

use crate::config::BackendConfig;
use ahash::AHashSet;

/// Methods every backend serves.
pub const WHITELISTED_METHODS: &[&str] = &[
    "eth_blobBaseFee",
    "eth_blockNumber",
    "eth_call",
    "eth_callMany",
    "eth_chainId",
    "eth_estimateGas",
    "eth_feeHistory",
    "eth_gasPrice",
    "eth_getAccount",
    "eth_getBalance",
    "eth_getBlockByHash",
    "eth_getBlockByNumber",
    "eth_getBlockReceipts",
    "eth_getBlockTransactionCountByHash",
    "eth_getBlockTransactionCountByNumber",
    "eth_getCode",
    "eth_getLogs",
    "eth_getProof",
    "eth_getStorageAt",
    "eth_getTransactionByBlockHashAndIndex",
    "eth_getTransactionByBlockNumberAndIndex",
    "eth_getTransactionByHash",
    "eth_getTransactionCount",
    "eth_getTransactionReceipt",
    "eth_getUncleCountByBlockHash",
    "eth_getUncleCountByBlockNumber",
    "eth_maxPriorityFeePerGas",
    "eth_simulateV1",
    "eth_syncing",
    "eth_sendRawTransaction",
    "net_version",
    "web3_clientVersion",
    "web3_sha3",
];

/// Methods served only by backends with `trace = true`.
pub const TRACE_METHODS: &[&str] = &[
    "trace_block",
    "trace_call",
    "trace_callMany",
    "trace_filter",
    "trace_rawTransaction",
    "trace_replayBlockTransactions",
    "trace_replayTransaction",
    "trace_transaction",
    "debug_getBadBlocks",
    "debug_storageRangeAt",
    "debug_getTrieFlushInterval",
    "debug_traceBlock",
    "debug_traceBlockByHash",
    "debug_traceBlockByNumber",
    "debug_traceCall",
    "debug_traceTransaction",
];

/// Installable-filter methods, served only by backends with `filter = true`.
pub const FILTER_METHODS: &[&str] = &[
    "eth_getFilterChanges",
    "eth_getFilterLogs",
    "eth_newBlockFilter",
    "eth_newFilter",
    "eth_newPendingTransactionFilter",
    "eth_uninstallFilter",
];

/// Methods whose block span is checked against `max_block_range`.
pub const RANGE_METHODS: &[&str] = &["eth_getLogs", "eth_newFilter"];

/// Methods that only make sense on a persistent connection.
pub const SUBSCRIBE_METHODS: &[&str] = &["eth_subscribe", "eth_unsubscribe"];

/// Which methods a request context may forward.
#[derive(Debug, Clone)]
pub struct MethodPolicy {
    whitelist: AHashSet<String>,
    trace: AHashSet<String>,
    filter: AHashSet<String>,
    range: AHashSet<String>,
    subscribe: AHashSet<String>,
}

fn to_set(methods: &[&str]) -> AHashSet<String> {
    methods.iter().map(|m| (*m).to_string()).collect()
}

impl Default for MethodPolicy {
    fn default() -> Self {
        Self {
            whitelist: to_set(WHITELISTED_METHODS),
            trace: to_set(TRACE_METHODS),
            filter: to_set(FILTER_METHODS),
            range: to_set(RANGE_METHODS),
            subscribe: to_set(SUBSCRIBE_METHODS),
        }
    }
}

impl MethodPolicy {
    /// Default policy with `extra` added to the whitelist.
    #[must_use]
    pub fn with_extra_methods<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut policy = Self::default();
        policy.whitelist.extend(extra.into_iter().map(Into::into));
        policy
    }

    /// Whether `method` may be forwarded to `backend`.
    #[must_use]
    pub fn is_allowed(&self, method: &str, backend: &BackendConfig, supports_subscribe: bool) -> bool {
        self.whitelist.contains(method)
            || (backend.trace && self.trace.contains(method))
            || (backend.filter && self.filter.contains(method))
            || (supports_subscribe && self.subscribe.contains(method))
    }

    #[must_use]
    pub fn is_range_sensitive(&self, method: &str) -> bool {
        self.range.contains(method)
    }
}
