//! JSON-RPC transport: [JsonRpcNode] (HTTP calls, receipts, log streams) and [RpcWallet].
//!
//! Log streams follow the contract over WebSocket (`eth_subscribe("logs")`) when a WS URL is
//! configured, with an eth_getLogs backfill of the gap after every reconnect. Without a WS URL
//! they poll eth_getLogs from the tip observed at open time.

use crate::abi::{format_address, parse_address, parse_b256, parse_hex_bytes, parse_hex_u64};
use crate::config::{ClientConfig, ReconnectionConfig, TransportConfig};
use crate::cursor::Cursor;
use crate::error::NodeError;
use crate::node::{CallRequest, LogStream, Node, Simulation, TransactionReceipt, TxHash, Wallet};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const LOG_CHANNEL_CAPACITY: usize = 64;
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Methods that change node state; never retried.
const NON_IDEMPOTENT: &[&str] = &["eth_sendTransaction", "eth_sendRawTransaction"];

/// HTTP JSON-RPC client. Transport failures (connect, timeout, 5xx/429) of read methods are
/// retried `retry_count` times; JSON-RPC error objects are returned as-is.
#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    retry_count: u32,
    retry_delay: Duration,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, transport: &TransportConfig) -> Result<Self, NodeError> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(transport.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
            retry_count: transport.retry_count,
            retry_delay: Duration::from_millis(transport.retry_delay_ms),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, NodeError> {
        if NON_IDEMPOTENT.contains(&method) {
            return self.request_once(method, params).await;
        }
        let mut attempt = 0;
        loop {
            match self.request_once(method, params.clone()).await {
                Err(NodeError::Transport(reason)) if attempt < self.retry_count => {
                    attempt += 1;
                    tracing::debug!(method, attempt, %reason, "transport error, retrying");
                    sleep(self.retry_delay).await;
                }
                other => return other,
            }
        }
    }

    async fn request_once(&self, method: &str, params: Value) -> Result<Value, NodeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        let resp = self.http.post(&self.url).json(&body).send().await?;
        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(NodeError::Transport(format!("HTTP {}", status)));
        }
        let json: Value = resp.json().await?;
        if let Some(err) = json.get("error") {
            return Err(rpc_error(err));
        }
        json.get("result")
            .cloned()
            .ok_or_else(|| NodeError::Decode("Missing result".into()))
    }

    pub async fn block_number(&self) -> Result<u64, NodeError> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        parse_quantity(&result)
    }

    pub async fn chain_id(&self) -> Result<u64, NodeError> {
        let result = self.request("eth_chainId", json!([])).await?;
        parse_quantity(&result)
    }

    async fn get_logs(&self, filter: Value) -> Result<Vec<Value>, NodeError> {
        let result = self.request("eth_getLogs", json!([filter])).await?;
        result
            .as_array()
            .cloned()
            .ok_or_else(|| NodeError::Decode("getLogs not array".into()))
    }
}

fn rpc_error(err: &Value) -> NodeError {
    let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
    let message = err
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());
    NodeError::Rpc { code, message }
}

fn parse_quantity(v: &Value) -> Result<u64, NodeError> {
    let s = v
        .as_str()
        .ok_or_else(|| NodeError::Decode(format!("quantity not string: {}", v)))?;
    Ok(parse_hex_u64(s)?)
}

fn call_object(request: &CallRequest, gas: Option<u64>) -> Value {
    let mut call = json!({
        "from": format_address(&request.from),
        "to": format_address(&request.to),
        "data": format!("0x{}", hex::encode(&request.data)),
    });
    if let Some(gas) = gas {
        call["gas"] = Value::String(format!("0x{:x}", gas));
    }
    call
}

fn build_logs_filter(
    address: &Address,
    topic0: Option<&B256>,
    from_block: Option<u64>,
    to_block: Option<u64>,
) -> Value {
    let mut filter = json!({
        "address": format_address(address),
    });
    // Single-topic filter: [topic0] only (some nodes reject [topic0, null, null, null]).
    if let Some(t0) = topic0 {
        filter["topics"] = json!([format!("0x{}", hex::encode(t0))]);
    }
    if let Some(from) = from_block {
        filter["fromBlock"] = Value::String(format!("0x{:x}", from));
    }
    if let Some(to) = to_block {
        filter["toBlock"] = Value::String(format!("0x{:x}", to));
    }
    filter
}

/// Whether a raw log belongs to `address` and carries `topic0`. Used when the node could not
/// filter server-side.
fn log_matches(log: &Value, address: &Address, topic0: &B256) -> bool {
    let addr = log
        .get("address")
        .and_then(|a| a.as_str())
        .and_then(|a| parse_address(a).ok());
    let t0 = log
        .get("topics")
        .and_then(|t| t.as_array())
        .and_then(|t| t.first())
        .and_then(|t| t.as_str())
        .and_then(|t| parse_b256(t).ok());
    addr.as_ref() == Some(address) && t0.as_ref() == Some(topic0)
}

fn is_removed(log: &Value) -> bool {
    log.get("removed").and_then(|r| r.as_bool()).unwrap_or(false)
}

fn log_block_number(log: &Value) -> Option<u64> {
    log.get("blockNumber")
        .and_then(|n| n.as_str())
        .and_then(|n| parse_hex_u64(n).ok())
}

/// `(blockNumber, logIndex)` of a mined log.
fn log_position(log: &Value) -> Option<(u64, u64)> {
    let index = log
        .get("logIndex")
        .and_then(|i| i.as_str())
        .and_then(|i| parse_hex_u64(i).ok())?;
    Some((log_block_number(log)?, index))
}

/// Drop logs the cursor has already handed over. Logs without a position are kept.
fn undelivered(cursor: &Cursor, logs: Vec<Value>) -> Vec<Value> {
    logs.into_iter()
        .filter(|log| match log_position(log) {
            Some((block, index)) => !cursor.is_delivered(block, index),
            None => true,
        })
        .collect()
}

/// Receipt fields we care about: inclusion block, status, gas used. `None` while pending.
fn parse_receipt(tx_hash: TxHash, v: &Value) -> Result<Option<TransactionReceipt>, NodeError> {
    if v.is_null() {
        return Ok(None);
    }
    let block_number = match v.get("blockNumber") {
        Some(Value::Null) | None => return Ok(None),
        Some(n) => parse_quantity(n)?,
    };
    // Pre-Byzantium receipts have no status; inclusion means success.
    let success = match v.get("status") {
        Some(Value::Null) | None => true,
        Some(s) => parse_quantity(s)? == 1,
    };
    let gas_used = match v.get("gasUsed") {
        Some(g) if !g.is_null() => Some(parse_quantity(g)?),
        _ => None,
    };
    Ok(Some(TransactionReceipt {
        tx_hash,
        block_number,
        gas_used,
        success,
    }))
}

/// Defines when an included transaction counts as final given the current chain tip.
pub trait FinalityStrategy: Send + Sync {
    fn is_final(&self, inclusion_block: u64, tip: u64) -> bool;
}

/// Confirmation-depth strategy: final when `tip >= inclusion_block + K` (K = 0: included).
#[derive(Debug, Clone)]
pub struct ConfirmationDepth(pub u64);

impl FinalityStrategy for ConfirmationDepth {
    fn is_final(&self, inclusion_block: u64, tip: u64) -> bool {
        tip >= inclusion_block.saturating_add(self.0)
    }
}

/// JSON-RPC implementation of [Node].
pub struct JsonRpcNode {
    rpc: RpcClient,
    ws_url: Option<String>,
    chain_id: u64,
    finality: Box<dyn FinalityStrategy>,
    poll_interval: Duration,
    getlogs_max_range: u64,
    reconnection: ReconnectionConfig,
}

impl JsonRpcNode {
    pub fn new(config: &ClientConfig) -> Result<Self, NodeError> {
        Ok(Self {
            rpc: RpcClient::new(config.http_url.clone(), &config.transport)?,
            ws_url: config.ws_url.clone(),
            chain_id: config.chain_id,
            finality: Box::new(ConfirmationDepth(config.confirmations)),
            poll_interval: config.poll_interval(),
            getlogs_max_range: config.getlogs_max_range.max(1),
            reconnection: config.reconnection.clone(),
        })
    }

    /// Replace the finality strategy (default: [ConfirmationDepth] from the config).
    pub fn with_finality(mut self, strategy: impl FinalityStrategy + 'static) -> Self {
        self.finality = Box::new(strategy);
        self
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    async fn eth_call(&self, call: Value) -> Result<Vec<u8>, NodeError> {
        let result = self.rpc.request("eth_call", json!([call, "latest"])).await?;
        let s = result
            .as_str()
            .ok_or_else(|| NodeError::Decode("eth_call result not string".into()))?;
        Ok(parse_hex_bytes(s)?)
    }

    fn log_fetcher(&self, address: Address, topic0: B256) -> LogFetcher {
        LogFetcher {
            rpc: self.rpc.clone(),
            address,
            topic0,
            max_range: self.getlogs_max_range,
        }
    }
}

#[async_trait]
impl Node for JsonRpcNode {
    async fn read_contract(&self, to: Address, calldata: Vec<u8>) -> Result<Vec<u8>, NodeError> {
        self.eth_call(json!({
            "to": format_address(&to),
            "data": format!("0x{}", hex::encode(calldata)),
        }))
        .await
    }

    async fn simulate(&self, request: CallRequest) -> Result<Simulation, NodeError> {
        let call = call_object(&request, None);
        // Return value unused; a revert here carries the reason.
        self.eth_call(call.clone()).await?;
        let gas = parse_quantity(&self.rpc.request("eth_estimateGas", json!([call])).await?)?;
        tracing::debug!(gas, "simulation succeeded");
        Ok(Simulation {
            request,
            gas: Some(gas),
        })
    }

    async fn broadcast(&self, simulation: &Simulation) -> Result<TxHash, NodeError> {
        let actual = self.rpc.chain_id().await?;
        if actual != self.chain_id {
            return Err(NodeError::WrongChain {
                expected: self.chain_id,
                actual,
            });
        }
        let tx = call_object(&simulation.request, simulation.gas);
        let result = self.rpc.request("eth_sendTransaction", json!([tx])).await?;
        let s = result
            .as_str()
            .ok_or_else(|| NodeError::Decode("tx hash not string".into()))?;
        Ok(parse_b256(s)?)
    }

    async fn wait_for_finality(&self, tx_hash: TxHash) -> Result<TransactionReceipt, NodeError> {
        let hash_hex = format!("0x{}", hex::encode(tx_hash));
        loop {
            let result = self
                .rpc
                .request("eth_getTransactionReceipt", json!([hash_hex]))
                .await?;
            if let Some(receipt) = parse_receipt(tx_hash, &result)? {
                if !receipt.success {
                    return Err(NodeError::Reverted(tx_hash));
                }
                let tip = self.rpc.block_number().await?;
                if self.finality.is_final(receipt.block_number, tip) {
                    return Ok(receipt);
                }
                tracing::debug!(tx = %hash_hex, block = receipt.block_number, tip, "waiting for confirmations");
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn subscribe_logs(&self, address: Address, topic0: B256) -> Result<LogStream, NodeError> {
        let (tx, mut rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        match &self.ws_url {
            Some(ws_url) => {
                let tip = self.rpc.block_number().await?;
                let conn = WsLogConnection::connect(ws_url, &address, &topic0).await?;
                let follower = WsFollower {
                    ws_url: ws_url.clone(),
                    fetcher: self.log_fetcher(address, topic0),
                    cursor: Cursor::new(tip),
                    reconnection: self.reconnection.clone(),
                };
                tokio::spawn(follower.run(conn, tx));
            }
            None => {
                let tip = self.rpc.block_number().await?;
                let poller = LogPoller {
                    fetcher: self.log_fetcher(address, topic0),
                    cursor: Cursor::new(tip),
                    interval: self.poll_interval,
                };
                tokio::spawn(poller.run(tx));
            }
        }
        Ok(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }
}

/// eth_getLogs over a block range, chunked by `max_range`.
struct LogFetcher {
    rpc: RpcClient,
    address: Address,
    topic0: B256,
    max_range: u64,
}

impl LogFetcher {
    /// Send logs for `cursor.next_block()..=to_block` in chunk-sized batches, advancing the cursor.
    /// Logs of a partly delivered block that were already sent are skipped.
    /// Returns false once the receiver is gone.
    async fn backfill(
        &self,
        cursor: &mut Cursor,
        to_block: u64,
        tx: &mpsc::Sender<Vec<Value>>,
    ) -> Result<bool, NodeError> {
        let mut from = cursor.next_block();
        while from <= to_block {
            let to = from.saturating_add(self.max_range - 1).min(to_block);
            let logs = undelivered(cursor, self.fetch(from, to).await?);
            if !logs.is_empty() {
                tracing::debug!(count = logs.len(), from, to, "fetched logs");
                if tx.send(logs).await.is_err() {
                    return Ok(false);
                }
            }
            cursor.advance_to(to);
            from = to + 1;
        }
        Ok(true)
    }

    async fn fetch(&self, from: u64, to: u64) -> Result<Vec<Value>, NodeError> {
        let filter = build_logs_filter(&self.address, Some(&self.topic0), Some(from), Some(to));
        match self.rpc.get_logs(filter).await {
            Ok(logs) => Ok(logs),
            Err(NodeError::Rpc { message, .. }) => {
                tracing::debug!(reason = %message, "eth_getLogs with topic filter failed, trying address-only");
                let fallback = build_logs_filter(&self.address, None, Some(from), Some(to));
                let raw = self.rpc.get_logs(fallback).await?;
                Ok(raw
                    .into_iter()
                    .filter(|log| log_matches(log, &self.address, &self.topic0))
                    .collect())
            }
            Err(e) => Err(e),
        }
    }
}

struct LogPoller {
    fetcher: LogFetcher,
    cursor: Cursor,
    interval: Duration,
}

impl LogPoller {
    async fn run(mut self, tx: mpsc::Sender<Vec<Value>>) {
        loop {
            tokio::select! {
                _ = tx.closed() => return,
                _ = sleep(self.interval) => {}
            }
            let tip = match self.fetcher.rpc.block_number().await {
                Ok(tip) => tip,
                Err(e) => {
                    tracing::warn!(reason = %e, "log poll failed");
                    continue;
                }
            };
            match self.fetcher.backfill(&mut self.cursor, tip, &tx).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => tracing::warn!(reason = %e, "log poll failed"),
            }
        }
    }
}

/// An established `eth_subscribe("logs")` subscription.
struct WsLogConnection {
    sender: SplitSink<WsStream, Message>,
    receiver: SplitStream<WsStream>,
    subscription_id: String,
    /// Node rejected the filter; logs must be matched client-side.
    needs_client_filter: bool,
}

impl WsLogConnection {
    async fn connect(ws_url: &str, address: &Address, topic0: &B256) -> Result<Self, NodeError> {
        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| NodeError::Transport(format!("WS connect: {}", e)))?;
        let (mut sender, mut receiver) = ws_stream.split();

        let filter = build_logs_filter(address, Some(topic0), None, None);
        send_json(&mut sender, &json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": ["logs", filter]
        }))
        .await?;
        let reply = next_json(&mut receiver).await?;
        if let Some(err) = reply.get("error") {
            let message = err.get("message").and_then(|m| m.as_str()).unwrap_or("");
            if message.contains("data did not match") || message.contains("variant") {
                tracing::warn!("RPC does not support logs filter (Anvil?), using client-side filter");
                send_json(&mut sender, &json!({
                    "jsonrpc": "2.0",
                    "id": 2,
                    "method": "eth_subscribe",
                    "params": ["logs"]
                }))
                .await?;
                let reply = next_json(&mut receiver).await?;
                if let Some(err) = reply.get("error") {
                    return Err(rpc_error(err));
                }
                return Ok(Self {
                    sender,
                    receiver,
                    subscription_id: subscription_id(&reply)?,
                    needs_client_filter: true,
                });
            }
            return Err(rpc_error(err));
        }
        Ok(Self {
            sender,
            receiver,
            subscription_id: subscription_id(&reply)?,
            needs_client_filter: false,
        })
    }
}

async fn send_json(sender: &mut SplitSink<WsStream, Message>, v: &Value) -> Result<(), NodeError> {
    sender
        .send(Message::Text(v.to_string()))
        .await
        .map_err(|e| NodeError::Transport(format!("WS send: {}", e)))
}

async fn next_json(receiver: &mut SplitStream<WsStream>) -> Result<Value, NodeError> {
    loop {
        let msg = timeout(SUBSCRIBE_TIMEOUT, receiver.next())
            .await
            .map_err(|_| NodeError::Transport("subscribe timeout".into()))?
            .ok_or(NodeError::Closed)?
            .map_err(|e| NodeError::Transport(format!("WS: {}", e)))?;
        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).map_err(|e| NodeError::Decode(e.to_string()))
            }
            Message::Close(_) => return Err(NodeError::Closed),
            _ => continue,
        }
    }
}

fn subscription_id(reply: &Value) -> Result<String, NodeError> {
    reply
        .get("result")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .ok_or_else(|| NodeError::Decode("no subscription id".into()))
}

enum WsExit {
    ReceiverGone,
    Disconnected(Option<NodeError>),
}

/// Forwards WebSocket logs to one subscriber, reconnecting with backoff and backfilling the gap.
struct WsFollower {
    ws_url: String,
    fetcher: LogFetcher,
    cursor: Cursor,
    reconnection: ReconnectionConfig,
}

impl WsFollower {
    async fn run(mut self, initial: WsLogConnection, tx: mpsc::Sender<Vec<Value>>) {
        let mut conn = Some(initial);
        let mut attempt = 0u32;
        loop {
            if let Some(c) = conn.take() {
                match self.forward(c, &tx).await {
                    WsExit::ReceiverGone => return,
                    WsExit::Disconnected(reason) => {
                        let reason = reason.map(|e| e.to_string()).unwrap_or_else(|| "closed".into());
                        tracing::warn!(%reason, "WS log subscription lost, reconnecting...");
                    }
                }
            }
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
            tokio::select! {
                _ = tx.closed() => return,
                _ = sleep(self.reconnection.backoff(attempt) + jitter) => {}
            }
            attempt = attempt.saturating_add(1);

            match self.reconnect(&tx).await {
                Ok(Some(c)) => {
                    attempt = 0;
                    conn = Some(c);
                }
                Ok(None) => return,
                Err(e) => tracing::warn!(reason = %e, attempt, "WS reconnect failed"),
            }
        }
    }

    /// Resubscribe, then backfill everything up to the tip seen after subscribing. Logs the
    /// new subscription repeats from the backfilled range are dropped by `forward`.
    async fn reconnect(
        &mut self,
        tx: &mpsc::Sender<Vec<Value>>,
    ) -> Result<Option<WsLogConnection>, NodeError> {
        let conn = WsLogConnection::connect(&self.ws_url, &self.fetcher.address, &self.fetcher.topic0).await?;
        let tip = self.fetcher.rpc.block_number().await?;
        if !self.fetcher.backfill(&mut self.cursor, tip, tx).await? {
            return Ok(None);
        }
        tracing::info!(tip, "WS log subscription restored");
        Ok(Some(conn))
    }

    async fn forward(
        &mut self,
        mut conn: WsLogConnection,
        tx: &mpsc::Sender<Vec<Value>>,
    ) -> WsExit {
        loop {
            let msg = tokio::select! {
                _ = tx.closed() => {
                    let _ = conn.sender.close().await;
                    return WsExit::ReceiverGone;
                }
                msg = conn.receiver.next() => msg,
            };
            let text = match msg {
                None => return WsExit::Disconnected(None),
                Some(Err(e)) => {
                    return WsExit::Disconnected(Some(NodeError::Transport(format!("WS: {}", e))))
                }
                Some(Ok(Message::Text(t))) => t,
                Some(Ok(Message::Close(_))) => return WsExit::Disconnected(None),
                Some(Ok(_)) => continue,
            };
            let v: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!(%e, "ignoring non-JSON WS message");
                    continue;
                }
            };
            if v.get("method").and_then(|m| m.as_str()) != Some("eth_subscription") {
                continue;
            }
            let params = match v.get("params") {
                Some(p) => p,
                None => continue,
            };
            if params.get("subscription").and_then(|s| s.as_str()) != Some(conn.subscription_id.as_str()) {
                continue;
            }
            let log = match params.get("result") {
                Some(l) => l.clone(),
                None => continue,
            };
            if conn.needs_client_filter && !log_matches(&log, &self.fetcher.address, &self.fetcher.topic0) {
                continue;
            }
            if is_removed(&log) {
                tracing::debug!("skipping removed (reorged) log");
                continue;
            }
            if let Some((block, index)) = log_position(&log) {
                if self.cursor.is_delivered(block, index) {
                    tracing::debug!(block, index, "skipping already delivered log");
                    continue;
                }
                self.cursor.record_log(block, index);
            }
            if tx.send(vec![log]).await.is_err() {
                return WsExit::ReceiverGone;
            }
        }
    }
}

/// [Wallet] backed by the node's unlocked accounts (`eth_accounts`).
#[derive(Clone)]
pub struct RpcWallet {
    rpc: RpcClient,
}

impl RpcWallet {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl Wallet for RpcWallet {
    async fn accounts(&self) -> Result<Vec<Address>, NodeError> {
        let result = self.rpc.request("eth_accounts", json!([])).await?;
        let arr = result
            .as_array()
            .ok_or_else(|| NodeError::Decode("eth_accounts not array".into()))?;
        arr.iter()
            .map(|a| {
                let s = a
                    .as_str()
                    .ok_or_else(|| NodeError::Decode("account not string".into()))?;
                Ok(parse_address(s)?)
            })
            .collect()
    }
}
