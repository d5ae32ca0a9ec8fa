//! Common helpers for integration tests: an in-memory gMammoth node, a recording notifier,
//! and Anvil/Foundry helpers for the end-to-end test.

#![allow(dead_code)]

use alloy::primitives::{Address, B256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use gmammoth::abi::{is_registered_calldata, registered_users_calldata};
use gmammoth::{
    CallRequest, ContractFunction, EventCategory, LogStream, Node, NodeError, Notification,
    Notifier, Simulation, TransactionReceipt, TxHash,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::sleep;

pub fn contract() -> Address {
    Address::repeat_byte(0xc0)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn hex32(b: &B256) -> String {
    format!("0x{}", hex::encode(b))
}

fn padded(address: Address) -> String {
    format!("0x{}{}", "00".repeat(12), hex::encode(address))
}

fn log_object(topics: Vec<String>, block: u64) -> Value {
    json!({
        "address": format!("0x{}", hex::encode(contract())),
        "topics": topics,
        "data": "0x",
        "blockNumber": format!("0x{:x}", block),
        "logIndex": "0x0",
        "removed": false,
    })
}

pub fn registration_log(user: Address, block: u64) -> Value {
    log_object(
        vec![hex32(&EventCategory::Registration.topic0()), padded(user)],
        block,
    )
}

pub fn deregistration_log(user: Address, block: u64) -> Value {
    log_object(
        vec![hex32(&EventCategory::Deregistration.topic0()), padded(user)],
        block,
    )
}

pub fn message_log(from: Address, to: Address, block: u64) -> Value {
    log_object(
        vec![
            hex32(&EventCategory::MessageDelivered.topic0()),
            padded(from),
            padded(to),
        ],
        block,
    )
}

#[derive(Default)]
struct Chain {
    registered: Vec<Address>,
    block: u64,
    next_tx: u8,
    pending: HashMap<TxHash, CallRequest>,
}

/// In-memory node for the gMammoth contract. Transactions take effect (and emit their
/// logs) when their finality is awaited. Every trait call is recorded by name.
#[derive(Default)]
pub struct FakeNode {
    calls: Mutex<Vec<&'static str>>,
    chain: Mutex<Chain>,
    subscribers: Mutex<Vec<(B256, mpsc::UnboundedSender<Vec<Value>>)>>,
    simulate_error: Mutex<Option<NodeError>>,
    broadcast_error: Mutex<Option<NodeError>>,
    finality_error: Mutex<Option<NodeError>>,
    read_delay: Mutex<Option<Duration>>,
    fail_reads: AtomicBool,
    fail_subscribe: AtomicBool,
    hold_finality: AtomicBool,
}

impl FakeNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registered(users: &[Address]) -> Self {
        let node = Self::new();
        node.chain.lock().unwrap().registered = users.to_vec();
        node
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than contract reads.
    pub fn tx_calls(&self) -> Vec<&'static str> {
        self.calls()
            .into_iter()
            .filter(|c| *c != "read_contract" && *c != "subscribe_logs")
            .collect()
    }

    pub fn fail_simulate_with(&self, e: NodeError) {
        *self.simulate_error.lock().unwrap() = Some(e);
    }

    pub fn fail_broadcast_with(&self, e: NodeError) {
        *self.broadcast_error.lock().unwrap() = Some(e);
    }

    pub fn fail_finality_with(&self, e: NodeError) {
        *self.finality_error.lock().unwrap() = Some(e);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// The next contract read answers from the state at call time, then takes `delay` to return.
    pub fn delay_next_read(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }

    /// End every open stream for `category`, as a node dropping the subscription would.
    pub fn end_streams(&self, category: EventCategory) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|(t, _)| *t != category.topic0());
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Make `wait_for_finality` pend forever.
    pub fn hold_finality(&self) {
        self.hold_finality.store(true, Ordering::SeqCst);
    }

    pub fn registered(&self) -> Vec<Address> {
        self.chain.lock().unwrap().registered.clone()
    }

    /// Change registry state directly, without emitting any log.
    pub fn set_registered(&self, users: &[Address]) {
        self.chain.lock().unwrap().registered = users.to_vec();
    }

    pub fn next_block(&self) -> u64 {
        let mut chain = self.chain.lock().unwrap();
        chain.block += 1;
        chain.block
    }

    /// Deliver `batch` to every open stream subscribed with `topic0`.
    pub fn push_batch(&self, topic0: B256, batch: Vec<Value>) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|(_, tx)| !tx.is_closed());
        for (t, tx) in subs.iter() {
            if *t == topic0 {
                let _ = tx.send(batch.clone());
            }
        }
    }

    pub fn emit(&self, category: EventCategory, log: Value) {
        self.push_batch(category.topic0(), vec![log]);
    }

    /// Number of log streams for `category` whose consumer is still alive.
    pub fn open_streams(&self, category: EventCategory) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, tx)| *t == category.topic0() && !tx.is_closed())
            .count()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn decode_function(data: &[u8]) -> Option<ContractFunction> {
        if data == ContractFunction::Register.calldata().as_slice() {
            return Some(ContractFunction::Register);
        }
        if data == ContractFunction::Deregister.calldata().as_slice() {
            return Some(ContractFunction::Deregister);
        }
        let send = ContractFunction::SendGMammoth { to: Address::ZERO }.calldata();
        if data.len() == 36 && data[..4] == send[..4] {
            return Some(ContractFunction::SendGMammoth {
                to: Address::from_slice(&data[16..36]),
            });
        }
        None
    }

    fn answer_read(&self, calldata: &[u8]) -> Result<Vec<u8>, NodeError> {
        let chain = self.chain.lock().unwrap();
        let is_registered = is_registered_calldata(Address::ZERO);
        if calldata.len() == 36 && calldata[..4] == is_registered[..4] {
            let user = Address::from_slice(&calldata[16..36]);
            let flag = chain.registered.contains(&user) as u8;
            return Ok(word(&[flag]).to_vec());
        }
        if calldata == registered_users_calldata().as_slice() {
            let mut out = Vec::new();
            out.extend_from_slice(&word(&[0x20]));
            out.extend_from_slice(&word(&[chain.registered.len() as u8]));
            for user in &chain.registered {
                out.extend_from_slice(&word(user.as_slice()));
            }
            return Ok(out);
        }
        Err(Self::revert("unknown selector"))
    }

    fn revert(reason: &str) -> NodeError {
        NodeError::Rpc {
            code: 3,
            message: format!("execution reverted: {}", reason),
        }
    }
}

fn word(tail: &[u8]) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[32 - tail.len()..].copy_from_slice(tail);
    w
}

#[async_trait]
impl Node for FakeNode {
    async fn read_contract(&self, to: Address, calldata: Vec<u8>) -> Result<Vec<u8>, NodeError> {
        self.record("read_contract");
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(NodeError::Transport("connection refused".into()));
        }
        assert_eq!(to, contract());
        let answer = self.answer_read(&calldata);
        let delay = self.read_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        answer
    }

    async fn simulate(&self, request: CallRequest) -> Result<Simulation, NodeError> {
        self.record("simulate");
        if let Some(e) = self.simulate_error.lock().unwrap().clone() {
            return Err(e);
        }
        let registered = self.chain.lock().unwrap().registered.contains(&request.from);
        match Self::decode_function(&request.data) {
            Some(ContractFunction::Register) if registered => {
                return Err(Self::revert("already registered"))
            }
            Some(ContractFunction::Deregister) if !registered => {
                return Err(Self::revert("not registered"))
            }
            Some(ContractFunction::SendGMammoth { .. }) if !registered => {
                return Err(Self::revert("sender not registered"))
            }
            None => return Err(Self::revert("unknown selector")),
            _ => {}
        }
        Ok(Simulation {
            request,
            gas: Some(50_000),
        })
    }

    async fn broadcast(&self, simulation: &Simulation) -> Result<TxHash, NodeError> {
        self.record("broadcast");
        if let Some(e) = self.broadcast_error.lock().unwrap().clone() {
            return Err(e);
        }
        let mut chain = self.chain.lock().unwrap();
        chain.next_tx += 1;
        let hash = B256::repeat_byte(chain.next_tx);
        chain.pending.insert(hash, simulation.request.clone());
        Ok(hash)
    }

    async fn wait_for_finality(&self, tx_hash: TxHash) -> Result<TransactionReceipt, NodeError> {
        self.record("wait_for_finality");
        if self.hold_finality.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(e) = self.finality_error.lock().unwrap().clone() {
            return Err(e);
        }
        let (request, block) = {
            let mut chain = self.chain.lock().unwrap();
            let request = chain
                .pending
                .remove(&tx_hash)
                .ok_or_else(|| NodeError::Decode("unknown transaction".into()))?;
            chain.block += 1;
            (request, chain.block)
        };
        let from = request.from;
        match Self::decode_function(&request.data) {
            Some(ContractFunction::Register) => {
                self.chain.lock().unwrap().registered.push(from);
                self.emit(EventCategory::Registration, registration_log(from, block));
            }
            Some(ContractFunction::Deregister) => {
                self.chain.lock().unwrap().registered.retain(|u| *u != from);
                self.emit(EventCategory::Deregistration, deregistration_log(from, block));
            }
            Some(ContractFunction::SendGMammoth { to }) => {
                self.emit(EventCategory::MessageDelivered, message_log(from, to, block));
            }
            None => return Err(NodeError::Reverted(tx_hash)),
        }
        Ok(TransactionReceipt {
            tx_hash,
            block_number: block,
            gas_used: Some(50_000),
            success: true,
        })
    }

    async fn subscribe_logs(&self, address: Address, topic0: B256) -> Result<LogStream, NodeError> {
        self.record("subscribe_logs");
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(NodeError::Transport("connection refused".into()));
        }
        assert_eq!(address, contract());
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push((topic0, tx));
        Ok(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }
}

type Responder = Box<dyn Fn(&str, usize) -> (Value, Duration) + Send + Sync>;

/// Minimal HTTP JSON-RPC server. `respond(method, nth)` gives the `result` for the `nth`
/// (0-based) request of `method` and how long to wait before answering it.
pub struct StubRpc {
    pub url: String,
    received: Arc<Mutex<Vec<String>>>,
    server: tokio::task::JoinHandle<()>,
}

impl StubRpc {
    pub async fn start(
        respond: impl Fn(&str, usize) -> (Value, Duration) + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let received = Arc::new(Mutex::new(Vec::new()));
        let respond: Arc<Responder> = Arc::new(Box::new(respond));
        let log = Arc::clone(&received);
        let server = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, Arc::clone(&log), Arc::clone(&respond)));
            }
        });
        Self {
            url,
            received,
            server,
        }
    }

    pub fn count(&self, method: &str) -> usize {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|m| *m == method)
            .count()
    }
}

impl Drop for StubRpc {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// One request per connection; the reply closes it.
async fn serve(mut socket: TcpStream, log: Arc<Mutex<Vec<String>>>, respond: Arc<Responder>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let body_start = loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..body_start]).to_lowercase();
    let length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < body_start + length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let request: Value = match serde_json::from_slice(&buf[body_start..body_start + length]) {
        Ok(v) => v,
        Err(_) => return,
    };
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let nth = {
        let mut log = log.lock().unwrap();
        let nth = log.iter().filter(|m| **m == method).count();
        log.push(method.clone());
        nth
    };
    let (result, delay) = respond(&method, nth);
    sleep(delay).await;
    let body = json!({"jsonrpc": "2.0", "id": request["id"], "result": result}).to_string();
    let reply = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = socket.write_all(reply.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Notifier that keeps every notification.
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn all(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.all().into_iter().map(|n| n.title).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().unwrap().push(notification);
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    cond()
}

pub fn foundry_available() -> bool {
    ["anvil", "forge"].iter().all(|bin| {
        Command::new(bin)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    })
}

/// Spawn Anvil on a dynamic port and wait until ready.
pub async fn spawn_anvil() -> Result<(Child, String)> {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").context("bind for port")?;
        listener.local_addr()?.port()
    };
    let rpc_url = format!("http://127.0.0.1:{}", port);
    let mut cmd = Command::new("anvil");
    cmd.arg("--port")
        .arg(port.to_string())
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--chain-id")
        .arg("31337");
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let process = cmd.spawn().context("spawn anvil")?;
    wait_for_rpc(&rpc_url).await?;
    Ok((process, rpc_url))
}

async fn wait_for_rpc(url: &str) -> Result<()> {
    let client = reqwest::Client::new();
    for _ in 0..30 {
        let ok = client
            .post(url)
            .json(&json!({"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}))
            .send()
            .await
            .is_ok();
        if ok {
            return Ok(());
        }
        sleep(Duration::from_millis(100)).await;
    }
    anyhow::bail!("RPC not ready");
}

/// Anvil's first dev key (account 0xf39F...2266).
pub const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Deploy the GMammoth contract from `contracts/`. Run from the crate root.
pub fn deploy_gmammoth(crate_root: &std::path::Path, rpc_url: &str) -> Result<String> {
    let create = |broadcast: bool| {
        let mut cmd = Command::new("forge");
        cmd.current_dir(crate_root).arg("create");
        if broadcast {
            cmd.arg("--broadcast");
        }
        cmd.args([
            "--rpc-url",
            rpc_url,
            "--private-key",
            ANVIL_KEY,
            "contracts/GMammoth.sol:GMammoth",
        ])
        .output()
        .context("forge create")
    };
    let mut out = create(true)?;
    // Older forge releases broadcast by default and reject the flag.
    if !out.status.success() && String::from_utf8_lossy(&out.stderr).contains("unexpected argument") {
        out = create(false)?;
    }
    if !out.status.success() {
        anyhow::bail!("forge create failed: {}", String::from_utf8_lossy(&out.stderr));
    }
    let s = String::from_utf8_lossy(&out.stdout);
    for line in s.lines() {
        if line.contains("Deployed to:") {
            let addr = line.split_whitespace().last().unwrap_or("").trim();
            if addr.starts_with("0x") {
                return Ok(addr.to_string());
            }
        }
    }
    anyhow::bail!("could not parse deployed address from: {}", s);
}
