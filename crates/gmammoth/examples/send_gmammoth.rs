//! Example: send a gMammoth from the node's first unlocked account (e.g. Anvil).
//!
//! Usage: cargo run -p gmammoth --example send_gmammoth -- --http-url URL --contract 0x... --to 0x... [--confirmations N] [--chain-id ID]

use alloy::primitives::Address;
use gmammoth::{ClientConfig, JsonRpcNode, RpcWallet, TracingNotifier, TransactionSubmitter};
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args: Vec<String> = std::env::args().collect();
    let mut http_url = String::new();
    let mut contract = String::new();
    let mut to = String::new();
    let mut confirmations = 0u64;
    let mut chain_id = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--http-url" => {
                i += 1;
                http_url = args.get(i).cloned().unwrap_or_default();
            }
            "--contract" => {
                i += 1;
                contract = args.get(i).cloned().unwrap_or_default();
            }
            "--to" => {
                i += 1;
                to = args.get(i).cloned().unwrap_or_default();
            }
            "--confirmations" => {
                i += 1;
                confirmations = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(0);
            }
            "--chain-id" => {
                i += 1;
                chain_id = args.get(i).and_then(|s| s.parse().ok());
            }
            _ => {}
        }
        i += 1;
    }
    if http_url.is_empty() || contract.is_empty() || to.is_empty() {
        eprintln!("Usage: send_gmammoth --http-url URL --contract 0xADDR --to 0xADDR [--confirmations N] [--chain-id ID]");
        std::process::exit(1);
    }
    let contract = Address::from_str(&contract)?;
    let to = Address::from_str(&to)?;

    let mut config = ClientConfig::new(http_url, contract);
    config.confirmations = confirmations;
    if let Some(id) = chain_id {
        config.chain_id = id;
    }
    let node = JsonRpcNode::new(&config)?;
    let wallet = RpcWallet::new(node.rpc().clone());
    let submitter = TransactionSubmitter::new(
        Arc::new(node),
        Some(Arc::new(wallet)),
        Arc::new(TracingNotifier),
        contract,
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match submitter.send_gmammoth(to).await {
            Ok(receipt) => println!(
                "sent tx={} block={} gas_used={:?}",
                receipt.tx_hash, receipt.block_number, receipt.gas_used
            ),
            Err(e) => {
                eprintln!("send failed: {}", e);
                std::process::exit(2);
            }
        }
    });
    Ok(())
}
