//! Example: follow gMammoths delivered to one account and print each sender.
//!
//! Usage: cargo run -p gmammoth --example watch_messages -- --http-url URL [--ws-url WS_URL] --contract 0x... --account 0x...

use alloy::primitives::Address;
use gmammoth::{ClientConfig, ContractEvent, Interest, JsonRpcNode, SubscriptionManager};
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args: Vec<String> = std::env::args().collect();
    let mut http_url = String::new();
    let mut ws_url = None;
    let mut contract = String::new();
    let mut account = String::new();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--http-url" => {
                i += 1;
                http_url = args.get(i).cloned().unwrap_or_default();
            }
            "--ws-url" => {
                i += 1;
                ws_url = args.get(i).cloned();
            }
            "--contract" => {
                i += 1;
                contract = args.get(i).cloned().unwrap_or_default();
            }
            "--account" => {
                i += 1;
                account = args.get(i).cloned().unwrap_or_default();
            }
            _ => {}
        }
        i += 1;
    }
    if http_url.is_empty() || contract.is_empty() || account.is_empty() {
        eprintln!("Usage: watch_messages --http-url URL [--ws-url WS_URL] --contract 0xADDR --account 0xADDR");
        std::process::exit(1);
    }
    let contract = Address::from_str(&contract)?;
    let account = Address::from_str(&account)?;

    let mut config = ClientConfig::new(http_url, contract);
    config.ws_url = ws_url;
    let node = Arc::new(JsonRpcNode::new(&config)?);
    let manager = SubscriptionManager::new(node, contract);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let _inbox = manager
            .open("watch_messages", Interest::message_delivered(account), |event| {
                if let ContractEvent::MessageDelivered { from, to } = event {
                    println!("gMammoth! from=0x{} to=0x{}", hex::encode(from), hex::encode(to));
                }
            })
            .await;
        let _ = tokio::signal::ctrl_c().await;
    });
    Ok(())
}
