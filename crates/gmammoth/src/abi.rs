//! ABI types and decoding for the gMammoth contract.
//!
//! Calls are encoded through the `sol!` interface. Logs are decoded by hand from the
//! JSON-RPC log shape (eth_subscription / eth_getLogs result), so `GMammothSent` decodes
//! whether its addresses are indexed (topics) or not (data words).

use alloy::primitives::{Address, B256};
use alloy::sol_types::{SolCall, SolEvent};
use anyhow::{Context, Result};
use serde_json::Value;

alloy::sol! {
    interface IGMammoth {
        event Registration(address indexed user);
        event Deregistration(address indexed user);
        event GMammothSent(address indexed from, address indexed to);

        function register() external;
        function deregister() external;
        function sendGMammoth(address to) external;
        function isRegistered(address user) external view returns (bool registered);
        function getRegisteredUsers() external view returns (address[] users);
    }
}

/// State-changing contract functions the client submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractFunction {
    Register,
    Deregister,
    SendGMammoth { to: Address },
}

impl ContractFunction {
    /// Solidity function name, as shown in logs and notifications.
    pub fn name(&self) -> &'static str {
        match self {
            ContractFunction::Register => "register",
            ContractFunction::Deregister => "deregister",
            ContractFunction::SendGMammoth { .. } => "sendGMammoth",
        }
    }

    pub fn calldata(&self) -> Vec<u8> {
        match self {
            ContractFunction::Register => IGMammoth::registerCall {}.abi_encode(),
            ContractFunction::Deregister => IGMammoth::deregisterCall {}.abi_encode(),
            ContractFunction::SendGMammoth { to } => {
                IGMammoth::sendGMammothCall { to: *to }.abi_encode()
            }
        }
    }
}

/// Event categories a subscription can be opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Registration,
    Deregistration,
    /// `GMammothSent(from, to)`.
    MessageDelivered,
}

impl EventCategory {
    /// keccak256 of the event signature (log topic0).
    pub fn topic0(self) -> B256 {
        match self {
            EventCategory::Registration => IGMammoth::Registration::SIGNATURE_HASH,
            EventCategory::Deregistration => IGMammoth::Deregistration::SIGNATURE_HASH,
            EventCategory::MessageDelivered => IGMammoth::GMammothSent::SIGNATURE_HASH,
        }
    }

    pub fn event_name(self) -> &'static str {
        match self {
            EventCategory::Registration => "Registration",
            EventCategory::Deregistration => "Deregistration",
            EventCategory::MessageDelivered => "GMammothSent",
        }
    }
}

/// Decoded contract event delivered to subscription callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractEvent {
    Registered,
    Deregistered,
    MessageDelivered { from: Address, to: Address },
}

/// A log as returned by the node, with the chain metadata the node attached (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block_number: Option<u64>,
    pub tx_hash: Option<B256>,
    pub log_index: Option<u64>,
}

impl RawLog {
    pub fn topic0(&self) -> Option<B256> {
        self.topics.first().copied()
    }
}

/// Decode a JSON-RPC log object into [RawLog]. Pending logs carry null metadata.
pub fn decode_raw_log(log_value: &Value) -> Result<RawLog> {
    let address = parse_address(
        log_value
            .get("address")
            .and_then(|a| a.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing address"))?,
    )?;
    let topics = log_value
        .get("topics")
        .and_then(|t| t.as_array())
        .ok_or_else(|| anyhow::anyhow!("Missing topics"))?
        .iter()
        .map(|t| {
            t.as_str()
                .ok_or_else(|| anyhow::anyhow!("topic not str"))
                .and_then(parse_b256)
        })
        .collect::<Result<Vec<_>>>()?;
    let data = match log_value.get("data").and_then(|d| d.as_str()) {
        Some(d) => parse_hex_bytes(d)?,
        None => Vec::new(),
    };
    let block_number = optional_field(log_value, "blockNumber", parse_hex_u64)?;
    let tx_hash = optional_field(log_value, "transactionHash", parse_b256)?;
    let log_index = optional_field(log_value, "logIndex", parse_hex_u64)?;
    Ok(RawLog {
        address,
        topics,
        data,
        block_number,
        tx_hash,
        log_index,
    })
}

/// Decode a log of the given category. The caller is expected to have matched topic0.
pub fn decode_event(category: EventCategory, log: &RawLog) -> Result<ContractEvent> {
    match category {
        EventCategory::Registration => Ok(ContractEvent::Registered),
        EventCategory::Deregistration => Ok(ContractEvent::Deregistered),
        EventCategory::MessageDelivered => {
            let (from, to) = if log.topics.len() >= 3 {
                (
                    word_to_address(log.topics[1].as_slice())?,
                    word_to_address(log.topics[2].as_slice())?,
                )
            } else if log.data.len() >= 64 {
                (
                    word_to_address(&log.data[0..32])?,
                    word_to_address(&log.data[32..64])?,
                )
            } else {
                anyhow::bail!(
                    "GMammothSent log has {} topics and {} data bytes; expected from/to",
                    log.topics.len(),
                    log.data.len()
                );
            };
            Ok(ContractEvent::MessageDelivered { from, to })
        }
    }
}

/// Calldata for `isRegistered(user)`.
pub fn is_registered_calldata(user: Address) -> Vec<u8> {
    IGMammoth::isRegisteredCall { user }.abi_encode()
}

/// Decode `isRegistered` return data (eth_call result).
pub fn decode_is_registered_return(data: &[u8]) -> Result<bool> {
    let ret = IGMammoth::isRegisteredCall::abi_decode_returns(data, true)
        .context("decode isRegistered() return")?;
    Ok(ret.registered)
}

/// Calldata for `getRegisteredUsers()`.
pub fn registered_users_calldata() -> Vec<u8> {
    IGMammoth::getRegisteredUsersCall {}.abi_encode()
}

/// Decode `getRegisteredUsers` return data (eth_call result).
pub fn decode_registered_users_return(data: &[u8]) -> Result<Vec<Address>> {
    let ret = IGMammoth::getRegisteredUsersCall::abi_decode_returns(data, true)
        .context("decode getRegisteredUsers() return")?;
    Ok(ret.users)
}

fn optional_field<T>(
    log_value: &Value,
    key: &str,
    parse: impl Fn(&str) -> Result<T>,
) -> Result<Option<T>> {
    match log_value.get(key).and_then(|v| v.as_str()) {
        Some(s) => parse(s).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn parse_hex_u64(s: &str) -> Result<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).context("parse hex u64")
}

pub(crate) fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).context("parse hex bytes")
}

pub(crate) fn parse_b256(s: &str) -> Result<B256> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("Expected 32 bytes, got {}", bytes.len());
    }
    Ok(B256::from_slice(&bytes))
}

pub(crate) fn parse_address(s: &str) -> Result<Address> {
    word_to_address(&parse_hex_bytes(s)?)
}

fn word_to_address(bytes: &[u8]) -> Result<Address> {
    match bytes.len() {
        20 => Ok(Address::from_slice(bytes)),
        // ABI words hold an address right-aligned; take the last 20 bytes.
        32 => Ok(Address::from_slice(&bytes[12..32])),
        n => anyhow::bail!("Expected 20 or 32 bytes for address, got {}", n),
    }
}

pub(crate) fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address))
}
