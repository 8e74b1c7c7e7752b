use ethers::types::{Address, Log, H256, U256, U512};
use serde::Deserialize;
use std::fmt;

/// Inclusive block interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    /// Returns `None` when `start > end`.
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn block_count(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Payload of a log as handed back by the node: either decoded bytes or the
/// `0x`-prefixed hex string from the JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LogData {
    Hex(String),
    Raw(Vec<u8>),
}

/// Raw log entry, only the fields the decoder needs. Deserializes from a
/// JSON log object whose `data` is either a hex string or a byte array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub block_number: Option<u64>,
    pub topics: Vec<H256>,
    pub data: LogData,
}

impl From<Log> for LogEntry {
    fn from(log: Log) -> Self {
        Self {
            block_number: log.block_number.map(|b| b.as_u64()),
            topics: log.topics,
            data: LogData::Raw(log.data.to_vec()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRecord {
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

/// Running totals for one address. `tx_count` counts participations, so a
/// transfer bumps both the sender and the receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddressStat {
    pub volume: U512,
    pub tx_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhaleEntry {
    pub rank: usize,
    pub address: Address,
    pub volume_wei: U512,
    pub tx_count: u64,
    pub token: Address,
    pub network: String,
    pub timestamp: i64,
}
