use crate::models::{LogData, LogEntry, TransferRecord};
use ethers::types::{Address, H256, U256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected at least 3 topics, got {0}")]
    MissingTopics(usize),
    #[error("data is not valid hex: {0}")]
    InvalidHex(String),
    #[error("data hex string is empty")]
    EmptyHex,
    #[error("data is {0} bytes, does not fit in uint256")]
    ValueOverflow(usize),
}

/// Indexed addresses are left-padded to 32 bytes; the address is the low 20.
fn topic_address(topic: &H256) -> Address {
    Address::from_slice(&topic.as_bytes()[12..])
}

fn data_bytes(data: &LogData) -> Result<Vec<u8>, DecodeError> {
    match data {
        LogData::Raw(bytes) => Ok(bytes.clone()),
        LogData::Hex(s) => {
            let digits = s.strip_prefix("0x").unwrap_or(s);
            if digits.is_empty() {
                return Err(DecodeError::EmptyHex);
            }
            let padded;
            let digits = if digits.len() % 2 == 1 {
                padded = format!("0{}", digits);
                padded.as_str()
            } else {
                digits
            };
            hex::decode(digits).map_err(|e| DecodeError::InvalidHex(e.to_string()))
        }
    }
}

pub fn decode_transfer(log: &LogEntry) -> Result<TransferRecord, DecodeError> {
    let [_, from, to, ..] = log.topics.as_slice() else {
        return Err(DecodeError::MissingTopics(log.topics.len()));
    };

    let bytes = data_bytes(&log.data)?;
    let significant = bytes.iter().position(|b| *b != 0).map_or(&[][..], |i| &bytes[i..]);
    if significant.len() > 32 {
        return Err(DecodeError::ValueOverflow(bytes.len()));
    }

    Ok(TransferRecord {
        from: topic_address(from),
        to: topic_address(to),
        value: U256::from_big_endian(significant),
    })
}

/// Decode every log, dropping the ones that are not well-formed transfers.
pub fn decode_all(logs: &[LogEntry]) -> Vec<TransferRecord> {
    let mut dropped = 0usize;
    let records: Vec<TransferRecord> = logs
        .iter()
        .filter_map(|entry| match decode_transfer(entry) {
            Ok(rec) => Some(rec),
            Err(e) => {
                log::debug!("dropping log at block {:?}: {}", entry.block_number, e);
                dropped += 1;
                None
            }
        })
        .collect();

    log::info!(
        "Decoded {} transfers ({} logs dropped)",
        records.len(),
        dropped
    );
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::transfer_topic;

    fn topic_for(addr: &str) -> H256 {
        let addr: Address = addr.parse().unwrap();
        H256::from(addr)
    }

    fn transfer_log(data: LogData) -> LogEntry {
        LogEntry {
            block_number: Some(1),
            topics: vec![
                transfer_topic(),
                topic_for("0x1111111111111111111111111111111111111111"),
                topic_for("0x2222222222222222222222222222222222222222"),
            ],
            data,
        }
    }

    #[test]
    fn test_decode_raw_bytes() {
        let mut word = [0u8; 32];
        word[31] = 0xe8;
        word[30] = 0x03;
        let rec = decode_transfer(&transfer_log(LogData::Raw(word.to_vec()))).unwrap();

        assert_eq!(
            rec.from,
            "0x1111111111111111111111111111111111111111".parse::<Address>().unwrap()
        );
        assert_eq!(
            rec.to,
            "0x2222222222222222222222222222222222222222".parse::<Address>().unwrap()
        );
        assert_eq!(rec.value, U256::from(1000u64));
    }

    #[test]
    fn test_decode_hex_string() {
        let data = format!("0x{:064x}", 1_000_000_000_000_000_000u128);
        let rec = decode_transfer(&transfer_log(LogData::Hex(data))).unwrap();
        assert_eq!(rec.value, U256::exp10(18));

        // Odd-length and unprefixed hex still decodes.
        let rec = decode_transfer(&transfer_log(LogData::Hex("fff".into()))).unwrap();
        assert_eq!(rec.value, U256::from(0xfffu64));
    }

    #[test]
    fn test_checksummed_topics_decode_to_same_address() {
        let a = topic_for("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
        let b = topic_for("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
        assert_eq!(topic_address(&a), topic_address(&b));
    }

    #[test]
    fn test_too_few_topics_dropped() {
        let mut log = transfer_log(LogData::Raw(vec![1]));
        log.topics.truncate(2);
        assert_eq!(decode_transfer(&log), Err(DecodeError::MissingTopics(2)));
    }

    #[test]
    fn test_bad_data_dropped() {
        assert_eq!(
            decode_transfer(&transfer_log(LogData::Hex("0x".into()))),
            Err(DecodeError::EmptyHex)
        );
        assert!(matches!(
            decode_transfer(&transfer_log(LogData::Hex("0xzz".into()))),
            Err(DecodeError::InvalidHex(_))
        ));
        assert_eq!(
            decode_transfer(&transfer_log(LogData::Raw(vec![1; 33]))),
            Err(DecodeError::ValueOverflow(33))
        );
    }

    #[test]
    fn test_leading_zero_padding_beyond_32_bytes_accepted() {
        let mut padded = vec![0u8; 40];
        padded[39] = 0x2a;
        let rec = decode_transfer(&transfer_log(LogData::Raw(padded))).unwrap();
        assert_eq!(rec.value, U256::from(42u64));

        let hex = format!("0x{}2a", "00".repeat(39));
        let rec = decode_transfer(&transfer_log(LogData::Hex(hex))).unwrap();
        assert_eq!(rec.value, U256::from(42u64));

        let mut wide = vec![0u8; 34];
        wide[1] = 1;
        assert_eq!(
            decode_transfer(&transfer_log(LogData::Raw(wide))),
            Err(DecodeError::ValueOverflow(34))
        );
    }

    #[test]
    fn test_json_log_objects_decode() {
        let from = format!("0x{:0>64}", "11".repeat(20));
        let to = format!("0x{:0>64}", "22".repeat(20));
        let topic0 = format!("{:#x}", transfer_topic());

        let hex_log: LogEntry = serde_json::from_value(serde_json::json!({
            "blockNumber": 17,
            "topics": [topic0, from, to],
            "data": "0x00000000000000000000000000000000000000000000000000000000000003e8"
        }))
        .unwrap();
        assert!(matches!(hex_log.data, LogData::Hex(_)));
        assert_eq!(hex_log.block_number, Some(17));

        let raw_log: LogEntry = serde_json::from_value(serde_json::json!({
            "blockNumber": null,
            "topics": [topic0, from, to],
            "data": [3, 232]
        }))
        .unwrap();
        assert_eq!(raw_log.data, LogData::Raw(vec![3, 232]));

        let records = decode_all(&[hex_log, raw_log]);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.value == U256::from(1000u64)));
        assert_eq!(records[0].from, Address::repeat_byte(0x11));
        assert_eq!(records[0].to, Address::repeat_byte(0x22));
    }

    #[test]
    fn test_decode_all_skips_malformed() {
        let mut short = transfer_log(LogData::Raw(vec![5]));
        short.topics.truncate(1);
        let logs = vec![
            transfer_log(LogData::Raw(vec![7])),
            short,
            transfer_log(LogData::Hex("0x09".into())),
        ];

        let records = decode_all(&logs);
        let values: Vec<U256> = records.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![U256::from(7u64), U256::from(9u64)]);
    }
}
