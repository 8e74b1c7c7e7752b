use crate::models::{AddressStat, TransferRecord};
use ethers::types::{Address, U512};
use std::collections::HashMap;

/// Per-address gross volume, in order of first appearance.
#[derive(Debug, Default)]
pub struct VolumeAggregator {
    index: HashMap<Address, usize>,
    stats: Vec<(Address, AddressStat)>,
}

impl VolumeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn credit(&mut self, addr: Address, value: U512) {
        let slot = *self.index.entry(addr).or_insert_with(|| {
            self.stats.push((addr, AddressStat::default()));
            self.stats.len() - 1
        });
        let stat = &mut self.stats[slot].1;
        stat.volume = stat.volume.saturating_add(value);
        stat.tx_count += 1;
    }

    /// Both endpoints of a transfer are credited with the full amount. The zero
    /// address is never a key, but the other side of a mint or burn still counts.
    pub fn add(&mut self, rec: &TransferRecord) {
        if rec.value.is_zero() {
            return;
        }
        let value = U512::from(rec.value);
        for addr in [rec.from, rec.to] {
            if !addr.is_zero() {
                self.credit(addr, value);
            }
        }
    }

    pub fn extend<'a>(&mut self, records: impl IntoIterator<Item = &'a TransferRecord>) {
        for rec in records {
            self.add(rec);
        }
    }

    /// Consume the aggregator. `min_volume` is only applied here, once every
    /// record has been folded in.
    pub fn finish(self, min_volume: Option<U512>) -> Vec<(Address, AddressStat)> {
        let total = self.stats.len();
        let stats: Vec<_> = match min_volume {
            Some(min) => self
                .stats
                .into_iter()
                .filter(|(_, s)| s.volume >= min)
                .collect(),
            None => self.stats,
        };
        log::info!(
            "Aggregated {} addresses, {} after volume filter",
            total,
            stats.len()
        );
        stats
    }
}

/// Largest `n` by volume, descending. The sort is stable, so equal volumes keep
/// their first-appearance order.
pub fn top_n(mut stats: Vec<(Address, AddressStat)>, n: usize) -> Vec<(Address, AddressStat)> {
    stats.sort_by(|a, b| b.1.volume.cmp(&a.1.volume));
    stats.truncate(n);
    stats
}
