use std::collections::{BTreeMap, HashMap};

use crate::chain::{ContractKind, ContractRegistry, TxReceipt, ZERO_ADDRESS};

/// What the skip policy wants dropped from the block being indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipDirective {
    None,
    Transaction(String),
    WholeBlock,
}

/// A block's receipts bucketed by destination contract, each bucket sorted
/// by transaction hash.
#[derive(Debug, Default)]
pub struct PartitionedBlock {
    buckets: BTreeMap<ContractKind, Vec<TxReceipt>>,
}

impl PartitionedBlock {
    pub fn receipts(&self, kind: ContractKind) -> &[TxReceipt] {
        self.buckets.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn partition_transactions(
    receipts: HashMap<String, TxReceipt>,
    registry: &ContractRegistry,
    skip: &SkipDirective,
) -> PartitionedBlock {
    let mut partitioned = PartitionedBlock::default();
    if *skip == SkipDirective::WholeBlock {
        tracing::warn!("Skipping all {} transactions of block", receipts.len());
        return partitioned;
    }

    let mut sorted: Vec<TxReceipt> = receipts.into_values().collect();
    sorted.sort_by(|a, b| a.tx_hash.cmp(&b.tx_hash));

    for receipt in sorted {
        if let SkipDirective::Transaction(target) = skip {
            if *target == receipt.tx_hash {
                tracing::warn!("Skipping transaction {}", receipt.tx_hash);
                continue;
            }
        }
        let kind = match receipt.to.as_deref() {
            None | Some(ZERO_ADDRESS) => None,
            Some(to) => registry.kind_of(to),
        };
        match kind {
            Some(kind) => partitioned.buckets.entry(kind).or_default().push(receipt),
            None => tracing::debug!("Ignoring transaction {} to {:?}", receipt.tx_hash, receipt.to),
        }
    }
    partitioned
}
