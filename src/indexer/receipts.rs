use std::collections::HashMap;
use std::sync::Arc;

use crate::chain::{ChainBlock, ChainSource, TxReceipt};

use super::error::{IndexingError, Stage};
use super::partition::SkipDirective;
use super::pool::{run_bounded, GroupError};

pub const RECEIPT_WORKERS: usize = 5;

struct ReceiptFailure {
    tx_hash: String,
    message: String,
}

/// Fetch the receipt of every transaction in `block` not dropped by `skip`,
/// keyed by hash.
///
/// A failed, panicked or missing lookup fails the whole block.
pub async fn fetch_tx_receipts(
    chain: &Arc<dyn ChainSource>,
    block: &ChainBlock,
    skip: &SkipDirective,
) -> Result<HashMap<String, TxReceipt>, IndexingError> {
    let fail = |tx_hash: String, message: String| {
        IndexingError::new(Stage::FetchReceipts, block, tx_hash, message)
    };

    let wanted: Vec<String> = match skip {
        SkipDirective::WholeBlock => Vec::new(),
        SkipDirective::Transaction(target) => block
            .transactions
            .iter()
            .filter(|hash| *hash != target)
            .cloned()
            .collect(),
        SkipDirective::None => block.transactions.clone(),
    };
    let expected = wanted.len();

    let receipts = run_bounded(wanted, RECEIPT_WORKERS, |tx_hash| {
        let chain = chain.clone();
        async move {
            match chain.transaction_receipt(&tx_hash).await {
                Ok(Some(receipt)) => Ok(receipt),
                Ok(None) => Err(ReceiptFailure {
                    message: format!("receipt not found for {}", tx_hash),
                    tx_hash,
                }),
                Err(e) => Err(ReceiptFailure {
                    message: e.to_string(),
                    tx_hash,
                }),
            }
        }
    })
    .await
    .map_err(|e| match e {
        GroupError::Failed(f) => fail(f.tx_hash, f.message),
        GroupError::Panicked(msg) => fail(String::new(), format!("receipt task panicked: {}", msg)),
    })?;

    let by_hash: HashMap<String, TxReceipt> = receipts
        .into_iter()
        .map(|r| (r.tx_hash.clone(), r))
        .collect();

    if by_hash.len() != expected {
        return Err(fail(
            String::new(),
            format!("expected {} receipts, got {}", expected, by_hash.len()),
        ));
    }

    tracing::debug!(
        "Fetched {} receipts for block {}",
        by_hash.len(),
        block.number
    );
    Ok(by_hash)
}
