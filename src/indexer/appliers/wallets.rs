use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value as JsonValue;

use crate::db::{DbError, DbOperation, OrderBy, Select, WhereClause};
use crate::indexer::signatures::ownership_message;
use crate::models::{repo, AssociatedWallet, Entity, Versioned, WalletChain};

use super::ApplyContext;

/// Reconcile a user's wallets on `chain` against the `{wallet: {signature}}`
/// map from their metadata.
pub(super) async fn update_associated_wallets(
    ctx: &mut ApplyContext<'_>,
    user_id: i64,
    chain: WalletChain,
    supplied: &JsonValue,
    txhash: &str,
) -> Result<(), DbError> {
    let tx = ctx.tx;
    let empty = serde_json::Map::new();
    let supplied = supplied.as_object().unwrap_or(&empty);
    let user_chain = AssociatedWallet::user_chain_key(user_id, chain);

    // A second update in the same block replaces the first, so reconcile
    // against the rows as they stood before this block.
    tx.execute(DbOperation::delete(
        AssociatedWallet::TABLE,
        user_chain
            .clone()
            .and(WhereClause::eq("blockhash", ctx.block.hash.as_str())),
    ))
    .await?;
    let before = latest_before_block(ctx, user_chain).await?;
    for row in before.values() {
        tx.execute(DbOperation::update(
            AssociatedWallet::TABLE,
            vec![("is_current", true.into())],
            row.row_key(),
        ))
        .await?;
    }
    let previous: BTreeSet<String> = before
        .values()
        .filter(|w| !w.is_delete)
        .map(|w| w.wallet.clone())
        .collect();

    let message = ownership_message(user_id);
    let mut added = BTreeSet::new();
    for (wallet, proof) in supplied {
        let Some(signature) = proof.get("signature").and_then(JsonValue::as_str) else {
            continue;
        };
        if !ctx.verifiers.verify(chain, wallet, &message, signature) {
            tracing::warn!(
                "Rejecting {} wallet {} for user {}: signature does not match",
                chain,
                wallet,
                user_id
            );
            continue;
        }
        if claimed_elsewhere(ctx, user_id, chain, wallet).await? {
            tracing::warn!(
                "Rejecting {} wallet {} for user {}: already associated with another user",
                chain,
                wallet,
                user_id
            );
            continue;
        }
        write_wallet(ctx, user_id, chain, wallet, false, txhash).await?;
        added.insert(wallet.clone());
    }

    for wallet in previous.difference(&added) {
        write_wallet(ctx, user_id, chain, wallet, true, txhash).await?;
    }

    if previous != added {
        ctx.effects.balance_refresh.insert(user_id);
    }
    Ok(())
}

/// Newest row per wallet from blocks before the one being indexed.
async fn latest_before_block(
    ctx: &ApplyContext<'_>,
    user_chain: WhereClause,
) -> Result<BTreeMap<String, AssociatedWallet>, DbError> {
    let rows: Vec<AssociatedWallet> = repo::select(
        ctx.tx,
        Select::from(
            AssociatedWallet::TABLE,
            user_chain.and(WhereClause::lt("blocknumber", ctx.block.number)),
        )
        .order_by(OrderBy::asc("blocknumber")),
    )
    .await?;
    Ok(rows.into_iter().map(|w| (w.wallet.clone(), w)).collect())
}

/// New current version of one wallet key. Wallets this update does not
/// mention keep their existing current row.
async fn write_wallet(
    ctx: &ApplyContext<'_>,
    user_id: i64,
    chain: WalletChain,
    wallet: &str,
    is_delete: bool,
    txhash: &str,
) -> Result<(), DbError> {
    let row = AssociatedWallet {
        meta: ctx.meta(txhash),
        user_id,
        chain,
        wallet: wallet.to_string(),
        is_delete,
    };
    repo::invalidate::<AssociatedWallet>(ctx.tx, row.key()).await?;
    repo::insert(ctx.tx, &row).await
}

async fn claimed_elsewhere(
    ctx: &ApplyContext<'_>,
    user_id: i64,
    chain: WalletChain,
    wallet: &str,
) -> Result<bool, DbError> {
    let owners: Vec<AssociatedWallet> = repo::select_where(
        ctx.tx,
        WhereClause::eq("wallet", wallet)
            .and(WhereClause::eq("chain", chain.as_str()))
            .and(WhereClause::eq("is_current", true))
            .and(WhereClause::eq("is_delete", false)),
    )
    .await?;
    Ok(owners.iter().any(|w| w.user_id != user_id))
}
