use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::chain::{ContractEvent, ReplicaSetEvent, TxReceipt};
use crate::db::DbError;
use crate::models::{repo, UrsmContentNode, User};

use super::{working_copy, ApplierOutput, ApplyContext};

pub async fn apply_replica_sets(
    ctx: &mut ApplyContext<'_>,
    receipts: &[TxReceipt],
) -> Result<ApplierOutput, DbError> {
    let block = ctx.block;
    let mut users: BTreeMap<i64, User> = BTreeMap::new();
    let mut nodes: BTreeMap<i64, UrsmContentNode> = BTreeMap::new();
    let mut output = ApplierOutput::default();

    for receipt in receipts {
        for event in &receipt.events {
            let ContractEvent::ReplicaSet(event) = event else {
                continue;
            };
            match event {
                ReplicaSetEvent::UpdateReplicaSet {
                    user_id,
                    primary_id,
                    secondary_ids,
                    signer,
                } => {
                    let user_id = *user_id;
                    let mut candidate = match users.get(&user_id) {
                        Some(user) => user.clone(),
                        None => {
                            working_copy(
                                ctx.tx,
                                User::key_for(user_id),
                                ctx.meta(&receipt.tx_hash),
                                |meta| User::seed(user_id, meta, block.timestamp),
                            )
                            .await?
                        }
                    };
                    candidate.meta.txhash = receipt.tx_hash.clone();
                    candidate.primary_id = Some(*primary_id);
                    candidate.secondary_ids = Some(JsonValue::from(secondary_ids.clone()));
                    candidate.replica_set_update_signer = Some(signer.to_lowercase());
                    candidate.updated_at = block.timestamp;

                    if let Some(missing) = candidate.missing_required_field() {
                        ctx.skip_transaction(&receipt.tx_hash, "user", user_id, missing)
                            .await?;
                        continue;
                    }
                    tracing::debug!(
                        "User {} replica set is now primary {} secondaries {:?}",
                        user_id,
                        primary_id,
                        secondary_ids
                    );
                    users.insert(user_id, candidate);
                    output.ids.insert(user_id);
                    output.changed += 1;
                }
                ReplicaSetEvent::AddOrUpdateContentNode {
                    cnode_sp_id,
                    delegate_owner_wallet,
                    proposer_sp_ids,
                    proposer_wallets,
                } => {
                    let sp_id = *cnode_sp_id;
                    let mut node = match nodes.remove(&sp_id) {
                        Some(node) => node,
                        None => {
                            working_copy(
                                ctx.tx,
                                UrsmContentNode::key_for(sp_id),
                                ctx.meta(&receipt.tx_hash),
                                |meta| UrsmContentNode {
                                    meta,
                                    cnode_sp_id: sp_id,
                                    ..Default::default()
                                },
                            )
                            .await?
                        }
                    };
                    let [first, second, third] = proposer_wallets;
                    node.meta.txhash = receipt.tx_hash.clone();
                    node.delegate_owner_wallet = delegate_owner_wallet.clone();
                    node.proposer_sp_ids = proposer_sp_ids.clone();
                    node.proposer_1_delegate_owner_wallet = first.clone();
                    node.proposer_2_delegate_owner_wallet = second.clone();
                    node.proposer_3_delegate_owner_wallet = third.clone();
                    nodes.insert(sp_id, node);
                    output.changed += 1;
                }
            }
        }
    }

    let user_versions: Vec<User> = users.into_values().collect();
    repo::flush_versions(ctx.tx, &user_versions).await?;
    let node_versions: Vec<UrsmContentNode> = nodes.into_values().collect();
    repo::flush_versions(ctx.tx, &node_versions).await?;
    Ok(output)
}
