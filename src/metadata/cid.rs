//! Content identifiers for on-chain multihash digests.

use crate::chain::Multihash;

/// CIDv0 string for a multihash: base58btc over `hash_fn || size || digest`.
pub fn multihash_to_cid(multihash: &Multihash) -> String {
    let size = usize::from(multihash.size).min(multihash.digest.len());
    let mut buf = Vec::with_capacity(2 + size);
    buf.push(multihash.hash_fn);
    buf.push(multihash.size);
    buf.extend_from_slice(&multihash.digest[..size]);
    bs58::encode(buf).into_string()
}
