//! Ownership proofs for wallets a user associates through metadata.

use std::sync::Arc;

use alloy_primitives::Signature as EthSignature;
use ed25519_dalek::{Signature as SolSignature, Verifier, VerifyingKey};

use crate::models::WalletChain;

/// Checks that `signature` over `message` was produced by `wallet`.
pub trait WalletSignatureVerifier: Send + Sync {
    fn verify(&self, wallet: &str, message: &str, signature: &str) -> bool;
}

/// Message every associated wallet signs.
pub fn ownership_message(user_id: i64) -> String {
    format!("AudiusUserID:{}", user_id)
}

fn decode_hex(value: &str) -> Option<Vec<u8>> {
    hex::decode(value.trim_start_matches("0x")).ok()
}

/// EIP-191 personal-sign: recover the signer address and compare.
pub struct EthPersonalSignVerifier;

impl WalletSignatureVerifier for EthPersonalSignVerifier {
    fn verify(&self, wallet: &str, message: &str, signature: &str) -> bool {
        let Some(bytes) = decode_hex(signature) else {
            return false;
        };
        let Ok(signature) = EthSignature::try_from(bytes.as_slice()) else {
            return false;
        };
        match signature.recover_address_from_msg(message.as_bytes()) {
            Ok(signer) => signer.to_string().eq_ignore_ascii_case(wallet),
            Err(e) => {
                tracing::debug!("Failed to recover signer for {}: {}", wallet, e);
                false
            }
        }
    }
}

/// ed25519 signature against a base58 public key.
pub struct SolEd25519Verifier;

impl WalletSignatureVerifier for SolEd25519Verifier {
    fn verify(&self, wallet: &str, message: &str, signature: &str) -> bool {
        let Ok(key_bytes) = bs58::decode(wallet).into_vec() else {
            return false;
        };
        let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Some(sig_bytes) = decode_hex(signature) else {
            return false;
        };
        let Ok(signature) = SolSignature::from_slice(&sig_bytes) else {
            return false;
        };
        key.verify(message.as_bytes(), &signature).is_ok()
    }
}

#[derive(Clone)]
pub struct WalletVerifiers {
    eth: Arc<dyn WalletSignatureVerifier>,
    sol: Arc<dyn WalletSignatureVerifier>,
}

impl Default for WalletVerifiers {
    fn default() -> Self {
        Self {
            eth: Arc::new(EthPersonalSignVerifier),
            sol: Arc::new(SolEd25519Verifier),
        }
    }
}

impl WalletVerifiers {
    pub fn new(
        eth: Arc<dyn WalletSignatureVerifier>,
        sol: Arc<dyn WalletSignatureVerifier>,
    ) -> Self {
        Self { eth, sol }
    }

    pub fn verify(&self, chain: WalletChain, wallet: &str, message: &str, signature: &str) -> bool {
        match chain {
            WalletChain::Eth => self.eth.verify(wallet, message, signature),
            WalletChain::Sol => self.sol.verify(wallet, message, signature),
        }
    }
}
