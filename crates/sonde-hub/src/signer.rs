//! Persistence for the hub's dispatcher-frame signing key (spec.md §4.D).
//!
//! The CA keypair lives in its own `hub_ca` row (`sonde-enrollment::bootstrap_ca`);
//! the Ed25519 message signer is a separate secret, sealed the same way,
//! stored as a freeform `hub_settings` entry since it has no table of its own.

use anyhow::{Context, Result};
use sonde_crypto::{MessageSigner, SecretCipher};
use sonde_store::Store;

pub const SIGNER_SETTING_KEY: &str = "message_signer_seed_enc";

/// Loads the persisted signer, minting and saving a fresh one on first boot.
pub fn bootstrap_message_signer(store: &Store, cipher: &SecretCipher) -> Result<MessageSigner> {
    if let Some(sealed) = store.get_hub_setting(SIGNER_SETTING_KEY)? {
        let seed = cipher.open(&sealed).context("failed to decrypt message signer seed")?;
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| anyhow::anyhow!("message signer seed is not 32 bytes"))?;
        return Ok(MessageSigner::from_bytes(&seed));
    }

    let signer = MessageSigner::generate();
    let sealed = cipher.seal(&signer.to_bytes())?;
    store.set_hub_setting(SIGNER_SETTING_KEY, &sealed)?;
    Ok(signer)
}
