//! Integrity verification (C6): publisher-key match and SHA-256
//! content hashing, both under a single deadline.

use sha2::{Digest, Sha256};
use tokio::time::timeout;
use tracing::warn;

use crate::config::Config;
use crate::error::{Error, Stage};
use crate::event::{asset_mime, asset_sha256_tag, NwebEvent};

const CODE_MIMES: [&str; 4] = [
    "text/html",
    "text/css",
    "application/javascript",
    "text/javascript",
];

/// Verifies every asset's publisher key and, where present (or
/// required by MIME), its SHA-256 hash, bounded by `config.sri_deadline`.
pub async fn verify_assets(
    assets: &[NwebEvent],
    bootstrap_pubkey_hex: &str,
    config: &Config,
) -> Result<(), Error> {
    match timeout(config.sri_deadline, verify_assets_inner(assets, bootstrap_pubkey_hex)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            stage: Stage::Integrity,
        }),
    }
}

async fn verify_assets_inner(assets: &[NwebEvent], bootstrap_pubkey_hex: &str) -> Result<(), Error> {
    for asset in assets {
        if !asset.pubkey.eq_ignore_ascii_case(bootstrap_pubkey_hex) {
            return Err(Error::WrongAuthor {
                event_id: asset.id.clone(),
            });
        }

        let mime = asset_mime(asset).unwrap_or("application/octet-stream");

        match asset_sha256_tag(asset) {
            Some(expected) => {
                let actual = sha256_hex(asset.content.as_bytes());
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(Error::IntegrityFailure {
                        event_id: asset.id.clone(),
                        mime: mime.to_string(),
                        reason: "sha256 mismatch".to_string(),
                    });
                }
            }
            None => {
                if CODE_MIMES.contains(&mime) {
                    return Err(Error::IntegrityFailure {
                        event_id: asset.id.clone(),
                        mime: mime.to_string(),
                        reason: "missing x-tag for code asset".to_string(),
                    });
                }
                warn!(event_id = %asset.id, %mime, "asset missing x-tag, accepting");
            }
        }
    }

    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
