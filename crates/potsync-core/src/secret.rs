//! Device secret codec.
//!
//! A device identity secret has three representations:
//!
//! - raw 32 bytes (key material),
//! - 64 lowercase hex characters (the plaintext stored encrypted in a pot
//!   payload),
//! - a self-describing bech32 string with the `nsec` prefix (the export and
//!   import format).
//!
//! The hex form is a fixed-width contract: anything that is not exactly 64
//! lowercase hex characters is rejected, never coerced. The bech32 form is
//! accepted wherever a decrypted plaintext is consumed, since older writers
//! stored the secret in that encoding.

use bech32::{Bech32, Hrp};

use crate::error::{PotSyncError, PotSyncResult};
use crate::signer::Signer;
use crate::types::PlantPot;

/// Length of a raw device secret in bytes.
pub const SECRET_LEN: usize = 32;
/// Length of the hex-encoded device secret.
pub const SECRET_HEX_LEN: usize = 64;

/// Human-readable part of the bech32 secret encoding.
const SECRET_HRP: &str = "nsec";

/// Encode raw secret bytes as lowercase hex.
pub fn bytes_to_hex(bytes: &[u8; SECRET_LEN]) -> String {
    hex::encode(bytes)
}

/// Decode a 64-character lowercase hex secret into raw bytes.
///
/// Uppercase input is rejected: the canonical form is lowercase and callers
/// must not rely on coercion.
pub fn hex_to_bytes(s: &str) -> PotSyncResult<[u8; SECRET_LEN]> {
    if s.len() != SECRET_HEX_LEN
        || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    {
        return Err(PotSyncError::Format(format!(
            "device secret must be {} lowercase hex characters, got {} characters",
            SECRET_HEX_LEN,
            s.len()
        )));
    }
    let decoded = hex::decode(s)
        .map_err(|e| PotSyncError::Format(format!("invalid hex secret: {}", e)))?;
    let mut out = [0u8; SECRET_LEN];
    out.copy_from_slice(&decoded);
    Ok(out)
}

/// Encode a raw secret as a self-describing bech32 string (`nsec1...`).
pub fn encode_bech32(bytes: &[u8; SECRET_LEN]) -> String {
    let hrp = Hrp::parse(SECRET_HRP).expect("static HRP is valid");
    bech32::encode::<Bech32>(hrp, bytes).expect("32-byte secret fits bech32 limits")
}

/// Decode a bech32 secret string back into raw bytes.
///
/// Rejects a wrong prefix or a payload that is not exactly 32 bytes.
pub fn decode_bech32(s: &str) -> PotSyncResult<[u8; SECRET_LEN]> {
    let (hrp, data) =
        bech32::decode(s).map_err(|e| PotSyncError::Format(format!("invalid bech32: {}", e)))?;
    let expected = Hrp::parse(SECRET_HRP).expect("static HRP is valid");
    if hrp != expected {
        return Err(PotSyncError::Format(format!(
            "unexpected bech32 prefix {}",
            hrp
        )));
    }
    if data.len() != SECRET_LEN {
        return Err(PotSyncError::Format(format!(
            "bech32 secret must carry {} bytes, got {}",
            SECRET_LEN,
            data.len()
        )));
    }
    let mut out = [0u8; SECRET_LEN];
    out.copy_from_slice(&data);
    Ok(out)
}

/// Normalize a decrypted secret plaintext to canonical lowercase hex.
///
/// Accepts the hex form and the bech32 form (older records stored either);
/// everything else is a [`PotSyncError::Format`].
pub fn normalize_secret(plaintext: &str) -> PotSyncResult<String> {
    if plaintext.starts_with("nsec1") {
        return Ok(bytes_to_hex(&decode_bech32(plaintext)?));
    }
    hex_to_bytes(plaintext).map(|bytes| bytes_to_hex(&bytes))
}

/// A decrypted device secret in both export representations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretExport {
    /// Canonical lowercase hex form.
    pub hex: String,
    /// Self-describing bech32 form (`nsec1...`).
    pub bech32: String,
}

impl SecretExport {
    /// Build both representations from the canonical hex form.
    pub fn from_hex(hex_secret: &str) -> PotSyncResult<Self> {
        let bytes = hex_to_bytes(hex_secret)?;
        Ok(Self {
            hex: bytes_to_hex(&bytes),
            bech32: encode_bech32(&bytes),
        })
    }
}

/// Decrypt the device secret stored in a plant pot payload.
///
/// Drives the owner signer's secret-box capability and enforces the
/// fixed-width plaintext contract. Fails with
/// [`PotSyncError::Decryption`] when the capability rejects the ciphertext
/// and with [`PotSyncError::Format`] when the plaintext is not a valid
/// secret encoding.
pub async fn decrypt_device_secret<S: Signer>(
    owner_signer: &S,
    pot: &PlantPot,
) -> PotSyncResult<String> {
    let owner = owner_signer.public_id();
    let plaintext = owner_signer.decrypt(&owner, &pot.record.payload).await?;
    normalize_secret(&plaintext)
}
