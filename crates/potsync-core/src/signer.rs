//! Signing and secret-box capabilities.
//!
//! The engine treats signing and encryption as opaque capabilities behind
//! the [`Signer`] trait: the owner's capability may live in an external
//! wallet, the device's is recovered from the secret stored in the pot
//! payload. [`LocalSigner`] is the in-process implementation used for
//! device identities and for tests: Ed25519 signatures over the canonical
//! record id, and a ChaCha20-Poly1305 secret box keyed through an
//! HKDF-derived x25519 conversation key.

use std::future::Future;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey as ExchangePublic, StaticSecret};

use crate::error::{PotSyncError, PotSyncResult};
use crate::record::{PublicId, Record, RecordDraft};
use crate::secret;

/// Secret-box wire version byte.
const SECRETBOX_VERSION: u8 = 1;
/// Nonce size for ChaCha20-Poly1305 (12 bytes).
const NONCE_SIZE: usize = 12;

/// Signing + secret-box capability bound to one identity.
///
/// `encrypt`/`decrypt` form the secret box used to escrow device secrets:
/// the owner encrypts the device secret to their own identity when creating
/// a pot and decrypts it back to mutate the pot later. The methods are
/// async because real capabilities (wallet extensions, remote signers)
/// suspend.
pub trait Signer: Send + Sync {
    /// Public identity of this signer (hex).
    fn public_id(&self) -> PublicId;

    /// Sign a draft, producing a complete record authored by this identity.
    fn sign(&self, draft: RecordDraft) -> impl Future<Output = PotSyncResult<Record>> + Send;

    /// Encrypt plaintext to the given identity.
    fn encrypt(
        &self,
        to: &PublicId,
        plaintext: &str,
    ) -> impl Future<Output = PotSyncResult<String>> + Send;

    /// Decrypt ciphertext from the given identity.
    fn decrypt(
        &self,
        from: &PublicId,
        ciphertext: &str,
    ) -> impl Future<Output = PotSyncResult<String>> + Send;
}

/// In-process signer over a 32-byte seed.
///
/// Device identities are always local signers (the device secret travels in
/// the pot payload); owner identities use one in tests and in the CLI.
pub struct LocalSigner {
    /// Ed25519 signing key (record signatures).
    signing: SigningKey,
    /// x25519 secret for the secret-box conversation key, derived from the
    /// same seed.
    exchange: StaticSecret,
}

impl LocalSigner {
    /// Generate a signer with a fresh random seed.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed).expect("Failed to get random bytes");
        Self::from_secret_bytes(&seed)
    }

    /// Build a signer from raw secret bytes.
    pub fn from_secret_bytes(seed: &[u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(seed);
        let exchange = StaticSecret::from(derive_exchange_seed(seed));
        Self { signing, exchange }
    }

    /// Build a signer from a 64-character lowercase hex secret.
    pub fn from_secret_hex(hex_secret: &str) -> PotSyncResult<Self> {
        Ok(Self::from_secret_bytes(&secret::hex_to_bytes(hex_secret)?))
    }

    /// The raw secret bytes.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// The secret as lowercase hex.
    pub fn secret_hex(&self) -> String {
        secret::bytes_to_hex(&self.secret_bytes())
    }

    /// Conversation key for a peer identity.
    ///
    /// Only the self-conversation is derivable locally: it needs no key
    /// material beyond our own seed, and it is the only conversation the
    /// watering flow uses (the owner escrows the device secret to
    /// themselves). Other peers would require an exchange-key lookup that
    /// belongs to the external capability, not here.
    fn conversation_key(&self, peer: &PublicId) -> PotSyncResult<[u8; 32]> {
        if *peer != self.public_id() {
            return Err(PotSyncError::Signer(format!(
                "no conversation key for peer {}",
                peer
            )));
        }
        let own_public = ExchangePublic::from(&self.exchange);
        let shared = self.exchange.diffie_hellman(&own_public);
        let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut okm = [0u8; 32];
        hk.expand(b"potsync/secretbox/v1", &mut okm)
            .map_err(|e| PotSyncError::Signer(format!("conversation key derivation: {}", e)))?;
        Ok(okm)
    }
}

impl Signer for LocalSigner {
    fn public_id(&self) -> PublicId {
        PublicId::from_bytes(self.signing.verifying_key().as_bytes())
    }

    async fn sign(&self, draft: RecordDraft) -> PotSyncResult<Record> {
        let identity = self.public_id();
        let id = Record::compute_id(
            &identity,
            draft.created_at,
            draft.kind,
            &draft.tags,
            &draft.payload,
        );
        let id_bytes = hex::decode(&id).expect("computed id is valid hex");
        let signature = self.signing.sign(&id_bytes);
        Ok(Record {
            id,
            identity,
            kind: draft.kind,
            created_at: draft.created_at,
            tags: draft.tags,
            payload: draft.payload,
            signature: hex::encode(signature.to_bytes()),
        })
    }

    async fn encrypt(&self, to: &PublicId, plaintext: &str) -> PotSyncResult<String> {
        let key = self.conversation_key(to)?;
        let cipher = ChaCha20Poly1305::new((&key).into());

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| PotSyncError::Signer(format!("encryption failed: {}", e)))?;

        let mut wire = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
        wire.push(SECRETBOX_VERSION);
        wire.extend_from_slice(&nonce_bytes);
        wire.extend_from_slice(&ciphertext);
        Ok(base64_encode(&wire))
    }

    async fn decrypt(&self, from: &PublicId, ciphertext: &str) -> PotSyncResult<String> {
        let key = self
            .conversation_key(from)
            .map_err(|e| PotSyncError::Decryption(e.to_string()))?;
        let wire = base64_decode(ciphertext)
            .map_err(|e| PotSyncError::Decryption(format!("invalid ciphertext encoding: {}", e)))?;
        if wire.len() < 1 + NONCE_SIZE {
            return Err(PotSyncError::Decryption(
                "ciphertext too short to contain nonce".to_string(),
            ));
        }
        if wire[0] != SECRETBOX_VERSION {
            return Err(PotSyncError::Decryption(format!(
                "unsupported secret box version {}",
                wire[0]
            )));
        }

        let cipher = ChaCha20Poly1305::new((&key).into());
        let nonce = Nonce::from_slice(&wire[1..1 + NONCE_SIZE]);
        let plaintext = cipher
            .decrypt(nonce, &wire[1 + NONCE_SIZE..])
            .map_err(|_| PotSyncError::Decryption("ciphertext rejected".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| PotSyncError::Decryption("plaintext is not UTF-8".to_string()))
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("public_id", &self.public_id())
            .finish_non_exhaustive()
    }
}

/// Verify a record's signature against its identity and canonical id.
///
/// Returns `false` for any malformed component; shape validation stays the
/// job of [`validate`](crate::validate).
pub fn verify_record(record: &Record) -> bool {
    let expected_id = Record::compute_id(
        &record.identity,
        record.created_at,
        record.kind,
        &record.tags,
        &record.payload,
    );
    if expected_id != record.id {
        return false;
    }
    let Ok(verifying) = VerifyingKey::from_bytes(&record.identity.to_bytes()) else {
        return false;
    };
    let Ok(id_bytes) = hex::decode(&record.id) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(&record.signature) else {
        return false;
    };
    let sig_array: [u8; 64] = match sig_bytes.as_slice().try_into() {
        Ok(arr) => arr,
        Err(_) => return false,
    };
    let signature = ed25519_dalek::Signature::from_bytes(&sig_array);
    verifying.verify(&id_bytes, &signature).is_ok()
}

/// Derive the x25519 exchange seed from the signing seed.
fn derive_exchange_seed(seed: &[u8; 32]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, seed);
    let mut okm = [0u8; 32];
    hk.expand(b"potsync/x25519/v1", &mut okm)
        .expect("32-byte OKM is a valid HKDF length");
    okm
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s)
}
