//! The cryptographic surface the credential algebra is built on: a keyed MAC, a symmetric
//! cipher, and a one-way binding function.  [CryptoProvider] is a trait so the concrete
//! realization below can be swapped without touching [crate::credential] or [crate::verifier].

use std::fmt::Write as _;

use aes::Aes128;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;
type Aes128Ctr = ctr::Ctr64BE<Aes128>;

/// A secret key, MAC digest, or encryption key, held as raw bytes and scrubbed from memory
/// when dropped.
///
/// Equality is constant-time to avoid leaking key material through a timing side channel.
#[derive(Clone)]
pub struct Secret(Vec<u8>);

impl Secret {
    /// Wrap raw key material, such as a passphrase or a key supplied by an application's own
    /// key store.
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        Secret(bytes.as_ref().to_vec())
    }

    /// Generate a fresh, random 256-bit secret.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        let secret = Secret(bytes.to_vec());
        bytes.zeroize();
        secret
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// A lowercase hex digest of the key material, useful for diagnostics.
    pub fn hexdigest(&self) -> String {
        let mut hexdigest = String::with_capacity(2 * self.0.len());
        for byte in &self.0 {
            write!(&mut hexdigest, "{byte:02x}").expect("writing to a String cannot fail");
        }
        hexdigest
    }

    /// A base64 encoding of the key material, used where a textual form is needed (e.g.
    /// embedding in a diagnostic or a caveat identifier).
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl Eq for Secret {}

impl PartialEq for Secret {
    fn eq(&self, other: &Secret) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl std::hash::Hash for Secret {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let digest = self.hexdigest();
        write!(fmt, "Secret({}...)", &digest[..8.min(digest.len())])
    }
}

/// The abstract cryptographic surface the credential algebra depends on.
///
/// Implementations must be deterministic in `mac` and `bind`, and must satisfy
/// `decrypt(k, encrypt(k, p)) == p` for every key `k` and plaintext `p`.
pub trait CryptoProvider {
    /// Compute a keyed message authentication code over `data`, returning it as a [Secret].
    fn mac(&self, key: &Secret, data: &[u8]) -> Result<Secret, Error>;
    /// Encrypt `plaintext` under `key`.
    fn encrypt(&self, key: &Secret, plaintext: &[u8]) -> Result<Vec<u8>, Error>;
    /// Decrypt `ciphertext` under `key`, recovering a [Secret].
    fn decrypt(&self, key: &Secret, ciphertext: &[u8]) -> Result<Secret, Error>;
    /// A one-way function applied to a discharge credential's signature at bind time.
    fn bind(&self, signature: &Secret) -> Result<Secret, Error>;
}

/// HMAC-SHA-256 keyed MAC, AES-128-CTR symmetric encryption with a key-derived IV, and a
/// binding hash that hashes the signature and interprets the digest as lossy UTF-8.
///
/// The AES-CTR key derivation (repeat/truncate to 16 bytes) and the deterministic,
/// key-derived IV are weak relative to a from-scratch design: an IV must never repeat under a
/// fixed key in CTR mode, and here it always does.  Likewise [bind](CryptoProvider::bind)
/// discards any digest bytes that are not valid UTF-8 rather than keeping them.  Both
/// choices are kept for compatibility with the signature chain this construction produces;
/// a stronger realization of [CryptoProvider] should use an AEAD with a random nonce instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct HmacCtrProvider;

impl HmacCtrProvider {
    fn aes_key_iv(key: &Secret) -> ([u8; 16], [u8; 16]) {
        let raw = key.as_bytes();
        let mut aes_key = [0u8; 16];
        if !raw.is_empty() {
            for (i, slot) in aes_key.iter_mut().enumerate() {
                *slot = raw[i % raw.len()];
            }
        }
        let digest = Sha256::digest(raw);
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&digest[..16]);
        (aes_key, iv)
    }
}

impl CryptoProvider for HmacCtrProvider {
    fn mac(&self, key: &Secret, data: &[u8]) -> Result<Secret, Error> {
        let mut mac = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|e| Error::crypto_failure(format!("hmac key: {e}")))?;
        mac.update(data);
        let digest = mac.finalize().into_bytes();
        Ok(Secret::new(digest.to_vec()))
    }

    fn encrypt(&self, key: &Secret, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let (aes_key, iv) = Self::aes_key_iv(key);
        let mut cipher = Aes128Ctr::new((&aes_key).into(), (&iv).into());
        let mut buf = plaintext.to_vec();
        cipher.apply_keystream(&mut buf);
        Ok(buf)
    }

    fn decrypt(&self, key: &Secret, ciphertext: &[u8]) -> Result<Secret, Error> {
        let (aes_key, iv) = Self::aes_key_iv(key);
        let mut cipher = Aes128Ctr::new((&aes_key).into(), (&iv).into());
        let mut buf = ciphertext.to_vec();
        cipher.apply_keystream(&mut buf);
        Ok(Secret::new(buf))
    }

    fn bind(&self, signature: &Secret) -> Result<Secret, Error> {
        let digest = Sha256::digest(signature.as_bytes());
        let lossy = String::from_utf8_lossy(&digest).into_owned();
        Ok(Secret::new(lossy))
    }
}
