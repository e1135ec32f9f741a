use cafs_types::Key;
use multihash::Multihash;
use sha2::{Digest, Sha256};

/// Multihash code for SHA2-256.
pub const SHA2_256: u64 = 0x12;

/// Length in bytes of a SHA2-256 digest.
pub const SHA2_256_LEN: usize = 32;

/// Largest digest the envelope type can carry.
const MAX_DIGEST: usize = 64;

/// Content hasher producing base58 multihash tokens.
///
/// The token for a byte string is `base58(varint(code) ‖ varint(len) ‖
/// digest)`. Changing the algorithm changes every key, so the hasher is a
/// fixed constant rather than a configurable value.
pub struct ContentHasher {
    code: u64,
}

impl ContentHasher {
    /// SHA2-256 hasher; the only algorithm the stores use.
    pub const SHA2_256: Self = Self { code: SHA2_256 };

    /// Raw SHA-256 digest without the envelope (for low-level use).
    pub fn raw_hash(data: &[u8]) -> [u8; SHA2_256_LEN] {
        let mut out = [0u8; SHA2_256_LEN];
        out.copy_from_slice(&Sha256::digest(data));
        out
    }

    /// Multihash envelope bytes for `data`.
    pub fn multihash(&self, data: &[u8]) -> Result<Vec<u8>, HasherError> {
        let digest = Self::raw_hash(data);
        let mh = Multihash::<MAX_DIGEST>::wrap(self.code, &digest)
            .map_err(|e| HasherError::Envelope(e.to_string()))?;
        Ok(mh.to_bytes())
    }

    /// Base58 token for `data`.
    pub fn token(&self, data: &[u8]) -> Result<String, HasherError> {
        Ok(bs58::encode(self.multihash(data)?).into_string())
    }

    /// Full `/<prefix>/<token>` key for `data`.
    pub fn key(&self, prefix: &str, data: &[u8]) -> Result<Key, HasherError> {
        Ok(Key::from_parts(prefix, &self.token(data)?))
    }

    /// Decode a token back into its digest, checking the envelope.
    pub fn decode(&self, token: &str) -> Result<Vec<u8>, HasherError> {
        let bytes = bs58::decode(token)
            .into_vec()
            .map_err(|e| HasherError::Base58(e.to_string()))?;
        let mh = Multihash::<MAX_DIGEST>::from_bytes(&bytes)
            .map_err(|e| HasherError::Envelope(e.to_string()))?;
        if mh.code() != self.code {
            return Err(HasherError::UnexpectedCode {
                expected: self.code,
                actual: mh.code(),
            });
        }
        Ok(mh.digest().to_vec())
    }

    /// Verify that `data` hashes to the token carried by `key`.
    pub fn verify(&self, data: &[u8], key: &Key) -> bool {
        match key.normalize().token() {
            Some(token) => self
                .decode(token)
                .map(|digest| digest == Self::raw_hash(data))
                .unwrap_or(false),
            None => false,
        }
    }

    /// Serialize child keys into the buffer a directory key is hashed over.
    ///
    /// Each key string is followed by a single `\n`, in the given order.
    pub fn directory_buffer<'a>(keys: impl IntoIterator<Item = &'a Key>) -> Vec<u8> {
        let mut buf = Vec::new();
        for key in keys {
            buf.extend_from_slice(key.as_str().as_bytes());
            buf.push(b'\n');
        }
        buf
    }

    /// The multihash code used by this hasher.
    pub fn code(&self) -> u64 {
        self.code
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("multihash envelope error: {0}")]
    Envelope(String),

    #[error("invalid base58 token: {0}")]
    Base58(String),

    #[error("unexpected hash code: expected {expected:#x}, got {actual:#x}")]
    UnexpectedCode { expected: u64, actual: u64 },
}
