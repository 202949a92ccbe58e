use sha2::{Digest, Sha256};

/// Derive the sortition key for a node at a given election timestamp.
///
/// SHA-256 over `node_id || ':' || timestamp-bits`, first 8 bytes taken as a
/// big-endian u64. The same `(node_id, timestamp)` pair always yields the
/// same key, so any observer can recompute and verify the election ordering.
pub fn sortition_key(node_id: &str, timestamp: f64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(node_id.as_bytes());
    hasher.update(b":");
    hasher.update(timestamp.to_bits().to_be_bytes());
    u64_from_bytes(&hasher.finalize())
}

fn u64_from_bytes(b: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&b[0..8]);
    u64::from_be_bytes(arr)
}

/// Signing provider for leader announcements.
///
/// The protocol only requires that a signature be deterministic and
/// verifiable by every node. Production deployments plug in real asymmetric
/// signing; the simulation uses a keyed-digest signer shared by the cluster.
pub trait Signer: Send + Sync {
    fn sign(&self, payload: &[u8]) -> String;

    fn verify(&self, payload: &[u8], signature: &str) -> bool {
        self.sign(payload) == signature
    }
}

/// Keyed SHA-256 signer: `hex(SHA-256(key || payload))`.
pub struct KeyedSigner {
    key: Vec<u8>,
}

impl KeyedSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }
}

impl Signer for KeyedSigner {
    fn sign(&self, payload: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.key);
        hasher.update(payload);
        hex::encode(hasher.finalize())
    }
}
