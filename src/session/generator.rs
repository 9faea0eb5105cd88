use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use sha1::{Digest, Sha1};

/// Length of an encoded SHA-1 digest without padding.
pub const SESSION_ID_LEN: usize = 27;

/// Produces and checks session identifiers.
pub trait IdGenerator: Send + Sync {
    fn generate(&self, remote_addr: Option<&str>) -> String;
    fn is_valid(&self, id: &str) -> bool;
}

/// SHA-1 over a server key, the client address, the current time and 24
/// random bytes.
#[derive(Debug, Clone)]
pub struct Sha1Generator {
    hash_key: String,
}

impl Sha1Generator {
    pub fn new(hash_key: impl Into<String>) -> Self {
        Self {
            hash_key: hash_key.into(),
        }
    }
}

impl IdGenerator for Sha1Generator {
    fn generate(&self, remote_addr: Option<&str>) -> String {
        let mut random = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut random);

        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();

        let mut hasher = Sha1::new();
        hasher.update(self.hash_key.as_bytes());
        hasher.update(remote_addr.unwrap_or_default().as_bytes());
        hasher.update(nanos.to_string().as_bytes());
        hasher.update(hex::encode(random).as_bytes());

        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    fn is_valid(&self, id: &str) -> bool {
        id.len() == SESSION_ID_LEN
    }
}
