//! Cache entry wrapper for the in-memory storages.

use std::time::{Duration, Instant};

/// A serialized payload together with its absolute expiry instant.
///
/// `expires_at` of `None` means the entry never expires. Entries are only
/// mutated by being re-inserted; a refreshed TTL is never implicit.
#[derive(Clone, Debug)]
pub(crate) struct CacheEntry {
    pub payload: Vec<u8>,
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    /// Creates an entry expiring `ttl` from now, or never for `None`.
    pub fn new(payload: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            payload,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    /// Returns true once the expiry instant has passed.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Approximate heap footprint of this entry in bytes.
    pub fn approx_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.payload.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fresh_entry_not_expired() {
        let entry = CacheEntry::new(b"data".to_vec(), Some(Duration::from_secs(10)));
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_expires() {
        let entry = CacheEntry::new(b"data".to_vec(), Some(Duration::from_millis(50)));
        thread::sleep(Duration::from_millis(80));
        assert!(entry.is_expired());
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let entry = CacheEntry::new(b"data".to_vec(), None);
        thread::sleep(Duration::from_millis(20));
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_approx_size_includes_payload() {
        let entry = CacheEntry::new(vec![0u8; 128], None);
        assert!(entry.approx_size() >= 128);
    }
}
