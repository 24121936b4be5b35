use sha2::{Digest, Sha256};

/// Content hash used for change detection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `len` hex characters, for file names
    pub fn short(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short hex hash of a string, used for deterministic chunk and asset names
pub fn short_hash(input: &str, len: usize) -> String {
    Fingerprint::of(input.as_bytes()).short(len).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = Fingerprint::of(b"export const a = 1;");
        let b = Fingerprint::of(b"export const a = 2;");
        assert_ne!(a, b);
        assert_eq!(a, Fingerprint::of(b"export const a = 1;"));
    }

    #[test]
    fn test_short_hash_length() {
        assert_eq!(short_hash("entry", 8).len(), 8);
    }
}
