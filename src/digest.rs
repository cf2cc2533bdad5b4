//! **Digest** — the hash algorithms the `hash`/`xhash`/`digest` sections
//! record over the acquired media (spec §3/§4.7).
//!
//! The teacher links no hashing crate at all; `totalimage`'s acquisition
//! crates reach for `md-5`/`sha1`/`sha2` directly rather than a generic
//! `digest`-trait abstraction, and this module follows that: one small enum
//! wrapping the three concrete hashers rather than a trait object, since the
//! set of supported algorithms is fixed by the format (spec §3's
//! `Digest::Md5/Sha1/Sha256`).

use md5::Md5;
use sha1::Sha1;
use sha2::Sha256;

use crate::codec::hash_to_hex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    pub fn label(self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha1 => "SHA1",
            DigestAlgorithm::Sha256 => "SHA256",
        }
    }
}

/// Running digest over a stream of chunks, fed incrementally as the
/// acquire/verify workflows walk the media (spec §4.9).
pub enum DigestHasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
}

impl DigestHasher {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        use sha1::Digest as _;
        use sha2::Digest as _;
        use md5::Digest as _;
        match algorithm {
            DigestAlgorithm::Md5 => DigestHasher::Md5(Md5::new()),
            DigestAlgorithm::Sha1 => DigestHasher::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => DigestHasher::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        use sha1::Digest as _;
        use sha2::Digest as _;
        use md5::Digest as _;
        match self {
            DigestHasher::Md5(h) => h.update(bytes),
            DigestHasher::Sha1(h) => h.update(bytes),
            DigestHasher::Sha256(h) => h.update(bytes),
        }
    }

    /// Consumes the hasher, returning the lowercase-hex digest.
    pub fn finalize_hex(self) -> String {
        use sha1::Digest as _;
        use sha2::Digest as _;
        use md5::Digest as _;
        match self {
            DigestHasher::Md5(h) => hash_to_hex(&h.finalize()),
            DigestHasher::Sha1(h) => hash_to_hex(&h.finalize()),
            DigestHasher::Sha256(h) => hash_to_hex(&h.finalize()),
        }
    }
}

/// Runs every algorithm in `algorithms` over the same stream at once, so the
/// acquire workflow can produce `md5`+`sha1`+`sha256` without re-reading the
/// media.
pub struct DigestSet {
    hashers: Vec<(DigestAlgorithm, DigestHasher)>,
}

impl DigestSet {
    pub fn new(algorithms: &[DigestAlgorithm]) -> Self {
        DigestSet {
            hashers: algorithms
                .iter()
                .map(|&a| (a, DigestHasher::new(a)))
                .collect(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for (_, hasher) in &mut self.hashers {
            hasher.update(bytes);
        }
    }

    /// Consumes the set, returning `(algorithm, hex digest)` pairs in the
    /// order the set was constructed with.
    pub fn finalize(self) -> Vec<(DigestAlgorithm, String)> {
        self.hashers
            .into_iter()
            .map(|(algorithm, hasher)| (algorithm, hasher.finalize_hex()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_matches_known_vector() {
        let mut hasher = DigestHasher::new(DigestAlgorithm::Md5);
        hasher.update(b"abc");
        assert_eq!(hasher.finalize_hex(), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn sha1_matches_known_vector() {
        let mut hasher = DigestHasher::new(DigestAlgorithm::Sha1);
        hasher.update(b"abc");
        assert_eq!(hasher.finalize_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn sha256_matches_known_vector() {
        let mut hasher = DigestHasher::new(DigestAlgorithm::Sha256);
        hasher.update(b"abc");
        assert_eq!(
            hasher.finalize_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn digest_set_computes_all_algorithms_in_one_pass() {
        let mut set = DigestSet::new(&[DigestAlgorithm::Md5, DigestAlgorithm::Sha1]);
        set.update(b"abc");
        let results = set.finalize();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, DigestAlgorithm::Md5);
        assert_eq!(results[0].1, "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn update_can_be_called_incrementally() {
        let mut whole = DigestHasher::new(DigestAlgorithm::Sha256);
        whole.update(b"abc");
        let whole_digest = whole.finalize_hex();

        let mut split = DigestHasher::new(DigestAlgorithm::Sha256);
        split.update(b"ab");
        split.update(b"c");
        let split_digest = split.finalize_hex();

        assert_eq!(whole_digest, split_digest);
    }
}
