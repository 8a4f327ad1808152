use crate::crypto::HashAlgorithm;
use sha1::Sha1;
use sha2::Sha256;

/// Produces the digest of the concatenation of the given inputs.
pub fn digest_slices<I, T>(hash_alg: HashAlgorithm, inputs: I) -> Box<[u8]>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    use digest::Digest;

    match hash_alg {
        HashAlgorithm::Sha1 => {
            let mut hasher = Sha1::new();
            for input in inputs {
                hasher.update(input.as_ref());
            }
            Box::from(&hasher.finalize()[..])
        }
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            for input in inputs {
                hasher.update(input.as_ref());
            }
            Box::from(&hasher.finalize()[..])
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HashStatus {
    AllConsumed, // input was digested entirely
    Truncated,   // input was only partially digested, the rest was dropped
}

/// A digest accumulator with an optional input byte budget (the *l=* tag).
///
/// Once the budget is used up any further input is dropped and the hasher
/// is done.
pub struct CountingHasher {
    digest: Box<dyn digest::DynDigest + Send>,
    length: Option<u64>,
    bytes_written: u64,
}

impl CountingHasher {
    pub fn new(hash_alg: HashAlgorithm, length: Option<u64>) -> Self {
        let digest: Box<dyn digest::DynDigest + Send> = match hash_alg {
            HashAlgorithm::Sha1 => Box::new(Sha1::default()),
            HashAlgorithm::Sha256 => Box::new(Sha256::default()),
        };

        Self {
            digest,
            length,
            bytes_written: 0,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) -> HashStatus {
        match self.length {
            Some(len) => {
                let remaining = len - self.bytes_written;

                if remaining >= bytes.len() as u64 {
                    self.digest.update(bytes);
                    self.bytes_written += bytes.len() as u64;
                    HashStatus::AllConsumed
                } else {
                    let partial = &bytes[..remaining as usize];
                    self.digest.update(partial);
                    self.bytes_written += partial.len() as u64;
                    HashStatus::Truncated
                }
            }
            None => {
                self.digest.update(bytes);
                self.bytes_written += bytes.len() as u64;
                HashStatus::AllConsumed
            }
        }
    }

    /// Returns the digest and the number of bytes it covers.
    ///
    /// A body shorter than the requested length yields the digest of the
    /// bytes that did arrive; on the verification side this surfaces as a
    /// body hash mismatch, on the signing side the returned count is what
    /// the *l=* tag must declare.
    pub fn finish(self) -> (Box<[u8]>, u64) {
        let bytes = self.digest.finalize();

        (bytes, self.bytes_written)
    }

    pub fn is_done(&self) -> bool {
        matches!(self.length, Some(len) if len == self.bytes_written)
    }
}
