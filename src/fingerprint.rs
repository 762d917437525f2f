use sha2::{Digest as _, Sha256};
use std::io::Read;

/// Fixed-width content fingerprint stored in the manifest's digest column.
pub type Digest = [u8; 8];

/// Read chunk size for fingerprint computation.
const CHUNK_SIZE: usize = 4096;

/// Streaming fingerprint accumulator.
///
/// The fingerprint is SHA-256 truncated to the first 8 octets. The exact
/// function matters less than its stability: every record in one manifest is
/// fingerprinted the same way for the manifest's whole lifetime.
pub struct Digester {
    hasher: Sha256,
}

impl Digester {
    pub fn new() -> Self {
        Digester {
            hasher: Sha256::new(),
        }
    }

    pub fn update(&mut self, buf: &[u8]) {
        self.hasher.update(buf);
    }

    pub fn finish(self) -> Digest {
        let full = self.hasher.finalize();
        let mut digest = [0u8; 8];
        digest.copy_from_slice(&full[..8]);
        digest
    }
}

impl Default for Digester {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the fingerprint of everything `reader` yields.
///
/// Reads are chunked; any read error aborts the computation and the caller
/// must discard the whole record.
pub fn digest_reader<R: Read>(mut reader: R) -> std::io::Result<Digest> {
    let mut digester = Digester::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        digester.update(&buffer[..bytes_read]);
    }

    Ok(digester.finish())
}

/// Renders a digest as fixed-width lowercase hex for diagnostics.
pub fn digest_hex(digest: &Digest) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
