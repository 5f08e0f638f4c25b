use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::TransferError;

/// SHA-256 of a short in-memory value, hex-encoded. Used to turn a shared
/// secret into the `Auth` header value.
pub fn hash_hex(data: impl AsRef<[u8]>) -> String {
    let digest = Sha256::digest(data.as_ref());
    hex::encode(digest)
}

/// SHA-256 of an entire file's contents, hex-encoded. Reads in 64 KiB
/// chunks so it doesn't need to hold the whole file in memory.
pub async fn file_sha256(path: impl AsRef<std::path::Path>) -> Result<String, TransferError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
