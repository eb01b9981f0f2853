//! File content hashing.

use std::path::Path;

use md5::Md5;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use skein_model::{FileContents, HashFunction};

use crate::StorageError;

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Compute the content fingerprint of a local file.
///
/// Identical bytes always produce an identical (function, value) pair.
pub async fn hash_file(
  path: &Path,
  hash_function: HashFunction,
) -> Result<FileContents, StorageError> {
  let hash_value = match hash_function {
    HashFunction::Md5 => digest_file::<Md5>(path).await?,
    HashFunction::Sha256 => digest_file::<Sha256>(path).await?,
  };
  Ok(FileContents {
    hash_function,
    hash_value,
  })
}

async fn digest_file<D: Digest>(path: &Path) -> Result<String, StorageError> {
  let mut file = File::open(path).await.map_err(|e| StorageError::io(path, e))?;
  let mut hasher = D::new();
  let mut buffer = vec![0u8; READ_BUFFER_BYTES];
  loop {
    let read = file
      .read(&mut buffer)
      .await
      .map_err(|e| StorageError::io(path, e))?;
    if read == 0 {
      break;
    }
    hasher.update(&buffer[..read]);
  }
  let digest = hasher.finalize();
  Ok(digest.iter().map(|byte| format!("{:02x}", byte)).collect())
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  fn write_temp(content: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content).unwrap();
    file.flush().unwrap();
    file
  }

  #[tokio::test]
  async fn md5_matches_known_vector() {
    let file = write_temp(b"hello\n");
    let contents = hash_file(file.path(), HashFunction::Md5).await.unwrap();
    assert_eq!(contents.hash_function, HashFunction::Md5);
    assert_eq!(contents.hash_value, "b1946ac92492d2347c6235b4d2611184");
  }

  #[tokio::test]
  async fn sha256_matches_known_vector() {
    let file = write_temp(b"hello\n");
    let contents = hash_file(file.path(), HashFunction::Sha256).await.unwrap();
    assert_eq!(
      contents.hash_value,
      "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
    );
  }

  #[tokio::test]
  async fn identical_bytes_hash_identically() {
    let a = write_temp(b"same content");
    let b = write_temp(b"same content");
    let hash_a = hash_file(a.path(), HashFunction::Md5).await.unwrap();
    let hash_b = hash_file(b.path(), HashFunction::Md5).await.unwrap();
    assert_eq!(hash_a, hash_b);
  }

  #[tokio::test]
  async fn missing_file_is_an_io_error() {
    let err = hash_file(Path::new("/no/such/file"), HashFunction::Md5)
      .await
      .unwrap_err();
    assert!(matches!(err, StorageError::Io { .. }));
  }
}
