use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use tracing::{debug, warn};
use zeroize::Zeroize;

use sigil_core::constants::{DEFAULT_CHUNK_BYTES, NONCE_BYTES, OFF_CHAIN_PASSWORD_PREFIX};
use sigil_core::error::SigilError;
use sigil_core::types::now;
use sigil_core::OffChainData;
use sigil_crypto::keypair::KeyPair;
use sigil_crypto::{deterministic_key, open, random_nonce, seal, verify_signature, StreamingHasher};

/// The deterministic password an off-chain file is encrypted under:
/// `OFFCHAIN_<block_number>_<signer_public_key>`, hashed to the AES key.
/// Exposed because encrypted exports record it per block.
pub fn off_chain_password(block_number: u64, signer_public_key: &str) -> String {
    format!("{OFF_CHAIN_PASSWORD_PREFIX}{block_number}_{signer_public_key}")
}

fn file_key(block_number: u64, signer_public_key: &str) -> [u8; 32] {
    deterministic_key(&off_chain_password(block_number, signer_public_key))
}

/// Per-chunk 96-bit nonce: first 8 bytes of the stored base nonce, then
/// the big-endian chunk counter. Unique within a file; the base nonce is
/// fresh per file.
fn chunk_nonce(base: &[u8; NONCE_BYTES], chunk_no: u32) -> [u8; NONCE_BYTES] {
    let mut nonce = [0u8; NONCE_BYTES];
    nonce[..8].copy_from_slice(&base[..8]);
    nonce[8..].copy_from_slice(&chunk_no.to_be_bytes());
    nonce
}

fn aad_bytes(block_number: u64, signer_public_key: &str) -> Vec<u8> {
    format!("{block_number}|{signer_public_key}").into_bytes()
}

fn decode_base_nonce(iv_b64: &str) -> Result<[u8; NONCE_BYTES], SigilError> {
    let bytes = B64
        .decode(iv_b64)
        .map_err(|e| SigilError::InvalidEncoding(format!("off-chain IV: {e}")))?;
    if bytes.len() != NONCE_BYTES {
        return Err(SigilError::InvalidEncoding("off-chain IV length".into()));
    }
    let mut arr = [0u8; NONCE_BYTES];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

// ── OffChainStore ────────────────────────────────────────────────────────────

/// Owner of the off-chain directory. All file creation, reading, and
/// deletion in that directory goes through this store.
///
/// Files are framed sequences of AES-256-GCM chunks
/// (`[u32 chunk_no][u32 ct_len][ciphertext]`), so payloads up to 100 MiB
/// stream through a bounded buffer in both directions.
pub struct OffChainStore {
    dir: PathBuf,
    chunk_size: usize,
}

impl OffChainStore {
    /// Open the store, creating the directory if needed.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, SigilError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            chunk_size: DEFAULT_CHUNK_BYTES,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ── Store ────────────────────────────────────────────────────────────────

    /// Encrypt `plaintext` to a new file and return its metadata.
    pub fn store_bytes(
        &self,
        plaintext: &[u8],
        signer: &KeyPair,
        block_number: u64,
        content_type: Option<&str>,
    ) -> Result<OffChainData, SigilError> {
        self.store_stream(plaintext, signer, block_number, content_type)
    }

    /// Stream `reader` through AES-256-GCM into a new file under the
    /// store directory. On any failure the partial file is removed before
    /// the error surfaces.
    pub fn store_stream<R: Read>(
        &self,
        mut reader: R,
        signer: &KeyPair,
        block_number: u64,
        content_type: Option<&str>,
    ) -> Result<OffChainData, SigilError> {
        let created_at = now();
        let path = self.dir.join(format!("offchain_{block_number}_{created_at}.dat"));
        let key = file_key(block_number, &signer.public_key);
        let base_nonce = random_nonce();
        let aad = aad_bytes(block_number, &signer.public_key);

        let outcome = self.encrypt_to_file(&mut reader, &path, &key, &base_nonce, &aad, content_type);
        let (file_size, data_hash, content_type) = match outcome {
            Ok(v) => v,
            Err(e) => {
                let _ = fs::remove_file(&path);
                return Err(e);
            }
        };

        let signature = match signer.sign(data_hash.to_hex().as_bytes()) {
            Ok(sig) => sig,
            Err(e) => {
                let _ = fs::remove_file(&path);
                return Err(e);
            }
        };

        debug!(block_number, file = %path.display(), bytes = file_size, "off-chain payload stored");
        Ok(OffChainData {
            data_hash,
            signature,
            file_path: path.to_string_lossy().into_owned(),
            file_size,
            encryption_iv: B64.encode(base_nonce),
            created_at,
            content_type,
            signer_public_key: signer.public_key.clone(),
        })
    }

    fn encrypt_to_file<R: Read>(
        &self,
        reader: &mut R,
        path: &Path,
        key: &[u8; 32],
        base_nonce: &[u8; NONCE_BYTES],
        aad: &[u8],
        content_type: Option<&str>,
    ) -> Result<(u64, sigil_core::types::BlockHash, String), SigilError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let mut buf = vec![0u8; self.chunk_size];
        let mut hasher = StreamingHasher::new();
        let mut chunk_no: u32 = 0;
        let mut plain_len: u64 = 0;
        let mut sniffed: Option<String> = content_type.map(str::to_owned);

        loop {
            let n = read_full(reader, &mut buf)?;
            if n == 0 {
                break;
            }
            if chunk_no == 0 && sniffed.is_none() {
                sniffed = Some(crate::content_type::sniff_content_type(&buf[..n]).to_string());
            }
            hasher.update(&buf[..n]);
            plain_len += n as u64;

            let nonce = chunk_nonce(base_nonce, chunk_no);
            let ciphertext = seal(key, &nonce, &buf[..n], aad)?;
            writer.write_all(&chunk_no.to_be_bytes())?;
            writer.write_all(&(ciphertext.len() as u32).to_be_bytes())?;
            writer.write_all(&ciphertext)?;

            buf[..n].zeroize();
            chunk_no = chunk_no
                .checked_add(1)
                .ok_or_else(|| SigilError::Other("off-chain chunk counter overflow".into()))?;
        }

        let file = writer
            .into_inner()
            .map_err(|e| SigilError::Io(e.to_string()))?;
        file.sync_all()?;

        let content_type = sniffed.unwrap_or_else(|| "application/octet-stream".to_string());
        Ok((plain_len, hasher.finalize(), content_type))
    }

    // ── Retrieve / verify ────────────────────────────────────────────────────

    /// Decrypt the whole payload into memory. For large payloads prefer
    /// [`OffChainStore::retrieve_to`].
    pub fn retrieve(
        &self,
        meta: &OffChainData,
        block_number: u64,
    ) -> Result<Vec<u8>, SigilError> {
        let mut out = Vec::with_capacity(meta.file_size as usize);
        self.retrieve_to(meta, block_number, &mut out)?;
        Ok(out)
    }

    /// Stream-decrypt the file into `out`, verifying every chunk's AEAD
    /// tag and, at the end, the plaintext SHA3-256 against
    /// `meta.data_hash`. Returns the plaintext byte count.
    pub fn retrieve_to<W: Write>(
        &self,
        meta: &OffChainData,
        block_number: u64,
        mut out: W,
    ) -> Result<u64, SigilError> {
        let key = file_key(block_number, &meta.signer_public_key);
        let base_nonce = decode_base_nonce(&meta.encryption_iv)?;
        let aad = aad_bytes(block_number, &meta.signer_public_key);

        let file = File::open(&meta.file_path).map_err(|e| {
            SigilError::OffChainIntegrity(format!("cannot open {}: {e}", meta.file_path))
        })?;
        let mut reader = BufReader::new(file);
        let mut hasher = StreamingHasher::new();
        let mut expected_chunk: u32 = 0;
        let mut total: u64 = 0;

        loop {
            let mut header = [0u8; 8];
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let chunk_no = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

            if chunk_no != expected_chunk {
                return Err(SigilError::OffChainIntegrity(format!(
                    "chunk out of order: expected {expected_chunk}, got {chunk_no}"
                )));
            }
            if len > self.chunk_size + 16 {
                return Err(SigilError::OffChainIntegrity(format!(
                    "chunk length {len} exceeds frame limit"
                )));
            }

            let mut ciphertext = vec![0u8; len];
            reader.read_exact(&mut ciphertext).map_err(|e| {
                SigilError::OffChainIntegrity(format!("truncated chunk {chunk_no}: {e}"))
            })?;

            let nonce = chunk_nonce(&base_nonce, chunk_no);
            let mut plaintext = open(&key, &nonce, &ciphertext, &aad)?;
            hasher.update(&plaintext);
            out.write_all(&plaintext)?;
            total += plaintext.len() as u64;
            plaintext.zeroize();

            expected_chunk = expected_chunk
                .checked_add(1)
                .ok_or_else(|| SigilError::Other("off-chain chunk counter overflow".into()))?;
        }

        let recomputed = hasher.finalize();
        if recomputed != meta.data_hash {
            return Err(SigilError::OffChainIntegrity(format!(
                "plaintext hash mismatch: stored {}, recomputed {}",
                meta.data_hash, recomputed
            )));
        }
        Ok(total)
    }

    /// Full integrity check: decrypt (tag verification per chunk), hash
    /// comparison, size comparison, and signature verification of the
    /// data hash under the recorded signer key.
    pub fn verify(&self, meta: &OffChainData, block_number: u64) -> bool {
        let decrypted = match self.retrieve_to(meta, block_number, std::io::sink()) {
            Ok(total) => total,
            Err(e) => {
                warn!(file = %meta.file_path, error = %e, "off-chain verification failed");
                return false;
            }
        };
        if decrypted != meta.file_size {
            warn!(file = %meta.file_path, "off-chain size mismatch");
            return false;
        }
        verify_signature(
            &meta.signer_public_key,
            meta.data_hash.to_hex().as_bytes(),
            &meta.signature,
        )
        .is_ok()
    }

    // ── Delete / sweep ───────────────────────────────────────────────────────

    /// Remove the file. Idempotent: a missing file is success.
    pub fn delete(&self, meta: &OffChainData) -> Result<(), SigilError> {
        match fs::remove_file(&meta.file_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every file in the store directory whose path is not in
    /// `valid_paths`. Returns the number removed.
    pub fn cleanup_orphans(&self, valid_paths: &HashSet<PathBuf>) -> Result<u64, SigilError> {
        let mut removed = 0u64;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if !valid_paths.contains(&path) {
                warn!(file = %path.display(), "removing orphaned off-chain file");
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ── Export / import plumbing ─────────────────────────────────────────────

    /// Copy the encrypted file into `backup_dir` under the canonical
    /// backup name `block_<n>_<original>`. Returns the backup file name.
    pub fn copy_to_backup(
        &self,
        meta: &OffChainData,
        block_number: u64,
        backup_dir: &Path,
    ) -> Result<String, SigilError> {
        let original = Path::new(&meta.file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SigilError::Io(format!("bad off-chain path {}", meta.file_path)))?;
        let backup_name = format!("block_{block_number}_{original}");
        fs::copy(&meta.file_path, backup_dir.join(&backup_name))?;
        Ok(backup_name)
    }

    /// Adopt a backup file into the live directory under a fresh name.
    /// Returns the new live path for the metadata to point at.
    pub fn adopt_file(&self, src: &Path, block_number: u64) -> Result<String, SigilError> {
        let path = self
            .dir
            .join(format!("offchain_{block_number}_{}.dat", now()));
        fs::copy(src, &path)?;
        Ok(path.to_string_lossy().into_owned())
    }
}

/// Fill `buf` from `reader`, tolerating short reads; returns bytes read
/// (0 only at EOF).
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, SigilError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
