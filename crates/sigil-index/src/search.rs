use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use sigil_core::error::SigilError;
use sigil_core::index::coarse_bucket;
use sigil_core::types::{BlockHash, Timestamp};
use sigil_offchain::OffChainStore;
use sigil_store::LedgerDb;

use crate::entry::{decrypt_block_payload, decrypt_private_layer};
use crate::extract::validate_term;

// ── Strategies ───────────────────────────────────────────────────────────────

/// The three query strategies, in ascending cost and credential demand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
    /// Public-layer lookup only. Always available.
    FastPublic,
    /// Public layer plus decrypted private layers. Requires a password.
    Encrypted,
    /// Everything, plus decrypted block payloads and off-chain bytes.
    /// Requires a password and the signer key.
    Exhaustive,
}

#[derive(Clone, Debug, Default)]
pub struct SearchOptions {
    /// Requested strategy; `None` means "best available for my credentials".
    pub mode: Option<SearchMode>,
    pub password: Option<String>,
    pub signer_public_key: Option<String>,
}

/// One matched block. Public-mode results never carry private-layer
/// content; `private_snippet` is populated only by the deeper strategies.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchResult {
    pub block_hash: BlockHash,
    pub block_number: u64,
    /// Count of distinct matched terms. Ordering breaks ties by recency
    /// (higher block number first).
    pub score: u32,
    pub category: Option<String>,
    pub bucket_timestamp: Timestamp,
    pub matched_terms: Vec<String>,
    pub private_snippet: Option<String>,
}

#[derive(Default)]
struct Hit {
    block_number: u64,
    category: Option<String>,
    bucket_timestamp: Timestamp,
    matched: BTreeSet<String>,
    private_snippet: Option<String>,
}

// ── SearchEngine ─────────────────────────────────────────────────────────────

/// Strategy-routed search over the two-layer index.
pub struct SearchEngine<'a> {
    db: &'a LedgerDb,
    offchain: &'a OffChainStore,
}

impl<'a> SearchEngine<'a> {
    pub fn new(db: &'a LedgerDb, offchain: &'a OffChainStore) -> Self {
        Self { db, offchain }
    }

    /// Pick the strategy a request can actually run: the requested mode
    /// when its credentials are present, otherwise the deepest mode the
    /// credentials allow.
    pub fn route(
        requested: Option<SearchMode>,
        has_password: bool,
        has_signer_key: bool,
    ) -> SearchMode {
        let ceiling = if has_password && has_signer_key {
            SearchMode::Exhaustive
        } else if has_password {
            SearchMode::Encrypted
        } else {
            SearchMode::FastPublic
        };
        match (requested, ceiling) {
            (Some(SearchMode::FastPublic), _) => SearchMode::FastPublic,
            (Some(SearchMode::Encrypted), SearchMode::FastPublic) => SearchMode::FastPublic,
            (Some(SearchMode::Encrypted), _) => SearchMode::Encrypted,
            (Some(SearchMode::Exhaustive), ceiling) => ceiling,
            (None, ceiling) => ceiling,
        }
    }

    pub fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SigilError> {
        let terms: BTreeSet<String> = query
            .split_whitespace()
            .filter_map(validate_term)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mode = Self::route(
            options.mode,
            options.password.is_some(),
            options.signer_public_key.is_some(),
        );
        debug!(?mode, terms = terms.len(), "search routed");

        let mut hits: HashMap<BlockHash, Hit> = HashMap::new();
        self.public_pass(&terms, &mut hits)?;

        if matches!(mode, SearchMode::Encrypted | SearchMode::Exhaustive) {
            let password = options.password.as_deref().unwrap_or_default();
            self.private_pass(&terms, password, &mut hits)?;
        }
        if mode == SearchMode::Exhaustive {
            let password = options.password.as_deref();
            self.payload_pass(&terms, password, &mut hits)?;
        }

        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .map(|(block_hash, hit)| SearchResult {
                block_hash,
                block_number: hit.block_number,
                score: hit.matched.len() as u32,
                category: hit.category,
                bucket_timestamp: hit.bucket_timestamp,
                matched_terms: hit.matched.into_iter().collect(),
                private_snippet: hit.private_snippet,
            })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(b.block_number.cmp(&a.block_number))
        });
        Ok(results)
    }

    // ── Passes ───────────────────────────────────────────────────────────────

    fn public_pass(
        &self,
        terms: &BTreeSet<String>,
        hits: &mut HashMap<BlockHash, Hit>,
    ) -> Result<(), SigilError> {
        for term in terms {
            for hash in self.db.blocks_with_token(term)? {
                let Some(entry) = self.db.get_index_entry(&hash)? else {
                    continue;
                };
                let hit = hits.entry(hash).or_default();
                hit.block_number = entry.block_number;
                hit.category = entry.category.clone();
                hit.bucket_timestamp = entry.bucket_timestamp;
                hit.matched.insert(term.clone());
            }
        }
        Ok(())
    }

    fn private_pass(
        &self,
        terms: &BTreeSet<String>,
        password: &str,
        hits: &mut HashMap<BlockHash, Hit>,
    ) -> Result<(), SigilError> {
        for entry in self.db.iter_index_entries()? {
            let Some(blob) = &entry.private_layer else {
                continue;
            };
            // A wrong password fails the AEAD tag: zero private matches,
            // never an error.
            let Ok(payload) = decrypt_private_layer(blob, password, &entry.block_hash) else {
                continue;
            };
            let matched: Vec<&String> = terms.intersection(&payload.terms).collect();
            if matched.is_empty() {
                continue;
            }
            let hit = hits.entry(entry.block_hash).or_default();
            hit.block_number = entry.block_number;
            hit.category = entry.category.clone();
            hit.bucket_timestamp = entry.bucket_timestamp;
            for term in matched {
                hit.matched.insert(term.clone());
            }
            if hit.private_snippet.is_none() {
                hit.private_snippet = payload.snippet.clone();
            }
        }
        Ok(())
    }

    /// Exhaustive tail: decrypt payloads and scan for substrings, for
    /// terms a block has not already matched through either index layer.
    fn payload_pass(
        &self,
        terms: &BTreeSet<String>,
        password: Option<&str>,
        hits: &mut HashMap<BlockHash, Hit>,
    ) -> Result<(), SigilError> {
        for block in self.db.iter_all_blocks()? {
            if block.is_genesis() {
                continue;
            }
            let already: BTreeSet<String> = hits
                .get(&block.hash)
                .map(|h| h.matched.clone())
                .unwrap_or_default();
            if terms.iter().all(|t| already.contains(t)) {
                continue;
            }

            let plaintext = if block.is_off_chain() {
                let Some(meta) = &block.off_chain_ref else {
                    continue;
                };
                match self.offchain.retrieve(meta, block.block_number) {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).to_lowercase(),
                    Err(_) => continue,
                }
            } else if block.encryption_metadata.is_some() {
                let Some(password) = password else { continue };
                match decrypt_block_payload(&block, password) {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).to_lowercase(),
                    Err(_) => continue,
                }
            } else {
                block.data.to_lowercase()
            };

            for term in terms {
                if already.contains(term) || !plaintext.contains(term.as_str()) {
                    continue;
                }
                let entry = self.db.get_index_entry(&block.hash)?;
                let hit = hits.entry(block.hash).or_default();
                hit.block_number = block.block_number;
                if let Some(entry) = &entry {
                    hit.category = entry.category.clone();
                    hit.bucket_timestamp = entry.bucket_timestamp;
                } else {
                    hit.bucket_timestamp = coarse_bucket(block.timestamp);
                }
                hit.matched.insert(term.clone());
                if hit.private_snippet.is_none() {
                    hit.private_snippet = Some(snippet_around(&plaintext, terms));
                }
            }
        }
        Ok(())
    }

    // ── Public-metadata queries ──────────────────────────────────────────────

    /// All blocks tagged with `category` (case-insensitive).
    pub fn search_by_category(&self, category: &str) -> Result<Vec<SearchResult>, SigilError> {
        let wanted = category.trim().to_lowercase();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in self.db.iter_index_entries()? {
            let matches = entry
                .category
                .as_deref()
                .map(|c| c.to_lowercase() == wanted)
                .unwrap_or(false);
            if matches {
                results.push(entry_result(entry));
            }
        }
        results.sort_by(|a, b| b.block_number.cmp(&a.block_number));
        Ok(results)
    }

    /// All blocks whose coarse public bucket falls in `[from, to]`.
    pub fn search_by_date_range(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<SearchResult>, SigilError> {
        let (lo, hi) = (coarse_bucket(from), coarse_bucket(to));
        let mut results = Vec::new();
        for entry in self.db.iter_index_entries()? {
            if entry.bucket_timestamp >= lo && entry.bucket_timestamp <= hi {
                results.push(entry_result(entry));
            }
        }
        results.sort_by(|a, b| b.block_number.cmp(&a.block_number));
        Ok(results)
    }
}

fn entry_result(entry: sigil_core::index::IndexEntry) -> SearchResult {
    SearchResult {
        block_hash: entry.block_hash,
        block_number: entry.block_number,
        score: 1,
        category: entry.category,
        bucket_timestamp: entry.bucket_timestamp,
        matched_terms: Vec::new(),
        private_snippet: None,
    }
}

/// A short window of payload text around the first matched term.
fn snippet_around(text: &str, terms: &BTreeSet<String>) -> String {
    for term in terms {
        if let Some(pos) = text.find(term.as_str()) {
            let mut start = pos.saturating_sub(40);
            while !text.is_char_boundary(start) {
                start -= 1;
            }
            let mut end = (pos + term.len() + 40).min(text.len());
            while !text.is_char_boundary(end) {
                end += 1;
            }
            return text[start..end].to_string();
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_honors_credentials() {
        use SearchMode::*;
        assert_eq!(SearchEngine::route(None, false, false), FastPublic);
        assert_eq!(SearchEngine::route(None, true, false), Encrypted);
        assert_eq!(SearchEngine::route(None, true, true), Exhaustive);
        // Requested depth is capped by credentials.
        assert_eq!(SearchEngine::route(Some(Exhaustive), true, false), Encrypted);
        assert_eq!(SearchEngine::route(Some(Encrypted), false, false), FastPublic);
        // A shallower request is always honored.
        assert_eq!(SearchEngine::route(Some(FastPublic), true, true), FastPublic);
    }

    #[test]
    fn snippet_centers_on_match() {
        let terms = BTreeSet::from(["needle".to_string()]);
        let text = format!("{}needle{}", "a".repeat(100), "b".repeat(100));
        let snippet = snippet_around(&text, &terms);
        assert!(snippet.contains("needle"));
        assert!(snippet.len() < text.len());
    }
}
