//! Recognized-text filtering with per-phrase statistics.
//!
//! Short filler utterances ("um", "uh huh") waste a full LLM and TTS round
//! trip, so recognized increments are checked against a blacklist before
//! entering the pipeline. Matching is exact after trimming surrounding
//! whitespace and punctuation; the blacklist comes from an optional
//! dictionary file with a built-in filler list as fallback, and every hit
//! is counted.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::RwLock;

use crate::config::FilterConfig;

/// Fallback blacklist used when no dictionary file is configured.
const DEFAULT_BLACKLIST: &[&str] = &[
    "um", "uh", "uh huh", "hmm", "mhm", "mm", "ah", "oh", "er", "erm", "huh", "eh", "hm",
];

/// Punctuation stripped from both ends of a phrase before matching.
const TRIM_PUNCTUATION: &[char] = &[
    '。', '，', '、', '；', '：', '？', '！', '“', '”', '‘', '’', '（', '）', '【', '】', '《',
    '》', '.', ',', '!', '?', ';', ':', '"', '\'', '(', ')',
];

pub struct FilterManager {
    // Plain std lock: lookups are synchronous and never held across awaits.
    inner: RwLock<FilterInner>,
    dictionary_path: Option<String>,
}

struct FilterInner {
    blacklist: HashSet<String>,
    counts: HashMap<String, u64>,
}

impl FilterManager {
    pub fn new(config: &FilterConfig) -> Self {
        let blacklist = match &config.dictionary_path {
            Some(path) => match load_dictionary(path) {
                Ok(entries) => {
                    tracing::info!(path, entries = entries.len(), "loaded filter dictionary");
                    entries
                }
                Err(err) => {
                    tracing::warn!(path, "filter dictionary unavailable, using defaults: {err}");
                    default_blacklist()
                }
            },
            None => default_blacklist(),
        };
        FilterManager {
            inner: RwLock::new(FilterInner {
                blacklist,
                counts: HashMap::new(),
            }),
            dictionary_path: config.dictionary_path.clone(),
        }
    }

    /// Whether `text` should be dropped instead of processed. Empty and
    /// punctuation-only input is always filtered.
    pub fn is_filtered(&self, text: &str) -> bool {
        let cleaned = clean(text);
        if cleaned.is_empty() {
            return true;
        }
        let inner = self.inner.read().expect("filter lock poisoned");
        inner.blacklist.contains(cleaned)
            || inner.blacklist.contains(cleaned.to_lowercase().as_str())
    }

    /// Counts one filtered hit of `text`.
    pub fn record_filtered(&self, text: &str) {
        let cleaned = clean(text).to_owned();
        let mut inner = self.inner.write().expect("filter lock poisoned");
        let count = inner.counts.entry(cleaned.clone()).or_insert(0);
        *count += 1;
        tracing::debug!(phrase = %cleaned, count = *count, "filtered input");
    }

    /// Times `phrase` has been filtered so far.
    pub fn filtered_count(&self, phrase: &str) -> u64 {
        let inner = self.inner.read().expect("filter lock poisoned");
        inner.counts.get(clean(phrase)).copied().unwrap_or(0)
    }

    /// Snapshot of all filtered-phrase counters.
    pub fn all_counts(&self) -> HashMap<String, u64> {
        let inner = self.inner.read().expect("filter lock poisoned");
        inner.counts.clone()
    }

    /// Re-reads the dictionary file, replacing the blacklist. Counters
    /// survive a reload. Returns the new blacklist size.
    pub fn reload(&self) -> io::Result<usize> {
        let blacklist = match &self.dictionary_path {
            Some(path) => load_dictionary(path)?,
            None => default_blacklist(),
        };
        let size = blacklist.len();
        let mut inner = self.inner.write().expect("filter lock poisoned");
        inner.blacklist = blacklist;
        tracing::info!(entries = size, "filter dictionary reloaded");
        Ok(size)
    }
}

/// Trims surrounding whitespace and punctuation.
fn clean(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() || TRIM_PUNCTUATION.contains(&c))
}

/// One phrase per line; blank lines and `#` comments are skipped. Each
/// phrase is stored in its original and lowercased forms.
fn load_dictionary(path: &str) -> io::Result<HashSet<String>> {
    let contents = std::fs::read_to_string(path)?;
    let mut entries = HashSet::new();
    for line in contents.lines() {
        let phrase = line.trim();
        if phrase.is_empty() || phrase.starts_with('#') {
            continue;
        }
        entries.insert(phrase.to_lowercase());
        entries.insert(phrase.to_owned());
    }
    Ok(entries)
}

fn default_blacklist() -> HashSet<String> {
    DEFAULT_BLACKLIST.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn default_manager() -> FilterManager {
        FilterManager::new(&FilterConfig {
            dictionary_path: None,
        })
    }

    #[test]
    fn filler_words_are_filtered() {
        let filter = default_manager();
        assert!(filter.is_filtered("um"));
        assert!(filter.is_filtered("Um."));
        assert!(filter.is_filtered("  UH  "));
        assert!(filter.is_filtered("hmm..."));
    }

    #[test]
    fn ordinary_speech_passes() {
        let filter = default_manager();
        assert!(!filter.is_filtered("turn on the lights"));
        assert!(!filter.is_filtered("um, turn on the lights"));
    }

    #[test]
    fn empty_and_punctuation_only_input_is_filtered() {
        let filter = default_manager();
        assert!(filter.is_filtered(""));
        assert!(filter.is_filtered("   "));
        assert!(filter.is_filtered("。。。"));
        assert!(filter.is_filtered("?!"));
    }

    #[test]
    fn hits_are_counted_per_phrase() {
        let filter = default_manager();
        filter.record_filtered("um.");
        filter.record_filtered("  um");
        filter.record_filtered("uh");
        assert_eq!(filter.filtered_count("um"), 2);
        assert_eq!(filter.filtered_count("uh"), 1);
        assert_eq!(filter.filtered_count("hmm"), 0);
        assert_eq!(filter.all_counts().len(), 2);
    }

    #[test]
    fn dictionary_file_replaces_the_default_list() {
        let mut file = tempfile::NamedTempFile::new().expect("create dictionary");
        writeln!(file, "# test phrases").expect("write");
        writeln!(file).expect("write");
        writeln!(file, "Nonsense").expect("write");
        writeln!(file, "  filler phrase  ").expect("write");

        let filter = FilterManager::new(&FilterConfig {
            dictionary_path: Some(file.path().to_string_lossy().into_owned()),
        });
        assert!(filter.is_filtered("Nonsense"));
        assert!(filter.is_filtered("NONSENSE"));
        assert!(filter.is_filtered("filler phrase"));
        assert!(!filter.is_filtered("um"), "defaults should be replaced by the file");
    }

    #[test]
    fn missing_dictionary_falls_back_to_defaults() {
        let filter = FilterManager::new(&FilterConfig {
            dictionary_path: Some("/nonexistent/blacklist.txt".into()),
        });
        assert!(filter.is_filtered("um"));
    }

    #[test]
    fn reload_picks_up_dictionary_edits() {
        let mut file = tempfile::NamedTempFile::new().expect("create dictionary");
        writeln!(file, "old phrase").expect("write");
        file.flush().expect("flush");

        let filter = FilterManager::new(&FilterConfig {
            dictionary_path: Some(file.path().to_string_lossy().into_owned()),
        });
        filter.record_filtered("old phrase");
        assert!(filter.is_filtered("old phrase"));
        assert!(!filter.is_filtered("new phrase"));

        std::fs::write(file.path(), "new phrase\n").expect("rewrite dictionary");
        let size = filter.reload().expect("reload");
        assert_eq!(size, 1);
        assert!(filter.is_filtered("new phrase"));
        assert!(!filter.is_filtered("old phrase"));
        assert_eq!(filter.filtered_count("old phrase"), 1, "counters survive reloads");
    }
}
