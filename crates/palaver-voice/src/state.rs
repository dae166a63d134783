//! Per-session mutable state.
//!
//! One lock guards everything a session mutates from multiple tasks: the
//! recognition dedup cursors, the processing and playback flags, the fatal
//! marker, the active TTS cancellation token, and the pending synthesis
//! queue. The lock is a plain `std::sync::RwLock` because no holder ever
//! spans an await point.
//!
//! The dedup cursors exist because streaming recognizers resend cumulative
//! text: `update_asr_text` compares each result against what has already
//! been processed and returns only the unseen increment, using normalized
//! similarity to absorb near-duplicate rewrites.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::writer::MessageWriter;

/// Similarity above which two normalized texts count as the same
/// utterance.
const TEXT_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Marks that end a spoken sentence.
const SENTENCE_ENDINGS: &[char] = &['。', '！', '？', '.', '!', '?'];

/// One pending synthesis job.
pub struct TtsTask {
    pub text: String,
    pub cancel: CancellationToken,
    pub writer: Arc<MessageWriter>,
}

/// Combined processing gate.
#[derive(Debug, Clone, Copy)]
pub struct ProcessGate {
    pub allowed: bool,
    pub fatal: bool,
    pub processing: bool,
}

pub struct ClientState {
    inner: RwLock<StateInner>,
    tts_queue_cap: usize,
}

struct StateInner {
    last_asr_text: String,
    last_processed_text: String,
    last_processed_cumulative: String,
    processing: bool,
    tts_playing: bool,
    fatal_error: bool,
    asr_complete_at: Option<Instant>,
    tts_cancel: Option<CancellationToken>,
    tts_queue: VecDeque<TtsTask>,
}

impl ClientState {
    pub fn new(tts_queue_cap: usize) -> Self {
        ClientState {
            inner: RwLock::new(StateInner {
                last_asr_text: String::new(),
                last_processed_text: String::new(),
                last_processed_cumulative: String::new(),
                processing: false,
                tts_playing: false,
                fatal_error: false,
                asr_complete_at: None,
                tts_cancel: None,
                tts_queue: VecDeque::new(),
            }),
            tts_queue_cap,
        }
    }

    /// Folds one recognition result into the dedup cursors and returns the
    /// unseen increment, if any.
    ///
    /// Final results advance both cursors. Intermediate results are only
    /// processed once they contain a complete sentence, and then advance
    /// only the cumulative cursor, so the closing final result for the
    /// same text deduplicates to nothing.
    pub fn update_asr_text(&self, text: &str, is_final: bool) -> Option<String> {
        if text.is_empty() {
            return None;
        }
        let mut inner = self.inner.write().expect("state lock poisoned");
        inner.last_asr_text = text.to_owned();

        if is_final {
            if text == inner.last_processed_text {
                return None;
            }
            let incremental = inner.extract_incremental(text)?;
            inner.last_processed_text = text.to_owned();
            inner.last_processed_cumulative = text.to_owned();
            return Some(incremental);
        }

        if is_complete_sentence(text) {
            if let Some(incremental) = inner.extract_incremental(text) {
                inner.last_processed_cumulative = text.to_owned();
                return Some(incremental);
            }
        }
        None
    }

    /// Marking processing started also records when recognition completed,
    /// for reply-latency measurement.
    pub fn set_processing(&self, processing: bool) {
        let mut inner = self.inner.write().expect("state lock poisoned");
        inner.processing = processing;
        if processing {
            inner.asr_complete_at = Some(Instant::now());
        }
    }

    pub fn is_processing(&self) -> bool {
        self.inner.read().expect("state lock poisoned").processing
    }

    pub fn set_tts_playing(&self, playing: bool) {
        self.inner.write().expect("state lock poisoned").tts_playing = playing;
    }

    pub fn is_tts_playing(&self) -> bool {
        self.inner.read().expect("state lock poisoned").tts_playing
    }

    pub fn set_fatal_error(&self, fatal: bool) {
        self.inner.write().expect("state lock poisoned").fatal_error = fatal;
    }

    pub fn is_fatal_error(&self) -> bool {
        self.inner.read().expect("state lock poisoned").fatal_error
    }

    pub fn can_process(&self) -> ProcessGate {
        let inner = self.inner.read().expect("state lock poisoned");
        ProcessGate {
            allowed: !inner.fatal_error && !inner.processing,
            fatal: inner.fatal_error,
            processing: inner.processing,
        }
    }

    /// Time since recognition completed for the utterance being processed.
    pub fn asr_complete_elapsed(&self) -> Option<Duration> {
        let inner = self.inner.read().expect("state lock poisoned");
        inner.asr_complete_at.map(|at| at.elapsed())
    }

    /// Installs the cancellation token of the synthesis now playing. At
    /// most one is live: any previous token is cancelled first.
    pub fn set_tts_cancel(&self, cancel: CancellationToken) {
        let mut inner = self.inner.write().expect("state lock poisoned");
        if let Some(previous) = inner.tts_cancel.replace(cancel) {
            previous.cancel();
        }
    }

    /// Cancels in-flight synthesis, if any.
    pub fn cancel_tts(&self) {
        let mut inner = self.inner.write().expect("state lock poisoned");
        if let Some(token) = inner.tts_cancel.take() {
            token.cancel();
        }
    }

    /// Barge-in: cancels in-flight synthesis and everything queued behind
    /// it.
    pub fn interrupt_tts(&self) {
        let mut inner = self.inner.write().expect("state lock poisoned");
        if let Some(token) = inner.tts_cancel.take() {
            token.cancel();
        }
        while let Some(task) = inner.tts_queue.pop_front() {
            task.cancel.cancel();
        }
    }

    /// Queues a synthesis job. Returns false without blocking when the
    /// queue is full.
    pub fn enqueue_tts(&self, task: TtsTask) -> bool {
        let mut inner = self.inner.write().expect("state lock poisoned");
        if inner.tts_queue.len() >= self.tts_queue_cap {
            return false;
        }
        inner.tts_queue.push_back(task);
        true
    }

    pub fn dequeue_tts(&self) -> Option<TtsTask> {
        self.inner.write().expect("state lock poisoned").tts_queue.pop_front()
    }

    pub fn tts_queue_len(&self) -> usize {
        self.inner.read().expect("state lock poisoned").tts_queue.len()
    }

    /// Resets everything: cursors, flags, pending synthesis. Queued and
    /// in-flight synthesis is cancelled.
    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("state lock poisoned");
        inner.last_asr_text.clear();
        inner.last_processed_text.clear();
        inner.last_processed_cumulative.clear();
        inner.processing = false;
        inner.tts_playing = false;
        inner.fatal_error = false;
        inner.asr_complete_at = None;
        if let Some(token) = inner.tts_cancel.take() {
            token.cancel();
        }
        while let Some(task) = inner.tts_queue.pop_front() {
            task.cancel.cancel();
        }
    }
}

impl StateInner {
    /// The part of `current` not yet processed, or `None` when `current`
    /// duplicates what has been.
    fn extract_incremental(&self, current: &str) -> Option<String> {
        let last = self.last_processed_cumulative.as_str();
        if last.is_empty() {
            return Some(current.to_owned());
        }

        let norm_current = normalize_text(current);
        let norm_last = normalize_text(last);
        if norm_current == norm_last {
            return None;
        }
        if text_similarity(&norm_current, &norm_last) > TEXT_SIMILARITY_THRESHOLD {
            return None;
        }

        if let Some(suffix) = current.strip_prefix(last) {
            let norm_suffix = normalize_text(suffix);
            if norm_suffix.is_empty() {
                return None;
            }
            // A stub of a suffix that still resembles the prior text is a
            // recognizer rewrite, not new speech.
            if norm_suffix.chars().count() < norm_last.chars().count() / 2
                && text_similarity(&norm_suffix, &norm_last) > TEXT_SIMILARITY_THRESHOLD
            {
                return None;
            }
            return Some(suffix.to_owned());
        }

        let last_sentence = extract_last_sentence(current);
        if !last_sentence.is_empty() && last_sentence != last {
            let norm_sentence = normalize_text(&last_sentence);
            if norm_sentence != norm_last
                && text_similarity(&norm_sentence, &norm_last) <= TEXT_SIMILARITY_THRESHOLD
            {
                return Some(last_sentence);
            }
        }

        Some(current.to_owned())
    }
}

/// Lowercases, keeps only alphanumeric characters, and collapses adjacent
/// repeats, so recognizer rewrites of punctuation and stutter compare
/// equal.
fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous: Option<char> = None;
    for c in text.chars().filter(|c| c.is_alphanumeric()) {
        let c = c.to_lowercase().next().unwrap_or(c);
        if previous != Some(c) {
            out.push(c);
        }
        previous = Some(c);
    }
    out
}

/// Similarity in [0, 1] between two already-normalized texts.
fn text_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let distance = levenshtein(&a, &b);
    1.0 - distance as f64 / a.len().max(b.len()) as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

fn is_complete_sentence(text: &str) -> bool {
    text.chars().any(|c| SENTENCE_ENDINGS.contains(&c))
}

/// The trailing complete sentence of `text`, ending mark included, or
/// empty when `text` has no sentence-ending mark.
fn extract_last_sentence(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let last_end = match chars.iter().rposition(|c| SENTENCE_ENDINGS.contains(c)) {
        Some(i) => i,
        None => return String::new(),
    };
    let start = chars[..last_end]
        .iter()
        .rposition(|c| SENTENCE_ENDINGS.contains(c))
        .map(|i| i + 1)
        .unwrap_or(0);
    chars[start..=last_end].iter().collect::<String>().trim().to_owned()
}
