//! Overlapping word-window chunking.
//!
//! Summarization services accept a bounded amount of input, so long OCR output is cut into
//! windows of at most `max_words` words where consecutive windows share `overlap` words.
//! Window `i` starts at word `i * (max_words - overlap)`; a window is emitted for every start
//! that still lies inside the text, so `n` words always produce
//! `ceil(n / (max_words - overlap))` windows.

use super::types::ChunkingError;

/// Validated chunk window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWindow {
    max_words: usize,
    overlap: usize,
}

impl ChunkWindow {
    /// Validate a window, rejecting settings whose start index could fail to advance.
    pub fn new(max_words: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if max_words == 0 {
            return Err(ChunkingError::InvalidWindow);
        }
        if overlap >= max_words {
            return Err(ChunkingError::OverlapTooLarge { max_words, overlap });
        }
        Ok(Self { max_words, overlap })
    }

    /// Maximum words per chunk.
    pub fn max_words(&self) -> usize {
        self.max_words
    }

    /// Words shared by consecutive chunks.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between the first words of consecutive chunks. Always at least one.
    pub fn stride(&self) -> usize {
        self.max_words - self.overlap
    }

    /// Number of chunks produced for `word_count` words.
    pub fn chunk_count(&self, word_count: usize) -> usize {
        word_count.div_ceil(self.stride())
    }
}

/// Iterator over the word windows of a text. Consumed once.
#[derive(Debug)]
pub struct WordChunks<'a> {
    words: Vec<&'a str>,
    window: ChunkWindow,
    next_start: usize,
}

impl<'a> WordChunks<'a> {
    /// Total number of words in the source text.
    pub fn word_count(&self) -> usize {
        self.words.len()
    }
}

impl<'a> Iterator for WordChunks<'a> {
    type Item = Vec<&'a str>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start;
        if start >= self.words.len() {
            return None;
        }
        let end = (start + self.window.max_words).min(self.words.len());
        self.next_start = start + self.window.stride();
        Some(self.words[start..end].to_vec())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .words
            .len()
            .saturating_sub(self.next_start)
            .div_ceil(self.window.stride());
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for WordChunks<'_> {}

/// Split `text` into whitespace-delimited word windows.
///
/// Fails fast with a configuration error when `overlap >= max_words` or `max_words == 0`.
/// Returns an empty iterator when the text has no words.
pub fn chunk_words(
    text: &str,
    max_words: usize,
    overlap: usize,
) -> Result<WordChunks<'_>, ChunkingError> {
    let window = ChunkWindow::new(max_words, overlap)?;
    Ok(chunk_with_window(text, window))
}

/// Split `text` using an already validated window.
pub fn chunk_with_window(text: &str, window: ChunkWindow) -> WordChunks<'_> {
    WordChunks {
        words: text.split_whitespace().collect(),
        window,
        next_start: 0,
    }
}
