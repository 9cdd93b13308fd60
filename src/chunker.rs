use anyhow::{Context, Result};
use regex::Regex;

use crate::model::TextChunk;

/// Paragraph- and sentence-aware transcript splitter.
pub struct TranscriptChunker {
    sentence_boundary: Regex,
}

struct SubChunk {
    text: String,
    word_start: usize,
    word_end: usize,
}

struct ChunkSink {
    chunks: Vec<TextChunk>,
}

impl ChunkSink {
    fn push(&mut self, text: String, token_start: usize, token_end: usize) {
        if text.trim().is_empty() {
            return;
        }
        let index = self.chunks.len();
        self.chunks.push(TextChunk {
            text,
            index,
            token_start,
            token_end,
        });
    }
}

impl TranscriptChunker {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sentence_boundary: Regex::new(r"[.!?]\s+")
                .context("failed to compile sentence boundary regex")?,
        })
    }

    /// Splits on line breaks, packs paragraphs greedily up to `target_chunk_size`
    /// words and sentence-splits any paragraph that is larger on its own.
    pub fn chunk_semantically(&self, text: &str, target_chunk_size: usize) -> Vec<TextChunk> {
        let target = target_chunk_size.max(1);
        let mut sink = ChunkSink { chunks: Vec::new() };
        if text.trim().is_empty() {
            return sink.chunks;
        }

        let mut buffer = Vec::<&str>::new();
        let mut buffer_words = 0usize;
        let mut buffer_start = 0usize;
        let mut running_total = 0usize;

        for line in text.lines() {
            let unit = line.trim();
            if unit.is_empty() {
                continue;
            }
            let unit_words = word_count(unit);

            if unit_words > target {
                if !buffer.is_empty() {
                    sink.push(buffer.join("\n"), buffer_start, buffer_start + buffer_words);
                    buffer.clear();
                    buffer_words = 0;
                }

                for sub in self.split_by_sentences(unit, target) {
                    sink.push(
                        sub.text,
                        running_total + sub.word_start,
                        running_total + sub.word_end,
                    );
                }
                running_total += unit_words;
                continue;
            }

            if !buffer.is_empty() && buffer_words + unit_words > target {
                sink.push(buffer.join("\n"), buffer_start, buffer_start + buffer_words);
                buffer.clear();
                buffer_words = 0;
            }

            if buffer.is_empty() {
                buffer_start = running_total;
            }
            buffer.push(unit);
            buffer_words += unit_words;
            running_total += unit_words;
        }

        if !buffer.is_empty() {
            sink.push(buffer.join("\n"), buffer_start, buffer_start + buffer_words);
        }

        sink.chunks
    }

    fn sentences<'a>(&self, paragraph: &'a str) -> Vec<&'a str> {
        let mut out = Vec::<&str>::new();
        let mut last = 0usize;
        for boundary in self.sentence_boundary.find_iter(paragraph) {
            // keep the terminal punctuation with its sentence
            let end = boundary.start() + 1;
            let sentence = paragraph[last..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            last = boundary.end();
        }
        let tail = paragraph[last..].trim();
        if !tail.is_empty() {
            out.push(tail);
        }
        out
    }

    fn split_by_sentences(&self, paragraph: &str, target: usize) -> Vec<SubChunk> {
        let mut out = Vec::<SubChunk>::new();
        let mut current = Vec::<&str>::new();
        let mut current_words = 0usize;
        let mut current_start = 0usize;
        let mut offset = 0usize;

        for sentence in self.sentences(paragraph) {
            let sentence_words = word_count(sentence);

            if sentence_words > target {
                if !current.is_empty() {
                    out.push(SubChunk {
                        text: current.join(" "),
                        word_start: current_start,
                        word_end: current_start + current_words,
                    });
                    current.clear();
                    current_words = 0;
                }

                let words = sentence.split_whitespace().collect::<Vec<&str>>();
                for (window_index, window) in words.chunks(target).enumerate() {
                    let word_start = offset + window_index * target;
                    out.push(SubChunk {
                        text: window.join(" "),
                        word_start,
                        word_end: word_start + window.len(),
                    });
                }
                offset += sentence_words;
                continue;
            }

            if !current.is_empty() && current_words + sentence_words > target {
                out.push(SubChunk {
                    text: current.join(" "),
                    word_start: current_start,
                    word_end: current_start + current_words,
                });
                current.clear();
                current_words = 0;
            }

            if current.is_empty() {
                current_start = offset;
            }
            current.push(sentence);
            current_words += sentence_words;
            offset += sentence_words;
        }

        if !current.is_empty() {
            out.push(SubChunk {
                text: current.join(" "),
                word_start: current_start,
                word_end: current_start + current_words,
            });
        }

        out
    }
}

/// Fixed-stride word windows. Consecutive windows share `overlap` words.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    let words = text.split_whitespace().collect::<Vec<&str>>();
    if words.is_empty() {
        return Vec::new();
    }

    let size = chunk_size.max(1);
    let step = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::<TextChunk>::new();
    let mut start = 0usize;

    loop {
        let end = (start + size).min(words.len());
        chunks.push(TextChunk {
            text: words[start..end].join(" "),
            index: chunks.len(),
            token_start: start,
            token_end: end,
        });

        if end == words.len() {
            break;
        }
        start += step;
    }

    chunks
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
