//! Semantic compression of message payloads.
//!
//! Codecs are keyed by content type and applied around the delivery
//! boundary. Built-in codecs serialize the payload to JSON, compress it with
//! LZ4 and carry the result as a base64 string.

use crate::core::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One direction of a payload transform.
pub type CodecFn = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// A symmetric (compress, decompress) pair.
#[derive(Clone)]
pub struct Codec {
    compress: CodecFn,
    decompress: CodecFn,
}

impl Codec {
    /// Create a codec from its two directions.
    pub fn new(compress: CodecFn, decompress: CodecFn) -> Self {
        Self {
            compress,
            decompress,
        }
    }

    /// Compress a payload.
    pub fn compress(&self, payload: &Value) -> Result<Value> {
        (self.compress)(payload)
    }

    /// Decompress a payload.
    pub fn decompress(&self, payload: &Value) -> Result<Value> {
        (self.decompress)(payload)
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec").finish_non_exhaustive()
    }
}

/// Registry of codecs keyed by content type.
#[derive(Clone, Debug, Default)]
pub struct CodecRegistry {
    codecs: HashMap<String, Codec>,
}

impl CodecRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a codec, replacing any previous one for the content type.
    pub fn register(&mut self, content_type: &str, codec: Codec) -> Option<Codec> {
        self.codecs.insert(content_type.to_string(), codec)
    }

    /// Remove a codec.
    pub fn unregister(&mut self, content_type: &str) -> Option<Codec> {
        self.codecs.remove(content_type)
    }

    /// Codec for a content type.
    pub fn get(&self, content_type: &str) -> Option<Codec> {
        self.codecs.get(content_type).cloned()
    }

    /// Number of registered codecs.
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    /// Whether no codec is registered.
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

/// Compress bytes without dictionary (simple LZ4).
pub fn compress_simple(data: &[u8]) -> Vec<u8> {
    compress_prepend_size(data)
}

/// Decompress bytes without dictionary.
pub fn decompress_simple(data: &[u8]) -> Result<Vec<u8>> {
    decompress_size_prepended(data).map_err(|e| Error::DecompressionFailed(e.to_string()))
}

fn encode(bytes: &[u8]) -> Value {
    Value::String(STANDARD.encode(bytes))
}

fn decode(payload: &Value) -> Result<Vec<u8>> {
    let text = payload
        .as_str()
        .ok_or_else(|| Error::DecompressionFailed("compressed payload is not a string".into()))?;
    STANDARD
        .decode(text)
        .map_err(|e| Error::DecompressionFailed(e.to_string()))
}

/// Plain LZ4 codec over the JSON encoding of the payload.
pub fn lz4_codec() -> Codec {
    Codec::new(
        Arc::new(|payload: &Value| -> Result<Value> {
            let json = serde_json::to_vec(payload)
                .map_err(|e| Error::CompressionFailed(e.to_string()))?;
            Ok(encode(&compress_simple(&json)))
        }),
        Arc::new(|payload: &Value| -> Result<Value> {
            let json = decompress_simple(&decode(payload)?)?;
            serde_json::from_slice(&json).map_err(|e| Error::DecompressionFailed(e.to_string()))
        }),
    )
}

const PLACEHOLDER_OPEN: char = '\x01';
const PLACEHOLDER_CLOSE: char = '\x02';
const TAG_RAW: u8 = 0;
const TAG_SUBSTITUTED: u8 = 1;

/// Compression statistics.
#[derive(Clone, Debug, Default)]
pub struct CompressionStats {
    /// Original size in bytes
    pub original_size: usize,
    /// Compressed size in bytes
    pub compressed_size: usize,
    /// Compression ratio (original / compressed)
    pub ratio: f64,
    /// Compression time in microseconds
    pub compress_time_us: u64,
}

/// Dictionary-assisted LZ4 compressor for JSON payloads.
///
/// Common mesh field names are replaced by short placeholders before LZ4.
/// A placeholder is `\x01<hex index>\x02`. Substitution runs in dictionary
/// order and is undone in reverse order, so a pattern that matches inside an
/// earlier placeholder still round-trips. Input that is not UTF-8, or that
/// already contains a delimiter, is stored without substitution.
pub struct SemanticCompressor {
    dictionary: Vec<String>,
    stats: Mutex<CompressionStats>,
}

impl SemanticCompressor {
    /// Create a compressor preloaded with common mesh patterns.
    pub fn new() -> Self {
        let mut compressor = Self {
            dictionary: Vec::new(),
            stats: Mutex::new(CompressionStats::default()),
        };

        compressor.add_to_dictionary("message_id");
        compressor.add_to_dictionary("message_type");
        compressor.add_to_dictionary("sender_id");
        compressor.add_to_dictionary("receiver_id");
        compressor.add_to_dictionary("payload");
        compressor.add_to_dictionary("metadata");
        compressor.add_to_dictionary("timestamp");

        compressor
    }

    /// Add a pattern to the dictionary. Patterns with control characters are ignored.
    pub fn add_to_dictionary(&mut self, pattern: &str) {
        if !pattern.is_empty()
            && !pattern.chars().any(char::is_control)
            && !self.dictionary.iter().any(|p| p == pattern)
        {
            self.dictionary.push(pattern.to_string());
        }
    }

    /// Get dictionary size.
    pub fn dictionary_size(&self) -> usize {
        self.dictionary.len()
    }

    fn placeholder(index: usize) -> String {
        format!("{}{:X}{}", PLACEHOLDER_OPEN, index, PLACEHOLDER_CLOSE)
    }

    /// Compress bytes with dictionary substitution then LZ4.
    pub fn compress(&self, data: &[u8]) -> Vec<u8> {
        let start = std::time::Instant::now();

        let preprocessed = match std::str::from_utf8(data) {
            Ok(text) if !text.contains(&[PLACEHOLDER_OPEN, PLACEHOLDER_CLOSE][..]) => {
                let mut result = text.to_string();
                for (index, pattern) in self.dictionary.iter().enumerate() {
                    result = result.replace(pattern.as_str(), &Self::placeholder(index));
                }
                let mut bytes = vec![TAG_SUBSTITUTED];
                bytes.extend_from_slice(result.as_bytes());
                bytes
            }
            _ => {
                let mut bytes = vec![TAG_RAW];
                bytes.extend_from_slice(data);
                bytes
            }
        };
        let compressed = compress_prepend_size(&preprocessed);

        if let Ok(mut stats) = self.stats.lock() {
            *stats = CompressionStats {
                original_size: data.len(),
                compressed_size: compressed.len(),
                ratio: if compressed.is_empty() {
                    1.0
                } else {
                    data.len() as f64 / compressed.len() as f64
                },
                compress_time_us: start.elapsed().as_micros() as u64,
            };
        }

        compressed
    }

    /// Decompress bytes produced by [`SemanticCompressor::compress`].
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let decompressed = decompress_simple(data)?;
        match decompressed.split_first() {
            Some((&TAG_RAW, body)) => Ok(body.to_vec()),
            Some((&TAG_SUBSTITUTED, body)) => {
                let mut text = String::from_utf8(body.to_vec())
                    .map_err(|e| Error::DecompressionFailed(e.to_string()))?;
                for (index, pattern) in self.dictionary.iter().enumerate().rev() {
                    text = text.replace(&Self::placeholder(index), pattern);
                }
                Ok(text.into_bytes())
            }
            _ => Err(Error::DecompressionFailed(
                "missing dictionary tag".to_string(),
            )),
        }
    }

    /// Statistics of the last compression.
    pub fn stats(&self) -> CompressionStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Wrap this compressor into a payload codec.
    pub fn into_codec(self) -> Codec {
        let compressor = Arc::new(self);
        let decompressor = Arc::clone(&compressor);
        Codec::new(
            Arc::new(move |payload: &Value| -> Result<Value> {
                let json = serde_json::to_vec(payload)
                    .map_err(|e| Error::CompressionFailed(e.to_string()))?;
                Ok(encode(&compressor.compress(&json)))
            }),
            Arc::new(move |payload: &Value| -> Result<Value> {
                let json = decompressor.decompress(&decode(payload)?)?;
                serde_json::from_slice(&json)
                    .map_err(|e| Error::DecompressionFailed(e.to_string()))
            }),
        )
    }
}

impl Default for SemanticCompressor {
    fn default() -> Self {
        Self::new()
    }
}
