//! Transport-safe text encoding of binary audio payloads

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::AudioError;

/// Encode chunk size in bytes. Stays well under typical host argument-count
/// limits, and is a multiple of the base64 3-byte quantum so no chunk emits
/// padding and the concatenation matches a single-pass encode.
const ENCODE_CHUNK_BYTES: usize = 32_766;

/// A transport-safe text payload plus its MIME tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBlob {
    pub data: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl WireBlob {
    pub fn new(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self {
            data: encode_bytes(bytes),
            mime_type: mime_type.into(),
        }
    }
}

/// Encode a byte buffer as base64 text, processed chunk by chunk so
/// arbitrarily large buffers remain correct.
pub fn encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(ENCODE_CHUNK_BYTES) {
        STANDARD.encode_string(chunk, &mut out);
    }
    out
}

/// Decode base64 text back into bytes in a single pass. The output is
/// binary, not text.
pub fn decode_payload(text: &str) -> Result<Bytes, AudioError> {
    STANDARD
        .decode(text)
        .map(Bytes::from)
        .map_err(|_| AudioError::MalformedEncoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn round_trip_empty() {
        let encoded = encode_bytes(&[]);
        assert!(encoded.is_empty());
        assert_eq!(decode_payload(&encoded).unwrap().len(), 0);
    }

    #[test]
    fn round_trip_across_chunk_boundaries() {
        for len in [1usize, 3, 100, 0x7fff, 0x8000, 0x8001, 0x20000] {
            let bytes = pattern(len);
            let decoded = decode_payload(&encode_bytes(&bytes)).unwrap();
            assert_eq!(&decoded[..], &bytes[..], "len={}", len);
        }
    }

    #[test]
    fn chunked_encode_matches_single_pass() {
        // Chunk boundaries must not be observable in the output.
        let bytes = pattern(ENCODE_CHUNK_BYTES * 2 + 17);
        assert_eq!(encode_bytes(&bytes), STANDARD.encode(&bytes));
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(matches!(
            decode_payload("not*base64!"),
            Err(AudioError::MalformedEncoding)
        ));
    }

    #[test]
    fn blob_carries_mime_tag() {
        let blob = WireBlob::new(&[1, 2, 3], "audio/pcm;rate=16000");
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
        assert_eq!(&decode_payload(&blob.data).unwrap()[..], &[1, 2, 3]);
    }

    #[test]
    fn blob_serializes_with_camel_case_mime_type() {
        let blob = WireBlob::new(&[0u8; 3], "audio/pcm;rate=16000");
        let json = serde_json::to_string(&blob).unwrap();
        assert!(json.contains("\"mimeType\""));
    }
}
