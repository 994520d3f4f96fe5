//! Optional payload-body compression.
//!
//! A compressed Sparkplug payload is an envelope: the inner payload is
//! protobuf-encoded, compressed into `body`, and the envelope carries a
//! single `algorithm` metric naming the codec. The envelope itself has no
//! `seq`; the inner payload owns all protocol fields.

use std::io::{Read, Write};

use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use prost::Message;
use thiserror::Error;

use crate::constants::ALGORITHM;
use crate::payload::{metric, DataType, Metric, Payload};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    Gzip,
    Deflate,
}

impl Algorithm {
    /// Parse an algorithm token. Tokens are compared case-insensitively.
    pub fn parse(token: &str) -> Result<Self, CompressionError> {
        if token.eq_ignore_ascii_case("GZIP") {
            Ok(Algorithm::Gzip)
        } else if token.eq_ignore_ascii_case("DEFLATE") {
            Ok(Algorithm::Deflate)
        } else {
            Err(CompressionError::UnknownAlgorithm(token.to_string()))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Gzip => "GZIP",
            Algorithm::Deflate => "DEFLATE",
        }
    }
}

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Unrecognised compression algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("The algorithm metric did not carry a string value")]
    InvalidAlgorithmValue,
    #[error("Compressed payload has no body")]
    MissingBody,
    #[error("Compression io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Inner payload decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}

fn deflate_bytes(algorithm: Algorithm, bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    match algorithm {
        Algorithm::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(bytes)?;
            encoder.finish()
        }
        Algorithm::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(bytes)?;
            encoder.finish()
        }
    }
}

fn inflate_bytes(algorithm: Algorithm, bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    match algorithm {
        Algorithm::Gzip => GzDecoder::new(bytes).read_to_end(&mut out)?,
        Algorithm::Deflate => DeflateDecoder::new(bytes).read_to_end(&mut out)?,
    };
    Ok(out)
}

/// Wrap a payload in a compression envelope.
pub fn compress_payload(
    payload: &Payload,
    algorithm: Algorithm,
) -> Result<Payload, CompressionError> {
    let inner = payload.encode_to_vec();
    let body = deflate_bytes(algorithm, &inner)?;
    let mut algorithm_metric = Metric::new();
    algorithm_metric
        .set_name(ALGORITHM.to_string())
        .set_datatype(DataType::String)
        .set_value(metric::Value::StringValue(algorithm.as_str().to_string()));
    Ok(Payload {
        timestamp: payload.timestamp,
        metrics: vec![algorithm_metric],
        seq: None,
        uuid: None,
        body: Some(body),
    })
}

fn envelope_algorithm(payload: &Payload) -> Option<Result<Algorithm, CompressionError>> {
    let algorithm_metric = payload
        .metrics
        .iter()
        .find(|m| m.name.as_deref() == Some(ALGORITHM))?;
    Some(match &algorithm_metric.value {
        Some(metric::Value::StringValue(token)) => Algorithm::parse(token),
        _ => Err(CompressionError::InvalidAlgorithmValue),
    })
}

/// Unwrap a compression envelope if the payload carries one; payloads
/// without an `algorithm` metric pass through untouched. An unknown
/// algorithm token is an error so the caller can surface the raw bytes.
pub fn maybe_decompress(payload: Payload) -> Result<Payload, CompressionError> {
    let algorithm = match envelope_algorithm(&payload) {
        Some(result) => result?,
        None => return Ok(payload),
    };
    let body = payload.body.as_ref().ok_or(CompressionError::MissingBody)?;
    let inner = inflate_bytes(algorithm, body)?;
    Ok(Payload::decode(inner.as_slice())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::DataType;
    use crate::MetricValue;

    fn sample_payload() -> Payload {
        let mut metric = Metric::new();
        metric
            .set_name("a".to_string())
            .set_datatype(DataType::UInt64)
            .set_value(MetricValue::from(12345u64).into());
        Payload {
            timestamp: Some(1),
            metrics: vec![metric],
            seq: Some(0),
            uuid: None,
            body: None,
        }
    }

    #[test]
    fn round_trip_gzip_and_deflate() {
        for algorithm in [Algorithm::Gzip, Algorithm::Deflate] {
            let payload = sample_payload();
            let envelope = compress_payload(&payload, algorithm).unwrap();
            assert!(envelope.body.is_some());
            assert_eq!(envelope.seq, None);
            let names: Vec<_> = envelope.metrics.iter().map(|m| m.name.clone()).collect();
            assert_eq!(names, vec![Some(ALGORITHM.to_string())]);
            assert_eq!(
                envelope.metrics[0].datatype,
                Some(DataType::String as u32)
            );
            assert_eq!(maybe_decompress(envelope).unwrap(), payload);
        }
    }

    #[test]
    fn uncompressed_payload_passes_through() {
        let payload = sample_payload();
        assert_eq!(maybe_decompress(payload.clone()).unwrap(), payload);
    }

    #[test]
    fn algorithm_token_is_case_insensitive() {
        assert_eq!(Algorithm::parse("gzip").unwrap(), Algorithm::Gzip);
        assert_eq!(Algorithm::parse("Deflate").unwrap(), Algorithm::Deflate);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert!(matches!(
            Algorithm::parse("LZ4"),
            Err(CompressionError::UnknownAlgorithm(_))
        ));

        let payload = sample_payload();
        let mut envelope = compress_payload(&payload, Algorithm::Gzip).unwrap();
        envelope.metrics[0].set_value(metric::Value::StringValue("LZ4".to_string()));
        assert!(matches!(
            maybe_decompress(envelope),
            Err(CompressionError::UnknownAlgorithm(_))
        ));
    }

    #[test]
    fn envelope_without_body_is_rejected() {
        let payload = sample_payload();
        let mut envelope = compress_payload(&payload, Algorithm::Deflate).unwrap();
        envelope.body = None;
        assert!(matches!(
            maybe_decompress(envelope),
            Err(CompressionError::MissingBody)
        ));
    }
}
