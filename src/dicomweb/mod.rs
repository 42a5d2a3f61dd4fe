//! Wire-level DICOMweb protocol primitives.
//!
//! Everything in this module is pure and reentrant: media type parsing,
//! multipart/related framing, the DICOM↔JSON codec and the route dispatcher
//! share no mutable state and perform no I/O.

pub mod json;
pub mod media_type;
pub mod multipart;
pub mod router;

pub use media_type::MediaType;

use thiserror::Error;

/// Errors produced by the wire-level codecs.
///
/// This is a closed set: every failure path in the media type model, the
/// multipart codec and the JSON codec maps onto one of these kinds so that
/// callers can translate them into protocol status codes.
#[derive(Debug, Error)]
pub enum CodecError {
	#[error("invalid format: {0}")]
	InvalidFormat(String),
	#[error("malformed header: {0}")]
	MalformedHeader(String),
	#[error("malformed payload: {0}")]
	MalformedPayload(String),
	#[error("missing `boundary` parameter in content type")]
	MissingBoundary,
	#[error("unsupported media type `{0}`")]
	UnsupportedMediaType(String),
}
