use crate::dicomweb::CodecError;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A parsed `type/subtype; param=value` media type.
///
/// Type and subtype are lower-cased on construction. Parameter keys are
/// matched case-insensitively; the caller-supplied ordering is preserved for
/// serialization.
///
/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part18/sect_8.7.html>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
	r#type: String,
	subtype: String,
	parameters: Vec<(String, String)>,
}

impl MediaType {
	pub fn new(r#type: &str, subtype: &str) -> Self {
		Self {
			r#type: r#type.to_ascii_lowercase(),
			subtype: subtype.to_ascii_lowercase(),
			parameters: Vec::new(),
		}
	}

	/// `application/dicom`, the encoding of a binary instance.
	pub fn application_dicom() -> Self {
		Self::new("application", "dicom")
	}

	/// `application/dicom+json`, the DICOM JSON metadata encoding.
	pub fn application_dicom_json() -> Self {
		Self::new("application", "dicom+json")
	}

	/// `multipart/related`, the container for multi-part payloads.
	pub fn multipart_related() -> Self {
		Self::new("multipart", "related")
	}

	pub fn application_octet_stream() -> Self {
		Self::new("application", "octet-stream")
	}

	pub fn r#type(&self) -> &str {
		&self.r#type
	}

	pub fn subtype(&self) -> &str {
		&self.subtype
	}

	/// Looks up a parameter value by case-insensitive key.
	pub fn parameter(&self, key: &str) -> Option<&str> {
		self.parameters
			.iter()
			.find(|(name, _)| name.eq_ignore_ascii_case(key))
			.map(|(_, value)| value.as_str())
	}

	/// Returns a copy with the given parameter added or overwritten.
	/// The original instance is left unchanged.
	pub fn with_parameter(&self, key: &str, value: &str) -> Self {
		let mut copy = self.clone();
		match copy
			.parameters
			.iter_mut()
			.find(|(name, _)| name.eq_ignore_ascii_case(key))
		{
			Some((_, existing)) => value.clone_into(existing),
			None => copy.parameters.push((key.to_owned(), value.to_owned())),
		}
		copy
	}

	/// Two media types match iff type and subtype are equal.
	/// Parameters are ignored.
	pub fn matches(&self, other: &Self) -> bool {
		self.r#type == other.r#type && self.subtype == other.subtype
	}
}

/// Parses an `Accept` header value into its ordered media type list.
/// Unparseable entries are skipped; quality values stay ordinary parameters.
pub fn parse_accept(header: &str) -> Vec<MediaType> {
	header
		.split(',')
		.filter_map(|entry| entry.trim().parse().ok())
		.collect()
}

impl FromStr for MediaType {
	type Err = CodecError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut segments = s.split(';');
		let essence = segments
			.next()
			.unwrap_or_default();
		let (r#type, subtype) = essence
			.split_once('/')
			.ok_or_else(|| CodecError::InvalidFormat(format!("missing `/` in media type `{s}`")))?;
		let (r#type, subtype) = (r#type.trim(), subtype.trim());
		if r#type.is_empty() || subtype.is_empty() {
			return Err(CodecError::InvalidFormat(format!(
				"empty type or subtype in media type `{s}`"
			)));
		}

		let mut parameters = Vec::new();
		for segment in segments {
			let segment = segment.trim();
			if segment.is_empty() {
				continue;
			}
			let (key, value) = segment.split_once('=').ok_or_else(|| {
				CodecError::InvalidFormat(format!("parameter `{segment}` is not a key=value pair"))
			})?;
			let value = value.trim();
			// Quoted values are unquoted; no escape processing beyond that.
			let value = value
				.strip_prefix('"')
				.and_then(|v| v.strip_suffix('"'))
				.unwrap_or(value);
			parameters.push((key.trim().to_owned(), value.to_owned()));
		}

		Ok(Self {
			r#type: r#type.to_ascii_lowercase(),
			subtype: subtype.to_ascii_lowercase(),
			parameters,
		})
	}
}

impl Display for MediaType {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}/{}", self.r#type, self.subtype)?;
		for (key, value) in &self.parameters {
			write!(f, "; {key}={value}")?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_with_parameters() {
		let parsed: MediaType =
			r#"multipart/related; type="application/dicom"; boundary=abc123"#
				.parse()
				.unwrap();

		assert_eq!(parsed.r#type(), "multipart");
		assert_eq!(parsed.subtype(), "related");
		assert_eq!(parsed.parameter("type"), Some("application/dicom"));
		assert_eq!(parsed.parameter("BOUNDARY"), Some("abc123"));
	}

	#[test]
	fn parse_lowercases_essence() {
		let parsed: MediaType = "Application/DICOM".parse().unwrap();
		assert_eq!(parsed.to_string(), "application/dicom");
	}

	#[test]
	fn parse_rejects_missing_slash() {
		assert!("applicationdicom".parse::<MediaType>().is_err());
	}

	#[test]
	fn parse_rejects_empty_type_or_subtype() {
		assert!("/dicom".parse::<MediaType>().is_err());
		assert!("application/".parse::<MediaType>().is_err());
		assert!(" / ".parse::<MediaType>().is_err());
	}

	#[test]
	fn matches_ignores_parameters() {
		let plain = MediaType::application_dicom();
		let with_ts = plain.with_parameter("transfer-syntax", "1.2.840.10008.1.2.1");

		assert!(plain.matches(&with_ts));
		assert_ne!(plain, with_ts);
	}

	#[test]
	fn with_parameter_leaves_original_unchanged() {
		let original = MediaType::multipart_related();
		let modified = original.with_parameter("boundary", "b1");
		let overwritten = modified.with_parameter("boundary", "b2");

		assert_eq!(original.parameter("boundary"), None);
		assert_eq!(modified.parameter("boundary"), Some("b1"));
		assert_eq!(overwritten.parameter("boundary"), Some("b2"));
	}

	#[test]
	fn parse_accept_keeps_order_and_skips_garbage() {
		let accepted = parse_accept(
			r#"multipart/related; type="application/dicom", application/dicom+json;q=0.9, garbage"#,
		);

		assert_eq!(accepted.len(), 2);
		assert!(accepted[0].matches(&MediaType::multipart_related()));
		assert_eq!(accepted[1].subtype(), "dicom+json");
		assert_eq!(accepted[1].parameter("q"), Some("0.9"));
	}

	#[test]
	fn display_is_unquoted() {
		let media_type = MediaType::multipart_related()
			.with_parameter("type", "application/dicom")
			.with_parameter("boundary", "xyz");

		assert_eq!(
			media_type.to_string(),
			"multipart/related; type=application/dicom; boundary=xyz"
		);
	}
}
