use crate::dicomweb::media_type::MediaType;
use crate::dicomweb::CodecError;
use bytes::Bytes;
use uuid::Uuid;

const CRLF: &[u8] = b"\r\n";
const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// A single body part of a `multipart/related` payload.
///
/// The body bytes are kept verbatim: this layer performs no decoding of
/// `Content-Transfer-Encoding` declarations, which are informational only for
/// the binary and 8bit codings used by DICOMweb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
	pub content_type: MediaType,
	/// Headers other than `Content-Type`, in wire order.
	pub headers: Vec<(String, String)>,
	pub body: Bytes,
}

impl Part {
	pub fn new(content_type: MediaType, body: impl Into<Bytes>) -> Self {
		Self {
			content_type,
			headers: Vec::new(),
			body: body.into(),
		}
	}

	pub fn with_header(mut self, name: &str, value: &str) -> Self {
		self.headers.push((name.to_owned(), value.to_owned()));
		self
	}

	/// Case-insensitive header lookup.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}
}

/// A `multipart/related` payload: an ordered part list framed by a boundary.
///
/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part18/sect_8.6.html>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartRelated {
	boundary: String,
	root_type: Option<MediaType>,
	parts: Vec<Part>,
}

impl MultipartRelated {
	/// Creates an empty payload with a generated boundary.
	///
	/// The random suffix makes a boundary collision with part content
	/// practically impossible.
	pub fn new(root_type: Option<MediaType>) -> Self {
		Self {
			boundary: format!("dicomweb_{}", Uuid::new_v4()),
			root_type,
			parts: Vec::new(),
		}
	}

	pub fn with_boundary(boundary: &str, root_type: Option<MediaType>) -> Self {
		Self {
			boundary: boundary.to_owned(),
			root_type,
			parts: Vec::new(),
		}
	}

	pub fn boundary(&self) -> &str {
		&self.boundary
	}

	pub fn root_type(&self) -> Option<&MediaType> {
		self.root_type.as_ref()
	}

	pub fn parts(&self) -> &[Part] {
		&self.parts
	}

	pub fn into_parts(self) -> Vec<Part> {
		self.parts
	}

	pub fn push(&mut self, part: Part) {
		self.parts.push(part);
	}

	/// The outer `Content-Type` header value advertising boundary and root type.
	pub fn content_type(&self) -> MediaType {
		let mut content_type = MediaType::multipart_related();
		if let Some(root_type) = &self.root_type {
			content_type =
				content_type.with_parameter("type", &format!("{}/{}", root_type.r#type(), root_type.subtype()));
		}
		content_type.with_parameter("boundary", &self.boundary)
	}

	/// Serializes all parts under this payload's boundary.
	///
	/// An empty part list encodes to the closing delimiter alone.
	pub fn encode(&self) -> Vec<u8> {
		let body_size: usize = self.parts.iter().map(|part| part.body.len() + 128).sum();
		let mut buffer = Vec::with_capacity(body_size + self.boundary.len() + 6);

		for part in &self.parts {
			buffer.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
			buffer.extend_from_slice(
				format!("Content-Type: {}\r\n", part.content_type).as_bytes(),
			);
			for (name, value) in &part.headers {
				buffer.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
			}
			buffer.extend_from_slice(CRLF);
			buffer.extend_from_slice(&part.body);
			buffer.extend_from_slice(CRLF);
		}
		buffer.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());

		buffer
	}

	/// Parses a payload whose boundary and root type are declared in the given
	/// `Content-Type` header value.
	pub fn parse_with_content_type(content_type: &str, data: &[u8]) -> Result<Self, CodecError> {
		let media_type: MediaType = content_type.parse()?;
		if !media_type.matches(&MediaType::multipart_related()) {
			return Err(CodecError::UnsupportedMediaType(content_type.to_owned()));
		}

		let boundary = media_type
			.parameter("boundary")
			.ok_or(CodecError::MissingBoundary)?
			.to_owned();
		let root_type = media_type
			.parameter("type")
			.and_then(|declared| declared.parse().ok());

		let parts = Self::parse(data, &boundary)?;
		Ok(Self {
			boundary,
			root_type,
			parts,
		})
	}

	/// Parses a payload without a declared boundary by scanning for the first
	/// `--token` line.
	pub fn parse_with_detected_boundary(data: &[u8]) -> Result<Self, CodecError> {
		let boundary = Self::detect_boundary(data)?;
		let parts = Self::parse(data, &boundary)?;
		Ok(Self {
			boundary,
			root_type: None,
			parts,
		})
	}

	fn detect_boundary(data: &[u8]) -> Result<String, CodecError> {
		let mut offset = 0;
		loop {
			let line_end = find(&data[offset..], CRLF).map(|at| offset + at);
			let line = match line_end {
				Some(end) => &data[offset..end],
				None => &data[offset..],
			};
			if let Some(token) = line.strip_prefix(b"--") {
				let token = token.strip_suffix(b"--").unwrap_or(token);
				let token = std::str::from_utf8(token)
					.map_err(|_| CodecError::MissingBoundary)?
					.trim();
				if token.is_empty() {
					return Err(CodecError::MissingBoundary);
				}
				return Ok(token.to_owned());
			}
			match line_end {
				Some(end) => offset = end + CRLF.len(),
				None => return Err(CodecError::MissingBoundary),
			}
		}
	}

	/// Splits `data` into its parts under the given boundary.
	///
	/// The preamble before the first delimiter and the closing `--` marker are
	/// discarded; part bodies are returned verbatim.
	pub fn parse(data: &[u8], boundary: &str) -> Result<Vec<Part>, CodecError> {
		let delimiter = format!("\r\n--{boundary}");
		// A leading CRLF unifies the first delimiter with the inner ones.
		let mut framed = Vec::with_capacity(data.len() + CRLF.len());
		framed.extend_from_slice(CRLF);
		framed.extend_from_slice(data);

		let mut parts = Vec::new();
		let Some(mut cursor) = find(&framed, delimiter.as_bytes()) else {
			return Err(CodecError::MalformedPayload(format!(
				"delimiter `--{boundary}` not found"
			)));
		};
		cursor += delimiter.len();

		loop {
			let section_end =
				find(&framed[cursor..], delimiter.as_bytes()).map(|at| cursor + at);
			let section = match section_end {
				Some(end) => &framed[cursor..end],
				None => &framed[cursor..],
			};

			// The closing delimiter is `--boundary--`.
			if section.starts_with(b"--") {
				break;
			}

			parts.push(Self::parse_part(section)?);

			match section_end {
				Some(end) => cursor = end + delimiter.len(),
				None => {
					return Err(CodecError::MalformedPayload(
						"missing closing delimiter".to_owned(),
					))
				}
			}
		}

		Ok(parts)
	}

	fn parse_part(section: &[u8]) -> Result<Part, CodecError> {
		let separator = find(section, HEADER_SEPARATOR).ok_or_else(|| {
			CodecError::MalformedPayload("part without blank line after headers".to_owned())
		})?;
		let header_block = &section[..separator];
		let body = &section[separator + HEADER_SEPARATOR.len()..];

		let mut content_type = None;
		let mut headers = Vec::new();
		for line in header_block
			.split(|&byte| byte == b'\n')
			.map(|line| line.strip_suffix(b"\r").unwrap_or(line))
			.filter(|line| !line.is_empty())
		{
			let line = std::str::from_utf8(line).map_err(|_| {
				CodecError::MalformedHeader("header line is not valid UTF-8".to_owned())
			})?;
			let (name, value) = line.split_once(':').ok_or_else(|| {
				CodecError::MalformedHeader(format!("header line `{line}` has no `:`"))
			})?;
			let (name, value) = (name.trim(), value.trim());
			if name.is_empty() {
				return Err(CodecError::MalformedHeader(format!(
					"header line `{line}` has an empty name"
				)));
			}
			if name.eq_ignore_ascii_case("content-type") {
				content_type = Some(value.parse()?);
			} else {
				headers.push((name.to_owned(), value.to_owned()));
			}
		}

		Ok(Part {
			content_type: content_type.unwrap_or_else(MediaType::application_octet_stream),
			headers,
			body: Bytes::copy_from_slice(body),
		})
	}
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
	haystack
		.windows(needle.len())
		.position(|window| window == needle)
}
