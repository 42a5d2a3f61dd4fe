//! Codec between the in-memory DICOM element model and the DICOM JSON
//! representation used by QIDO-RS, WADO-RS metadata and STOW-RS bodies.
//!
//! <https://dicom.nema.org/medical/dicom/current/output/chtml/part18/chapter_F.html>

use crate::dicomweb::CodecError;
use base64::Engine;
use dicom::core::value::{DataSetSequence, PrimitiveValue, Value};
use dicom::core::{Tag, VR};
use dicom::object::mem::InMemElement;
use dicom::object::InMemDicomObject;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;

/// Options applied while encoding a dataset.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
	/// Emit `"Value": []` for empty elements instead of omitting the key.
	pub include_empty_values: bool,
	/// Binary values up to this many bytes are inlined as base64;
	/// larger ones are replaced by a bulk data reference.
	pub inline_binary_threshold: usize,
	/// Caller-supplied bulk data URIs by tag. The codec never fabricates
	/// a URI; a binary value over the threshold without an entry here is
	/// inlined regardless of size.
	pub bulkdata_uris: HashMap<Tag, String>,
}

impl Default for EncodeOptions {
	fn default() -> Self {
		Self {
			include_empty_values: false,
			inline_binary_threshold: 10240,
			bulkdata_uris: HashMap::new(),
		}
	}
}

/// Encodes a dataset into a tag-keyed DICOM JSON object.
pub fn encode_object(object: &InMemDicomObject, options: &EncodeOptions) -> JsonValue {
	let mut dataset = Map::new();
	let tags: Vec<Tag> = object.tags().collect();
	for tag in tags {
		let Some(element) = object.get(tag) else {
			continue;
		};
		dataset.insert(tag_key(tag), encode_element(tag, element, options));
	}
	JsonValue::Object(dataset)
}

/// Decodes a full payload: either a single dataset object or an array of them.
pub fn decode_payload(data: &[u8]) -> Result<Vec<InMemDicomObject>, CodecError> {
	let value: JsonValue = serde_json::from_slice(data)
		.map_err(|err| CodecError::InvalidFormat(format!("invalid JSON payload: {err}")))?;

	match value {
		JsonValue::Array(items) => items.iter().map(decode_object).collect(),
		object @ JsonValue::Object(_) => Ok(vec![decode_object(&object)?]),
		other => Err(CodecError::MalformedPayload(format!(
			"expected a dataset object or array, got {other}"
		))),
	}
}

/// Decodes one tag-keyed DICOM JSON object into a dataset.
pub fn decode_object(value: &JsonValue) -> Result<InMemDicomObject, CodecError> {
	let dataset = value.as_object().ok_or_else(|| {
		CodecError::MalformedPayload("dataset is not a JSON object".to_owned())
	})?;

	let mut object = InMemDicomObject::new_empty();
	for (key, entry) in dataset {
		let tag = parse_tag_key(key)?;
		object.put(decode_element(tag, entry)?);
	}
	Ok(object)
}

fn encode_element(tag: Tag, element: &InMemElement, options: &EncodeOptions) -> JsonValue {
	let vr = element.vr();
	let mut entry = Map::new();
	entry.insert("vr".to_owned(), json!(vr_code(vr)));

	let values = match element.value() {
		Value::Sequence(sequence) => sequence
			.items()
			.iter()
			.map(|item| encode_object(item, options))
			.collect(),
		// Encapsulated pixel data is only addressable as bulk data.
		Value::PixelSequence { .. } => match options.bulkdata_uris.get(&tag) {
			Some(uri) => vec![json!({ "BulkDataURI": uri })],
			None => Vec::new(),
		},
		Value::Primitive(primitive) => encode_primitive(tag, vr, primitive, options),
	};

	if values.is_empty() {
		if options.include_empty_values {
			entry.insert("Value".to_owned(), JsonValue::Array(Vec::new()));
		}
	} else {
		entry.insert("Value".to_owned(), JsonValue::Array(values));
	}

	JsonValue::Object(entry)
}

fn encode_primitive(
	tag: Tag,
	vr: VR,
	primitive: &PrimitiveValue,
	options: &EncodeOptions,
) -> Vec<JsonValue> {
	if matches!(primitive, PrimitiveValue::Empty) {
		return Vec::new();
	}

	match vr {
		VR::PN => string_values(primitive)
			.into_iter()
			.map(|name| encode_person_name(&name))
			.collect(),
		VR::AT => attribute_tag_values(primitive)
			.into_iter()
			.map(|tag| json!(tag_key(tag)))
			.collect(),
		VR::SS | VR::SL | VR::SV | VR::IS | VR::US | VR::UL | VR::UV => {
			integer_values(primitive).map_or_else(
				|| string_values(primitive).into_iter().map(|s| json!(s)).collect(),
				|numbers| numbers.into_iter().map(|n| json!(n)).collect(),
			)
		}
		VR::FL | VR::FD | VR::DS => float_values(primitive).map_or_else(
			|| string_values(primitive).into_iter().map(|s| json!(s)).collect(),
			|numbers| numbers.into_iter().map(|n| json!(n)).collect(),
		),
		VR::OB | VR::OD | VR::OF | VR::OL | VR::OV | VR::OW | VR::UN => {
			let bytes = primitive.to_bytes();
			if bytes.is_empty() {
				return Vec::new();
			}
			match options.bulkdata_uris.get(&tag) {
				Some(uri) if bytes.len() > options.inline_binary_threshold => {
					vec![json!({ "BulkDataURI": uri })]
				}
				_ => vec![json!({
					"InlineBinary": base64::engine::general_purpose::STANDARD.encode(bytes)
				})],
			}
		}
		// The string family: splitting the backslash-delimited raw text.
		_ => string_values(primitive)
			.into_iter()
			.map(|s| json!(s))
			.collect(),
	}
}

fn decode_element(tag: Tag, entry: &JsonValue) -> Result<InMemElement, CodecError> {
	let entry = entry.as_object().ok_or_else(|| {
		CodecError::MalformedPayload(format!("element {} is not a JSON object", tag_key(tag)))
	})?;
	let code = entry
		.get("vr")
		.and_then(JsonValue::as_str)
		.ok_or_else(|| {
			CodecError::MalformedPayload(format!("element {} lacks a `vr` key", tag_key(tag)))
		})?;
	let vr = vr_from_code(code).ok_or_else(|| {
		CodecError::MalformedPayload(format!("element {} has unknown VR `{code}`", tag_key(tag)))
	})?;

	let values = match entry.get("Value") {
		None => return Ok(InMemElement::new(tag, vr, PrimitiveValue::Empty)),
		Some(values) => values.as_array().ok_or_else(|| {
			CodecError::MalformedPayload(format!(
				"element {} has a non-array `Value`",
				tag_key(tag)
			))
		})?,
	};
	if values.is_empty() {
		return Ok(InMemElement::new(tag, vr, PrimitiveValue::Empty));
	}

	match vr {
		VR::SQ => {
			let mut element =
				InMemElement::new(tag, VR::SQ, Value::Sequence(DataSetSequence::empty()));
			let items = element.items_mut().expect("sequence exists");
			for item in values {
				items.push(decode_object(item)?);
			}
			Ok(element)
		}
		VR::PN => {
			let names = values
				.iter()
				.map(|value| decode_person_name(tag, value))
				.collect::<Result<Vec<String>, CodecError>>()?;
			Ok(InMemElement::new(tag, vr, PrimitiveValue::Strs(names.into())))
		}
		VR::AT => {
			let tags = values
				.iter()
				.map(|value| {
					value
						.as_str()
						.ok_or_else(|| type_mismatch(tag, vr, value))
						.and_then(parse_tag_key)
				})
				.collect::<Result<Vec<Tag>, CodecError>>()?;
			Ok(InMemElement::new(tag, vr, PrimitiveValue::Tags(tags.into())))
		}
		VR::US | VR::UL | VR::UV => {
			let numbers = values
				.iter()
				.map(|value| value.as_u64().ok_or_else(|| type_mismatch(tag, vr, value)))
				.collect::<Result<Vec<u64>, CodecError>>()?;
			decode_unsigned(tag, vr, &numbers)
		}
		VR::SS | VR::SL | VR::SV | VR::IS => {
			let numbers = values
				.iter()
				.map(|value| value.as_i64().ok_or_else(|| type_mismatch(tag, vr, value)))
				.collect::<Result<Vec<i64>, CodecError>>()?;
			decode_signed(tag, vr, &numbers)
		}
		VR::FL | VR::FD | VR::DS => {
			let numbers = values
				.iter()
				.map(|value| value.as_f64().ok_or_else(|| type_mismatch(tag, vr, value)))
				.collect::<Result<Vec<f64>, CodecError>>()?;
			let primitive = if vr == VR::FL {
				let floats: Vec<f32> = numbers.iter().map(|&n| n as f32).collect();
				PrimitiveValue::F32(floats.into())
			} else {
				PrimitiveValue::F64(numbers.into())
			};
			Ok(InMemElement::new(tag, vr, primitive))
		}
		VR::OB | VR::OD | VR::OF | VR::OL | VR::OV | VR::OW | VR::UN => {
			decode_binary(tag, vr, values)
		}
		_ => {
			let strings = values
				.iter()
				.map(|value| {
					value
						.as_str()
						.map(str::to_owned)
						.ok_or_else(|| type_mismatch(tag, vr, value))
				})
				.collect::<Result<Vec<String>, CodecError>>()?;
			Ok(InMemElement::new(tag, vr, PrimitiveValue::Strs(strings.into())))
		}
	}
}

fn decode_unsigned(tag: Tag, vr: VR, numbers: &[u64]) -> Result<InMemElement, CodecError> {
	let primitive = match vr {
		VR::US => PrimitiveValue::U16(
			numbers
				.iter()
				.map(|&n| {
					u16::try_from(n).map_err(|_| range_overflow(tag, vr, n))
				})
				.collect::<Result<Vec<u16>, CodecError>>()?
				.into(),
		),
		VR::UL => PrimitiveValue::U32(
			numbers
				.iter()
				.map(|&n| {
					u32::try_from(n).map_err(|_| range_overflow(tag, vr, n))
				})
				.collect::<Result<Vec<u32>, CodecError>>()?
				.into(),
		),
		_ => PrimitiveValue::U64(numbers.to_vec().into()),
	};
	Ok(InMemElement::new(tag, vr, primitive))
}

fn decode_signed(tag: Tag, vr: VR, numbers: &[i64]) -> Result<InMemElement, CodecError> {
	let primitive = match vr {
		VR::SS => PrimitiveValue::I16(
			numbers
				.iter()
				.map(|&n| {
					i16::try_from(n).map_err(|_| range_overflow(tag, vr, n))
				})
				.collect::<Result<Vec<i16>, CodecError>>()?
				.into(),
		),
		VR::SL | VR::IS => PrimitiveValue::I32(
			numbers
				.iter()
				.map(|&n| {
					i32::try_from(n).map_err(|_| range_overflow(tag, vr, n))
				})
				.collect::<Result<Vec<i32>, CodecError>>()?
				.into(),
		),
		_ => PrimitiveValue::I64(numbers.to_vec().into()),
	};
	Ok(InMemElement::new(tag, vr, primitive))
}

fn decode_binary(tag: Tag, vr: VR, values: &[JsonValue]) -> Result<InMemElement, CodecError> {
	let [value] = values else {
		return Err(CodecError::MalformedPayload(format!(
			"binary element {} must carry exactly one value",
			tag_key(tag)
		)));
	};
	let entry = value
		.as_object()
		.ok_or_else(|| type_mismatch(tag, vr, value))?;

	if let Some(inline) = entry.get("InlineBinary") {
		let encoded = inline
			.as_str()
			.ok_or_else(|| type_mismatch(tag, vr, inline))?;
		let bytes = base64::engine::general_purpose::STANDARD
			.decode(encoded)
			.map_err(|err| {
				CodecError::MalformedPayload(format!(
					"element {} has invalid base64: {err}",
					tag_key(tag)
				))
			})?;
		return Ok(InMemElement::new(tag, vr, PrimitiveValue::U8(bytes.into())));
	}

	// Bulk data is fetched separately by the caller; the reference itself
	// carries no element value.
	if entry.contains_key("BulkDataURI") {
		return Ok(InMemElement::new(tag, vr, PrimitiveValue::Empty));
	}

	Err(CodecError::MalformedPayload(format!(
		"binary element {} carries neither InlineBinary nor BulkDataURI",
		tag_key(tag)
	)))
}

fn encode_person_name(name: &str) -> JsonValue {
	let mut entry = Map::new();
	let mut groups = name.split('=');
	for key in ["Alphabetic", "Ideographic", "Phonetic"] {
		match groups.next() {
			Some(group) if !group.is_empty() => {
				entry.insert(key.to_owned(), json!(group));
			}
			_ => {}
		}
	}
	JsonValue::Object(entry)
}

fn decode_person_name(tag: Tag, value: &JsonValue) -> Result<String, CodecError> {
	let entry = value
		.as_object()
		.ok_or_else(|| type_mismatch(tag, VR::PN, value))?;

	let mut groups = Vec::new();
	for key in ["Alphabetic", "Ideographic", "Phonetic"] {
		match entry.get(key) {
			None => groups.push(""),
			Some(group) => {
				groups.push(group.as_str().ok_or_else(|| type_mismatch(tag, VR::PN, group))?);
			}
		}
	}
	// Trailing empty representation groups are not encoded.
	let mut name = groups.join("=");
	while name.ends_with('=') {
		name.pop();
	}
	Ok(name)
}

/// Splits backslash-delimited raw text into its values.
fn string_values(primitive: &PrimitiveValue) -> Vec<String> {
	match primitive {
		PrimitiveValue::Empty => Vec::new(),
		PrimitiveValue::Str(s) => s.split('\\').map(str::to_owned).collect(),
		PrimitiveValue::Strs(ss) => ss
			.iter()
			.flat_map(|s| s.split('\\'))
			.map(str::to_owned)
			.collect(),
		other => other.to_str().split('\\').map(str::to_owned).collect(),
	}
}

fn integer_values(primitive: &PrimitiveValue) -> Option<Vec<i64>> {
	match primitive {
		PrimitiveValue::U8(v) => Some(v.iter().map(|&n| i64::from(n)).collect()),
		PrimitiveValue::U16(v) => Some(v.iter().map(|&n| i64::from(n)).collect()),
		PrimitiveValue::I16(v) => Some(v.iter().map(|&n| i64::from(n)).collect()),
		PrimitiveValue::U32(v) => Some(v.iter().map(|&n| i64::from(n)).collect()),
		PrimitiveValue::I32(v) => Some(v.iter().map(|&n| i64::from(n)).collect()),
		PrimitiveValue::I64(v) => Some(v.to_vec()),
		PrimitiveValue::U64(v) => v.iter().map(|&n| i64::try_from(n).ok()).collect(),
		PrimitiveValue::Str(s) => s.trim().parse().ok().map(|n| vec![n]),
		PrimitiveValue::Strs(ss) => ss.iter().map(|s| s.trim().parse().ok()).collect(),
		_ => None,
	}
}

fn float_values(primitive: &PrimitiveValue) -> Option<Vec<f64>> {
	match primitive {
		PrimitiveValue::F32(v) => Some(v.iter().map(|&n| f64::from(n)).collect()),
		PrimitiveValue::F64(v) => Some(v.to_vec()),
		PrimitiveValue::Str(s) => s.trim().parse().ok().map(|n| vec![n]),
		PrimitiveValue::Strs(ss) => ss.iter().map(|s| s.trim().parse().ok()).collect(),
		other => integer_values(other)
			.map(|numbers| numbers.into_iter().map(|n| n as f64).collect()),
	}
}

fn attribute_tag_values(primitive: &PrimitiveValue) -> Vec<Tag> {
	match primitive {
		PrimitiveValue::Tags(tags) => tags.to_vec(),
		other => string_values(other)
			.iter()
			.filter_map(|s| parse_tag_key(s).ok())
			.collect(),
	}
}

/// Renders a tag as 8 uppercase hex digits, group then element.
pub fn tag_key(tag: Tag) -> String {
	format!("{:04X}{:04X}", tag.group(), tag.element())
}

/// Parses an 8-hex-digit tag key.
pub fn parse_tag_key(key: &str) -> Result<Tag, CodecError> {
	if key.len() != 8 || !key.bytes().all(|byte| byte.is_ascii_hexdigit()) {
		return Err(CodecError::MalformedPayload(format!(
			"tag key `{key}` is not exactly 8 hex digits"
		)));
	}
	let group = u16::from_str_radix(&key[..4], 16)
		.map_err(|_| CodecError::MalformedPayload(format!("invalid tag key `{key}`")))?;
	let element = u16::from_str_radix(&key[4..], 16)
		.map_err(|_| CodecError::MalformedPayload(format!("invalid tag key `{key}`")))?;
	Ok(Tag(group, element))
}

fn type_mismatch(tag: Tag, vr: VR, value: &JsonValue) -> CodecError {
	CodecError::MalformedPayload(format!(
		"element {} of VR {} has incompatible value {value}",
		tag_key(tag),
		vr_code(vr),
	))
}

fn range_overflow(tag: Tag, vr: VR, value: impl std::fmt::Display) -> CodecError {
	CodecError::MalformedPayload(format!(
		"element {} of VR {} has out-of-range value {value}",
		tag_key(tag),
		vr_code(vr),
	))
}

const fn vr_code(vr: VR) -> &'static str {
	match vr {
		VR::AE => "AE",
		VR::AS => "AS",
		VR::AT => "AT",
		VR::CS => "CS",
		VR::DA => "DA",
		VR::DS => "DS",
		VR::DT => "DT",
		VR::FL => "FL",
		VR::FD => "FD",
		VR::IS => "IS",
		VR::LO => "LO",
		VR::LT => "LT",
		VR::OB => "OB",
		VR::OD => "OD",
		VR::OF => "OF",
		VR::OL => "OL",
		VR::OV => "OV",
		VR::OW => "OW",
		VR::PN => "PN",
		VR::SH => "SH",
		VR::SL => "SL",
		VR::SQ => "SQ",
		VR::SS => "SS",
		VR::ST => "ST",
		VR::SV => "SV",
		VR::TM => "TM",
		VR::UC => "UC",
		VR::UI => "UI",
		VR::UL => "UL",
		VR::UN => "UN",
		VR::UR => "UR",
		VR::US => "US",
		VR::UT => "UT",
		VR::UV => "UV",
	}
}

fn vr_from_code(code: &str) -> Option<VR> {
	let vr = match code {
		"AE" => VR::AE,
		"AS" => VR::AS,
		"AT" => VR::AT,
		"CS" => VR::CS,
		"DA" => VR::DA,
		"DS" => VR::DS,
		"DT" => VR::DT,
		"FL" => VR::FL,
		"FD" => VR::FD,
		"IS" => VR::IS,
		"LO" => VR::LO,
		"LT" => VR::LT,
		"OB" => VR::OB,
		"OD" => VR::OD,
		"OF" => VR::OF,
		"OL" => VR::OL,
		"OV" => VR::OV,
		"OW" => VR::OW,
		"PN" => VR::PN,
		"SH" => VR::SH,
		"SL" => VR::SL,
		"SQ" => VR::SQ,
		"SS" => VR::SS,
		"ST" => VR::ST,
		"SV" => VR::SV,
		"TM" => VR::TM,
		"UC" => VR::UC,
		"UI" => VR::UI,
		"UL" => VR::UL,
		"UN" => VR::UN,
		"UR" => VR::UR,
		"US" => VR::US,
		"UT" => VR::UT,
		"UV" => VR::UV,
		_ => return None,
	};
	Some(vr)
}

#[cfg(test)]
mod tests {
	use super::*;
	use dicom::dictionary_std::tags;

	fn sample_dataset() -> InMemDicomObject {
		let mut inner = InMemDicomObject::new_empty();
		inner.put(InMemElement::new(
			tags::CODE_VALUE,
			VR::SH,
			PrimitiveValue::from("T-A0100"),
		));

		let mut middle = InMemDicomObject::new_empty();
		middle.put(InMemElement::new(
			tags::CODE_MEANING,
			VR::LO,
			PrimitiveValue::from("Brain"),
		));
		let mut nested = InMemElement::new(
			tags::CONCEPT_NAME_CODE_SEQUENCE,
			VR::SQ,
			Value::Sequence(DataSetSequence::empty()),
		);
		nested.items_mut().expect("sequence exists").push(inner);
		middle.put(nested);

		let mut object = InMemDicomObject::new_empty();
		object.put(InMemElement::new(
			tags::SOP_INSTANCE_UID,
			VR::UI,
			PrimitiveValue::from("1.2.3.4"),
		));
		object.put(InMemElement::new(
			tags::MODALITY,
			VR::CS,
			PrimitiveValue::from("CT"),
		));
		object.put(InMemElement::new(
			tags::PATIENT_NAME,
			VR::PN,
			PrimitiveValue::from("Doe^John=ドウ^ジョン"),
		));
		object.put(InMemElement::new(
			tags::ROWS,
			VR::US,
			PrimitiveValue::U16(vec![512, 256].into()),
		));
		object.put(InMemElement::new(
			tags::SLICE_THICKNESS,
			VR::DS,
			PrimitiveValue::F64(vec![1.25].into()),
		));
		object.put(InMemElement::new(
			tags::INSTANCE_NUMBER,
			VR::IS,
			PrimitiveValue::I32(vec![7].into()),
		));
		object.put(InMemElement::new(
			tags::FRAME_INCREMENT_POINTER,
			VR::AT,
			PrimitiveValue::Tags(vec![Tag(0x0018, 0x1063)].into()),
		));
		object.put(InMemElement::new(
			tags::PIXEL_DATA,
			VR::OB,
			PrimitiveValue::U8(vec![0x00, 0x01, 0x02, 0xFF].into()),
		));
		// A sequence nested two levels deep.
		let mut sequence = InMemElement::new(
			tags::REFERENCED_SERIES_SEQUENCE,
			VR::SQ,
			Value::Sequence(DataSetSequence::empty()),
		);
		sequence.items_mut().expect("sequence exists").push(middle);
		object.put(sequence);

		object
	}

	#[test]
	fn roundtrip_reproduces_encoding() {
		let options = EncodeOptions::default();
		let encoded = encode_object(&sample_dataset(), &options);
		let decoded = decode_object(&encoded).unwrap();
		let reencoded = encode_object(&decoded, &options);

		assert_eq!(encoded, reencoded);
	}

	#[test]
	fn encodes_tag_keys_as_uppercase_hex() {
		let encoded = encode_object(&sample_dataset(), &EncodeOptions::default());
		let dataset = encoded.as_object().unwrap();

		assert!(dataset.contains_key("00080018"));
		assert!(dataset.contains_key("7FE00010"));
	}

	#[test]
	fn encodes_multi_valued_numerics_as_numbers() {
		let encoded = encode_object(&sample_dataset(), &EncodeOptions::default());

		assert_eq!(encoded["00280010"]["Value"], json!([512, 256]));
		assert_eq!(encoded["00180050"]["Value"], json!([1.25]));
		assert_eq!(encoded["00200013"]["Value"], json!([7]));
	}

	#[test]
	fn encodes_person_name_groups() {
		let encoded = encode_object(&sample_dataset(), &EncodeOptions::default());

		assert_eq!(
			encoded["00100010"]["Value"],
			json!([{ "Alphabetic": "Doe^John", "Ideographic": "ドウ^ジョン" }])
		);
	}

	#[test]
	fn decodes_person_name_components() {
		let payload = r#"{"00100010":{"vr":"PN","Value":[{"Alphabetic":"Doe^John"}]}}"#;
		let decoded = decode_payload(payload.as_bytes()).unwrap();
		let name = decoded[0]
			.get(Tag(0x0010, 0x0010))
			.expect("patient name present");

		assert_eq!(name.vr(), VR::PN);
		let value = name.to_str().unwrap();
		let mut components = value.split('^');
		assert_eq!(components.next(), Some("Doe"));
		assert_eq!(components.next(), Some("John"));
	}

	#[test]
	fn decodes_nested_sequences() {
		let encoded = encode_object(&sample_dataset(), &EncodeOptions::default());
		let decoded = decode_object(&encoded).unwrap();

		let series = decoded.get(tags::REFERENCED_SERIES_SEQUENCE).unwrap();
		let items = series.items().expect("sequence items");
		let concept = items[0].get(tags::CONCEPT_NAME_CODE_SEQUENCE).unwrap();
		let inner_items = concept.items().expect("nested items");
		let code = inner_items[0].get(tags::CODE_VALUE).unwrap();

		assert_eq!(code.to_str().unwrap(), "T-A0100");
	}

	#[test]
	fn empty_values_are_omitted_by_default() {
		let mut object = InMemDicomObject::new_empty();
		object.put(InMemElement::new(
			tags::ACCESSION_NUMBER,
			VR::SH,
			PrimitiveValue::Empty,
		));

		let encoded = encode_object(&object, &EncodeOptions::default());
		assert_eq!(encoded["00080050"], json!({ "vr": "SH" }));

		let options = EncodeOptions {
			include_empty_values: true,
			..EncodeOptions::default()
		};
		let encoded = encode_object(&object, &options);
		assert_eq!(encoded["00080050"], json!({ "vr": "SH", "Value": [] }));
	}

	#[test]
	fn inline_binary_respects_threshold_and_bulkdata_table() {
		let mut object = InMemDicomObject::new_empty();
		object.put(InMemElement::new(
			tags::PIXEL_DATA,
			VR::OB,
			PrimitiveValue::U8(vec![0u8; 32].into()),
		));

		let mut options = EncodeOptions {
			inline_binary_threshold: 16,
			..EncodeOptions::default()
		};
		// Over the threshold without a caller-supplied URI: still inlined.
		let encoded = encode_object(&object, &options);
		assert!(encoded["7FE00010"]["Value"][0]["InlineBinary"].is_string());

		options
			.bulkdata_uris
			.insert(tags::PIXEL_DATA, "http://example.org/bulk/1".to_owned());
		let encoded = encode_object(&object, &options);
		assert_eq!(
			encoded["7FE00010"]["Value"],
			json!([{ "BulkDataURI": "http://example.org/bulk/1" }])
		);
	}

	#[test]
	fn inline_binary_roundtrip() {
		let mut object = InMemDicomObject::new_empty();
		object.put(InMemElement::new(
			tags::PIXEL_DATA,
			VR::OB,
			PrimitiveValue::U8(vec![0xCA, 0xFE, 0xBA, 0xBE].into()),
		));

		let encoded = encode_object(&object, &EncodeOptions::default());
		let decoded = decode_object(&encoded).unwrap();
		let pixel_data = decoded.get(tags::PIXEL_DATA).unwrap();

		assert_eq!(pixel_data.to_bytes().unwrap().as_ref(), &[0xCA, 0xFE, 0xBA, 0xBE]);
	}

	#[test]
	fn rejects_invalid_json() {
		assert!(matches!(
			decode_payload(b"not json"),
			Err(CodecError::InvalidFormat(_))
		));
	}

	#[test]
	fn rejects_element_without_vr() {
		let payload = r#"{"00080018":{"Value":["1.2.3"]}}"#;
		assert!(matches!(
			decode_payload(payload.as_bytes()),
			Err(CodecError::MalformedPayload(_))
		));
	}

	#[test]
	fn rejects_malformed_tag_keys() {
		for key in ["0008001", "000800181", "0008001G"] {
			let payload = format!(r#"{{"{key}":{{"vr":"UI","Value":["1"]}}}}"#);
			assert!(matches!(
				decode_payload(payload.as_bytes()),
				Err(CodecError::MalformedPayload(_))
			));
		}
	}

	#[test]
	fn rejects_type_mismatches() {
		let payload = r#"{"00280010":{"vr":"US","Value":["512"]}}"#;
		assert!(matches!(
			decode_payload(payload.as_bytes()),
			Err(CodecError::MalformedPayload(_))
		));

		let payload = r#"{"00100020":{"vr":"LO","Value":[42]}}"#;
		assert!(matches!(
			decode_payload(payload.as_bytes()),
			Err(CodecError::MalformedPayload(_))
		));
	}
}
