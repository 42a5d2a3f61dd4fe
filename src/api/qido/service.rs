use crate::api::qido::{INSTANCE_SEARCH_TAGS, SERIES_SEARCH_TAGS, STUDY_SEARCH_TAGS};
use crate::backend::{InstanceStore, StorageError, StoredInstance};
use crate::dicomweb::json::{encode_object, parse_tag_key, EncodeOptions};
use crate::types::UI;
use dicom::core::{DataDictionary, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::tags;
use dicom::object::mem::InMemElement;
use dicom::object::{InMemDicomObject, StandardDataDictionary};
use serde::de::{Error as DeError, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Formatter;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Query parameters for a QIDO-RS request.
///
/// <https://dicom.nema.org/medical/dicom/current/output/html/part18.html#table_8.3.4-1>
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryParameters {
	#[serde(rename = "fuzzymatching")]
	pub fuzzy_matching: bool,
	#[serde(rename = "includefield")]
	#[serde(deserialize_with = "deserialize_includefield")]
	pub include_field: IncludeField,
	pub limit: usize,
	pub offset: usize,
}

impl Default for QueryParameters {
	fn default() -> Self {
		Self {
			fuzzy_matching: false,
			include_field: IncludeField::List(Vec::new()),
			limit: 200,
			offset: 0,
		}
	}
}

#[derive(Debug, PartialEq, Eq)]
pub enum IncludeField {
	All,
	List(Vec<Tag>),
}

/// Attribute match criteria: every non-reserved query parameter whose key
/// resolves to a known attribute, kept in its raw string form.
#[derive(Debug, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "HashMap<String, String>")]
pub struct MatchCriteria(pub Vec<(Tag, String)>);

/// Query parameter names that are not attribute matches.
const RESERVED_PARAMETERS: &[&str] =
	&["fuzzymatching", "includefield", "limit", "offset"];

impl TryFrom<HashMap<String, String>> for MatchCriteria {
	type Error = String;

	fn try_from(value: HashMap<String, String>) -> Result<Self, Self::Error> {
		let mut pairs: Vec<(Tag, String)> = value
			.into_iter()
			.filter(|(key, _)| !RESERVED_PARAMETERS.contains(&key.as_str()))
			.filter_map(|(key, value)| resolve_attribute(&key).map(|tag| (tag, value)))
			.collect();
		pairs.sort_unstable_by_key(|(tag, _)| *tag);
		Ok(Self(pairs))
	}
}

/// Resolves an attribute key: 8 hex digits or a standard keyword.
fn resolve_attribute(key: &str) -> Option<Tag> {
	parse_tag_key(key).ok().or_else(|| {
		StandardDataDictionary
			.by_name(key)
			.map(|entry| entry.tag.inner())
	})
}

/// Collects comma-separated `includefield` attributes;
/// the value `all` selects every available attribute.
fn deserialize_includefield<'de, D>(deserializer: D) -> Result<IncludeField, D::Error>
where
	D: Deserializer<'de>,
{
	struct IncludeFieldVisitor;

	impl Visitor<'_> for IncludeFieldVisitor {
		type Value = IncludeField;

		fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
			write!(formatter, "a value of <{{attribute}}(,{{attribute}})* | all>")
		}

		fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
		where
			E: DeError,
		{
			if v.split(',').any(|field| field.eq_ignore_ascii_case("all")) {
				return Ok(IncludeField::All);
			}
			let fields = v
				.split(',')
				.filter(|field| !field.is_empty())
				.map(|field| {
					resolve_attribute(field)
						.ok_or_else(|| E::custom(format!("unknown attribute `{field}`")))
				})
				.collect::<Result<Vec<Tag>, E>>()?;
			Ok(IncludeField::List(fields))
		}
	}

	deserializer.deserialize_str(IncludeFieldVisitor)
}

#[derive(Debug, Error)]
pub enum SearchError {
	#[error(transparent)]
	Storage(#[from] StorageError),
}

/// The search transaction over an abstract instance store.
#[derive(Clone)]
pub struct QidoService {
	instances: Arc<dyn InstanceStore>,
	retrieve_base: Option<Url>,
}

impl QidoService {
	pub fn new(instances: Arc<dyn InstanceStore>, retrieve_base: Option<Url>) -> Self {
		Self {
			instances,
			retrieve_base,
		}
	}

	pub async fn search_studies(
		&self,
		parameters: &QueryParameters,
		criteria: &MatchCriteria,
	) -> Result<Vec<JsonValue>, SearchError> {
		let all = self.instances.all().await?;
		let mut studies: BTreeMap<UI, Vec<&StoredInstance>> = BTreeMap::new();
		for instance in &all {
			studies
				.entry(instance.study_instance_uid.clone())
				.or_default()
				.push(instance);
		}

		let summaries = studies.iter().map(|(study_uid, instances)| {
			let mut summary = self.study_summary(study_uid, instances);
			apply_includefield(
				&mut summary,
				&instances[0].dataset,
				&parameters.include_field,
			);
			summary
		});
		Ok(Self::select(summaries, parameters, criteria))
	}

	pub async fn search_series(
		&self,
		study_uid: &str,
		parameters: &QueryParameters,
		criteria: &MatchCriteria,
	) -> Result<Vec<JsonValue>, SearchError> {
		let instances = self.instances.study(study_uid).await?;
		let mut series: BTreeMap<UI, Vec<&StoredInstance>> = BTreeMap::new();
		for instance in &instances {
			series
				.entry(instance.series_instance_uid.clone())
				.or_default()
				.push(instance);
		}

		let summaries = series.iter().map(|(series_uid, instances)| {
			let mut summary = self.series_summary(study_uid, series_uid, instances);
			apply_includefield(
				&mut summary,
				&instances[0].dataset,
				&parameters.include_field,
			);
			summary
		});
		Ok(Self::select(summaries, parameters, criteria))
	}

	pub async fn search_instances(
		&self,
		study_uid: &str,
		series_uid: Option<&str>,
		parameters: &QueryParameters,
		criteria: &MatchCriteria,
	) -> Result<Vec<JsonValue>, SearchError> {
		let instances = match series_uid {
			Some(series_uid) => self.instances.series(study_uid, series_uid).await?,
			None => self.instances.study(study_uid).await?,
		};

		let summaries = instances.iter().map(|instance| {
			let mut summary = self.instance_summary(instance);
			apply_includefield(&mut summary, &instance.dataset, &parameters.include_field);
			summary
		});
		Ok(Self::select(summaries, parameters, criteria))
	}

	fn select(
		summaries: impl Iterator<Item = InMemDicomObject>,
		parameters: &QueryParameters,
		criteria: &MatchCriteria,
	) -> Vec<JsonValue> {
		summaries
			.filter(|summary| matches_criteria(summary, criteria))
			.skip(parameters.offset)
			.take(parameters.limit)
			.map(|summary| encode_object(&summary, &EncodeOptions::default()))
			.collect()
	}

	fn study_summary(&self, study_uid: &str, instances: &[&StoredInstance]) -> InMemDicomObject {
		let first = instances.first().expect("study groups are non-empty");
		let mut summary =
			copy_attributes(&first.dataset, STUDY_SEARCH_TAGS);

		let series: BTreeSet<&str> = instances
			.iter()
			.map(|instance| instance.series_instance_uid.as_str())
			.collect();
		let modalities: BTreeSet<String> = instances
			.iter()
			.filter_map(|instance| element_text(&instance.dataset, tags::MODALITY))
			.collect();

		summary.put(InMemElement::new(
			tags::NUMBER_OF_STUDY_RELATED_SERIES,
			VR::IS,
			PrimitiveValue::I32(vec![series.len() as i32].into()),
		));
		summary.put(InMemElement::new(
			tags::NUMBER_OF_STUDY_RELATED_INSTANCES,
			VR::IS,
			PrimitiveValue::I32(vec![instances.len() as i32].into()),
		));
		if !modalities.is_empty() {
			summary.put(InMemElement::new(
				tags::MODALITIES_IN_STUDY,
				VR::CS,
				PrimitiveValue::Strs(modalities.into_iter().collect::<Vec<_>>().into()),
			));
		}
		if let Some(base) = &self.retrieve_base {
			summary.put(InMemElement::new(
				tags::RETRIEVE_URL,
				VR::UR,
				PrimitiveValue::from(format!("{base}/studies/{study_uid}")),
			));
		}
		summary
	}

	fn series_summary(
		&self,
		study_uid: &str,
		series_uid: &str,
		instances: &[&StoredInstance],
	) -> InMemDicomObject {
		let first = instances.first().expect("series groups are non-empty");
		let mut summary =
			copy_attributes(&first.dataset, SERIES_SEARCH_TAGS);

		summary.put(InMemElement::new(
			tags::NUMBER_OF_SERIES_RELATED_INSTANCES,
			VR::IS,
			PrimitiveValue::I32(vec![instances.len() as i32].into()),
		));
		if let Some(base) = &self.retrieve_base {
			summary.put(InMemElement::new(
				tags::RETRIEVE_URL,
				VR::UR,
				PrimitiveValue::from(format!(
					"{base}/studies/{study_uid}/series/{series_uid}"
				)),
			));
		}
		summary
	}

	fn instance_summary(&self, instance: &StoredInstance) -> InMemDicomObject {
		let mut summary =
			copy_attributes(&instance.dataset, INSTANCE_SEARCH_TAGS);

		if let Some(base) = &self.retrieve_base {
			summary.put(InMemElement::new(
				tags::RETRIEVE_URL,
				VR::UR,
				PrimitiveValue::from(format!(
					"{base}/studies/{}/series/{}/instances/{}",
					instance.study_instance_uid,
					instance.series_instance_uid,
					instance.sop_instance_uid
				)),
			));
		}
		summary
	}

}

/// Expands a summary with the requested include fields.
fn apply_includefield(
	summary: &mut InMemDicomObject,
	source: &InMemDicomObject,
	include_field: &IncludeField,
) {
	match include_field {
		IncludeField::All => {
			let tags: Vec<Tag> = source.tags().collect();
			for tag in tags {
				// Bulk data has no place in search results.
				if tag == tags::PIXEL_DATA {
					continue;
				}
				if let Some(element) = source.get(tag) {
					summary.put(element.clone());
				}
			}
		}
		IncludeField::List(extra) => {
			for &tag in extra {
				if let Some(element) = source.get(tag) {
					summary.put(element.clone());
				}
			}
		}
	}
}

fn copy_attributes(source: &InMemDicomObject, selection: &[Tag]) -> InMemDicomObject {
	let mut target = InMemDicomObject::new_empty();
	for &tag in selection {
		if let Some(element) = source.get(tag) {
			target.put(element.clone());
		}
	}
	target
}

fn element_text(dataset: &InMemDicomObject, tag: Tag) -> Option<String> {
	dataset
		.get(tag)
		.and_then(|element| element.to_str().ok())
		.map(|value| value.trim().to_owned())
		.filter(|value| !value.is_empty())
}

/// Applies every match criterion: equality, `*` suffix prefix matching, or
/// any-of matching for comma-separated UID lists.
fn matches_criteria(dataset: &InMemDicomObject, criteria: &MatchCriteria) -> bool {
	criteria.0.iter().all(|(tag, pattern)| {
		let value = element_text(dataset, *tag).unwrap_or_default();
		match_value(&value, pattern)
	})
}

fn match_value(value: &str, pattern: &str) -> bool {
	if let Some(prefix) = pattern.strip_suffix('*') {
		return value.starts_with(prefix);
	}
	if pattern.contains(',') {
		return pattern.split(',').any(|candidate| candidate == value);
	}
	value == pattern
}
