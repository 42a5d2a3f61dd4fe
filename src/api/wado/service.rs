use crate::backend::{InstanceStore, StorageError, StoredInstance};
use crate::config::JsonConfig;
use crate::dicomweb::json::{encode_object, EncodeOptions};
use crate::dicomweb::media_type::MediaType;
use crate::dicomweb::multipart::{MultipartRelated, Part};
use dicom::core::value::Value;
use dicom::dictionary_std::tags;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum RetrieveError {
	#[error("no matching resource")]
	NotFound,
	#[error("invalid frame list `{list}`")]
	InvalidFrameList { list: String },
	#[error("frame {frame} does not exist")]
	FrameOutOfRange { frame: u32 },
	#[error("pixel data encoding is not supported for frame retrieval")]
	UnsupportedPixelData,
	#[error(transparent)]
	Storage(#[from] StorageError),
}

/// The retrieve transaction over an abstract instance store.
#[derive(Clone)]
pub struct WadoService {
	instances: Arc<dyn InstanceStore>,
	json: JsonConfig,
	retrieve_base: Option<Url>,
}

impl WadoService {
	pub fn new(
		instances: Arc<dyn InstanceStore>,
		json: JsonConfig,
		retrieve_base: Option<Url>,
	) -> Self {
		Self {
			instances,
			json,
			retrieve_base,
		}
	}

	/// All instances of a study as a `multipart/related` payload of
	/// `application/dicom` parts.
	pub async fn retrieve_study(&self, study_uid: &str) -> Result<MultipartRelated, RetrieveError> {
		let instances = self.instances.study(study_uid).await?;
		Self::to_multipart(instances)
	}

	pub async fn retrieve_series(
		&self,
		study_uid: &str,
		series_uid: &str,
	) -> Result<MultipartRelated, RetrieveError> {
		let instances = self.instances.series(study_uid, series_uid).await?;
		Self::to_multipart(instances)
	}

	pub async fn retrieve_instance(
		&self,
		study_uid: &str,
		series_uid: &str,
		instance_uid: &str,
	) -> Result<MultipartRelated, RetrieveError> {
		let instance = self.fetch_instance(study_uid, series_uid, instance_uid).await?;
		Self::to_multipart(vec![instance])
	}

	/// Study or series metadata as DICOM JSON datasets. Pixel data over the
	/// inline threshold is replaced by a bulk data reference pointing at the
	/// instance resource.
	pub async fn metadata(
		&self,
		study_uid: &str,
		series_uid: Option<&str>,
	) -> Result<Vec<JsonValue>, RetrieveError> {
		let instances = match series_uid {
			Some(series_uid) => self.instances.series(study_uid, series_uid).await?,
			None => self.instances.study(study_uid).await?,
		};
		if instances.is_empty() {
			return Err(RetrieveError::NotFound);
		}

		Ok(instances
			.iter()
			.map(|instance| {
				let mut options = EncodeOptions {
					inline_binary_threshold: self.json.inline_binary_threshold,
					..EncodeOptions::default()
				};
				if let Some(base) = &self.retrieve_base {
					options.bulkdata_uris.insert(
						tags::PIXEL_DATA,
						format!(
							"{base}/studies/{}/series/{}/instances/{}",
							instance.study_instance_uid,
							instance.series_instance_uid,
							instance.sop_instance_uid
						),
					);
				}
				encode_object(&instance.dataset, &options)
			})
			.collect())
	}

	/// Selected frames of a multi-frame instance, one
	/// `application/octet-stream` part per requested frame.
	///
	/// The raw frame list is only validated here, after routing: `0`, empty
	/// entries and non-numeric entries are rejected as invalid, while frame
	/// numbers beyond the instance's frame count are reported as missing.
	pub async fn retrieve_frames(
		&self,
		study_uid: &str,
		series_uid: &str,
		instance_uid: &str,
		raw_frame_list: &str,
	) -> Result<MultipartRelated, RetrieveError> {
		let frames = parse_frame_list(raw_frame_list)?;
		let instance = self.fetch_instance(study_uid, series_uid, instance_uid).await?;

		let pixel_data = instance
			.dataset
			.get(tags::PIXEL_DATA)
			.ok_or(RetrieveError::NotFound)?;
		let data = match pixel_data.value() {
			Value::Primitive(primitive) => primitive.to_bytes(),
			// Encapsulated (compressed) pixel data is out of scope for
			// frame-level access.
			_ => return Err(RetrieveError::UnsupportedPixelData),
		};

		let frame_size = frame_size(&instance)?;
		let frame_count = data.len() / frame_size.max(1);

		let mut multipart =
			MultipartRelated::new(Some(MediaType::application_octet_stream()));
		for frame in frames {
			let index = (frame - 1) as usize;
			if index >= frame_count {
				return Err(RetrieveError::FrameOutOfRange { frame });
			}
			let body = data[index * frame_size..(index + 1) * frame_size].to_vec();
			multipart.push(Part::new(MediaType::application_octet_stream(), body));
		}
		Ok(multipart)
	}

	/// Deletes a whole study, returning the number of removed instances.
	pub async fn delete_study(&self, study_uid: &str) -> Result<usize, RetrieveError> {
		let deleted = self.instances.delete_study(study_uid).await?;
		if deleted == 0 {
			return Err(RetrieveError::NotFound);
		}
		Ok(deleted)
	}

	async fn fetch_instance(
		&self,
		study_uid: &str,
		series_uid: &str,
		instance_uid: &str,
	) -> Result<StoredInstance, RetrieveError> {
		self.instances
			.get(instance_uid)
			.await?
			.filter(|instance| {
				instance.study_instance_uid == study_uid
					&& instance.series_instance_uid == series_uid
			})
			.ok_or(RetrieveError::NotFound)
	}

	fn to_multipart(instances: Vec<StoredInstance>) -> Result<MultipartRelated, RetrieveError> {
		if instances.is_empty() {
			return Err(RetrieveError::NotFound);
		}

		let mut multipart = MultipartRelated::new(Some(MediaType::application_dicom()));
		for instance in instances {
			let length = instance.data.len();
			multipart.push(
				Part::new(MediaType::application_dicom(), instance.data)
					.with_header("Content-Length", &length.to_string()),
			);
		}
		Ok(multipart)
	}
}

/// Uncompressed frame size derived from the image pixel description.
fn frame_size(instance: &StoredInstance) -> Result<usize, RetrieveError> {
	let rows = element_u32(instance, tags::ROWS)?;
	let columns = element_u32(instance, tags::COLUMNS)?;
	let samples = element_u32(instance, tags::SAMPLES_PER_PIXEL).unwrap_or(1);
	let bits_allocated = element_u32(instance, tags::BITS_ALLOCATED)?;

	Ok((rows * columns * samples * bits_allocated.div_ceil(8)) as usize)
}

fn element_u32(
	instance: &StoredInstance,
	tag: dicom::core::Tag,
) -> Result<u32, RetrieveError> {
	instance
		.dataset
		.get(tag)
		.and_then(|element| element.to_int::<u32>().ok())
		.ok_or(RetrieveError::UnsupportedPixelData)
}

/// Parses the comma-joined frame list. Frame numbers are 1-based.
pub fn parse_frame_list(raw: &str) -> Result<Vec<u32>, RetrieveError> {
	let invalid = || RetrieveError::InvalidFrameList {
		list: raw.to_owned(),
	};

	if raw.is_empty() {
		return Err(invalid());
	}
	raw.split(',')
		.map(|entry| match entry.trim().parse::<u32>() {
			Ok(frame) if frame >= 1 => Ok(frame),
			_ => Err(invalid()),
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::mem::MemInstanceStore;
	use bytes::Bytes;
	use dicom::core::{PrimitiveValue, VR};
	use dicom::object::mem::InMemElement;
	use dicom::object::InMemDicomObject;

	fn json_config() -> JsonConfig {
		JsonConfig {
			inline_binary_threshold: 10240,
		}
	}

	fn multiframe_instance() -> StoredInstance {
		// 2x2, 8 bits, single sample, 3 frames of 4 bytes each.
		let pixel_data: Vec<u8> = (0u8..12).collect();
		let dataset = InMemDicomObject::from_element_iter([
			InMemElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.7")),
			InMemElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("7.8.9")),
			InMemElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3")),
			InMemElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from("4.5.6")),
			InMemElement::new(tags::ROWS, VR::US, PrimitiveValue::U16(vec![2].into())),
			InMemElement::new(tags::COLUMNS, VR::US, PrimitiveValue::U16(vec![2].into())),
			InMemElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::U16(vec![8].into())),
			InMemElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::U16(vec![1].into())),
			InMemElement::new(tags::NUMBER_OF_FRAMES, VR::IS, PrimitiveValue::I32(vec![3].into())),
			InMemElement::new(tags::PIXEL_DATA, VR::OB, PrimitiveValue::U8(pixel_data.clone().into())),
		]);

		StoredInstance {
			sop_class_uid: "1.2.840.10008.5.1.4.1.1.7".to_owned(),
			sop_instance_uid: "7.8.9".to_owned(),
			study_instance_uid: "1.2.3".to_owned(),
			series_instance_uid: "4.5.6".to_owned(),
			dataset,
			data: Bytes::from_static(b"DICM-bytes"),
		}
	}

	async fn service_with_instance() -> WadoService {
		let store = Arc::new(MemInstanceStore::new());
		store.put(multiframe_instance()).await.unwrap();
		WadoService::new(store, json_config(), None)
	}

	#[test]
	fn frame_list_validation() {
		assert_eq!(parse_frame_list("1,2,3").unwrap(), vec![1, 2, 3]);
		assert!(parse_frame_list("").is_err());
		assert!(parse_frame_list("0").is_err());
		assert!(parse_frame_list("1,x").is_err());
		assert!(parse_frame_list("1,,2").is_err());
	}

	#[tokio::test]
	async fn retrieves_instance_as_multipart() {
		let wado = service_with_instance().await;
		let multipart = wado
			.retrieve_instance("1.2.3", "4.5.6", "7.8.9")
			.await
			.unwrap();

		assert_eq!(multipart.parts().len(), 1);
		let part = &multipart.parts()[0];
		assert!(part.content_type.matches(&MediaType::application_dicom()));
		assert_eq!(part.body.as_ref(), b"DICM-bytes");
		assert_eq!(part.header("Content-Length"), Some("10"));
	}

	#[tokio::test]
	async fn instance_path_must_match_hierarchy() {
		let wado = service_with_instance().await;
		let result = wado.retrieve_instance("1.2.3", "9.9.9", "7.8.9").await;
		assert!(matches!(result, Err(RetrieveError::NotFound)));
	}

	#[tokio::test]
	async fn slices_requested_frames() {
		let wado = service_with_instance().await;
		let multipart = wado
			.retrieve_frames("1.2.3", "4.5.6", "7.8.9", "1,3")
			.await
			.unwrap();

		assert_eq!(multipart.parts().len(), 2);
		assert_eq!(multipart.parts()[0].body.as_ref(), &[0, 1, 2, 3]);
		assert_eq!(multipart.parts()[1].body.as_ref(), &[8, 9, 10, 11]);
	}

	#[tokio::test]
	async fn rejects_out_of_range_frames() {
		let wado = service_with_instance().await;
		let result = wado.retrieve_frames("1.2.3", "4.5.6", "7.8.9", "4").await;
		assert!(matches!(
			result,
			Err(RetrieveError::FrameOutOfRange { frame: 4 })
		));
	}

	#[tokio::test]
	async fn metadata_encodes_datasets() {
		let wado = service_with_instance().await;
		let metadata = wado.metadata("1.2.3", None).await.unwrap();

		assert_eq!(metadata.len(), 1);
		assert_eq!(
			metadata[0]["00080018"]["Value"],
			serde_json::json!(["7.8.9"])
		);

		let missing = wado.metadata("9.9.9", None).await;
		assert!(matches!(missing, Err(RetrieveError::NotFound)));
	}

	#[tokio::test]
	async fn delete_study_reports_removed_count() {
		let wado = service_with_instance().await;
		assert_eq!(wado.delete_study("1.2.3").await.unwrap(), 1);
		assert!(matches!(
			wado.delete_study("1.2.3").await,
			Err(RetrieveError::NotFound)
		));
	}
}
