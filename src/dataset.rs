use std::{path::Path, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::error::{MaplapseError, MaplapseResult};

/// One geospatial record as produced by the upstream preparation step.
///
/// Only the fields the pipeline itself depends on are typed; everything else
/// (names, links, category labels, ...) is carried through verbatim so the
/// host serves exactly what was loaded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeoRecord {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(alias = "date")]
    pub timestamp: String,
    #[serde(flatten)]
    pub attrs: serde_json::Map<String, serde_json::Value>,
}

/// The in-memory dataset for one run. Loaded once, read-only afterwards;
/// shared with the render host behind an [`Arc`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Dataset {
    records: Vec<GeoRecord>,
}

impl Dataset {
    /// Read a pre-processed dataset file (a JSON array of records).
    ///
    /// A missing file and malformed content are the same class of failure:
    /// the run cannot proceed and nothing is worth retrying.
    pub fn load(path: impl AsRef<Path>) -> MaplapseResult<Arc<Dataset>> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MaplapseError::data_unavailable(format!(
                "cannot read dataset '{}': {e}",
                path.display()
            ))
        })?;
        let dataset: Dataset = serde_json::from_str(&raw).map_err(|e| {
            MaplapseError::data_unavailable(format!(
                "malformed dataset '{}': {e}",
                path.display()
            ))
        })?;
        tracing::info!(
            path = %path.display(),
            records = dataset.records.len(),
            "dataset loaded"
        );
        Ok(Arc::new(dataset))
    }

    pub fn from_records(records: Vec<GeoRecord>) -> Arc<Dataset> {
        Arc::new(Dataset { records })
    }

    pub fn records(&self) -> &[GeoRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_is_data_unavailable() {
        let err = Dataset::load("definitely/not/here.json").unwrap_err();
        assert!(matches!(err, MaplapseError::DataUnavailable(_)));
        assert!(err.to_string().contains("not/here.json"));
    }

    #[test]
    fn load_malformed_json_is_data_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Dataset::load(&path).unwrap_err();
        assert!(matches!(err, MaplapseError::DataUnavailable(_)));
    }

    #[test]
    fn parses_records_and_keeps_extra_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "p1", "lat": 42.88, "lng": -78.87, "date": "2024-01-02", "name": "North Pantry"},
                {"id": "p2", "lat": 42.91, "lng": -78.80, "timestamp": "2024-03-15"}
            ]"#,
        )
        .unwrap();

        let dataset = Dataset::load(&path).unwrap();
        assert_eq!(dataset.len(), 2);

        let first = &dataset.records()[0];
        assert_eq!(first.id, "p1");
        // The original preparation step emits `date`; we accept it as `timestamp`.
        assert_eq!(first.timestamp, "2024-01-02");
        assert_eq!(
            first.attrs.get("name").and_then(|v| v.as_str()),
            Some("North Pantry")
        );
    }

    #[test]
    fn record_missing_coordinates_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, r#"[{"id": "p1", "date": "2024-01-02"}]"#).unwrap();
        let err = Dataset::load(&path).unwrap_err();
        assert!(matches!(err, MaplapseError::DataUnavailable(_)));
    }
}
