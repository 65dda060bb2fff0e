//! Wire contracts spoken with the analysis/storage service.
//!
//! Every field the service may omit is an `Option` or carries `#[serde(default)]`; the viewer
//! applies its fallback rules once, when it assembles a sample, and never re-derives them here.

use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use serde_json::Value;
use std::collections::BTreeMap;

pub const CHANNEL_KEY_PREFIX: &str = "channel_";

pub fn sample_path(sample_id: &str) -> String {
    format!("/api/samples/{sample_id}")
}

pub fn raw_data_path(sample_id: &str) -> String {
    format!("/api/samples/{sample_id}/raw_data")
}

pub fn channel_path(sample_id: &str, channel_key: &str) -> String {
    format!("/api/samples/{sample_id}/channel/{channel_key}")
}

pub fn alleles_path(sample_id: &str) -> String {
    format!("/api/samples/{sample_id}/alleles")
}

pub fn channel_key(channel: u8) -> String {
    format!("{CHANNEL_KEY_PREFIX}{channel}")
}

/// Parses `channel_N` (N >= 1). Bare numbers are accepted too.
pub fn parse_channel_key(key: &str) -> Option<u8> {
    let digits = key.trim().strip_prefix(CHANNEL_KEY_PREFIX).unwrap_or(key.trim());
    match digits.parse::<u8>() {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(n),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleMetadata {
    pub sample_name: Option<String>,
    pub instrument: Option<String>,
    pub run_date: Option<String>,
    pub dye_set: Option<String>,
    pub file_type: Option<String>,
    pub size_standard: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSummary {
    pub color: Option<String>,
    pub dye: Option<String>,
    pub data_available: Option<bool>,
    pub raw_data: Option<Vec<f64>>,
    pub analyzed_data: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelArrays {
    #[serde(alias = "y")]
    pub raw_data: Option<Vec<f64>>,
    pub analyzed_data: Option<Vec<f64>>,
}

impl ChannelArrays {
    pub fn is_empty(&self) -> bool {
        self.raw_data.as_ref().is_none_or(|v| v.is_empty())
            && self.analyzed_data.as_ref().is_none_or(|v| v.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDataResponse {
    pub channels: BTreeMap<String, ChannelArrays>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakRecord {
    pub position: i64,
    pub height: f64,
    pub snr: Option<f64>,
    pub prominence: Option<f64>,
    pub width: Option<f64>,
    pub area: Option<f64>,
    pub size: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationRecord {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeStandardRecord {
    pub name: Option<String>,
    pub status: Option<String>,
    pub channel: Option<String>,
    pub peaks: Vec<PeakRecord>,
    pub expected_sizes: Vec<f64>,
    pub calibration: Option<CalibrationRecord>,
}

/// Older service builds only name the ladder; newer ones ship the matched peaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeStandardField {
    Named(String),
    Detailed(SizeStandardRecord),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllelePeakRecord {
    pub position: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlleleRecord {
    #[serde(
        deserialize_with = "deserialize_label",
        skip_serializing_if = "Option::is_none"
    )]
    pub allele1: Option<String>,
    #[serde(
        deserialize_with = "deserialize_label",
        skip_serializing_if = "Option::is_none"
    )]
    pub allele2: Option<String>,
    pub peaks: Vec<AllelePeakRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homozygote: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityMetricsRecord {
    pub overall_quality: Option<String>,
    pub average_snr: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleSummary {
    pub id: String,
    pub filename: Option<String>,
    pub metadata: SampleMetadata,
    pub channels: BTreeMap<String, ChannelSummary>,
    pub peaks: BTreeMap<String, Vec<PeakRecord>>,
    pub size_standard: Option<SizeStandardField>,
    pub alleles: BTreeMap<String, AlleleRecord>,
    pub manual_alleles: Option<BTreeMap<String, AlleleRecord>>,
    pub quality_metrics: Option<QualityMetricsRecord>,
}

/// Body of `PUT /api/samples/{id}/alleles`. Always the complete call set, never a patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlleleUpdate {
    pub sample_id: String,
    pub alleles: BTreeMap<String, AlleleRecord>,
}

/// Error payload carrying a `detail` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorBody {
    pub detail: Option<Value>,
}

impl ErrorBody {
    pub fn detail_text(&self) -> Option<String> {
        match self.detail.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

fn deserialize_label<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "allele label must be a string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_channel_key() {
        assert_eq!(parse_channel_key("channel_1"), Some(1));
        assert_eq!(parse_channel_key("5"), Some(5));
        assert_eq!(parse_channel_key("channel_0"), None);
        assert_eq!(parse_channel_key("LIZ"), None);
        assert_eq!(channel_key(3), "channel_3");
    }

    #[test]
    fn test_minimal_summary_uses_defaults() {
        let summary: SampleSummary = serde_json::from_str(r#"{"id":"s1"}"#).unwrap();
        assert_eq!(summary.id, "s1");
        assert!(summary.channels.is_empty());
        assert!(summary.size_standard.is_none());
        assert!(summary.metadata.sample_name.is_none());
    }

    #[test]
    fn test_size_standard_accepts_name_or_record() {
        let named: SampleSummary =
            serde_json::from_str(r#"{"id":"a","size_standard":"LIZ-500"}"#).unwrap();
        assert_eq!(
            named.size_standard,
            Some(SizeStandardField::Named("LIZ-500".to_string()))
        );

        let detailed: SampleSummary = serde_json::from_str(
            r#"{"id":"b","size_standard":{"status":"calibrated","peaks":[{"position":10,"height":300}],
                "expected_sizes":[35,50],"calibration":{"slope":0.5,"intercept":1.0,"r_squared":0.99}}}"#,
        )
        .unwrap();
        let Some(SizeStandardField::Detailed(record)) = detailed.size_standard else {
            panic!("expected detailed size standard");
        };
        assert_eq!(record.peaks.len(), 1);
        assert_eq!(record.expected_sizes, vec![35.0, 50.0]);
        assert_eq!(record.calibration.unwrap().slope, 0.5);
    }

    #[test]
    fn test_allele_labels_accept_numbers() {
        let record: AlleleRecord =
            serde_json::from_str(r#"{"allele1":12,"allele2":"9.3","homozygote":false}"#).unwrap();
        assert_eq!(record.allele1.as_deref(), Some("12"));
        assert_eq!(record.allele2.as_deref(), Some("9.3"));
        assert!(serde_json::from_str::<AlleleRecord>(r#"{"allele1":[1]}"#).is_err());
    }

    #[test]
    fn test_allele_update_omits_empty_slots() {
        let mut alleles = BTreeMap::new();
        alleles.insert(
            "vWA".to_string(),
            AlleleRecord {
                allele1: Some("16".to_string()),
                ..Default::default()
            },
        );
        let body = serde_json::to_value(AlleleUpdate {
            sample_id: "s".to_string(),
            alleles,
        })
        .unwrap();
        assert_eq!(body["alleles"]["vWA"]["allele1"], "16");
        assert!(body["alleles"]["vWA"].get("allele2").is_none());
    }

    #[test]
    fn test_channel_arrays_accept_plot_alias() {
        let arrays: ChannelArrays = serde_json::from_str(r#"{"y":[0,1,2]}"#).unwrap();
        assert_eq!(arrays.raw_data, Some(vec![0.0, 1.0, 2.0]));
        assert!(!arrays.is_empty());
        assert!(ChannelArrays::default().is_empty());
    }

    #[test]
    fn test_error_body_detail() {
        let body: ErrorBody = serde_json::from_str(r#"{"detail":"Sample not found"}"#).unwrap();
        assert_eq!(body.detail_text().as_deref(), Some("Sample not found"));
    }
}
