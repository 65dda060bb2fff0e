use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::ViewerError;
use crate::sample::{ChannelId, Peak};

/// Share of the expected ladder fragments that must be matched by detected peaks before a
/// calibration is trusted.
pub const MIN_MATCHED_FRACTION: f64 = 0.8;

#[derive(Debug, Deserialize)]
struct LadderRecord {
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    dye: Option<String>,
    sizes: Vec<f64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SizeLadder {
    name: String,
    aliases: Vec<String>,
    dye: Option<String>,
    sizes: Vec<f64>,
}

impl SizeLadder {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn dye(&self) -> Option<&str> {
        self.dye.as_deref()
    }

    pub fn sizes(&self) -> &[f64] {
        &self.sizes
    }

    pub fn min_bp(&self) -> Option<f64> {
        self.sizes.iter().copied().reduce(f64::min)
    }

    pub fn max_bp(&self) -> Option<f64> {
        self.sizes.iter().copied().reduce(f64::max)
    }
}

fn normalize_ladder_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Clone, Debug, Default)]
pub struct SizeLadderCatalog {
    ladders: BTreeMap<String, SizeLadder>,
}

impl SizeLadderCatalog {
    pub fn from_json_str(data: &str) -> Result<Self, ViewerError> {
        let records: BTreeMap<String, LadderRecord> = serde_json::from_str(data).map_err(|e| {
            ViewerError::invalid_input(format!("Invalid size-standard catalog JSON: {e}"))
        })?;
        let mut ladders = BTreeMap::new();
        for (name, record) in records {
            let mut sizes = record
                .sizes
                .into_iter()
                .filter(|s| s.is_finite() && *s > 0.0)
                .collect::<Vec<_>>();
            if sizes.is_empty() {
                return Err(ViewerError::invalid_input(format!(
                    "Size standard '{name}' lists no fragment sizes"
                )));
            }
            sizes.sort_by(f64::total_cmp);
            ladders.insert(
                name.clone(),
                SizeLadder {
                    name,
                    aliases: record.aliases,
                    dye: record.dye,
                    sizes,
                },
            );
        }
        Ok(Self { ladders })
    }

    pub fn from_json_file(path: &str) -> Result<Self, ViewerError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ViewerError::new(
                crate::error::ErrorCode::Io,
                format!("Could not read size-standard catalog '{path}': {e}"),
            )
        })?;
        Self::from_json_str(&text)
    }

    pub fn get(&self, name: &str) -> Option<&SizeLadder> {
        self.ladders.get(name)
    }

    /// Matches a ladder by name or alias, ignoring case and punctuation ("LIZ-500" == "liz500").
    pub fn resolve(&self, name: &str) -> Option<&SizeLadder> {
        if let Some(ladder) = self.ladders.get(name) {
            return Some(ladder);
        }
        let needle = normalize_ladder_name(name);
        if needle.is_empty() {
            return None;
        }
        self.ladders.values().find(|ladder| {
            normalize_ladder_name(ladder.name()) == needle
                || ladder
                    .aliases()
                    .iter()
                    .any(|alias| normalize_ladder_name(alias) == needle)
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &SizeLadder> {
        self.ladders.values()
    }

    pub fn names_sorted(&self) -> Vec<String> {
        self.ladders.keys().cloned().collect()
    }
}

pub fn default_size_ladders() -> SizeLadderCatalog {
    SizeLadderCatalog::from_json_str(include_str!("../assets/size_standards.json"))
        .expect("Embedded size-standard catalog is valid")
}

/// Fitted scan-position to base-pair regression, computed upstream.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: Option<f64>,
}

impl Calibration {
    /// Rejects non-finite coefficients so that applying the calibration stays total.
    pub fn new(slope: f64, intercept: f64, r_squared: Option<f64>) -> Option<Self> {
        if !slope.is_finite() || !intercept.is_finite() {
            return None;
        }
        Some(Self {
            slope,
            intercept,
            r_squared: r_squared.filter(|r| r.is_finite()),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CalibrationStatus {
    Uncalibrated,
    InsufficientPeaks,
    Calibrated,
}

impl CalibrationStatus {
    pub fn parse(text: &str) -> Option<Self> {
        match normalize_ladder_name(text).as_str() {
            "uncalibrated" => Some(Self::Uncalibrated),
            "insufficientpeaks" => Some(Self::InsufficientPeaks),
            "calibrated" => Some(Self::Calibrated),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uncalibrated => "uncalibrated",
            Self::InsufficientPeaks => "insufficient-peaks",
            Self::Calibrated => "calibrated",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SizeStandard {
    name: Option<String>,
    channel: Option<ChannelId>,
    peaks: Vec<Peak>,
    expected_sizes: Vec<f64>,
    calibration: Option<Calibration>,
    status: CalibrationStatus,
}

impl SizeStandard {
    /// Peaks are put in scan order, so the i-th peak corresponds to the i-th expected size.
    /// The status is derived here and nowhere else.
    pub fn new(
        name: Option<String>,
        channel: Option<ChannelId>,
        mut peaks: Vec<Peak>,
        expected_sizes: Vec<f64>,
        calibration: Option<Calibration>,
        upstream_status: Option<CalibrationStatus>,
    ) -> Self {
        peaks.sort_by_key(|p| p.position);
        let status = Self::derive_status(
            peaks.len(),
            expected_sizes.len(),
            calibration.is_some(),
            upstream_status,
        );
        if calibration.is_some() && status != CalibrationStatus::Calibrated {
            warn!(
                peaks = peaks.len(),
                expected = expected_sizes.len(),
                status = status.as_str(),
                "discarding size-standard calibration"
            );
        }
        Self {
            name,
            channel,
            peaks,
            expected_sizes,
            calibration: calibration.filter(|_| status == CalibrationStatus::Calibrated),
            status,
        }
    }

    fn derive_status(
        peak_count: usize,
        expected_count: usize,
        has_calibration: bool,
        upstream_status: Option<CalibrationStatus>,
    ) -> CalibrationStatus {
        if upstream_status == Some(CalibrationStatus::InsufficientPeaks) {
            return CalibrationStatus::InsufficientPeaks;
        }
        if expected_count > 0 {
            let matched = peak_count.min(expected_count) as f64;
            if matched < MIN_MATCHED_FRACTION * expected_count as f64 {
                return CalibrationStatus::InsufficientPeaks;
            }
        }
        if has_calibration {
            CalibrationStatus::Calibrated
        } else {
            CalibrationStatus::Uncalibrated
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn expected_sizes(&self) -> &[f64] {
        &self.expected_sizes
    }

    pub fn expected_size(&self, peak_index: usize) -> Option<f64> {
        self.expected_sizes.get(peak_index).copied()
    }

    pub fn calibration(&self) -> Option<Calibration> {
        self.calibration
    }

    pub fn status(&self) -> CalibrationStatus {
        self.status
    }

    pub fn resolver(&self) -> CalibrationResolver {
        CalibrationResolver::new(self.calibration)
    }
}

/// Applies an upstream calibration; never refits it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CalibrationResolver {
    calibration: Option<Calibration>,
}

impl CalibrationResolver {
    pub fn new(calibration: Option<Calibration>) -> Self {
        Self { calibration }
    }

    pub fn uncalibrated() -> Self {
        Self::default()
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    pub fn calibration(&self) -> Option<Calibration> {
        self.calibration
    }

    pub fn r_squared(&self) -> Option<f64> {
        self.calibration.and_then(|c| c.r_squared)
    }

    /// `None` means the caller has to stay on the scan-position axis.
    pub fn to_base_pairs(&self, position: f64) -> Option<f64> {
        let c = self.calibration?;
        Some(c.slope * position + c.intercept)
    }

    pub fn to_scan_position(&self, bp: f64) -> Option<f64> {
        let c = self.calibration?;
        if c.slope == 0.0 {
            return None;
        }
        Some((bp - c.intercept) / c.slope)
    }
}
