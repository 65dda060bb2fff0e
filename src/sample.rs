//! In-memory model of one sample: channels with their peaks, the size standard and the allele
//! calls. All fallback rules for missing wire fields live in [`SampleModel::assemble`].

use allelescope_protocol::{
    AllelePeakRecord, AlleleRecord, ChannelArrays, PeakRecord, SampleSummary, SizeStandardField,
    SizeStandardRecord, channel_key, parse_channel_key,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;

use crate::marker_catalog::channel_color;
use crate::size_standard::{
    Calibration, CalibrationResolver, CalibrationStatus, SizeLadderCatalog, SizeStandard,
};

pub const NOT_AVAILABLE: &str = "N/A";

/// Channel the size-standard dye (LIZ) is read from when the service does not say.
pub const DEFAULT_SIZE_STANDARD_CHANNEL: ChannelId = ChannelId(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u8);

impl ChannelId {
    pub fn key(self) -> String {
        channel_key(self.0)
    }

    pub fn parse(text: &str) -> Option<Self> {
        parse_channel_key(text).map(ChannelId)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Peak {
    /// Index into the signal the peak was detected on.
    pub position: usize,
    pub height: f64,
    pub snr: Option<f64>,
    pub prominence: f64,
    pub width: f64,
    pub area: f64,
    pub size_bp: Option<f64>,
}

impl Peak {
    pub fn new(position: usize, height: f64) -> Self {
        Self {
            position,
            height,
            snr: None,
            prominence: 0.0,
            width: 0.0,
            area: 0.0,
            size_bp: None,
        }
    }

    pub fn with_snr(mut self, snr: f64) -> Self {
        self.snr = Some(snr);
        self
    }

    fn from_record(record: &PeakRecord, context: &str) -> Option<Self> {
        let Ok(position) = usize::try_from(record.position) else {
            warn!(
                position = record.position,
                context, "skipping peak with negative scan position"
            );
            return None;
        };
        if !record.height.is_finite() {
            warn!(position, context, "skipping peak with non-finite height");
            return None;
        }
        Some(Self {
            position,
            height: record.height,
            snr: finite(record.snr),
            prominence: finite(record.prominence).unwrap_or(0.0),
            width: finite(record.width).unwrap_or(0.0),
            area: finite(record.area).unwrap_or(0.0),
            size_bp: finite(record.size),
        })
    }
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Channel {
    pub id: ChannelId,
    pub color: String,
    pub dye: Option<String>,
    pub raw: Vec<f64>,
    pub analyzed: Option<Vec<f64>>,
    /// Whether the signal arrays could be obtained at all.
    pub data_available: bool,
    pub peaks: Vec<Peak>,
}

impl Channel {
    pub fn new(id: ChannelId) -> Self {
        Self {
            id,
            color: channel_color(id).to_string(),
            dye: None,
            raw: vec![],
            analyzed: None,
            data_available: false,
            peaks: vec![],
        }
    }

    pub fn with_raw(mut self, raw: Vec<f64>) -> Self {
        self.raw = raw;
        self.data_available = true;
        self
    }

    pub fn with_analyzed(mut self, analyzed: Vec<f64>) -> Self {
        self.analyzed = Some(analyzed);
        self.data_available = true;
        self
    }

    pub fn with_peaks(mut self, peaks: Vec<Peak>) -> Self {
        self.peaks = peaks;
        self
    }

    pub fn raw_signal(&self) -> Option<&[f64]> {
        (self.data_available && !self.raw.is_empty()).then_some(self.raw.as_slice())
    }

    pub fn analyzed_signal(&self) -> Option<&[f64]> {
        self.analyzed
            .as_deref()
            .filter(|a| self.data_available && !a.is_empty())
    }

    pub fn has_displayable_data(&self) -> bool {
        self.raw_signal().is_some() || self.analyzed_signal().is_some()
    }

    /// The array peaks index into: analyzed data when present, raw data otherwise.
    pub fn reference_signal(&self) -> Option<&[f64]> {
        self.analyzed_signal().or_else(|| self.raw_signal())
    }

    /// Signal value at `position`, or `None` when the position is outside the reference signal.
    pub fn value_at(&self, position: usize) -> Option<f64> {
        self.reference_signal()?.get(position).copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlleleSlot {
    First,
    Second,
}

impl AlleleSlot {
    fn index(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::First),
            2 => Some(Self::Second),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlleleStatus {
    Uncalled,
    Partial,
    Complete,
    Homozygous,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AllelePeak {
    pub position: usize,
    pub size_bp: Option<f64>,
    pub height: Option<f64>,
}

impl AllelePeak {
    fn from_record(record: &AllelePeakRecord, marker: &str) -> Option<Self> {
        let Ok(position) = usize::try_from(record.position) else {
            warn!(
                marker,
                position = record.position,
                "skipping allele peak with negative scan position"
            );
            return None;
        };
        Some(Self {
            position,
            size_bp: finite(record.size),
            height: finite(record.height),
        })
    }

    fn to_record(&self) -> AllelePeakRecord {
        AllelePeakRecord {
            position: self.position as i64,
            size: self.size_bp,
            height: self.height,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlleleCall {
    marker: String,
    alleles: [Option<String>; 2],
    peaks: Vec<AllelePeak>,
}

impl AlleleCall {
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.trim().to_string(),
            alleles: [None, None],
            peaks: vec![],
        }
    }

    pub fn with_alleles(marker: &str, first: &str, second: &str) -> Self {
        let mut ret = Self::new(marker);
        ret.set_allele(AlleleSlot::First, first);
        ret.set_allele(AlleleSlot::Second, second);
        ret
    }

    pub fn with_peaks(mut self, peaks: Vec<AllelePeak>) -> Self {
        self.peaks = peaks;
        self
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn allele(&self, slot: AlleleSlot) -> Option<&str> {
        self.alleles[slot.index()].as_deref()
    }

    pub fn peaks(&self) -> &[AllelePeak] {
        &self.peaks
    }

    /// Blank values clear the slot.
    pub fn set_allele(&mut self, slot: AlleleSlot, value: &str) {
        let value = value.trim();
        self.alleles[slot.index()] = (!value.is_empty()).then(|| value.to_string());
    }

    pub fn status(&self) -> AlleleStatus {
        match (&self.alleles[0], &self.alleles[1]) {
            (None, None) => AlleleStatus::Uncalled,
            (Some(_), None) | (None, Some(_)) => AlleleStatus::Partial,
            (Some(a), Some(b)) if a == b => AlleleStatus::Homozygous,
            (Some(_), Some(_)) => AlleleStatus::Complete,
        }
    }

    /// "12/14", "12/-" or "-/-".
    pub fn label(&self) -> String {
        format!(
            "{}/{}",
            self.allele(AlleleSlot::First).unwrap_or("-"),
            self.allele(AlleleSlot::Second).unwrap_or("-")
        )
    }

    pub fn from_record(marker: &str, record: &AlleleRecord) -> Self {
        let mut ret = Self::new(marker);
        if let Some(first) = &record.allele1 {
            ret.set_allele(AlleleSlot::First, first);
        }
        if let Some(second) = &record.allele2 {
            ret.set_allele(AlleleSlot::Second, second);
        }
        if record.homozygote == Some(true) && ret.alleles[1].is_none() {
            ret.alleles[1] = ret.alleles[0].clone();
        }
        ret.peaks = record
            .peaks
            .iter()
            .filter_map(|p| AllelePeak::from_record(p, marker))
            .collect();
        ret
    }

    pub fn to_record(&self) -> AlleleRecord {
        AlleleRecord {
            allele1: self.alleles[0].clone(),
            allele2: self.alleles[1].clone(),
            peaks: self.peaks.iter().map(AllelePeak::to_record).collect(),
            homozygote: (self.status() == AlleleStatus::Homozygous).then_some(true),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityGrade {
    Excellent,
    Good,
    Acceptable,
    Poor,
    Unknown,
}

impl QualityGrade {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "excellent" => Some(Self::Excellent),
            "good" => Some(Self::Good),
            "acceptable" => Some(Self::Acceptable),
            "poor" => Some(Self::Poor),
            _ => None,
        }
    }

    pub fn from_average_snr(snr: f64) -> Self {
        if snr > 100.0 {
            Self::Excellent
        } else if snr > 50.0 {
            Self::Good
        } else if snr > 20.0 {
            Self::Acceptable
        } else {
            Self::Poor
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct QualitySummary {
    pub grade: QualityGrade,
    pub average_snr: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SampleInfo {
    pub id: String,
    pub sample_name: String,
    pub instrument: String,
    pub run_date: String,
    pub dye_set: String,
    pub file_type: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SampleModel {
    info: SampleInfo,
    channels: BTreeMap<ChannelId, Channel>,
    size_standard: Option<SizeStandard>,
    alleles: BTreeMap<String, AlleleCall>,
    quality: QualitySummary,
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn or_not_available(value: Option<&String>) -> String {
    non_blank(value).unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn filename_stem(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = match name.rfind('.') {
        Some(0) | None => name,
        Some(i) => &name[..i],
    };
    let stem = stem.trim();
    (!stem.is_empty()).then(|| stem.to_string())
}

impl SampleModel {
    pub fn new(id: &str) -> Self {
        Self {
            info: SampleInfo {
                id: id.to_string(),
                sample_name: id.to_string(),
                instrument: NOT_AVAILABLE.to_string(),
                run_date: NOT_AVAILABLE.to_string(),
                dye_set: NOT_AVAILABLE.to_string(),
                file_type: NOT_AVAILABLE.to_string(),
            },
            channels: BTreeMap::new(),
            size_standard: None,
            alleles: BTreeMap::new(),
            quality: QualitySummary {
                grade: QualityGrade::Unknown,
                average_snr: None,
            },
        }
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channels.insert(channel.id, channel);
        self
    }

    pub fn with_size_standard(mut self, size_standard: SizeStandard) -> Self {
        self.size_standard = Some(size_standard);
        self
    }

    pub fn with_allele_call(mut self, call: AlleleCall) -> Self {
        self.alleles.insert(call.marker().to_string(), call);
        self
    }

    /// Builds the model from a summary plus whatever per-channel arrays could be fetched.
    ///
    /// Arrays inlined in the summary win over `arrays`. A channel is `data_available` when
    /// either source supplied at least one array, even an empty one.
    pub fn assemble(
        summary: &SampleSummary,
        arrays: &BTreeMap<ChannelId, ChannelArrays>,
        ladders: &SizeLadderCatalog,
    ) -> Self {
        let id = summary.id.trim().to_string();
        let meta = &summary.metadata;
        let sample_name = non_blank(meta.sample_name.as_ref())
            .or_else(|| summary.filename.as_deref().and_then(filename_stem))
            .unwrap_or_else(|| id.clone());
        let info = SampleInfo {
            id,
            sample_name,
            instrument: or_not_available(meta.instrument.as_ref()),
            run_date: or_not_available(meta.run_date.as_ref()),
            dye_set: or_not_available(meta.dye_set.as_ref()),
            file_type: or_not_available(meta.file_type.as_ref()),
        };

        let mut channel_ids = BTreeSet::new();
        for key in summary.channels.keys().chain(summary.peaks.keys()) {
            match ChannelId::parse(key) {
                Some(id) => {
                    channel_ids.insert(id);
                }
                None => warn!(key = key.as_str(), "skipping unrecognized channel key"),
            }
        }
        channel_ids.extend(arrays.keys().copied());

        let mut channels = BTreeMap::new();
        for id in channel_ids {
            let key = id.key();
            let wire = summary.channels.get(&key);
            let mut channel = Channel::new(id);
            if let Some(color) = wire.and_then(|w| non_blank(w.color.as_ref())) {
                channel.color = color;
            }
            channel.dye = wire.and_then(|w| non_blank(w.dye.as_ref()));

            let inline = wire
                .map(|w| ChannelArrays {
                    raw_data: w.raw_data.clone(),
                    analyzed_data: w.analyzed_data.clone(),
                })
                .filter(|a| !a.is_empty());
            if let Some(source) = inline.as_ref().or_else(|| arrays.get(&id)) {
                channel.data_available =
                    source.raw_data.is_some() || source.analyzed_data.is_some();
                channel.raw = source.raw_data.clone().unwrap_or_default();
                channel.analyzed = source.analyzed_data.clone();
            }

            channel.peaks = summary
                .peaks
                .get(&key)
                .map(|records| {
                    records
                        .iter()
                        .filter_map(|r| Peak::from_record(r, &key))
                        .collect()
                })
                .unwrap_or_default();
            channels.insert(id, channel);
        }

        let size_standard = Self::assemble_size_standard(summary, &channels, ladders);

        let calls = match &summary.manual_alleles {
            Some(manual) if !manual.is_empty() => manual,
            _ => &summary.alleles,
        };
        let alleles = calls
            .iter()
            .filter(|(marker, _)| !marker.trim().is_empty())
            .map(|(marker, record)| {
                let call = AlleleCall::from_record(marker, record);
                (call.marker().to_string(), call)
            })
            .collect();

        let quality = summary
            .quality_metrics
            .as_ref()
            .map(|q| {
                let average_snr = finite(q.average_snr);
                let grade = q
                    .overall_quality
                    .as_deref()
                    .and_then(QualityGrade::parse)
                    .or_else(|| average_snr.map(QualityGrade::from_average_snr))
                    .unwrap_or(QualityGrade::Unknown);
                QualitySummary { grade, average_snr }
            })
            .unwrap_or(QualitySummary {
                grade: QualityGrade::Unknown,
                average_snr: None,
            });

        Self {
            info,
            channels,
            size_standard,
            alleles,
            quality,
        }
    }

    fn assemble_size_standard(
        summary: &SampleSummary,
        channels: &BTreeMap<ChannelId, Channel>,
        ladders: &SizeLadderCatalog,
    ) -> Option<SizeStandard> {
        let record = match summary.size_standard.as_ref() {
            Some(SizeStandardField::Detailed(record)) => record.clone(),
            Some(SizeStandardField::Named(name)) => SizeStandardRecord {
                name: Some(name.clone()),
                ..Default::default()
            },
            None => match non_blank(summary.metadata.size_standard.as_ref()) {
                Some(name) => SizeStandardRecord {
                    name: Some(name),
                    ..Default::default()
                },
                None => return None,
            },
        };
        if record
            .status
            .as_deref()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case("not_found"))
        {
            return None;
        }

        let name = non_blank(record.name.as_ref())
            .or_else(|| non_blank(summary.metadata.size_standard.as_ref()));
        let ladder = name.as_deref().and_then(|n| ladders.resolve(n));
        let expected_sizes = if record.expected_sizes.is_empty() {
            ladder.map(|l| l.sizes().to_vec()).unwrap_or_default()
        } else {
            record.expected_sizes.clone()
        };
        let channel = match record.channel.as_deref() {
            Some(key) => ChannelId::parse(key),
            None => channels
                .contains_key(&DEFAULT_SIZE_STANDARD_CHANNEL)
                .then_some(DEFAULT_SIZE_STANDARD_CHANNEL),
        };
        let peaks = record
            .peaks
            .iter()
            .filter_map(|r| Peak::from_record(r, "size_standard"))
            .collect();
        let calibration = record
            .calibration
            .and_then(|c| Calibration::new(c.slope, c.intercept, c.r_squared));
        let upstream_status = record.status.as_deref().and_then(CalibrationStatus::parse);

        Some(SizeStandard::new(
            name.or_else(|| ladder.map(|l| l.name().to_string())),
            channel,
            peaks,
            expected_sizes,
            calibration,
            upstream_status,
        ))
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &SampleInfo {
        &self.info
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    /// Channels in ascending id order.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn first_displayable_channel(&self) -> Option<&Channel> {
        self.channels.values().find(|c| c.has_displayable_data())
    }

    pub fn unavailable_channels(&self) -> Vec<ChannelId> {
        self.channels
            .values()
            .filter(|c| !c.data_available)
            .map(|c| c.id)
            .collect()
    }

    pub fn size_standard(&self) -> Option<&SizeStandard> {
        self.size_standard.as_ref()
    }

    pub fn calibration_status(&self) -> CalibrationStatus {
        self.size_standard
            .as_ref()
            .map(|s| s.status())
            .unwrap_or(CalibrationStatus::Uncalibrated)
    }

    pub fn resolver(&self) -> CalibrationResolver {
        self.size_standard
            .as_ref()
            .map(|s| s.resolver())
            .unwrap_or_default()
    }

    pub fn alleles(&self) -> &BTreeMap<String, AlleleCall> {
        &self.alleles
    }

    /// Installs a newly committed call set.
    pub fn replace_alleles(&mut self, alleles: BTreeMap<String, AlleleCall>) {
        self.alleles = alleles;
    }

    pub fn quality(&self) -> QualitySummary {
        self.quality
    }
}
