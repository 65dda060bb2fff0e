use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::ViewerError;
use crate::sample::ChannelId;

pub const DEFAULT_CHANNEL_COLOR: &str = "#757575";

/// Display color of a dye channel (1 FAM, 2 VIC, 3 NED, 4 PET, 5 LIZ).
pub fn channel_color(channel: ChannelId) -> &'static str {
    match channel.0 {
        1 => "#1565C0",
        2 => "#2E7D32",
        3 => "#F57C00",
        4 => "#C62828",
        5 => "#FF6F00",
        _ => DEFAULT_CHANNEL_COLOR,
    }
}

#[derive(Debug, Deserialize)]
struct MarkerRecord {
    channel: u8,
    size_range: (f64, f64),
    #[serde(default = "default_repeat")]
    repeat: u32,
    #[serde(default)]
    color: Option<String>,
}

fn default_repeat() -> u32 {
    4
}

#[derive(Clone, Debug, PartialEq)]
pub struct MarkerDefinition {
    name: String,
    channel: ChannelId,
    bp_range: (f64, f64),
    color: String,
    repeat_unit: u32,
}

impl MarkerDefinition {
    pub fn new(
        name: &str,
        channel: ChannelId,
        bp_range: (f64, f64),
        repeat_unit: u32,
        color: Option<String>,
    ) -> Result<Self, ViewerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ViewerError::invalid_input("Marker name must not be empty"));
        }
        if channel.0 == 0 {
            return Err(ViewerError::invalid_input(format!(
                "Marker '{name}' has channel 0; channels are numbered from 1"
            )));
        }
        let (lo, hi) = bp_range;
        if !lo.is_finite() || !hi.is_finite() || lo < 0.0 || lo >= hi {
            return Err(ViewerError::invalid_input(format!(
                "Marker '{name}' has an invalid bp range {lo}..{hi}"
            )));
        }
        if repeat_unit == 0 {
            return Err(ViewerError::invalid_input(format!(
                "Marker '{name}' has a zero repeat unit"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            channel,
            bp_range,
            color: color.unwrap_or_else(|| channel_color(channel).to_string()),
            repeat_unit,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn bp_range(&self) -> (f64, f64) {
        self.bp_range
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn repeat_unit(&self) -> u32 {
        self.repeat_unit
    }

    pub fn contains_bp(&self, bp: f64) -> bool {
        self.bp_range.0 <= bp && bp <= self.bp_range.1
    }
}

/// Immutable table of marker definitions, keyed by marker name.
#[derive(Clone, Debug, Default)]
pub struct MarkerCatalog {
    markers: BTreeMap<String, MarkerDefinition>,
}

impl MarkerCatalog {
    pub fn from_json_str(data: &str) -> Result<Self, ViewerError> {
        let records: BTreeMap<String, MarkerRecord> = serde_json::from_str(data)
            .map_err(|e| ViewerError::invalid_input(format!("Invalid marker catalog JSON: {e}")))?;
        let mut markers = BTreeMap::new();
        for (name, record) in records {
            let marker = MarkerDefinition::new(
                &name,
                ChannelId(record.channel),
                record.size_range,
                record.repeat,
                record.color,
            )?;
            markers.insert(marker.name().to_string(), marker);
        }
        Ok(Self { markers })
    }

    pub fn from_json_file(path: &str) -> Result<Self, ViewerError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ViewerError::new(
                crate::error::ErrorCode::Io,
                format!("Could not read marker catalog '{path}': {e}"),
            )
        })?;
        Self::from_json_str(&text)
    }

    pub fn get(&self, name: &str) -> Option<&MarkerDefinition> {
        self.markers.get(name)
    }

    /// Exact lookup first, then a case-insensitive match.
    pub fn resolve(&self, name: &str) -> Option<&MarkerDefinition> {
        let name = name.trim();
        self.markers.get(name).or_else(|| {
            self.markers
                .values()
                .find(|m| m.name().eq_ignore_ascii_case(name))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &MarkerDefinition> {
        self.markers.values()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn names_sorted(&self) -> Vec<String> {
        self.markers.keys().cloned().collect()
    }

    /// Markers of one channel, ordered by the start of their bp range.
    pub fn markers_for_channel(&self, channel: ChannelId) -> Vec<&MarkerDefinition> {
        let mut ret = self
            .markers
            .values()
            .filter(|m| m.channel() == channel)
            .collect::<Vec<_>>();
        ret.sort_by(|a, b| a.bp_range().0.total_cmp(&b.bp_range().0));
        ret
    }

    /// Bins a sized peak on `channel` to the marker whose range contains it.
    pub fn marker_for_size(&self, channel: ChannelId, bp: f64) -> Option<&MarkerDefinition> {
        self.markers_for_channel(channel)
            .into_iter()
            .find(|m| m.contains_bp(bp))
    }
}

pub fn default_marker_catalog() -> MarkerCatalog {
    MarkerCatalog::from_json_str(include_str!("../assets/str_markers.json"))
        .expect("Embedded STR marker catalog is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog() {
        let catalog = default_marker_catalog();
        assert_eq!(catalog.len(), 15);
        let d3 = catalog.get("D3S1358").unwrap();
        assert_eq!(d3.channel(), ChannelId(1));
        assert_eq!(d3.bp_range(), (100.0, 150.0));
        assert_eq!(d3.repeat_unit(), 4);
        assert_eq!(d3.color(), "#1565C0");
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let catalog = default_marker_catalog();
        assert_eq!(catalog.resolve("vwa").unwrap().name(), "vWA");
        assert!(catalog.resolve("D99S1").is_none());
    }

    #[test]
    fn test_marker_for_size() {
        let catalog = default_marker_catalog();
        assert_eq!(
            catalog.marker_for_size(ChannelId(4), 400.0).unwrap().name(),
            "FGA"
        );
        assert!(catalog.marker_for_size(ChannelId(4), 90.0).is_none());
        let channel_two = catalog.markers_for_channel(ChannelId(2));
        assert_eq!(channel_two.first().unwrap().name(), "D19S433");
        assert_eq!(channel_two.last().unwrap().name(), "CSF1PO");
    }

    #[test]
    fn test_invalid_definitions_rejected() {
        let err = MarkerCatalog::from_json_str(r#"{"X": {"channel": 1, "size_range": [200, 100]}}"#)
            .unwrap_err();
        assert!(err.message.contains("invalid bp range"));
        let err = MarkerCatalog::from_json_str(r#"{"X": {"channel": 0, "size_range": [1, 2]}}"#)
            .unwrap_err();
        assert!(err.message.contains("channel 0"));
        assert!(MarkerCatalog::from_json_str("[]").is_err());
    }

    #[test]
    fn test_custom_color_is_kept() {
        let catalog = MarkerCatalog::from_json_str(
            r##"{"AMEL": {"channel": 3, "size_range": [100, 115], "repeat": 1, "color": "#000000"}}"##,
        )
        .unwrap();
        assert_eq!(catalog.get("AMEL").unwrap().color(), "#000000");
    }
}
