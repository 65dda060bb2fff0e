//! User-adjustable view filters and the controller that rebuilds layers whenever they change.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::ViewerError;
use crate::layers::{TraceLayers, build_layers};
use crate::marker_catalog::MarkerCatalog;
use crate::sample::{ChannelId, SampleModel};

pub const MIN_PEAK_THRESHOLD: f64 = 0.0;
pub const MAX_PEAK_THRESHOLD: f64 = 500.0;
pub const DEFAULT_PEAK_THRESHOLD: f64 = 50.0;

pub fn clamp_peak_threshold(value: f64) -> f64 {
    value.clamp(MIN_PEAK_THRESHOLD, MAX_PEAK_THRESHOLD)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelFilter {
    #[default]
    All,
    Only(ChannelId),
}

impl ChannelFilter {
    pub fn matches(&self, channel: ChannelId) -> bool {
        match self {
            Self::All => true,
            Self::Only(id) => *id == channel,
        }
    }
}

/// How the raw and analyzed switches interact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalToggleMode {
    /// Two independent switches; both traces may be shown at once.
    #[default]
    Independent,
    /// A toggle group: exactly one of raw and analyzed is shown.
    Exclusive,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewFilters {
    pub channel: ChannelFilter,
    pub selected_marker: Option<String>,
    pub show_peaks: bool,
    pub show_size_standard: bool,
    pub show_raw: bool,
    pub show_analyzed: bool,
    pub show_alleles: bool,
    pub peak_threshold: f64,
    pub zoom: Option<(f64, f64)>,
}

impl Default for ViewFilters {
    fn default() -> Self {
        Self {
            channel: ChannelFilter::All,
            selected_marker: None,
            show_peaks: true,
            show_size_standard: false,
            show_raw: true,
            show_analyzed: false,
            show_alleles: true,
            peak_threshold: DEFAULT_PEAK_THRESHOLD,
            zoom: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ViewOp {
    SetChannelFilter { channel: ChannelFilter },
    /// `None` clears the highlight.
    SelectMarker { marker: Option<String> },
    SetShowPeaks { enabled: bool },
    SetShowSizeStandard { enabled: bool },
    SetShowRaw { enabled: bool },
    SetShowAnalyzed { enabled: bool },
    SetShowAlleles { enabled: bool },
    SetPeakThreshold { threshold: f64 },
    SetZoom { range: Option<(f64, f64)> },
    Reset,
}

/// Owns the filter set and the layers derived from it. Every accepted operation rebuilds the
/// layers synchronously; a rejected one leaves filters and layers untouched.
#[derive(Debug)]
pub struct ViewController {
    catalog: Arc<MarkerCatalog>,
    mode: SignalToggleMode,
    default_threshold: f64,
    filters: ViewFilters,
    model: Option<Arc<SampleModel>>,
    layers: TraceLayers,
}

impl ViewController {
    pub fn new(catalog: Arc<MarkerCatalog>, mode: SignalToggleMode, default_threshold: f64) -> Self {
        let default_threshold = if default_threshold.is_finite() {
            clamp_peak_threshold(default_threshold)
        } else {
            DEFAULT_PEAK_THRESHOLD
        };
        Self {
            catalog,
            mode,
            default_threshold,
            filters: Self::initial_filters(default_threshold),
            model: None,
            layers: TraceLayers::default(),
        }
    }

    fn initial_filters(threshold: f64) -> ViewFilters {
        ViewFilters {
            peak_threshold: threshold,
            ..ViewFilters::default()
        }
    }

    pub fn filters(&self) -> &ViewFilters {
        &self.filters
    }

    pub fn mode(&self) -> SignalToggleMode {
        self.mode
    }

    pub fn layers(&self) -> &TraceLayers {
        &self.layers
    }

    pub fn model(&self) -> Option<&Arc<SampleModel>> {
        self.model.as_ref()
    }

    pub fn catalog(&self) -> &MarkerCatalog {
        &self.catalog
    }

    /// Swaps the displayed sample (or clears it) and rebuilds.
    pub fn set_model(&mut self, model: Option<Arc<SampleModel>>) {
        self.model = model;
        self.rebuild();
    }

    pub fn apply(&mut self, op: ViewOp) -> Result<&TraceLayers, ViewerError> {
        let mut next = self.filters.clone();
        match op {
            ViewOp::SetChannelFilter { channel } => next.channel = channel,
            ViewOp::SelectMarker { marker } => {
                next.selected_marker = match marker {
                    None => None,
                    Some(name) => {
                        let definition = self.catalog.resolve(&name).ok_or_else(|| {
                            ViewerError::invalid_input(format!("Unknown marker '{name}'"))
                        })?;
                        Some(definition.name().to_string())
                    }
                };
            }
            ViewOp::SetShowPeaks { enabled } => next.show_peaks = enabled,
            ViewOp::SetShowSizeStandard { enabled } => next.show_size_standard = enabled,
            ViewOp::SetShowRaw { enabled } => {
                next.show_raw = enabled;
                if self.mode == SignalToggleMode::Exclusive {
                    next.show_analyzed = !enabled;
                }
            }
            ViewOp::SetShowAnalyzed { enabled } => {
                next.show_analyzed = enabled;
                if self.mode == SignalToggleMode::Exclusive {
                    next.show_raw = !enabled;
                }
            }
            ViewOp::SetShowAlleles { enabled } => next.show_alleles = enabled,
            ViewOp::SetPeakThreshold { threshold } => {
                if threshold.is_nan() {
                    return Err(ViewerError::invalid_input("Peak threshold must be a number"));
                }
                next.peak_threshold = clamp_peak_threshold(threshold);
            }
            ViewOp::SetZoom { range } => {
                if let Some((lo, hi)) = range {
                    if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                        return Err(ViewerError::invalid_input(format!(
                            "Zoom range {lo}..{hi} must be finite and increasing"
                        )));
                    }
                }
                next.zoom = range;
            }
            ViewOp::Reset => next = Self::initial_filters(self.default_threshold),
        }
        self.filters = next;
        self.rebuild();
        Ok(&self.layers)
    }

    pub fn apply_all(&mut self, ops: Vec<ViewOp>) -> Result<&TraceLayers, ViewerError> {
        for op in ops {
            self.apply(op)?;
        }
        Ok(&self.layers)
    }

    fn rebuild(&mut self) {
        self.layers = match &self.model {
            Some(model) => build_layers(model, &self.filters, &self.catalog),
            None => TraceLayers::default(),
        };
        debug!(layers = self.layers.layers.len(), "trace layers rebuilt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::LayerKind;
    use crate::marker_catalog::default_marker_catalog;
    use crate::sample::{Channel, Peak};

    fn controller(mode: SignalToggleMode) -> ViewController {
        let mut ret = ViewController::new(Arc::new(default_marker_catalog()), mode, 10.0);
        let model = SampleModel::new("s").with_channel(
            Channel::new(ChannelId(1))
                .with_raw(vec![0.0, 5.0, 50.0, 5.0, 0.0])
                .with_analyzed(vec![0.0, 2.0, 48.0, 2.0, 0.0])
                .with_peaks(vec![Peak::new(2, 50.0)]),
        );
        ret.set_model(Some(Arc::new(model)));
        ret
    }

    #[test]
    fn test_threshold_scenario() {
        let mut view = controller(SignalToggleMode::Independent);
        assert_eq!(view.layers().of_kind(LayerKind::Peaks).next().unwrap().points.len(), 1);
        let layers = view
            .apply(ViewOp::SetPeakThreshold { threshold: 60.0 })
            .unwrap();
        assert!(layers.of_kind(LayerKind::Peaks).next().unwrap().points.is_empty());
    }

    #[test]
    fn test_threshold_is_clamped_and_nan_rejected() {
        let mut view = controller(SignalToggleMode::Independent);
        view.apply(ViewOp::SetPeakThreshold { threshold: 9000.0 }).unwrap();
        assert_eq!(view.filters().peak_threshold, MAX_PEAK_THRESHOLD);
        view.apply(ViewOp::SetPeakThreshold { threshold: -4.0 }).unwrap();
        assert_eq!(view.filters().peak_threshold, MIN_PEAK_THRESHOLD);
        let err = view
            .apply(ViewOp::SetPeakThreshold { threshold: f64::NAN })
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidInput);
        assert_eq!(view.filters().peak_threshold, MIN_PEAK_THRESHOLD);
    }

    #[test]
    fn test_setting_the_same_value_twice_is_idempotent() {
        let mut view = controller(SignalToggleMode::Independent);
        let ops = [
            ViewOp::SetShowAnalyzed { enabled: true },
            ViewOp::SelectMarker {
                marker: Some("D3S1358".to_string()),
            },
            ViewOp::SetZoom {
                range: Some((1.0, 3.0)),
            },
        ];
        for op in ops {
            let once = view.apply(op.clone()).unwrap().clone();
            let filters = view.filters().clone();
            let twice = view.apply(op).unwrap().clone();
            assert_eq!(once, twice);
            assert_eq!(&filters, view.filters());
        }
    }

    #[test]
    fn test_independent_signal_switches() {
        let mut view = controller(SignalToggleMode::Independent);
        view.apply(ViewOp::SetShowAnalyzed { enabled: true }).unwrap();
        assert!(view.filters().show_raw && view.filters().show_analyzed);
        assert_eq!(view.layers().of_kind(LayerKind::RawSignal).count(), 1);
        assert_eq!(view.layers().of_kind(LayerKind::AnalyzedSignal).count(), 1);
    }

    #[test]
    fn test_exclusive_signal_toggle_group() {
        let mut view = controller(SignalToggleMode::Exclusive);
        view.apply(ViewOp::SetShowAnalyzed { enabled: true }).unwrap();
        assert!(!view.filters().show_raw);
        assert_eq!(view.layers().of_kind(LayerKind::RawSignal).count(), 0);
        view.apply(ViewOp::SetShowAnalyzed { enabled: false }).unwrap();
        assert!(view.filters().show_raw);
        view.apply(ViewOp::SetShowRaw { enabled: false }).unwrap();
        assert!(view.filters().show_analyzed);
    }

    #[test]
    fn test_marker_selection_replaces_and_validates() {
        let mut view = controller(SignalToggleMode::Independent);
        view.apply(ViewOp::SelectMarker {
            marker: Some("d3s1358".to_string()),
        })
        .unwrap();
        view.apply(ViewOp::SelectMarker {
            marker: Some("vWA".to_string()),
        })
        .unwrap();
        assert_eq!(view.filters().selected_marker.as_deref(), Some("vWA"));
        assert_eq!(view.layers().of_kind(LayerKind::Region).count(), 1);
        assert!(view
            .apply(ViewOp::SelectMarker {
                marker: Some("NOPE".to_string())
            })
            .is_err());
        assert_eq!(view.filters().selected_marker.as_deref(), Some("vWA"));
        view.apply(ViewOp::SelectMarker { marker: None }).unwrap();
        assert_eq!(view.layers().of_kind(LayerKind::Region).count(), 0);
    }

    #[test]
    fn test_zoom_validation_and_reset() {
        let mut view = controller(SignalToggleMode::Independent);
        assert!(view.apply(ViewOp::SetZoom { range: Some((5.0, 5.0)) }).is_err());
        assert!(view
            .apply(ViewOp::SetZoom {
                range: Some((f64::NEG_INFINITY, 5.0))
            })
            .is_err());
        view.apply(ViewOp::SetShowPeaks { enabled: false }).unwrap();
        view.apply(ViewOp::Reset).unwrap();
        assert_eq!(view.filters().peak_threshold, 10.0);
        assert!(view.filters().show_peaks);
    }

    #[test]
    fn test_view_ops_from_json() {
        let ops: Vec<ViewOp> = serde_json::from_str(
            r#"[{"op":"set_channel_filter","channel":{"only":2}},
                {"op":"set_peak_threshold","threshold":75},
                {"op":"select_marker","marker":"FGA"},
                {"op":"set_zoom","range":[100,300]},
                {"op":"reset"}]"#,
        )
        .unwrap();
        assert_eq!(
            ops[0],
            ViewOp::SetChannelFilter {
                channel: ChannelFilter::Only(ChannelId(2))
            }
        );
        assert_eq!(ops[3], ViewOp::SetZoom { range: Some((100.0, 300.0)) });
        assert_eq!(ops[4], ViewOp::Reset);
    }

    #[test]
    fn test_no_model_means_no_layers() {
        let mut view = ViewController::new(
            Arc::new(default_marker_catalog()),
            SignalToggleMode::Independent,
            f64::NAN,
        );
        assert_eq!(view.filters().peak_threshold, DEFAULT_PEAK_THRESHOLD);
        assert!(view.apply(ViewOp::SetShowAlleles { enabled: false }).unwrap().is_empty());
    }
}
