//! Turns a sample plus the current view filters into an ordered, rendering-agnostic layer list.
//!
//! Order is part of the contract: signal layers of every shown channel, then one peak layer per
//! channel, then the size-standard layer, then one allele layer per called marker, and finally
//! the informational region highlight. Later layers draw over earlier ones.

use serde::Serialize;
use tracing::warn;

use crate::marker_catalog::{MarkerCatalog, channel_color};
use crate::sample::{Channel, ChannelId, SampleModel};
use crate::size_standard::CalibrationResolver;
use crate::view_state::ViewFilters;

/// Opacity of the raw trace when the analyzed trace is drawn on top of it.
pub const UNDERLAY_OPACITY: f64 = 0.35;
pub const PEAK_MARKER_SIZE: f64 = 6.0;
pub const SIZE_STANDARD_MARKER_SIZE: f64 = 8.0;
pub const ALLELE_MARKER_SIZE: f64 = 14.0;
/// Region height used when nothing else on the plot has a positive y value.
pub const EMPTY_PLOT_HEIGHT: f64 = 1.0;
pub const REGION_HEADROOM: f64 = 1.1;
const SIZE_STANDARD_FALLBACK_COLOR: &str = "#FF6F00";
const REGION_COLOR: &str = "#FFF59D";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    RawSignal,
    AnalyzedSignal,
    Peaks,
    SizeStandard,
    Allele,
    Region,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Glyph {
    Line,
    Circle,
    Triangle,
    Star,
    FilledRegion,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LayerStyle {
    pub glyph: Glyph,
    pub color: String,
    pub opacity: f64,
    pub marker_size: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LayerPoint {
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceLayer {
    pub name: String,
    pub kind: LayerKind,
    pub channel: Option<ChannelId>,
    pub marker: Option<String>,
    pub points: Vec<LayerPoint>,
    pub style: LayerStyle,
    /// Excluded from axis autoscaling.
    pub informational: bool,
    /// Set on allele layers drawn on a channel other than the marker's own.
    pub channel_fallback: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisUnit {
    ScanPosition,
    BasePairs,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceLayers {
    pub layers: Vec<TraceLayer>,
    pub x_axis: AxisUnit,
    pub x_range: Option<(f64, f64)>,
    pub y_range: Option<(f64, f64)>,
}

impl Default for TraceLayers {
    fn default() -> Self {
        Self {
            layers: vec![],
            x_axis: AxisUnit::ScanPosition,
            x_range: None,
            y_range: None,
        }
    }
}

impl TraceLayers {
    pub fn of_kind(&self, kind: LayerKind) -> impl Iterator<Item = &TraceLayer> {
        self.layers.iter().filter(move |l| l.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

struct Axis {
    resolver: CalibrationResolver,
}

impl Axis {
    fn x(&self, position: f64) -> f64 {
        self.resolver.to_base_pairs(position).unwrap_or(position)
    }

    fn unit(&self) -> AxisUnit {
        if self.resolver.is_calibrated() {
            AxisUnit::BasePairs
        } else {
            AxisUnit::ScanPosition
        }
    }
}

fn format_bp(bp: f64) -> String {
    if bp.fract() == 0.0 {
        format!("{bp:.0} bp")
    } else {
        format!("{bp:.1} bp")
    }
}

fn signal_layer(
    channel: &Channel,
    kind: LayerKind,
    signal: &[f64],
    opacity: f64,
    axis: &Axis,
) -> TraceLayer {
    let suffix = match kind {
        LayerKind::RawSignal => "raw",
        _ => "analyzed",
    };
    TraceLayer {
        name: format!("{} {suffix}", channel.id),
        kind,
        channel: Some(channel.id),
        marker: None,
        points: signal
            .iter()
            .enumerate()
            .map(|(i, v)| LayerPoint {
                x: axis.x(i as f64),
                y: *v,
                label: None,
            })
            .collect(),
        style: LayerStyle {
            glyph: Glyph::Line,
            color: channel.color.clone(),
            opacity,
            marker_size: 0.0,
        },
        informational: false,
        channel_fallback: false,
    }
}

/// Display height of a peak: its recorded height when the position indexes the signal,
/// 0 when it does not.
fn peak_display_height(channel: &Channel, position: usize, height: f64) -> f64 {
    match channel.value_at(position) {
        Some(_) => height,
        None => {
            warn!(
                channel = channel.id.0,
                position, "peak position outside signal bounds, drawing at height 0"
            );
            0.0
        }
    }
}

fn peak_layer(channel: &Channel, threshold: f64, axis: &Axis) -> TraceLayer {
    let points = channel
        .peaks
        .iter()
        .filter(|p| p.height >= threshold)
        .map(|p| {
            let snr = p
                .snr
                .map(|s| format!("{s:.1}"))
                .unwrap_or_else(|| "n/a".to_string());
            LayerPoint {
                x: axis.x(p.position as f64),
                y: peak_display_height(channel, p.position, p.height),
                label: Some(format!("height: {:.0} RFU, SNR: {snr}", p.height)),
            }
        })
        .collect();
    TraceLayer {
        name: format!("{} peaks", channel.id),
        kind: LayerKind::Peaks,
        channel: Some(channel.id),
        marker: None,
        points,
        style: LayerStyle {
            glyph: Glyph::Circle,
            color: channel.color.clone(),
            opacity: 1.0,
            marker_size: PEAK_MARKER_SIZE,
        },
        informational: false,
        channel_fallback: false,
    }
}

fn size_standard_layer(model: &SampleModel, axis: &Axis) -> Option<TraceLayer> {
    let standard = model.size_standard()?;
    if standard.peaks().is_empty() {
        return None;
    }
    let channel = standard.channel().and_then(|id| model.channel(id));
    let points = standard
        .peaks()
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let label = match standard.expected_size(i) {
                Some(bp) => format_bp(bp),
                None => axis
                    .resolver
                    .to_base_pairs(p.position as f64)
                    .map(|bp| format!("{bp:.1} bp"))
                    .unwrap_or_else(|| "?".to_string()),
            };
            let y = match channel {
                Some(channel) => peak_display_height(channel, p.position, p.height),
                None => p.height,
            };
            LayerPoint {
                x: axis.x(p.position as f64),
                y,
                label: Some(label),
            }
        })
        .collect();
    let color = channel
        .map(|c| c.color.clone())
        .unwrap_or_else(|| SIZE_STANDARD_FALLBACK_COLOR.to_string());
    Some(TraceLayer {
        name: format!(
            "size standard {}",
            standard.name().unwrap_or("(unnamed)")
        ),
        kind: LayerKind::SizeStandard,
        channel: standard.channel(),
        marker: None,
        points,
        style: LayerStyle {
            glyph: Glyph::Triangle,
            color,
            opacity: 1.0,
            marker_size: SIZE_STANDARD_MARKER_SIZE,
        },
        informational: false,
        channel_fallback: false,
    })
}

fn allele_layers(model: &SampleModel, catalog: &MarkerCatalog, axis: &Axis) -> Vec<TraceLayer> {
    let mut ret = vec![];
    for call in model.alleles().values() {
        if call.peaks().is_empty() {
            continue;
        }
        let definition = catalog.resolve(call.marker());
        let own = definition
            .and_then(|d| model.channel(d.channel()))
            .filter(|c| c.has_displayable_data());
        let (channel, fallback) = match own {
            Some(channel) => (channel, false),
            None => match model.first_displayable_channel() {
                Some(channel) => {
                    warn!(
                        marker = call.marker(),
                        channel = channel.id.0,
                        "marker channel has no data, drawing alleles on the first channel with data"
                    );
                    (channel, true)
                }
                None => {
                    warn!(marker = call.marker(), "no channel with data for allele overlay");
                    continue;
                }
            },
        };
        let points = call
            .peaks()
            .iter()
            .map(|p| {
                let y = p
                    .height
                    .or_else(|| channel.value_at(p.position))
                    .unwrap_or(0.0);
                let size = p
                    .size_bp
                    .or_else(|| axis.resolver.to_base_pairs(p.position as f64));
                let label = match size {
                    Some(bp) => format!("{}: {bp:.1} bp", call.marker()),
                    None => format!("{}: ?", call.marker()),
                };
                LayerPoint {
                    x: axis.x(p.position as f64),
                    y,
                    label: Some(label),
                }
            })
            .collect();
        let color = definition
            .map(|d| d.color().to_string())
            .unwrap_or_else(|| channel_color(channel.id).to_string());
        let mut name = format!("{} {}", call.marker(), call.label());
        if fallback {
            name.push_str(" (channel fallback)");
        }
        ret.push(TraceLayer {
            name,
            kind: LayerKind::Allele,
            channel: Some(channel.id),
            marker: Some(call.marker().to_string()),
            points,
            style: LayerStyle {
                glyph: Glyph::Star,
                color,
                opacity: 1.0,
                marker_size: ALLELE_MARKER_SIZE,
            },
            informational: false,
            channel_fallback: fallback,
        });
    }
    ret
}

fn region_layer(name: &str, (lo, hi): (f64, f64), layers: &[TraceLayer]) -> TraceLayer {
    let max_y = layers
        .iter()
        .filter(|l| !l.informational)
        .flat_map(|l| l.points.iter().map(|p| p.y))
        .filter(|y| y.is_finite())
        .reduce(f64::max)
        .filter(|y| *y > 0.0)
        .unwrap_or(EMPTY_PLOT_HEIGHT);
    let top = REGION_HEADROOM * max_y;
    let corner = |x: f64, y: f64| LayerPoint { x, y, label: None };
    TraceLayer {
        name: format!("{name} region"),
        kind: LayerKind::Region,
        channel: None,
        marker: Some(name.to_string()),
        points: vec![corner(lo, 0.0), corner(lo, top), corner(hi, top), corner(hi, 0.0)],
        style: LayerStyle {
            glyph: Glyph::FilledRegion,
            color: REGION_COLOR.to_string(),
            opacity: 0.3,
            marker_size: 0.0,
        },
        informational: true,
        channel_fallback: false,
    }
}

fn autoscale(layers: &[TraceLayer], zoom: Option<(f64, f64)>) -> (Option<(f64, f64)>, Option<(f64, f64)>) {
    let points = layers
        .iter()
        .filter(|l| !l.informational)
        .flat_map(|l| l.points.iter())
        .filter(|p| p.x.is_finite() && p.y.is_finite())
        .map(|p| (p.x, p.y))
        .collect::<Vec<_>>();
    let x_range = zoom.or_else(|| {
        let lo = points.iter().map(|p| p.0).reduce(f64::min)?;
        let hi = points.iter().map(|p| p.0).reduce(f64::max)?;
        Some((lo, hi))
    });
    let y_range = x_range.and_then(|(x_lo, x_hi)| {
        let visible = points
            .iter()
            .filter(|(x, _)| *x >= x_lo && *x <= x_hi)
            .map(|(_, y)| *y)
            .collect::<Vec<_>>();
        let hi = visible.iter().copied().reduce(f64::max)?;
        let lo = visible.iter().copied().reduce(f64::min)?.min(0.0);
        Some(if hi > lo { (lo, hi) } else { (lo, lo + EMPTY_PLOT_HEIGHT) })
    });
    (x_range, y_range)
}

/// Builds the layer list. Pure and deterministic for a given model, filter set and catalog.
pub fn build_layers(
    model: &SampleModel,
    filters: &ViewFilters,
    catalog: &MarkerCatalog,
) -> TraceLayers {
    let axis = Axis {
        resolver: model.resolver(),
    };
    let channels = model
        .channels()
        .filter(|c| filters.channel.matches(c.id))
        .collect::<Vec<_>>();
    let mut layers = vec![];

    for channel in &channels {
        let raw = channel.raw_signal().filter(|_| filters.show_raw);
        let analyzed = channel.analyzed_signal().filter(|_| filters.show_analyzed);
        if let Some(raw) = raw {
            let opacity = if analyzed.is_some() {
                UNDERLAY_OPACITY
            } else {
                1.0
            };
            layers.push(signal_layer(channel, LayerKind::RawSignal, raw, opacity, &axis));
        }
        if let Some(analyzed) = analyzed {
            layers.push(signal_layer(
                channel,
                LayerKind::AnalyzedSignal,
                analyzed,
                1.0,
                &axis,
            ));
        }
    }

    if filters.show_peaks {
        for channel in channels.iter().filter(|c| !c.peaks.is_empty()) {
            layers.push(peak_layer(channel, filters.peak_threshold, &axis));
        }
    }

    if filters.show_size_standard {
        layers.extend(size_standard_layer(model, &axis));
    }

    if filters.show_alleles {
        layers.extend(allele_layers(model, catalog, &axis));
    }

    let (x_range, y_range) = autoscale(&layers, filters.zoom);

    if let Some(marker) = filters
        .selected_marker
        .as_deref()
        .and_then(|name| catalog.resolve(name))
    {
        layers.push(region_layer(marker.name(), marker.bp_range(), &layers));
    }

    TraceLayers {
        layers,
        x_axis: axis.unit(),
        x_range,
        y_range,
    }
}
