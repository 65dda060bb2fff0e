use itertools::Itertools;
use svg::Document;
use svg::node::element::{Circle, Line, Polygon, Polyline, Rectangle, Text};

use crate::error::{ErrorCode, ViewerError};
use crate::layers::{AxisUnit, Glyph, LayerPoint, TraceLayer, TraceLayers};

const SVG_WIDTH: f64 = 1200.0;
const SVG_HEIGHT: f64 = 520.0;
const PLOT_LEFT: f64 = 80.0;
const PLOT_RIGHT: f64 = 1160.0;
const PLOT_TOP: f64 = 70.0;
const PLOT_BOTTOM: f64 = 460.0;
const TICK_COUNT: usize = 8;

struct Frame {
    x: (f64, f64),
    y: (f64, f64),
}

impl Frame {
    fn new(layers: &TraceLayers) -> Self {
        let widen = |(lo, hi): (f64, f64)| if hi > lo { (lo, hi) } else { (lo, lo + 1.0) };
        Self {
            x: widen(layers.x_range.unwrap_or((0.0, 1.0))),
            y: widen(layers.y_range.unwrap_or((0.0, 1.0))),
        }
    }

    fn px(&self, x: f64) -> f64 {
        PLOT_LEFT + (x - self.x.0) / (self.x.1 - self.x.0) * (PLOT_RIGHT - PLOT_LEFT)
    }

    fn py(&self, y: f64) -> f64 {
        PLOT_BOTTOM - (y - self.y.0) / (self.y.1 - self.y.0) * (PLOT_BOTTOM - PLOT_TOP)
    }

    fn visible(&self, p: &LayerPoint) -> bool {
        p.x >= self.x.0 && p.x <= self.x.1
    }

    /// Clamps to the plot box so zoomed-out regions do not spill over the axes.
    fn clamp_px(&self, x: f64) -> f64 {
        self.px(x).clamp(PLOT_LEFT, PLOT_RIGHT)
    }

    fn clamp_py(&self, y: f64) -> f64 {
        self.py(y).clamp(PLOT_TOP, PLOT_BOTTOM)
    }
}

fn polygon_points(points: &[(f64, f64)]) -> String {
    points
        .iter()
        .map(|(x, y)| format!("{x:.2},{y:.2}"))
        .join(" ")
}

fn star(cx: f64, cy: f64, outer: f64) -> String {
    let inner = outer * 0.45;
    let corners = (0..10)
        .map(|i| {
            let r = if i % 2 == 0 { outer } else { inner };
            let angle = std::f64::consts::PI * (i as f64) / 5.0 - std::f64::consts::FRAC_PI_2;
            (cx + r * angle.cos(), cy + r * angle.sin())
        })
        .collect::<Vec<_>>();
    polygon_points(&corners)
}

fn triangle(cx: f64, cy: f64, size: f64) -> String {
    polygon_points(&[(cx, cy - size), (cx - size, cy + size * 0.8), (cx + size, cy + size * 0.8)])
}

fn label(text: &str, x: f64, y: f64, color: &str) -> Text {
    Text::new(text.to_string())
        .set("x", x)
        .set("y", y)
        .set("font-family", "monospace")
        .set("font-size", 10)
        .set("text-anchor", "middle")
        .set("fill", color)
}

fn draw_layer(mut doc: Document, layer: &TraceLayer, frame: &Frame) -> Document {
    let style = &layer.style;
    match style.glyph {
        Glyph::FilledRegion => {
            let xs = layer.points.iter().map(|p| p.x);
            let ys = layer.points.iter().map(|p| p.y);
            let (Some(x_lo), Some(x_hi), Some(y_hi)) = (
                xs.clone().reduce(f64::min),
                xs.reduce(f64::max),
                ys.reduce(f64::max),
            ) else {
                return doc;
            };
            let left = frame.clamp_px(x_lo);
            let right = frame.clamp_px(x_hi);
            let top = frame.clamp_py(y_hi);
            let bottom = frame.clamp_py(0.0);
            if right <= left {
                return doc;
            }
            doc = doc.add(
                Rectangle::new()
                    .set("x", left)
                    .set("y", top)
                    .set("width", right - left)
                    .set("height", (bottom - top).max(0.0))
                    .set("fill", style.color.as_str())
                    .set("fill-opacity", style.opacity),
            );
            if let Some(name) = &layer.marker {
                doc = doc.add(label(name, (left + right) / 2.0, top - 4.0, "#5f4b00"));
            }
        }
        Glyph::Line => {
            let points = layer
                .points
                .iter()
                .filter(|p| frame.visible(p))
                .map(|p| (frame.px(p.x), frame.clamp_py(p.y)))
                .collect::<Vec<_>>();
            if points.len() >= 2 {
                doc = doc.add(
                    Polyline::new()
                        .set("points", polygon_points(&points))
                        .set("fill", "none")
                        .set("stroke", style.color.as_str())
                        .set("stroke-width", 1.2)
                        .set("stroke-opacity", style.opacity),
                );
            }
        }
        Glyph::Circle | Glyph::Triangle | Glyph::Star => {
            for point in layer.points.iter().filter(|p| frame.visible(p)) {
                let (cx, cy) = (frame.px(point.x), frame.clamp_py(point.y));
                let half = style.marker_size / 2.0;
                doc = match style.glyph {
                    Glyph::Circle => doc.add(
                        Circle::new()
                            .set("cx", cx)
                            .set("cy", cy)
                            .set("r", half)
                            .set("fill", "none")
                            .set("stroke", style.color.as_str())
                            .set("stroke-width", 1.5),
                    ),
                    Glyph::Triangle => doc.add(
                        Polygon::new()
                            .set("points", triangle(cx, cy - half, half))
                            .set("fill", style.color.as_str()),
                    ),
                    _ => doc.add(
                        Polygon::new()
                            .set("points", star(cx, cy - half, half))
                            .set("fill", style.color.as_str())
                            .set("stroke", "#111827")
                            .set("stroke-width", 0.8),
                    ),
                };
                if style.glyph != Glyph::Circle {
                    if let Some(text) = &point.label {
                        doc = doc.add(label(text, cx, cy - style.marker_size - 4.0, "#111827"));
                    }
                }
            }
        }
    }
    doc
}

/// Draws a layer list as a standalone SVG document.
pub fn export_trace_svg(layers: &TraceLayers, title: &str) -> String {
    let frame = Frame::new(layers);
    let mut doc = Document::new()
        .set("viewBox", (0, 0, SVG_WIDTH, SVG_HEIGHT))
        .set("width", SVG_WIDTH)
        .set("height", SVG_HEIGHT)
        .add(
            Rectangle::new()
                .set("x", 0)
                .set("y", 0)
                .set("width", SVG_WIDTH)
                .set("height", SVG_HEIGHT)
                .set("fill", "#ffffff"),
        )
        .add(
            Text::new(title.to_string())
                .set("x", PLOT_LEFT)
                .set("y", 36.0)
                .set("font-family", "monospace")
                .set("font-size", 16)
                .set("fill", "#0f172a"),
        );

    // Regions go first so traces stay readable on top of them.
    for layer in layers.layers.iter().filter(|l| l.informational) {
        doc = draw_layer(doc, layer, &frame);
    }

    for (x1, y1, x2, y2) in [
        (PLOT_LEFT, PLOT_BOTTOM, PLOT_RIGHT, PLOT_BOTTOM),
        (PLOT_LEFT, PLOT_TOP, PLOT_LEFT, PLOT_BOTTOM),
    ] {
        doc = doc.add(
            Line::new()
                .set("x1", x1)
                .set("y1", y1)
                .set("x2", x2)
                .set("y2", y2)
                .set("stroke", "#334155")
                .set("stroke-width", 1),
        );
    }
    for i in 0..=TICK_COUNT {
        let t = i as f64 / TICK_COUNT as f64;
        let x_value = frame.x.0 + t * (frame.x.1 - frame.x.0);
        let y_value = frame.y.0 + t * (frame.y.1 - frame.y.0);
        doc = doc
            .add(
                Text::new(format!("{x_value:.0}"))
                    .set("x", frame.px(x_value))
                    .set("y", PLOT_BOTTOM + 16.0)
                    .set("font-family", "monospace")
                    .set("font-size", 10)
                    .set("text-anchor", "middle")
                    .set("fill", "#475569"),
            )
            .add(
                Text::new(format!("{y_value:.0}"))
                    .set("x", PLOT_LEFT - 6.0)
                    .set("y", frame.py(y_value) + 3.0)
                    .set("font-family", "monospace")
                    .set("font-size", 10)
                    .set("text-anchor", "end")
                    .set("fill", "#475569"),
            );
    }
    let x_caption = match layers.x_axis {
        AxisUnit::BasePairs => "size (bp)",
        AxisUnit::ScanPosition => "scan position",
    };
    doc = doc
        .add(
            Text::new(x_caption.to_string())
                .set("x", (PLOT_LEFT + PLOT_RIGHT) / 2.0)
                .set("y", PLOT_BOTTOM + 40.0)
                .set("font-family", "monospace")
                .set("font-size", 12)
                .set("text-anchor", "middle")
                .set("fill", "#334155"),
        )
        .add(
            Text::new("RFU".to_string())
                .set("x", PLOT_LEFT - 40.0)
                .set("y", PLOT_TOP - 10.0)
                .set("font-family", "monospace")
                .set("font-size", 12)
                .set("fill", "#334155"),
        );

    for layer in layers.layers.iter().filter(|l| !l.informational) {
        doc = draw_layer(doc, layer, &frame);
    }
    doc.to_string()
}

pub fn export_trace_svg_to_path(
    layers: &TraceLayers,
    title: &str,
    path: &str,
) -> Result<(), ViewerError> {
    std::fs::write(path, export_trace_svg(layers, title)).map_err(|e| {
        ViewerError::new(
            ErrorCode::Io,
            format!("Could not write SVG '{path}': {e}"),
        )
    })
}
