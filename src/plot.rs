/// Drum plot rendering.
///
/// One panel per station, stacked top to bottom in list order, all sharing
/// the fetch window as their x range. Geometry is expressed in figure
/// fractions and converted to pixels from the configured size and dpi:
///
///   left 0.15 │ panels │ 0.75 right        top 0.95
///   gap between panels = 0.4 × panel height
///   bottom 0.20, below which the time axis labels live
///
/// Labels sit outside the panels, to the left (peak + code) and to the
/// right (display name, latency). Panels have no frame and no y axis; only
/// the bottom panel gets time ticks.

use chrono::{DateTime, FixedOffset, Utc};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::env;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;

use crate::config::FigureConfig;
use crate::model::{FdsnError, StationDescriptor, TimeWindow};
use crate::processing::ProcessedTrace;

const LEFT: f64 = 0.15;
const RIGHT: f64 = 0.75;
const TOP: f64 = 0.95;
const BOTTOM: f64 = 0.20;
const HSPACE: f64 = 0.4;

const LABEL_PT: f64 = 8.0;
const LATENCY_PT: f64 = 5.0;
const TICK_LABEL_PT: f64 = 10.0;
const MAJOR_TICK_PX: i32 = 5;
const MINOR_TICK_PX: i32 = 3;

pub const AXIS_TITLE: &str = "Tiempo (Hora local)";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("nothing to plot")]
    NoPanels,

    #[error("drawing failed: {0}")]
    Drawing(String),

    #[error("could not open viewer: {0}")]
    Viewer(String),
}

fn drawing<E: std::error::Error + Send + Sync>(e: DrawingAreaErrorKind<E>) -> RenderError {
    RenderError::Drawing(e.to_string())
}

// ---------------------------------------------------------------------------
// Panel contents
// ---------------------------------------------------------------------------

/// What one panel shows.
#[derive(Debug)]
pub enum PanelData {
    Waveform {
        trace: ProcessedTrace,
        /// max |x| in reporting units
        peak: f64,
        /// seconds between the last sample and the run's "now"
        latency: f64,
    },
    NoData {
        reason: FdsnError,
    },
}

#[derive(Debug)]
pub struct StationPanel {
    pub station: StationDescriptor,
    pub display_name: String,
    pub data: PanelData,
}

impl StationPanel {
    pub fn has_data(&self) -> bool {
        matches!(self.data, PanelData::Waveform { .. })
    }

    /// `[1.23 cm/s²] ABCD` or `[Sin datos] ABCD`
    pub fn left_label(&self, unit: &str) -> String {
        match &self.data {
            PanelData::Waveform { peak, .. } => peak_label(*peak, unit, &self.station.station),
            PanelData::NoData { .. } => no_data_label(&self.station.station),
        }
    }

    pub fn name_label(&self) -> String {
        if self.has_data() {
            self.display_name.clone()
        } else {
            format!("{} (sin datos)", self.display_name)
        }
    }

    pub fn latency_label(&self) -> Option<String> {
        match &self.data {
            PanelData::Waveform { latency, .. } => Some(latency_label(*latency)),
            PanelData::NoData { .. } => None,
        }
    }
}

pub fn peak_label(peak: f64, unit: &str, code: &str) -> String {
    format!("[{:.2} {}] {}", peak, unit, code)
}

pub fn no_data_label(code: &str) -> String {
    format!("[Sin datos] {}", code)
}

/// Seconds below one minute, minutes from there on.
pub fn latency_label(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("(latencia {:.1}s)", seconds)
    } else {
        format!("(latencia {:.1}m)", seconds / 60.0)
    }
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelRect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl PanelRect {
    pub fn right(&self) -> i32 {
        self.left + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.top + self.height as i32
    }

    /// Pixel position of axes-relative coordinates (0,0 bottom-left,
    /// 1,1 top-right).
    fn at(&self, ax: f64, ay: f64) -> (i32, i32) {
        let x = self.left as f64 + ax * self.width as f64;
        let y = self.top as f64 + (1.0 - ay) * self.height as f64;
        (x.round() as i32, y.round() as i32)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FigureLayout {
    pub width: u32,
    pub height: u32,
    pub panels: Vec<PanelRect>,
}

impl FigureLayout {
    /// Figure height in inches for `n` stations.
    pub fn height_inches(n: usize, figure: &FigureConfig) -> f64 {
        (figure.height_per_station_inches * n as f64).max(figure.min_height_inches)
    }

    pub fn compute(n: usize, figure: &FigureConfig) -> Self {
        let dpi = figure.dpi as f64;
        let width = (figure.width_inches * dpi).round() as u32;
        let height = (Self::height_inches(n, figure) * dpi).round() as u32;

        let (w, h) = (width as f64, height as f64);
        let usable = (TOP - BOTTOM) * h;
        let panel_h = if n == 0 {
            0.0
        } else {
            usable / (n as f64 + HSPACE * (n as f64 - 1.0))
        };
        let gap = HSPACE * panel_h;

        let left = (LEFT * w).round() as i32;
        let panel_w = ((RIGHT - LEFT) * w).round() as u32;
        let panels = (0..n)
            .map(|i| {
                let top = (1.0 - TOP) * h + i as f64 * (panel_h + gap);
                PanelRect {
                    left,
                    top: top.round() as i32,
                    width: panel_w,
                    height: panel_h.round().max(1.0) as u32,
                }
            })
            .collect();

        Self { width, height, panels }
    }
}

/// Points size to pixels at `dpi`.
fn font_px(points: f64, dpi: u32) -> f64 {
    points * dpi as f64 / 72.0
}

// ---------------------------------------------------------------------------
// Time axis
// ---------------------------------------------------------------------------

/// Instants inside `window` that fall on whole multiples of `step_minutes`
/// in local time at `offset`.
pub fn time_ticks(window: &TimeWindow, step_minutes: u32, offset: FixedOffset) -> Vec<DateTime<Utc>> {
    let step = i64::from(step_minutes.max(1)) * 60;
    let shift = i64::from(offset.local_minus_utc());
    let start_local = window.start.timestamp() + shift;
    let first = start_local.div_euclid(step) * step
        + if start_local.rem_euclid(step) == 0 && window.start.timestamp_subsec_nanos() == 0 {
            0
        } else {
            step
        };

    let mut ticks = Vec::new();
    let mut local = first;
    while let Some(t) = DateTime::<Utc>::from_timestamp(local - shift, 0) {
        if t > window.end {
            break;
        }
        ticks.push(t);
        local += step;
    }
    ticks
}

pub fn tick_label(t: DateTime<Utc>, offset: FixedOffset) -> String {
    t.with_timezone(&offset).format("%H:%M").to_string()
}

// ---------------------------------------------------------------------------
// Series preparation
// ---------------------------------------------------------------------------

/// (seconds since window start, value) for every finite sample inside the
/// window.
pub fn trace_points(trace: &ProcessedTrace, window: &TimeWindow) -> Vec<(f64, f64)> {
    let span = window.duration_seconds();
    let base = window.offset_of(trace.start);
    let dt = 1.0 / trace.sampling_rate;
    trace
        .samples
        .iter()
        .enumerate()
        .map(|(i, &v)| (base + i as f64 * dt, v))
        .filter(|(x, v)| v.is_finite() && (0.0..=span).contains(x))
        .collect()
}

/// Reduces a dense series to the min and max of each pixel column, in time
/// order. Short series come back unchanged.
pub fn envelope(points: &[(f64, f64)], x_max: f64, columns: usize) -> Vec<(f64, f64)> {
    if columns == 0 || points.len() <= 2 * columns || x_max <= 0.0 {
        return points.to_vec();
    }

    let mut out = Vec::with_capacity(2 * columns + 2);
    let column_of = |x: f64| (((x / x_max) * columns as f64) as usize).min(columns - 1);

    let mut current = column_of(points[0].0);
    let mut lo = points[0];
    let mut hi = points[0];

    for &p in &points[1..] {
        let col = column_of(p.0);
        if col != current {
            push_extremes(lo, hi, &mut out);
            current = col;
            lo = p;
            hi = p;
            continue;
        }
        if p.1 < lo.1 {
            lo = p;
        }
        if p.1 > hi.1 {
            hi = p;
        }
    }
    push_extremes(lo, hi, &mut out);
    out
}

/// Pushes a column's extremes in time order.
fn push_extremes(lo: (f64, f64), hi: (f64, f64), out: &mut Vec<(f64, f64)>) {
    if lo.0 <= hi.0 {
        out.push(lo);
        if hi != lo {
            out.push(hi);
        }
    } else {
        out.push(hi);
        out.push(lo);
    }
}

/// y range with a 5% margin; flat series get a unit range around their
/// value.
fn y_range(points: &[(f64, f64)]) -> (f64, f64) {
    let (lo, hi) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, v)| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return (-1.0, 1.0);
    }
    if hi - lo <= f64::EPSILON * hi.abs().max(1.0) {
        return (lo - 1.0, hi + 1.0);
    }
    let margin = 0.05 * (hi - lo);
    (lo - margin, hi + margin)
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Text drawing that survives a missing font backend.
///
/// Without a usable system font plotters either returns an error or
/// panics inside the font loader; both are counted and the label is
/// skipped.
struct Labels {
    dpi: u32,
    skipped: usize,
}

impl Labels {
    fn draw<DB: DrawingBackend>(
        &mut self,
        area: &DrawingArea<DB, Shift>,
        text: &str,
        points: f64,
        anchor: (HPos, VPos),
        at: (i32, i32),
    ) {
        let style = TextStyle::from(("sans-serif", font_px(points, self.dpi)).into_font())
            .color(&BLACK)
            .pos(Pos::new(anchor.0, anchor.1));

        match panic::catch_unwind(AssertUnwindSafe(|| area.draw_text(text, &style, at))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::debug!("Label '{}' not drawn: {}", text, e);
                self.skipped += 1;
            }
            Err(_) => {
                log::debug!("Label '{}' not drawn: font backend panicked", text);
                self.skipped += 1;
            }
        }
    }
}

/// Outcome of a successful render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderReport {
    pub width: u32,
    pub height: u32,
    pub panels: usize,
    /// Labels that could not be drawn (no usable font).
    pub skipped_labels: usize,
}

/// Renders the drum plot to `figure.output` as PNG.
///
/// # Errors
/// - `RenderError::NoPanels` — nothing to draw.
/// - `RenderError::Drawing` — the bitmap could not be drawn or written.
pub fn render(
    panels: &[StationPanel],
    window: &TimeWindow,
    figure: &FigureConfig,
    unit: &str,
) -> Result<RenderReport, RenderError> {
    if panels.is_empty() {
        return Err(RenderError::NoPanels);
    }
    let offset = figure
        .label_offset()
        .ok_or_else(|| RenderError::Drawing(format!("invalid UTC offset {} min", figure.utc_offset_minutes)))?;

    let layout = FigureLayout::compute(panels.len(), figure);
    let root = BitMapBackend::new(&figure.output, (layout.width, layout.height)).into_drawing_area();
    root.fill(&WHITE).map_err(drawing)?;

    let span = window.duration_seconds();
    let mut labels = Labels { dpi: figure.dpi, skipped: 0 };

    for (panel, rect) in panels.iter().zip(&layout.panels) {
        let area = root
            .clone()
            .shrink((rect.left, rect.top), (rect.width, rect.height));

        match &panel.data {
            PanelData::Waveform { trace, .. } => {
                let points = envelope(&trace_points(trace, window), span, rect.width as usize);
                let (y0, y1) = y_range(&points);
                let mut chart = ChartBuilder::on(&area)
                    .build_cartesian_2d(0f64..span, y0..y1)
                    .map_err(drawing)?;
                chart
                    .draw_series(LineSeries::new(points, &BLUE))
                    .map_err(drawing)?;
            }
            PanelData::NoData { .. } => {
                let mut chart = ChartBuilder::on(&area)
                    .build_cartesian_2d(0f64..span, -1f64..1f64)
                    .map_err(drawing)?;
                chart
                    .draw_series(LineSeries::new(vec![(0.0, 0.0), (span, 0.0)], &RED))
                    .map_err(drawing)?;
            }
        }

        labels.draw(&root, &panel.left_label(unit), LABEL_PT, (HPos::Right, VPos::Top), rect.at(-0.02, 1.0));
        labels.draw(&root, &panel.name_label(), LABEL_PT, (HPos::Left, VPos::Top), rect.at(1.02, 1.1));
        if let Some(latency) = panel.latency_label() {
            labels.draw(&root, &latency, LATENCY_PT, (HPos::Left, VPos::Top), rect.at(1.02, 0.35));
        }
    }

    if let Some(bottom) = layout.panels.last() {
        draw_time_axis(&root, bottom, window, figure, offset, &mut labels)?;
    }

    root.present().map_err(drawing)?;

    if labels.skipped > 0 {
        log::warn!(
            "{} labels could not be drawn (no usable font); image written without them",
            labels.skipped
        );
    }

    Ok(RenderReport {
        width: layout.width,
        height: layout.height,
        panels: panels.len(),
        skipped_labels: labels.skipped,
    })
}

fn draw_time_axis<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    rect: &PanelRect,
    window: &TimeWindow,
    figure: &FigureConfig,
    offset: FixedOffset,
    labels: &mut Labels,
) -> Result<(), RenderError>
where
    DB::ErrorType: 'static,
{
    let span = window.duration_seconds();
    let x_of = |t: DateTime<Utc>| {
        rect.left + ((window.offset_of(t) / span) * rect.width as f64).round() as i32
    };
    let axis_y = rect.bottom();

    let major = time_ticks(window, figure.major_tick_minutes, offset);
    let minor = time_ticks(window, figure.minor_tick_minutes, offset);

    for t in minor.iter().filter(|t| !major.contains(t)) {
        let x = x_of(*t);
        root.draw(&PathElement::new(vec![(x, axis_y), (x, axis_y + MINOR_TICK_PX)], BLACK))
            .map_err(drawing)?;
    }

    let label_y = axis_y + MAJOR_TICK_PX + 2;
    for t in &major {
        let x = x_of(*t);
        root.draw(&PathElement::new(vec![(x, axis_y), (x, axis_y + MAJOR_TICK_PX)], BLACK))
            .map_err(drawing)?;
        labels.draw(root, &tick_label(*t, offset), TICK_LABEL_PT, (HPos::Center, VPos::Top), (x, label_y));
    }

    let title_y = label_y + font_px(TICK_LABEL_PT, figure.dpi).round() as i32 + 3;
    let centre = rect.left + rect.width as i32 / 2;
    labels.draw(root, AXIS_TITLE, LABEL_PT, (HPos::Center, VPos::Top), (centre, title_y));
    Ok(())
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

fn viewer_command(path: &Path) -> Option<Command> {
    if cfg!(target_os = "macos") {
        let mut cmd = Command::new("open");
        cmd.arg(path);
        Some(cmd)
    } else if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", "start", ""]).arg(path);
        Some(cmd)
    } else if env::var_os("DISPLAY").is_some() || env::var_os("WAYLAND_DISPLAY").is_some() {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(path);
        Some(cmd)
    } else {
        None
    }
}

/// Hands the image to the platform viewer without waiting for it.
///
/// Returns `Ok(false)` when there is no display to show it on.
pub fn open_in_viewer(path: &Path) -> Result<bool, RenderError> {
    let Some(mut cmd) = viewer_command(path) else {
        log::info!("No display available, not opening {}", path.display());
        return Ok(false);
    };
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| true)
        .map_err(|e| RenderError::Viewer(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn window() -> TimeWindow {
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 18, 3, 20).unwrap();
        TimeWindow::ending_at(end, 3600)
    }

    fn waveform(peak: f64, latency: f64) -> PanelData {
        PanelData::Waveform {
            trace: ProcessedTrace {
                start: window().start,
                sampling_rate: 1.0,
                samples: vec![0.0, peak, -peak / 2.0],
            },
            peak,
            latency,
        }
    }

    fn panel(code: &str, name: &str, data: PanelData) -> StationPanel {
        StationPanel {
            station: StationDescriptor::new("TC", code),
            display_name: name.to_string(),
            data,
        }
    }

    #[test]
    fn test_labels_for_data_panel() {
        let p = panel("ABCD", "Volcán Poás", waveform(1.2345, 12.34));
        assert_eq!(p.left_label("cm/s²"), "[1.23 cm/s²] ABCD");
        assert_eq!(p.name_label(), "Volcán Poás");
        assert_eq!(p.latency_label().as_deref(), Some("(latencia 12.3s)"));
    }

    #[test]
    fn test_labels_for_failed_panel() {
        let p = panel("ABCD", "ABCD", PanelData::NoData { reason: FdsnError::NoData("204".into()) });
        assert_eq!(p.left_label("cm/s²"), "[Sin datos] ABCD");
        assert_eq!(p.name_label(), "ABCD (sin datos)");
        assert_eq!(p.latency_label(), None);
    }

    #[test]
    fn test_latency_switches_to_minutes_at_sixty_seconds() {
        assert_eq!(latency_label(0.0), "(latencia 0.0s)");
        assert_eq!(latency_label(59.94), "(latencia 59.9s)");
        assert_eq!(latency_label(60.0), "(latencia 1.0m)");
        assert_eq!(latency_label(150.0), "(latencia 2.5m)");
    }

    #[test]
    fn test_layout_scales_with_station_count() {
        let figure = FigureConfig::default();

        let small = FigureLayout::compute(2, &figure);
        assert_eq!((small.width, small.height), (900, 300));
        assert_eq!(small.panels.len(), 2);

        let large = FigureLayout::compute(20, &figure);
        assert_eq!((large.width, large.height), (900, 1000));
        assert_eq!(large.panels.len(), 20);
        assert_eq!(FigureLayout::height_inches(7, &figure), 3.5);
    }

    #[test]
    fn test_layout_panels_stack_inside_margins() {
        let layout = FigureLayout::compute(10, &FigureConfig::default());
        let first = layout.panels[0];
        let last = *layout.panels.last().unwrap();

        assert_eq!(first.left, 135);
        assert_eq!(first.right(), 675);
        assert_eq!(first.top, 25);
        assert!((last.bottom() - 400).abs() <= 1, "bottom {}", last.bottom());
        for pair in layout.panels.windows(2) {
            assert!(pair[1].top > pair[0].bottom(), "panels overlap");
        }
    }

    #[test]
    fn test_ticks_fall_on_local_ten_minute_marks() {
        let offset = FixedOffset::west_opt(6 * 3600).unwrap();
        let ticks = time_ticks(&window(), 10, offset);
        assert_eq!(ticks.len(), 6);
        assert_eq!(tick_label(ticks[0], offset), "11:10");
        assert_eq!(tick_label(ticks[5], offset), "12:00");
        for pair in ticks.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::minutes(10));
        }

        let minor = time_ticks(&window(), 5, offset);
        assert_eq!(minor.len(), 12);
    }

    #[test]
    fn test_tick_on_window_start_is_kept() {
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0).unwrap();
        let w = TimeWindow::ending_at(end, 3600);
        let ticks = time_ticks(&w, 10, FixedOffset::west_opt(6 * 3600).unwrap());
        assert_eq!(ticks.first(), Some(&w.start));
        assert_eq!(ticks.last(), Some(&w.end));
        assert_eq!(ticks.len(), 7);
    }

    #[test]
    fn test_trace_points_drop_non_finite_and_out_of_window() {
        let w = window();
        let trace = ProcessedTrace {
            start: w.start - Duration::seconds(2),
            sampling_rate: 1.0,
            samples: vec![1.0, 2.0, 3.0, f64::NAN, 5.0],
        };
        let points = trace_points(&trace, &w);
        assert_eq!(points, vec![(0.0, 3.0), (2.0, 5.0)]);
    }

    #[test]
    fn test_envelope_keeps_extremes_per_column() {
        let points: Vec<(f64, f64)> = (0..1000)
            .map(|i| (i as f64, if i == 123 { 50.0 } else if i == 777 { -40.0 } else { (i % 7) as f64 }))
            .collect();
        let reduced = envelope(&points, 1000.0, 10);
        assert!(reduced.len() <= 20);
        assert!(reduced.contains(&(123.0, 50.0)));
        assert!(reduced.contains(&(777.0, -40.0)));
        assert!(reduced.windows(2).all(|w| w[0].0 <= w[1].0));

        let short = vec![(0.0, 1.0), (1.0, 2.0)];
        assert_eq!(envelope(&short, 10.0, 10), short);
    }

    #[test]
    fn test_flat_series_gets_unit_range() {
        assert_eq!(y_range(&[(0.0, 3.0), (1.0, 3.0)]), (2.0, 4.0));
        assert_eq!(y_range(&[]), (-1.0, 1.0));
        let (lo, hi) = y_range(&[(0.0, -1.0), (1.0, 1.0)]);
        assert!((lo + 1.1).abs() < 1e-12 && (hi - 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_render_writes_png_of_expected_size() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut figure = FigureConfig::default();
        figure.output = dir.path().join("drum.png");

        let panels = vec![
            panel("ABCD", "Alfa", waveform(2.0, 5.0)),
            panel("EFGH", "Beta", PanelData::NoData { reason: FdsnError::Timeout("slow".into()) }),
        ];
        let report = render(&panels, &window(), &figure, "cm/s²").expect("render");
        assert_eq!((report.width, report.height, report.panels), (900, 300, 2));

        let bytes = std::fs::read(&figure.output).expect("png written");
        assert_eq!(&bytes[1..4], b"PNG");
        let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        assert_eq!((width, height), (900, 300));
    }

    #[test]
    fn test_render_without_panels_is_error() {
        let figure = FigureConfig::default();
        assert!(matches!(render(&[], &window(), &figure, "cm/s²"), Err(RenderError::NoPanels)));
    }
}
