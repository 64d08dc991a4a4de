//! Renders a registered figure's recent series into a PNG, in-process.
//!
//! The original implementation shipped frames to a separate plotting
//! process over a socket; here the chart is rasterized directly with the
//! `image` crate and handed back as PNG bytes, which both the HTTP
//! surface and the email reporter can reuse without a second process.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};
use labman_session::{FigureSpec, Session, YScale};
use labman_supervisor::Supervisor;
use parking_lot::Mutex;

use crate::error::Result;

const PALETTE: &[[u8; 3]] = &[
    [31, 119, 180],
    [255, 127, 14],
    [44, 160, 44],
    [214, 39, 40],
    [148, 103, 189],
];

/// One named variable's recent `(timestamp, value)` samples.
pub struct ChartSeries {
    pub name: String,
    pub points: Vec<(f64, f64)>,
}

/// Render `series` onto a `width`x`height` white canvas. Y axis is
/// autoscaled to the data unless `ymin`/`ymax` are both given.
pub fn render_chart(
    series: &[ChartSeries],
    width: u32,
    height: u32,
    ymin: Option<f64>,
    ymax: Option<f64>,
) -> Result<Vec<u8>> {
    let mut img = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));

    let all_points: Vec<(f64, f64)> = series.iter().flat_map(|s| s.points.iter().copied()).collect();
    if all_points.is_empty() {
        return encode_png(&img);
    }

    let (x_lo, x_hi) = min_max(all_points.iter().map(|p| p.0));
    let (y_lo, y_hi) = match (ymin, ymax) {
        (Some(lo), Some(hi)) => (lo, hi),
        _ => {
            let (lo, hi) = min_max(all_points.iter().map(|p| p.1));
            if (hi - lo).abs() < f64::EPSILON {
                (lo - 1.0, hi + 1.0)
            } else {
                (lo, hi)
            }
        }
    };

    let margin = 8.0_f64;
    let plot_w = width as f64 - 2.0 * margin;
    let plot_h = height as f64 - 2.0 * margin;

    let to_pixel = |ts: f64, value: f64| -> (i64, i64) {
        let x = if x_hi > x_lo {
            margin + (ts - x_lo) / (x_hi - x_lo) * plot_w
        } else {
            margin
        };
        let y = margin + (1.0 - (value - y_lo) / (y_hi - y_lo)) * plot_h;
        (x.round() as i64, y.round() as i64)
    };

    for (i, s) in series.iter().enumerate() {
        let color = Rgb(PALETTE[i % PALETTE.len()]);
        let mut prev: Option<(i64, i64)> = None;
        for &(ts, value) in &s.points {
            let point = to_pixel(ts, value);
            if let Some(p0) = prev {
                draw_line(&mut img, p0, point, color);
            }
            prev = Some(point);
        }
    }

    encode_png(&img)
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

fn draw_line(img: &mut RgbImage, (x0, y0): (i64, i64), (x1, y1): (i64, i64), color: Rgb<u8>) {
    let (mut x0, mut y0) = (x0, y0);
    let (x1, y1) = (x1, y1);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        if x0 >= 0 && y0 >= 0 && (x0 as u32) < img.width() && (y0 as u32) < img.height() {
            img.put_pixel(x0 as u32, y0 as u32, color);
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn encode_png(img: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(bytes)
}

const LIVE_PLOT_WIDTH: u32 = 480;
const LIVE_PLOT_HEIGHT: u32 = 320;
const UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// Which variables to plot together, how many recent points to keep per
/// variable, and how the y axis should scale.
pub struct LivePlotConfig {
    pub fignum: i64,
    pub variables: Vec<String>,
    pub max_values: u32,
    pub yscale: YScale,
    pub ymin: Option<f64>,
    pub ymax: Option<f64>,
}

/// A running rolling-window chart: registers itself as a figure on start,
/// polls for new samples once a second for as long as the variable list's
/// names are logged, and clears its figure registration on shutdown so a
/// stale entry doesn't linger for the next session that opens the store.
pub struct LivePlot {
    config: LivePlotConfig,
    latest_png: Arc<Mutex<Option<Vec<u8>>>>,
}

impl LivePlot {
    pub fn new(config: LivePlotConfig) -> Self {
        Self {
            config,
            latest_png: Arc::new(Mutex::new(None)),
        }
    }

    /// The most recently rendered chart, if a render has completed yet.
    pub fn handle(&self) -> Arc<Mutex<Option<Vec<u8>>>> {
        Arc::clone(&self.latest_png)
    }

    /// Run forever (until the supervisor signals shutdown), re-rendering
    /// the chart once a second from whatever's newly been logged.
    pub async fn run(&self, supervisor: Arc<Supervisor>, session: Arc<Session>) -> Result<()> {
        session.set_figure(&FigureSpec {
            fignum: self.config.fignum,
            maxvalues: self.config.max_values,
            yscale: self.config.yscale,
            ymin: self.config.ymin,
            ymax: self.config.ymax,
            variables: self.config.variables.clone(),
        })?;

        let mut buffers: HashMap<String, VecDeque<(f64, f64)>> = self
            .config
            .variables
            .iter()
            .map(|name| (name.clone(), VecDeque::new()))
            .collect();
        let mut last_ts: HashMap<String, f64> =
            self.config.variables.iter().map(|name| (name.clone(), 0.0)).collect();

        while supervisor.is_running() {
            for name in &self.config.variables {
                let since = last_ts[name];
                match session.logged_data_from_timestamp(name, since) {
                    Ok(samples) => {
                        let buf = buffers.get_mut(name).expect("buffer exists for every configured variable");
                        for sample in samples {
                            last_ts.insert(name.clone(), sample.ts);
                            buf.push_back((sample.ts, sample.value));
                            while buf.len() as u32 > self.config.max_values {
                                buf.pop_front();
                            }
                        }
                    }
                    Err(e) => tracing::warn!(variable = %name, error = %e, "failed to fetch new samples for live plot"),
                }
            }

            let series: Vec<ChartSeries> = self
                .config
                .variables
                .iter()
                .map(|name| ChartSeries {
                    name: name.clone(),
                    points: buffers[name].iter().copied().collect(),
                })
                .collect();
            match render_chart(&series, LIVE_PLOT_WIDTH, LIVE_PLOT_HEIGHT, self.config.ymin, self.config.ymax) {
                Ok(png) => *self.latest_png.lock() = Some(png),
                Err(e) => tracing::warn!(error = %e, "failed to render live plot"),
            }

            if !supervisor.sleep(UPDATE_INTERVAL, false).await {
                break;
            }
        }

        if let Err(e) = session.store().clear_figures() {
            tracing::warn!(error = %e, "failed to clear figure registration on live-plot shutdown");
        }
        Ok(())
    }
}
