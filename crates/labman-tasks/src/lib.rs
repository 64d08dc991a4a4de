//! Periodic tasks that run under the [`labman_supervisor::Supervisor`]:
//! email reporting and live-plot chart rendering.

mod email;
mod error;
mod liveplot;

pub use email::{EmailConfig, EmailReporter};
pub use error::{Result, TaskError};
pub use liveplot::{render_chart, ChartSeries, LivePlot, LivePlotConfig};
