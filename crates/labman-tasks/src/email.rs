//! Periodic email reporting: a summary table of the last logged value of
//! every series, plus one rendered chart per registered figure.

use std::sync::Arc;
use std::time::Duration;

use labman_clock::Clock;
use labman_session::Session;
use labman_supervisor::Supervisor;
use lettre::message::{header::ContentType, Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::error::Result;
use crate::liveplot::{render_chart, ChartSeries};

const CHART_WIDTH: u32 = 480;
const CHART_HEIGHT: u32 = 320;

/// How long to wait before retrying after a failed send, regardless of
/// the configured reporting interval.
const RETRY_DELAY: Duration = Duration::from_secs(60);

/// Where and how often to send the report.
pub struct EmailConfig {
    pub from_addr: String,
    pub to_addrs: Vec<String>,
    pub smtp_host: String,
    pub smtp_port: Option<u16>,
    pub use_starttls: bool,
    /// Submit over an implicit-TLS connection (SMTPS, typically port 465)
    /// instead of plaintext-then-STARTTLS. Takes precedence over
    /// `use_starttls` when both would otherwise apply.
    pub use_ssl_submission: bool,
    pub credentials: Option<(String, String)>,
    pub subject: Option<String>,
    /// Interval between reports, in hours.
    pub delay_hours: f64,
    /// Delay before the first report, in hours. Defaults to half of
    /// `delay_hours`, matching the original's rationale of not sending a
    /// near-empty report the moment a session starts.
    pub initial_delay_hours: Option<f64>,
}

pub struct EmailReporter {
    config: EmailConfig,
    clock: Arc<dyn Clock>,
}

impl EmailReporter {
    pub fn new(config: EmailConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Run forever (until the supervisor signals shutdown), sending one
    /// report per `delay_hours` after an initial delay.
    pub async fn run(&self, supervisor: Arc<Supervisor>, session: Arc<Session>) -> Result<()> {
        let initial_delay_hours = self
            .config
            .initial_delay_hours
            .unwrap_or(self.config.delay_hours / 2.0);
        if initial_delay_hours > 0.0 {
            if !supervisor
                .sleep(Duration::from_secs_f64(initial_delay_hours * 3600.0), false)
                .await
            {
                return Ok(());
            }
        }

        while supervisor.is_running() {
            let next_sleep = match self.send_report(&session).await {
                Ok(()) => {
                    session.save_parameter("email_lastSent", self.clock.now_wall())?;
                    Duration::from_secs_f64(self.config.delay_hours * 3600.0)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to send email report, retrying shortly");
                    RETRY_DELAY
                }
            };
            if !supervisor.sleep(next_sleep, false).await {
                break;
            }
        }
        Ok(())
    }

    async fn send_report(&self, session: &Session) -> Result<()> {
        let message = self.build_message(session)?;
        let transport = self.build_transport()?;
        transport.send(message).await?;
        Ok(())
    }

    fn build_message(&self, session: &Session) -> Result<Message> {
        let title = self
            .config
            .subject
            .clone()
            .unwrap_or_else(|| "labman session report".to_string());

        let html = self.render_html_body(session, &title)?;
        let mut multipart = MultiPart::mixed().singlepart(SinglePart::html(html));

        for figure in session.figures().unwrap_or_default() {
            let series: Vec<ChartSeries> = figure
                .variables
                .iter()
                .map(|name| {
                    let points = session
                        .store()
                        .query_log(name)
                        .unwrap_or_default()
                        .into_iter()
                        .map(|s| (s.ts, s.value))
                        .collect();
                    ChartSeries {
                        name: name.clone(),
                        points,
                    }
                })
                .collect();
            let png = render_chart(&series, CHART_WIDTH, CHART_HEIGHT, figure.ymin, figure.ymax)?;
            multipart = multipart.singlepart(
                Attachment::new(format!("figure-{}.png", figure.fignum))
                    .body(png, ContentType::parse("image/png").expect("valid mime type")),
            );
        }

        let mut builder = Message::builder()
            .from(self.config.from_addr.parse()?)
            .subject(title);
        for addr in &self.config.to_addrs {
            builder = builder.to(addr.parse()?);
        }
        Ok(builder.multipart(multipart)?)
    }

    fn render_html_body(&self, session: &Session, title: &str) -> Result<String> {
        let last_values = session.logged_last_values()?;
        let mut names: Vec<&String> = last_values.keys().collect();
        names.sort();

        let mut body = String::new();
        body.push_str("<html><body>");
        body.push_str(&format!("<h1>{title}</h1>"));
        body.push_str("<table border=\"1\" cellpadding=\"4\"><tr><th>variable</th><th>timestamp</th><th>value</th></tr>");
        for name in names {
            let sample = &last_values[name];
            body.push_str(&format!(
                "<tr><td>{name}</td><td>{:.3}</td><td>{:.6}</td></tr>",
                sample.ts, sample.value
            ));
        }
        body.push_str("</table></body></html>");
        Ok(body)
    }

    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder = if self.config.use_ssl_submission {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_host)?
        } else if self.config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.smtp_host)
        };
        if let Some(port) = self.config.smtp_port {
            builder = builder.port(port);
        }
        if let Some((user, password)) = &self.config.credentials {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labman_clock::FixedClock;
    use labman_session::{OpenMode, Session};
    use std::collections::HashMap;

    fn test_session() -> Session {
        Session::open(None, OpenMode::CreateIfMissing, false, Arc::new(FixedClock::new(1000.0))).unwrap()
    }

    fn test_config() -> EmailConfig {
        EmailConfig {
            from_addr: "lab@example.com".into(),
            to_addrs: vec!["pi@example.com".into()],
            smtp_host: "localhost".into(),
            smtp_port: Some(2525),
            use_starttls: false,
            use_ssl_submission: false,
            credentials: None,
            subject: Some("test report".into()),
            delay_hours: 6.0,
            initial_delay_hours: Some(0.0),
        }
    }

    #[test]
    fn builds_a_valid_message_with_no_data_yet() {
        let session = test_session();
        let reporter = EmailReporter::new(test_config(), Arc::new(FixedClock::new(1000.0)));
        let message = reporter.build_message(&session).unwrap();
        assert!(!message.formatted().is_empty());
    }

    #[test]
    fn builds_a_message_with_logged_values_and_a_figure() {
        let session = test_session();
        let mut entries = HashMap::new();
        entries.insert("temp".to_string(), 21.5);
        session.add_entry(&entries).unwrap();
        session
            .set_figure(&labman_session::FigureSpec {
                fignum: 1,
                maxvalues: 100,
                yscale: labman_session::YScale::Auto,
                ymin: None,
                ymax: None,
                variables: vec!["temp".into()],
            })
            .unwrap();

        let reporter = EmailReporter::new(test_config(), Arc::new(FixedClock::new(1000.0)));
        let message = reporter.build_message(&session).unwrap();
        assert!(!message.formatted().is_empty());
    }
}
