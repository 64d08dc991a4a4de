//! Reference labman process.
//!
//! Loads a TOML config, opens the session store, starts the supervisor's
//! signal handler, then runs the observation HTTP surface and any
//! configured periodic tasks (email reports) side by side until shutdown.
//! Wiring a real camera backend into the video-acquisition pipeline is
//! left to a backend-specific binary; this process only validates and
//! reports the video section of the config.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use labman_clock::SystemClock;
use labman_config::SessionConfig;
use labman_session::{OpenMode, Session};
use labman_supervisor::Supervisor;
use labman_tasks::{EmailConfig, EmailReporter};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct LabmanCliArgs {
    /// Path to a TOML process configuration file.
    config_file: std::path::PathBuf,
}

fn main() -> Result<()> {
    let _guard = labman_logging::init();

    let args = LabmanCliArgs::parse();
    tracing::debug!(?args, "starting labman");

    let config = SessionConfig::load(&args.config_file)
        .with_context(|| format!("loading config file {}", args.config_file.display()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("labman-runtime")
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: SessionConfig) -> Result<()> {
    let clock = Arc::new(SystemClock::new());

    let session = Arc::new(
        Session::open(
            config.store.path.as_deref(),
            OpenMode::CreateIfMissing,
            config.store.delay_save,
            clock.clone(),
        )
        .context("opening session store")?,
    );

    let supervisor = Supervisor::new(clock.clone());
    supervisor
        .install_signal_handler()
        .context("installing Ctrl-C handler")?;

    if let Some(video) = &config.video {
        if video.enabled {
            tracing::info!(
                cameras = video.cameras.len(),
                fps = video.fps,
                output_dir = %video.output_dir.display(),
                "video section configured; camera backend wiring is left to a hardware-specific binary",
            );
        }
    }

    let http_state = labman_http::AppState::new(session.clone());
    let http_handle = tokio::spawn(labman_http::serve(
        config.http.bind_addr,
        http_state,
        config.http.static_dir.clone(),
    ));

    let email_handle = config.email.as_ref().filter(|e| e.enabled).map(|email| {
        let reporter = EmailReporter::new(to_email_config(email), clock.clone());
        let supervisor = supervisor.clone();
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = reporter.run(supervisor, session).await {
                tracing::error!(error = %e, "email reporter task failed");
            }
        })
    });

    tokio::signal::ctrl_c().await.ok();

    http_handle.abort();
    if let Some(handle) = email_handle {
        handle.abort();
    }

    session.flush_to_disk().context("flushing session to disk on shutdown")?;

    Ok(())
}

fn to_email_config(config: &labman_config::EmailConfig) -> EmailConfig {
    EmailConfig {
        from_addr: config.from_addr.clone(),
        to_addrs: config.to_addrs.clone(),
        smtp_host: config.smtp_host.clone(),
        smtp_port: config.smtp_port,
        use_starttls: config.use_starttls,
        use_ssl_submission: config.use_ssl_submission,
        credentials: match (&config.smtp_username, &config.smtp_password) {
            (Some(u), Some(p)) => Some((u.clone(), p.clone())),
            _ => None,
        },
        subject: config.subject.clone(),
        delay_hours: config.delay_hours,
        initial_delay_hours: config.initial_delay_hours,
    }
}
