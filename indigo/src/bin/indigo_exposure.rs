//! Connects a camera on an INDIGO server and takes a one second exposure.
//!
//! Server and client settings come from `INDIGO_*` environment variables;
//! `INDIGO_CAMERA` names the camera device.

use std::time::Duration;

use anyhow::{bail, Context};
use indigo_client::discovery::probe_server;
use indigo_client::logging::{init_logging, LoggingMode};
use indigo_client::standard_properties::{
    CCD_EXPOSURE, CCD_EXPOSURE_ITEM, CCD_UPLOAD_MODE, CONNECTED, CONNECTION, DISCONNECTED,
};
use indigo_client::{CommandOutcome, Session, SessionConfig, INDIGO_PROTOCOL_VERSION};

const DEFAULT_CAMERA: &str = "ZWO ASI1600MM Pro #0";
const STEP_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(LoggingMode::Development)?;

    let config = SessionConfig::from_env()?;
    let camera = std::env::var("INDIGO_CAMERA").unwrap_or_else(|_| DEFAULT_CAMERA.to_string());

    if probe_server(&config.host, config.port, Duration::from_secs(2))
        .await
        .is_none()
    {
        bail!("no INDIGO server listening at {}:{}", config.host, config.port);
    }

    let mut session = Session::new(config);
    session.start().await.context("starting INDIGO session")?;
    session.print_properties();

    session
        .send_xml(&format!("<getProperties version='{}'/>", INDIGO_PROTOCOL_VERSION))
        .await?;
    tokio::time::sleep(STEP_DELAY).await;

    report(
        "connect camera",
        session
            .send_command(&camera, CONNECTION, &[(DISCONNECTED, "Off"), (CONNECTED, "On")])
            .await?,
    );
    tokio::time::sleep(STEP_DELAY).await;

    report(
        "set upload mode",
        session
            .send_command(
                &camera,
                CCD_UPLOAD_MODE,
                &[("CLIENT", "Off"), ("LOCAL", "On"), ("BOTH", "Off")],
            )
            .await?,
    );
    tokio::time::sleep(STEP_DELAY).await;

    report(
        "start exposure",
        session
            .send_command(&camera, CCD_EXPOSURE, &[(CCD_EXPOSURE_ITEM, "1")])
            .await?,
    );
    tokio::time::sleep(STEP_DELAY).await;

    session.print_properties();
    session.stop().await.context("stopping INDIGO session")?;
    Ok(())
}

fn report(step: &str, outcome: CommandOutcome) {
    match outcome {
        CommandOutcome::Sent => tracing::info!("{}: sent", step),
        CommandOutcome::Dropped(reason) => tracing::warn!("{}: dropped ({:?})", step, reason),
    }
}
