use std::sync::Arc;

use config::Settings;
use dotenv::dotenv;
use log::{info, warn};
use orchestrator::SessionDeps;
use probe::FfprobeDuration;
use process::CommandLauncher;
use server_inner::ServerInner;
use session::SessionManager;
use tonic::transport::Server;
use transition::SystemClock;

pub mod service {
    tonic::include_proto!("streamer");
}

mod config;
mod controller;
mod encoder;
mod error;
mod orchestrator;
mod planner;
mod probe;
mod process;
mod server_inner;
mod session;
mod staging;
#[cfg(test)]
mod testing;
mod transition;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    dotenv().ok();
    env_logger::init();

    let settings = Arc::new(Settings::from_env()?);
    let addr = settings.listen_addr;

    let deps = SessionDeps {
        settings: settings.clone(),
        launcher: Arc::new(CommandLauncher),
        probe: Arc::new(FfprobeDuration::new(
            settings.ffprobe_path.clone(),
            settings.ffmpeg_path.clone(),
        )),
        clock: Arc::new(SystemClock),
    };
    let sessions = Arc::new(SessionManager::new(deps));
    let server = ServerInner::new(sessions.clone(), settings.rtmp_base_url.clone());

    info!("scheduler listening on {}", addr);
    Server::builder()
        .add_service(service::stream_scheduler_server::StreamSchedulerServer::new(server))
        .serve_with_shutdown(addr, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: {}", err);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    // nothing may keep publishing once the control surface is gone
    sessions.stop().await?;
    info!("shut down");
    Ok(())
}
