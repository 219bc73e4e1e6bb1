use camera_api::coordinator::DEFAULT_WARMUP;
use camera_api::{ModeCoordinator, RpicamCamera, RunFlag, TimelapseScheduler};
use clap::Parser;
use flexi_logger::{colored_opt_format, Cleanup, Criterion, Duplicate, Logger, Naming};
use log::{error, info};
use routes::StreamContext;
use std::sync::Arc;

mod cli;
mod routes;

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::Args::parse();
    let _logger = Logger::with_str(&args.log_level)
        .format(colored_opt_format)
        .log_to_file()
        .directory(args.log_dir.clone())
        .duplicate_to_stderr(Duplicate::Info)
        .rotate(
            Criterion::Size(500_000),
            Naming::Numbers,
            Cleanup::KeepLogFiles(2),
        )
        .start()?;
    log_panics::init();
    info!("Starting up...");

    let settings = match args.settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };
    info!("{:?}", settings);

    let run = Arc::new(RunFlag::new());
    let coordinator = {
        let settings = settings.clone();
        let run = run.clone();
        rocket::tokio::task::spawn_blocking(move || {
            ModeCoordinator::open(
                Box::new(RpicamCamera::new(settings.settle_delay)),
                settings.preview,
                settings.still,
                settings.settle_delay,
                DEFAULT_WARMUP,
                run,
            )
        })
        .await?
    };
    let coordinator = match coordinator {
        Ok(coordinator) => Arc::new(coordinator),
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    let scheduler = TimelapseScheduler::new(coordinator.clone(), run.clone(), &settings);
    let status = scheduler.status();
    let timelapse_thread = std::thread::Builder::new()
        .name("timelapse".into())
        .spawn(move || scheduler.run())?;

    let figment = rocket::Config::figment()
        .merge(("port", args.port))
        .merge(("address", args.address.clone()));
    let context = StreamContext {
        coordinator: coordinator.clone(),
        run: run.clone(),
        status,
    };
    let launched: Result<(), Box<dyn std::error::Error>> =
        match routes::build_rocket(figment, context) {
            Ok(rocket) => match rocket.launch().await {
                Ok(_) => Ok(()),
                Err(e) => {
                    error!("Stream server failed: {}", e);
                    Err(e.into())
                }
            },
            Err(e) => {
                error!("Invalid CORS setup: {}", e);
                Err(e.into())
            }
        };

    info!("Stopping application...");
    run.stop();
    coordinator.shutdown();
    if timelapse_thread.join().is_err() {
        error!("Timelapse thread panicked");
    }
    info!("Application stopped");
    launched
}
