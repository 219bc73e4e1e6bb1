use camera_api::stream::BOUNDARY;
use camera_api::{FrameSource, ModeCoordinator, RunFlag, StatusHandle, TimelapseStatus};
use log::{debug, error, info};
use rocket::fairing::AdHoc;
use rocket::figment::Figment;
use rocket::http::{ContentType, Method};
use rocket::response::stream::ByteStream;
use rocket::serde::json::Json;
use rocket::tokio::task::spawn_blocking;
use rocket::{get, routes, Build, Rocket, State};
use rocket_cors::{AllowedHeaders, AllowedOrigins};
use std::sync::Arc;

pub struct StreamContext {
    pub coordinator: Arc<ModeCoordinator>,
    pub run: Arc<RunFlag>,
    pub status: StatusHandle,
}

/// Live preview as `multipart/x-mixed-replace`. Frames are captured one at
/// a time as the client reads them; a closed connection drops the stream
/// and with it the frame source.
#[get("/")]
pub fn stream(context: &State<StreamContext>) -> (ContentType, ByteStream![Vec<u8>]) {
    let mut frames = Some(FrameSource::new(
        context.coordinator.clone(),
        context.run.clone(),
    ));
    let content_type =
        ContentType::new("multipart", "x-mixed-replace").with_params(("boundary", BOUNDARY));
    let body = ByteStream! {
        while let Some(mut source) = frames.take() {
            let pulled = spawn_blocking(move || {
                let chunk = source.next();
                (source, chunk)
            })
            .await;
            match pulled {
                Ok((source, Some(chunk))) => {
                    frames = Some(source);
                    yield chunk;
                }
                Ok((_, None)) => debug!("Preview stream finished"),
                Err(e) => error!("Preview frame task failed: {}", e),
            }
        }
    };
    (content_type, body)
}

#[get("/status")]
pub fn status(context: &State<StreamContext>) -> Json<TimelapseStatus> {
    Json(context.status.snapshot())
}

pub fn build_rocket(
    figment: Figment,
    context: StreamContext,
) -> Result<Rocket<Build>, rocket_cors::Error> {
    let cors = rocket_cors::CorsOptions {
        allowed_origins: AllowedOrigins::All,
        allowed_methods: vec![Method::Get].into_iter().map(From::from).collect(),
        allowed_headers: AllowedHeaders::All,
        ..Default::default()
    }
    .to_cors()?;

    let run = context.run.clone();
    Ok(rocket::custom(figment)
        .manage(context)
        .attach(cors)
        // clearing the flag ends every open stream so graceful shutdown
        // does not wait for clients to hang up
        .attach(AdHoc::on_shutdown("Stop camera consumers", move |_| {
            Box::pin(async move {
                info!("Shutdown requested, stopping camera consumers");
                run.stop();
            })
        }))
        .mount("/", routes![stream, status]))
}
