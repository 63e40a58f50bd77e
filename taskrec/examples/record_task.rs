use std::path::PathBuf;
use taskrec::{PlaybackSettings, Recorder, RecorderConfig, TaskFile};
use tokio::signal::ctrl_c;
use tokio_stream::StreamExt;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = RecorderConfig::default();
    debug!("Initializing recorder with config: {:?}", config);
    let recorder = Recorder::new(config);

    let mut status_stream = recorder.status_stream();
    tokio::spawn(async move {
        while let Some(status) = status_stream.next().await {
            println!("{}", status);
        }
    });

    let _listener = recorder.attach()?;
    recorder.start();
    info!("Recording started. Interact with your desktop, press Esc or F9 to finish...");

    tokio::select! {
        _ = recorder.stop_requested() => debug!("Stop chord received"),
        _ = ctrl_c() => debug!("Ctrl+C received"),
    }

    let sequence = recorder.stop();
    let task = TaskFile::new(
        Some("Example Task".to_string()),
        sequence,
        PlaybackSettings::default(),
        None,
    );

    let output_path = PathBuf::from("task_recording.json");
    task.save_to_file(&output_path)?;
    info!("Recording saved to {:?} ({} events)", output_path, task.event_count);
    Ok(())
}
