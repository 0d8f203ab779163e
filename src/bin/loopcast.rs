// loopcast node: read frames from a v4l2loopback device and serve them to
// browsers as a WebRTC stream.

use anyhow::Context;
use loopcast::config::StreamCatalog;
use loopcast::device::{LoopbackDevice, LoopbackModule};
use loopcast::signaling::SignalingServer;
use loopcast::webrtc::peer::RtcConfig;
use loopcast::webrtc::{LoopbackStreamer, StreamConfig, ViewerHub};
use std::env;
use std::time::Duration;
use tokio::sync::watch;

struct Args {
    config: Option<String>,
    stream: String,
    port: Option<u16>,
    synthetic: bool,
    list_streams: bool,
}

fn usage() -> ! {
    eprintln!("Usage: loopcast [--config <catalog.yaml>] [--stream <name>] [--port <port>] [--synthetic] [--list-streams]");
    std::process::exit(1);
}

fn parse_args() -> Args {
    let argv: Vec<String> = env::args().collect();
    let mut args = Args {
        config: None,
        stream: "default".to_string(),
        port: None,
        synthetic: false,
        list_streams: false,
    };

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--config" => {
                i += 1;
                if i >= argv.len() {
                    usage();
                }
                args.config = Some(argv[i].clone());
            }
            "--stream" => {
                i += 1;
                if i >= argv.len() {
                    usage();
                }
                args.stream = argv[i].clone();
            }
            "--port" => {
                i += 1;
                let Some(port) = argv.get(i).and_then(|p| p.parse().ok()) else {
                    usage();
                };
                args.port = Some(port);
            }
            "--synthetic" => args.synthetic = true,
            "--list-streams" => args.list_streams = true,
            "--help" | "-h" => usage(),
            other => {
                eprintln!("Unknown argument: {}", other);
                usage();
            }
        }
        i += 1;
    }

    args
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = parse_args();

    let catalog = match &args.config {
        Some(path) => StreamCatalog::load_from_file(path)
            .with_context(|| format!("loading catalog {}", path))?,
        None => StreamCatalog::load_or_default(),
    };

    if args.list_streams {
        for (name, profile) in &catalog.streams {
            println!(
                "{}: device {} {}x{}@{}",
                name, profile.device, profile.width, profile.height, profile.fps
            );
        }
        return Ok(());
    }

    let profile = catalog.select(&args.stream)?.clone();

    log::info!("Starting WebRTC streamer:");
    log::info!("  Stream:    {}", args.stream);
    log::info!("  Device:    {}", profile.device_path());
    log::info!("  Label:     {}", profile.display_name());
    log::info!("  Size:      {}x{}", profile.width, profile.height);
    log::info!("  Frequency: {}", profile.fps);

    let stream_config = StreamConfig {
        max_fps: profile.fps,
        width: profile.width,
        height: profile.height,
        ..StreamConfig::default()
    };
    let streamer = LoopbackStreamer::new(args.stream.clone(), stream_config);

    if args.synthetic {
        streamer.start_synthetic().await?;
    } else {
        let module = LoopbackModule::default();
        module.verify(profile.device)?;

        let device = LoopbackDevice::open(profile.device, &profile)?;
        streamer.start_streaming(device.into_frames()).await?;
    }

    let hub = ViewerHub::new(streamer, RtcConfig::default());

    let mut signaling = catalog.signaling.clone();
    if let Some(port) = args.port {
        signaling.port = port;
    }
    let server = SignalingServer::bind(&signaling, hub.clone()).await?;
    log::info!(
        "Viewers can connect via ws://{} (stream '{}')",
        server.local_addr(),
        args.stream
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    })
    .context("installing signal handler")?;

    tokio::spawn(server.run(shutdown_rx.clone()));

    // Periodically drop viewers whose connections died without a clean
    // socket close
    let cleanup_hub = hub.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            cleanup_hub.cleanup_stale().await;
        }
    });

    let mut shutdown = shutdown_rx;
    let mut health = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    log::info!("Shutdown requested");
                    break;
                }
            }
            _ = health.tick() => {
                if !hub.streamer().is_streaming().await {
                    hub.close_all().await;
                    anyhow::bail!("stream '{}' stopped unexpectedly", args.stream);
                }
            }
        }
    }

    hub.close_all().await;
    log::info!("Stopped");
    Ok(())
}
