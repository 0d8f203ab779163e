// Operator tool for inspecting loopback devices before running the node.

use loopcast::config::StreamProfile;
use loopcast::device::{self, LoopbackDevice, LoopbackModule};
use loopcast::{convert, VideoFrame};
use std::env;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: loopcast-cli <command> [args]");
        eprintln!("Commands:");
        eprintln!("  list-devices [--json]            list /dev/video* nodes");
        eprintln!("  check <id>                       verify v4l2loopback enrollment");
        eprintln!("  probe <id> [--json] [--snapshot <out.png>]");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "list-devices" => cmd_list_devices(&args),
        "check" => cmd_check(&args),
        "probe" => cmd_probe(&args),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn cmd_list_devices(args: &[String]) -> anyhow::Result<()> {
    let devices = device::list_video_devices();
    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&devices)?);
    } else if devices.is_empty() {
        println!("No V4L2 devices found");
    } else {
        for d in devices {
            println!("{}", d);
        }
    }
    Ok(())
}

fn cmd_check(args: &[String]) -> anyhow::Result<()> {
    let id = parse_device_id(args)?;
    let module = LoopbackModule::default();

    match module.verify(id) {
        Ok(()) => {
            println!("Device {} enrolled (ids: {:?})", id, module.enrolled_ids()?);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_probe(args: &[String]) -> anyhow::Result<()> {
    let id = parse_device_id(args)?;
    let snapshot = args
        .iter()
        .position(|a| a == "--snapshot")
        .and_then(|i| args.get(i + 1))
        .cloned();

    let profile = StreamProfile {
        device: id,
        width: 1280,
        height: 720,
        fps: 0,
        label: None,
    };
    let mut dev = LoopbackDevice::open(id, &profile)?;

    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(dev.summary())?);
    } else {
        let summary = dev.summary();
        println!("Path:          {}", summary.path);
        println!("Driver:        {}", summary.driver);
        println!("Card:          {}", summary.card);
        println!("Video capture: {}", summary.video_capture);
        println!("Read/write:    {}", summary.read_write);
        println!("Streaming:     {}", summary.streaming);
        println!("Format:        {}", dev.format());
    }

    if let Some(path) = snapshot {
        let frame = dev.capture_one()?;
        save_snapshot(&frame, &path)?;
        println!("Snapshot saved to {}", path);
    }

    Ok(())
}

fn save_snapshot(frame: &VideoFrame, path: &str) -> anyhow::Result<()> {
    let rgb = convert::yuyv_to_rgb(&frame.data, frame.width, frame.height)?;
    let img = image::RgbImage::from_raw(frame.width, frame.height, rgb)
        .ok_or_else(|| anyhow::anyhow!("snapshot buffer mismatch"))?;
    img.save(path)?;
    Ok(())
}

fn parse_device_id(args: &[String]) -> anyhow::Result<u32> {
    let id = args
        .get(2)
        .filter(|a| !a.starts_with("--"))
        .ok_or_else(|| anyhow::anyhow!("device id required"))?;
    id.parse()
        .map_err(|_| anyhow::anyhow!("invalid device id '{}'", id))
}
