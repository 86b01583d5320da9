use anyhow::{Context, bail};
use clap::{Arg, ArgAction, Command, value_parser};
use facecast::config::{app_name, version};
use facecast::{Session, SessionConfig, WebRtcOptions, WebRtcTransport};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

fn cli() -> Command {
    Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("audio")
                .short('a')
                .long("audio")
                .value_name("FILE")
                .help("Raw PCM16 mono 16 kHz audio to send.")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("api-key")
                .long("api-key")
                .value_name("KEY")
                .env("FACECAST_API_KEY")
                .required(true),
        )
        .arg(
            Arg::new("face-id")
                .long("face-id")
                .value_name("ID")
                .env("FACECAST_FACE_ID")
                .required(true),
        )
        .arg(
            Arg::new("max-session-length")
                .long("max-session-length")
                .value_name("SECONDS")
                .default_value("600")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("max-idle-time")
                .long("max-idle-time")
                .value_name("SECONDS")
                .default_value("30")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("turn")
                .long("turn")
                .help("Fetch TURN servers from the API.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("latency-interval")
                .long("latency-interval")
                .value_name("SECONDS")
                .help("Seconds between latency pings, 0 disables.")
                .default_value("60")
                .value_parser(value_parser!(u64)),
        )
        .arg(Arg::new("api-url").long("api-url").value_name("URL"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = cli().get_matches();

    let audio_path = matches
        .get_one::<PathBuf>("audio")
        .context("missing --audio")?;
    let audio = std::fs::read(audio_path)
        .with_context(|| format!("cannot read {}", audio_path.display()))?;
    if audio.is_empty() {
        bail!("{} is empty", audio_path.display());
    }

    let api_key = matches.get_one::<String>("api-key").context("missing --api-key")?;
    let face_id = matches.get_one::<String>("face-id").context("missing --face-id")?;
    let config = SessionConfig::new(api_key, face_id)
        .with_max_session_length(*matches.get_one::<u64>("max-session-length").unwrap_or(&600))
        .with_max_idle_time(*matches.get_one::<u64>("max-idle-time").unwrap_or(&30));

    let mut options = WebRtcOptions::default()
        .with_turn_server(matches.get_flag("turn"))
        .with_latency_interval(*matches.get_one::<u64>("latency-interval").unwrap_or(&60));
    if let Some(url) = matches.get_one::<String>("api-url") {
        options = options.with_api_url(url);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(config, options, audio))
}

async fn run(config: SessionConfig, options: WebRtcOptions, audio: Vec<u8>) -> anyhow::Result<()> {
    let interrupted = Arc::new(Notify::new());
    let notify = interrupted.clone();
    ctrlc::set_handler(move || notify.notify_one()).context("cannot set Ctrl-C handler")?;

    let session = Arc::new(Session::new(config, Arc::new(WebRtcTransport::new(options))));
    session.initialize().await?;
    info!("Session {} active", session.id());

    let mut video = session.video_stream()?;
    let mut audio_frames = session.audio_stream()?;

    let consumer = tokio::spawn(async move {
        let (mut video_count, mut audio_count) = (0u64, 0u64);
        let (mut video_done, mut audio_done) = (false, false);
        while !(video_done && audio_done) {
            tokio::select! {
                frame = video.next_frame(), if !video_done => match frame {
                    Some(_) => video_count += 1,
                    None => video_done = true,
                },
                frame = audio_frames.next_frame(), if !audio_done => match frame {
                    Some(_) => audio_count += 1,
                    None => audio_done = true,
                },
            }
        }
        (video_count, audio_count)
    });

    let sender = {
        let session = session.clone();
        async move {
            session.send(&audio).await?;
            session.send_bootstrap_silence().await?;
            Ok::<_, facecast::SessionError>(())
        }
    };

    tokio::select! {
        sent = sender => {
            if let Err(e) = sent {
                warn!("Sending audio failed: {}", e);
            }
        }
        _ = interrupted.notified() => {
            info!("Interrupted, stopping");
            session.stop().await?;
        }
    }

    let mut consumer = consumer;
    let (video_count, audio_count) = tokio::select! {
        counts = &mut consumer => counts?,
        _ = interrupted.notified() => {
            info!("Interrupted, stopping");
            session.stop().await?;
            consumer.await?
        }
    };

    session.stop().await?;
    println!(
        "received {} video frames and {} audio frames ({})",
        video_count,
        audio_count,
        session.health().summary()
    );
    if let Some(reason) = session.stop_reason() {
        println!("session ended: {}", reason);
    }
    Ok(())
}
