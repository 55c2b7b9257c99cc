use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use yt_autopilot::api::{Autopilot, AutopilotOptions};
use yt_autopilot::config::Config;
use yt_autopilot::feed::youtube_rss::YouTubeRss;
use yt_autopilot::feed::youtube_search::YouTubeSearch;
use yt_autopilot::feed::YouTube;
use yt_autopilot::services::{MistralGenerator, WatchPageTranscripts, WordPressFactory};
use yt_autopilot::store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    let log_file = std::fs::File::create("yt-autopilot.log")?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("yt_autopilot=info")),
        )
        .with_writer(log_file)
        .init();

    let config = Config::load(Path::new("config.toml"))?;

    // Load saved keys from .env (real env vars take precedence)
    Config::load_env_file();

    println!();
    println!("  YouTube Autopilot v0.1.0");
    println!("  ========================");
    println!();
    println!("  Loading API credentials (.env / env vars / interactive prompt):");
    println!();

    let mistral_key = Config::mistral_api_key()?;
    let youtube_key = Config::youtube_api_key();
    if youtube_key.is_none() {
        println!("  YOUTUBE_API_KEY not set: search batches disabled, channel monitoring unaffected.");
    }

    let store = SqliteStore::open(&config.store.database_path)
        .await
        .with_context(|| format!("failed to open database {}", config.store.database_path.display()))?;

    let yt = &config.youtube;
    let http_timeout = Duration::from_secs(yt.request_timeout_s);
    let videos = YouTube::new(
        YouTubeRss::new(&yt.feed_base_url, http_timeout),
        youtube_key.map(|key| YouTubeSearch::new(key, &yt.search_api_base, http_timeout)),
    );
    let transcripts = WatchPageTranscripts::new(
        &yt.watch_base_url,
        yt.transcript_languages.clone(),
        yt.min_transcript_words,
        http_timeout,
    );
    let generator = MistralGenerator::new(
        mistral_key,
        &config.generation.api_base,
        &config.generation.model,
        config.generation.temperature,
        Duration::from_secs(config.generation.request_timeout_s),
    );
    let publishers = WordPressFactory::new(
        &config.publish.post_status,
        Duration::from_secs(config.publish.request_timeout_s),
    );

    let autopilot = Autopilot::new(
        Arc::new(store),
        Arc::new(videos),
        Arc::new(transcripts),
        Arc::new(generator),
        Arc::new(publishers),
        AutopilotOptions::from_config(&config)?,
    );

    let resumed = autopilot.resume_monitoring().await?;
    println!();
    println!(
        "  Monitoring {} channel(s), polling every {}s. Press Ctrl-C to stop.",
        resumed, config.monitor.poll_interval_s
    );
    println!();
    tracing::info!(resumed, poll_interval_s = config.monitor.poll_interval_s, "autopilot started");

    if config.search.schedule.enabled {
        match autopilot.start_schedule().await {
            Ok(_) => println!(
                "  Scheduled searches at {} for project {}.",
                config.search.schedule.daily_times.join(", "),
                config.search.schedule.project_id.unwrap_or_default()
            ),
            Err(e) => {
                tracing::error!(error = %e, "search schedule not started");
                println!("  Scheduled searches not started: {}", e);
            }
        }
        println!();
    }

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;

    println!("  Stopping monitors and scheduled searches (waiting for in-flight articles)...");
    autopilot.shutdown().await;
    tracing::info!("autopilot stopped");
    println!("  Stopped.");
    Ok(())
}
