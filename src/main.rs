mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use hs_av::{ToolCapabilities, ToolRegistry};
use hs_core::config::Config;
use hs_core::{MediaSource, MediaType};
use hs_transcode::Registry;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "homestream=trace,hs_server=trace,hs_transcode=trace,hs_av=debug,hs_core=debug,tower_http=debug"
                .to_string()
        } else {
            "homestream=info,hs_server=info,hs_transcode=info,hs_av=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    match cli.command {
        Commands::Start { host, port } => {
            let mut config = Config::load_or_default(cli.config.as_deref());
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            tracing::info!("Starting homestream");
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(hs_server::start(config))?;
            Ok(())
        }
        Commands::CheckTools => {
            let config = Config::load_or_default(cli.config.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_tools(&config))
        }
        Commands::Formats { json } => {
            let config = Config::load_or_default(cli.config.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(list_formats(&config, json))
        }
        Commands::Probe { file, json } => {
            let config = Config::load_or_default(cli.config.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&config, &file, json))
        }
        Commands::Validate { config } => {
            let path = config.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("homestream {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = ToolRegistry::discover(&config.tools);
    let infos = tools.check_all().await;
    let mut all_ok = true;

    for tool in &infos {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Streaming stays disabled until ffmpeg is installed.");
    }
    Ok(())
}

async fn list_formats(config: &Config, json: bool) -> Result<()> {
    let tools = ToolRegistry::discover(&config.tools);
    let caps = match ToolCapabilities::discover(&tools).await {
        Ok(caps) => Some(caps),
        Err(e) => {
            eprintln!("ffmpeg capability discovery failed ({e}); showing the full table");
            None
        }
    };
    let matrix = Registry::builtin().matrix(caps.as_ref());

    if json {
        println!("{}", serde_json::to_string_pretty(&matrix)?);
        return Ok(());
    }

    println!("Audio:");
    for (mime, codecs) in &matrix.audio {
        for (codec, display) in codecs {
            println!("  {mime};{codec}  ({display})");
        }
    }
    println!("\nVideo:");
    for (mime, codecs) in &matrix.video {
        for (pair, display) in codecs {
            println!("  {mime};{pair}  ({display})");
        }
    }
    Ok(())
}

async fn probe_file(config: &Config, file: &Path, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {}", file.display());
    }

    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    let probe = hs_av::probe::probe_file(&tools, file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&probe)?);
        return Ok(());
    }

    let media_type = if probe.streams.iter().any(|s| s.is(hs_core::StreamKind::Video)) {
        MediaType::Video
    } else {
        MediaType::Audio
    };
    let desc = probe.into_descriptor(media_type, MediaSource::Path(file.to_path_buf()));

    println!("File: {}", file.display());
    println!("Type: {}", desc.media_type);
    if let Some(ref title) = desc.title {
        println!("Title: {title}");
    }
    if let Some(ref subtitle) = desc.subtitle {
        println!("Subtitle: {subtitle}");
    }
    if let Some(length) = desc.length {
        let secs = length as u64;
        println!("Duration: {:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60);
    }
    if let Some(bitrate) = desc.bitrate {
        println!("Audio bitrate: {bitrate} kbps");
    }
    if let (Some(w), Some(h)) = (desc.width, desc.height) {
        println!("Frame size: {w}x{h}");
    }

    println!("\nStreams: {}", desc.streams.len());
    for stream in &desc.streams {
        print!("  [{}] {} {}", stream.index, stream.kind, stream.codec);
        if let Some(ref profile) = stream.profile {
            print!(" {profile}");
        }
        if let Some(level) = stream.level {
            print!(" L{level}");
        }
        if let (Some(w), Some(h)) = (stream.width, stream.height) {
            print!(" {w}x{h}");
        }
        if let Some(bitrate) = stream.bitrate {
            print!(" {bitrate} kbps");
        }
        println!();
    }
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read {}", p.display()))?;
            Config::from_json(&contents)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    Registry::builtin().validate()?;

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        println!("Configuration loaded with {} warning(s):", warnings.len());
        for warning in &warnings {
            println!("  - {warning}");
        }
    }
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Transcode monitor: {}", config.streaming.monitor);
    println!("  Libraries: {}", config.libraries.len());
    for lib in &config.libraries {
        println!("    {} ({}) -> {}", lib.name, lib.kind, lib.path.display());
    }
    Ok(())
}
