//! deployd - Entry Point
//!
//! Receives application bundles over HTTP, builds them with docker and runs
//! them as swarm services.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use deployd::app::options::AppOptions;
use deployd::app::run::run;
use deployd::deploy::docker::DockerEngine;
use deployd::filesys::file::File;
use deployd::logs::{init_logging, LogLevel, LogOptions};
use deployd::storage::settings::{Settings, DEFAULT_SETTINGS_PATH};
use deployd::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return;
    }

    // Retrieve the settings file
    let settings_path = cli_args
        .get("config")
        .cloned()
        .unwrap_or_else(|| DEFAULT_SETTINGS_PATH.to_string());
    let mut settings = match Settings::load(&File::new(&settings_path)).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file {}: {}", settings_path, e);
            std::process::exit(1);
        }
    };

    // Command line overrides
    if let Some(level) = cli_args.get("log-level") {
        match level.parse::<LogLevel>() {
            Ok(level) => settings.log_level = level,
            Err(e) => eprintln!("{e}, keeping {:?}", settings.log_level),
        }
    }
    if let Some(host) = cli_args.get("host") {
        settings.server.host = host.clone();
    }
    if let Some(port) = cli_args.get("port") {
        match port.parse() {
            Ok(port) => settings.server.port = port,
            Err(_) => {
                eprintln!("Invalid port: {}", port);
                std::process::exit(2);
            }
        }
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.as_ref().map(PathBuf::from),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(settings);

    // Run diagnostics
    if cli_args.contains_key("diagnostic") || cli_args.contains_key("diag") {
        run_diagnostic(&options).await;
        return;
    }

    info!("Running deployd {} with options: {:?}", version.version, options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run deployd: {e}");
        std::process::exit(1);
    }
}

async fn run_diagnostic(options: &AppOptions) {
    let version = version_info();
    println!("deployd {} ({}, built {})", version.version, version.git_hash, version.build_time);

    let engine = DockerEngine::new(options.docker.clone());
    match engine.server_version().await {
        Ok(server) => println!("docker: server {}", server),
        Err(e) => println!("docker: unavailable ({})", e),
    }

    match &options.registry.base_url {
        Some(url) => println!("registry: {}", url),
        None => println!("registry: embedded (in-memory)"),
    }
    println!("workspace: {}", options.pipeline.workspace.path().display());
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
