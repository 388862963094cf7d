use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use clap::Parser;
use icapguard::cli::{Cli, Commands};
use icapguard::config::AppConfig;
use icapguard::logging;
use icapguard::server::IcapGuardServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            cmd_start(&cli.config).await?;
        }
        Commands::Check => {
            cmd_check(&cli.config)?;
        }
        Commands::Logs {
            tail,
            export,
            format,
        } => {
            cmd_logs(&cli.config, tail, export, &format)?;
        }
        Commands::Init => {
            cmd_init(&cli.config)?;
        }
    }

    Ok(())
}

async fn cmd_start(config_path: &Path) -> anyhow::Result<()> {
    let config = AppConfig::load_from_path(config_path)?;
    println!("IcapGuard starting...");
    println!("Config: {}", config_path.display());
    println!("Listen: {}", config.icap.listen);
    println!(
        "Reqmod vendor:  {}",
        nonempty_or(&config.policy.req_scanner_vendor, "(bypass)")
    );
    println!(
        "Respmod vendor: {}",
        nonempty_or(&config.policy.resp_scanner_vendor, "(bypass)")
    );

    let audit = match &config.audit.database {
        Some(path) => {
            let conn = logging::open_db(path)?;
            println!("Audit log: {}", path.display());
            Some(Arc::new(Mutex::new(conn)))
        }
        None => None,
    };

    let mut server = IcapGuardServer::new(config)?;
    if let Some(db) = audit {
        server = server.with_audit_db(db);
    }

    tokio::select! {
        result = server.run() => {
            result.map_err(|e| anyhow!("server error: {e}"))?;
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
    }
    Ok(())
}

fn cmd_check(config_path: &Path) -> anyhow::Result<()> {
    let config = AppConfig::load_from_path(config_path)?;
    let server = IcapGuardServer::new(config.clone())?;

    println!("Configuration OK ({})", config_path.display());
    println!("═══════════════════════════════════════");
    println!("Listen:          {}", config.icap.listen);
    println!("ISTag:           {}", config.icap.istag);
    println!("Preview bytes:   {}", config.icap.preview_bytes);
    println!("Max file size:   {} bytes", config.icap.max_file_size);
    println!(
        "Process exts:    {}",
        config.policy.process_extensions.join(", ")
    );
    println!(
        "Bypass exts:     {}",
        config.policy.bypass_extensions.join(", ")
    );
    println!("Propagate error: {}", config.policy.propagate_error);

    let vendors = server.registry().vendor_names();
    if vendors.is_empty() {
        println!("Vendors: none configured");
    } else {
        println!("Vendors:");
        for (name, kind) in vendors {
            println!("  [{kind}] {name}");
        }
    }

    for (direction, vendor) in [
        ("reqmod", &config.policy.req_scanner_vendor),
        ("respmod", &config.policy.resp_scanner_vendor),
    ] {
        if vendor.is_empty() {
            println!("{direction}: bypass everything (no vendor selected)");
        } else if server.registry().resolve(vendor).is_none() {
            println!("{direction}: WARNING - vendor `{vendor}` is not configured");
        } else {
            println!("{direction}: scanning with `{vendor}`");
        }
    }
    Ok(())
}

fn cmd_logs(config_path: &Path, tail: usize, export: bool, format: &str) -> anyhow::Result<()> {
    let config = AppConfig::load_from_path(config_path)?;
    let Some(db_path) = &config.audit.database else {
        println!("No audit database configured. Set [audit] database in the config.");
        return Ok(());
    };
    if !db_path.exists() {
        println!("No audit database found. Run 'icapguard start' first.");
        return Ok(());
    }

    let conn = logging::open_db(db_path)?;

    if export {
        match format {
            "csv" => {
                let csv = logging::export::export_csv(&conn)?;
                print!("{}", csv);
            }
            _ => {
                let json = logging::export::export_json(&conn)?;
                println!("{}", json);
            }
        }
    } else {
        let logs = logging::query_recent(&conn, tail)?;
        if logs.is_empty() {
            println!("No log entries found.");
        } else {
            println!(
                "{:<25} {:<8} {:<40} {:<12} {:<8} {}",
                "TIMESTAMP", "MODE", "URL", "VENDOR", "ACTION", "REASON"
            );
            println!("{}", "─".repeat(120));
            for log in &logs {
                println!(
                    "{:<25} {:<8} {:<40} {:<12} {:<8} {}",
                    log.timestamp, log.mode, log.url, log.vendor, log.action, log.reason
                );
            }
        }
    }
    Ok(())
}

fn cmd_init(config_path: &Path) -> anyhow::Result<()> {
    if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
        return Ok(());
    }
    let default_config = include_str!("../templates/default.toml");
    std::fs::write(config_path, default_config)?;
    println!("Created config: {}", config_path.display());
    println!("\nNext steps:");
    println!("  1. Add a scanner vendor under [vendors] and select it in [policy]");
    println!("  2. Validate:         icapguard check");
    println!("  3. Start the server: icapguard start");
    Ok(())
}

fn nonempty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}
