use anyhow::{anyhow, Result};
use kestrel_core::{LogEntry, LogLevel};
use kestrel_driver::driver::{AppDriver, DriverConfig};
use kestrel_driver::picker::PageHints;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub struct LaunchArgs {
    pub command: String,
    pub args: Vec<String>,
    pub port: Option<u16>,
    pub timeout_ms: u64,
    pub headed: bool,
    pub cwd: Option<PathBuf>,
    pub env: Vec<String>,
    pub artifact_dir: Option<PathBuf>,
    pub window_title: Option<String>,
    pub window_url: Option<String>,
    pub trace_ipc: bool,
}

/// Split repeated `KEY=VALUE` flags into a map.
pub fn parse_env_pairs(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut env = HashMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid --env value '{}', expected KEY=VALUE", pair))?;
        if key.is_empty() {
            return Err(anyhow!("invalid --env value '{}', empty key", pair));
        }
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

fn print_entry(entry: &LogEntry) {
    let level = match entry.level {
        LogLevel::Error => console::style("ERROR").red().to_string(),
        LogLevel::Warn => console::style("WARN ").yellow().to_string(),
        LogLevel::Info => "INFO ".to_string(),
        LogLevel::Debug => console::style("DEBUG").dim().to_string(),
    };
    println!(
        "{} {} [{}] {}",
        entry.ts.format("%H:%M:%S%.3f"),
        level,
        entry.source.as_str(),
        entry.message
    );
}

pub fn execute(args: LaunchArgs) -> Result<()> {
    let env = parse_env_pairs(&args.env)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut config = DriverConfig::new(&args.command);
        config.args = args.args.clone();
        config.cwd = args.cwd.clone();
        config.env = env;
        config.headless = !args.headed;
        config.port = args.port;
        config.discovery_timeout = Duration::from_millis(args.timeout_ms);
        config.artifact_dir = args.artifact_dir.clone();
        config.window_hints = PageHints {
            title_contains: args.window_title.clone(),
            url_includes: args.window_url.clone(),
        };
        config.ipc_tracing = args.trace_ipc;

        println!("🚀 Launching {}...", args.command);
        let mut driver = AppDriver::launch(config)
            .await
            .map_err(|e| anyhow!("{}: {}", e.code(), e))?;

        println!("✅ Attached. Descriptor: {}", driver.descriptor_path().display());
        println!("📡 Streaming diagnostics (Ctrl-C to quit)...");
        println!();

        let pipeline = driver.pipeline();
        for entry in pipeline.snapshot() {
            print_entry(&entry);
        }
        let mut rx = pipeline.subscribe();
        let printer = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                print_entry(&entry);
            }
        });

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\n🛑 Interrupt received, shutting down...");
            }
            _ = driver.process().wait() => {
                println!("\n🛑 App exited on its own");
            }
        }

        printer.abort();
        driver
            .quit(5_000)
            .await
            .map_err(|e| anyhow!("{}: {}", e.code(), e))?;
        println!("✅ Process tree terminated");
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_pairs() {
        let env = parse_env_pairs(&["A=1".to_string(), "B=two=parts".to_string()]).unwrap();
        assert_eq!(env["A"], "1");
        assert_eq!(env["B"], "two=parts");
    }

    #[test]
    fn test_parse_env_rejects_malformed() {
        assert!(parse_env_pairs(&["NOVALUE".to_string()]).is_err());
        assert!(parse_env_pairs(&["=x".to_string()]).is_err());
    }
}
