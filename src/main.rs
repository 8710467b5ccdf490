use std::sync::Arc;

use anyhow::Result;

use navvy::config::AiConfig;
use navvy::core::model::AdapterRegistry;
use navvy::core::tools::coordinator::ToolCoordinator;
use navvy::interfaces::web::{ApiServer, AppState};
use navvy::logging;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8790;

fn print_help() {
    println!("navvy - AI coding-assistant backend\n");
    println!("Usage: navvy serve [--host HOST] [--port PORT]\n");
    println!("Options:");
    println!("  --host HOST   Bind address (default {DEFAULT_HOST})");
    println!("  --port PORT   Bind port (default {DEFAULT_PORT})");
    println!("\nSet RUST_LOG to control log verbosity (default: info).");
}

fn parse_server_flags(args: &[String], start: usize) -> (String, u16) {
    let mut host = DEFAULT_HOST.to_string();
    let mut port = DEFAULT_PORT;
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                if i + 1 < args.len() {
                    host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--port" => {
                if i + 1 < args.len() {
                    port = args[i + 1].parse().unwrap_or(DEFAULT_PORT);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (host, port)
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info");

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("serve") => {
            let (host, port) = parse_server_flags(&args, 2);
            let state = AppState::new(
                Arc::new(ToolCoordinator::with_default_tools()),
                Arc::new(AdapterRegistry::with_default_adapters()),
                AiConfig::default(),
            );
            ApiServer::new(state, host, port).serve().await
        }
        _ => {
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_apply_without_flags() {
        let (host, port) = parse_server_flags(&args(&["navvy", "serve"]), 2);
        assert_eq!(host, DEFAULT_HOST);
        assert_eq!(port, DEFAULT_PORT);
    }

    #[test]
    fn flags_override_defaults() {
        let (host, port) = parse_server_flags(
            &args(&["navvy", "serve", "--host", "0.0.0.0", "--port", "9000"]),
            2,
        );
        assert_eq!(host, "0.0.0.0");
        assert_eq!(port, 9000);
    }

    #[test]
    fn malformed_port_falls_back() {
        let (_, port) = parse_server_flags(&args(&["navvy", "serve", "--port", "abc"]), 2);
        assert_eq!(port, DEFAULT_PORT);
    }
}
