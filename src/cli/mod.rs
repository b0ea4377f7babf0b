mod init;
mod serve;

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use crate::core::terminal::{self, print_error};

fn print_help() {
    terminal::print_banner();

    println!(" {}", style("Commands").bold());
    println!(
        "   {}   Run the engine: API, websocket, job queue, scheduler",
        style("serve").green()
    );
    println!(
        "   {}    Set up the workspace and install default prompt templates",
        style("init").green()
    );
    println!(
        "   {}    Show this help message",
        style("help").green()
    );
    println!();
    println!(" {}", style("Flags (serve)").bold());
    println!("   --api-host <host>      Bind address (default 127.0.0.1)");
    println!("   --api-port <port>      Bind port (default 8787)");
    println!("   --workspace <dir>      Workspace directory (default platform data dir)");
    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("adjutant").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ServeArgs {
    pub api_host: Option<String>,
    pub api_port: Option<u16>,
    pub workspace: Option<PathBuf>,
}

pub(crate) fn parse_serve_flags(args: &[String], start: usize) -> ServeArgs {
    let mut parsed = ServeArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-host" => {
                if i + 1 < args.len() {
                    parsed.api_host = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-port" => {
                if i + 1 < args.len() {
                    parsed.api_port = args[i + 1].parse().ok();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--workspace" => {
                if i + 1 < args.len() {
                    parsed.workspace = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    parsed
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(cmd) = args.get(1).map(|s| s.as_str()) else {
        print_help();
        return Ok(());
    };

    match cmd {
        "serve" => serve::run_serve(parse_serve_flags(&args, 2)).await,
        "init" => init::run_init(parse_serve_flags(&args, 2)).await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_serve_flags_reads_host_port_and_workspace() {
        let args = vec![
            "adjutant".to_string(),
            "serve".to_string(),
            "--api-host".to_string(),
            "0.0.0.0".to_string(),
            "--api-port".to_string(),
            "9000".to_string(),
            "--workspace".to_string(),
            "/tmp/adjutant-ws".to_string(),
        ];
        let parsed = parse_serve_flags(&args, 2);
        assert_eq!(parsed.api_host.as_deref(), Some("0.0.0.0"));
        assert_eq!(parsed.api_port, Some(9000));
        assert_eq!(parsed.workspace, Some(PathBuf::from("/tmp/adjutant-ws")));
    }

    #[test]
    fn parse_serve_flags_ignores_dangling_flag() {
        let args = vec![
            "adjutant".to_string(),
            "serve".to_string(),
            "--api-port".to_string(),
        ];
        assert_eq!(parse_serve_flags(&args, 2), ServeArgs::default());
    }
}
