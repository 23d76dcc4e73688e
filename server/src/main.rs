//! Standalone binary: shares a command over the web as a single `/` service.
//! Run with `webtty-server [options] -- <command> [args...]`, or with no
//! command to share the user's login shell.

use std::net::SocketAddr;
use std::path::PathBuf;

use base64::Engine;
use webtty_core::config::ServerConfig;
use webtty_core::service::Service;
use webtty_core::server::Server;

const DEFAULT_PORT: u16 = 7681;

fn print_help() {
    eprintln!(
        "webtty-server shares a terminal over the web\n\n\
         USAGE:\n    webtty-server [options] -- <command> [arguments...]\n\n\
         OPTIONS:\n\
         \x20   -p, --port <port>          Port to listen on (default: {DEFAULT_PORT})\n\
         \x20   -c, --credential <u:p>     HTTP Basic + WS credential (username:password)\n\
         \x20   -s, --signal <code>        Signal sent to the child on teardown (default: 1, SIGHUP)\n\
         \x20   -r, --reconnect <secs>     Client auto-reconnect delay (default: 10, 0 disables)\n\
         \x20   -R, --readonly             Do not allow clients to write to the terminal\n\
         \x20   -O, --check-origin         Reject websocket connections from a different origin\n\
         \x20   -m, --max-clients <n>      Maximum concurrent clients (default: 0, unlimited)\n\
         \x20   -o, --once                 Accept exactly one client, then exit\n\
         \x20   -I, --index <path>         Custom index.html path\n\
         \x20   -h, --help                 Print this text and exit"
    );
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut port = DEFAULT_PORT;
    let mut credential: Option<String> = None;
    let mut signal_code = 1;
    let mut reconnect_secs = 10u32;
    let mut readonly = false;
    let mut check_origin = false;
    let mut max_clients = 0usize;
    let mut once = false;
    let mut index_path: Option<PathBuf> = None;
    let mut command: Vec<String> = Vec::new();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            "--" => {
                command = args[i + 1..].to_vec();
                break;
            }
            "-p" | "--port" if i + 1 < args.len() => {
                port = args[i + 1].parse().unwrap_or(DEFAULT_PORT);
                i += 2;
            }
            "-c" | "--credential" if i + 1 < args.len() => {
                credential = Some(base64::engine::general_purpose::STANDARD.encode(&args[i + 1]));
                i += 2;
            }
            "-s" | "--signal" if i + 1 < args.len() => {
                signal_code = args[i + 1].parse().unwrap_or(1);
                i += 2;
            }
            "-r" | "--reconnect" if i + 1 < args.len() => {
                reconnect_secs = args[i + 1].parse().unwrap_or(10);
                i += 2;
            }
            "-R" | "--readonly" => {
                readonly = true;
                i += 1;
            }
            "-O" | "--check-origin" => {
                check_origin = true;
                i += 1;
            }
            "-m" | "--max-clients" if i + 1 < args.len() => {
                max_clients = args[i + 1].parse().unwrap_or(0);
                i += 2;
            }
            "-o" | "--once" => {
                once = true;
                i += 1;
            }
            "-I" | "--index" if i + 1 < args.len() => {
                index_path = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let argv = if command.is_empty() {
        vec![std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())]
    } else {
        command
    };
    let service = Service::new("/", argv)?;

    let mut config = ServerConfig::new(vec![service]);
    config.reconnect_secs = reconnect_secs;
    config.readonly = readonly;
    config.check_origin = check_origin;
    config.once = once;
    config.max_clients = max_clients;
    config.index_path = index_path;
    config.exit_signal_code = signal_code;
    if let Some(credential) = credential {
        config = config.with_credential(credential);
    }

    let server = Server::new(config)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(webtty_server::run_server(server, addr))
}
