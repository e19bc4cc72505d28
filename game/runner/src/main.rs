//! The launcher binary: turns argv into a command name plus flags, builds a logger and a
//! [`gamecore`] configuration, registers the commands this server supports with a
//! [`neutronium::net::command::CommandHost`], runs the requested one, and translates its
//! [`ExecutionReport`] into a process exit code.

mod cmdline;

use std::path::Path;
use std::thread;
use std::time::Duration;

use flux::logging::{self, Logger};
use neutronium::net::command::{CancellationToken, CommandHost};
use neutronium::net::connection::Connection;
use neutronium::net::tcp::TcpClient;

use gamecore::config::GameConfig;
use gamecore::server::GameServer;

const GAME_CONFIG_FILE: &str = "game_config.toml";
const LOG_CONFIG_FILE: &str = "gamerunner.log.toml";

fn build_logger(parsed: &cmdline::ParsedArgs) -> Logger {
    if parsed.silent {
        return logging::terminal(sloggers::types::Severity::Critical);
    }
    if parsed.verbose {
        return logging::terminal(sloggers::types::Severity::Trace);
    }
    if Path::new(LOG_CONFIG_FILE).exists() {
        logging::from_file(LOG_CONFIG_FILE)
    } else {
        logging::terminal(sloggers::types::Severity::Info)
    }
}

fn load_config() -> GameConfig {
    if Path::new(GAME_CONFIG_FILE).exists() {
        GameConfig::load(GAME_CONFIG_FILE)
    } else {
        GameConfig::default()
    }
}

/// Opens a background connection to a remote message server and identifies this process to
/// it, per the `-messageServer`/`-messageConnectionKey`/`-messageStartupTimestamp` flags.
/// The "hello" is a single framed message: connection key and startup timestamp, newline
/// separated; there is no further protocol beyond identification.
fn announce_to_message_server(parsed: &cmdline::ParsedArgs, config: &GameConfig, log: &Logger) {
    let address = match &parsed.message_server {
        Some(address) => address,
        None => return,
    };

    let hello = format!(
        "{}\n{}\n",
        parsed.message_connection_key.as_deref().unwrap_or(""),
        parsed.message_startup_timestamp.as_deref().unwrap_or(""),
    );

    match TcpClient::connect(address, config.net.tcp.max_message_size, log.new(logging::o!("role" => "message-client"))) {
        Ok(channel) => {
            if let Err(e) = channel.send(hello.as_bytes()) {
                logging::warn!(log, "failed announcing to message server"; "error" => format!("{:?}", e));
            }
        }
        Err(e) => logging::warn!(log, "failed connecting to message server"; "address" => address.clone(), "error" => e.to_string()),
    }
}

fn register_commands(host: &mut CommandHost, config: GameConfig, log: Logger) {
    host.register("serve", move |_args, cancel: &CancellationToken| {
        let mut server = GameServer::bind(&config, log.new(logging::o!("command" => "serve"))).map_err(|e| e.to_string())?;

        let tick_interval = Duration::from_secs_f64(1.0 / f64::from(config.game.tick_rate_hz));
        while !cancel.is_cancelled() {
            server.tick();
            thread::sleep(tick_interval);
        }

        Ok(())
    });
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let parsed = cmdline::parse(args);

    let config = load_config();

    if parsed.dump_config {
        println!("{}", serdeconv::to_toml_string(&config).expect("config must serialize to TOML"));
        std::process::exit(0);
    }

    let log = build_logger(&parsed);

    if parsed.noapp {
        logging::info!(log, "noapp flag set, exiting without running a command");
        std::process::exit(0);
    }

    announce_to_message_server(&parsed, &config, &log);

    let mut host = CommandHost::new();
    register_commands(&mut host, config, log.new(logging::o!("component" => "command-host")));

    let command = parsed.command.clone().unwrap_or_else(|| "serve".to_string());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        let log = log.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            logging::info!(log, "shutdown signal received");
            cancel.cancel();
        }) {
            logging::warn!(log, "failed installing signal handler"; "error" => e.to_string());
        }
    }

    let report = host.run(&command, &parsed.trailing, &cancel);

    if parsed.no_error_capture {
        logging::info!(log, "command finished"; "command" => report.command.clone(), "succeeded" => report.succeeded);
    } else {
        logging::info!(
            log, "command finished";
            "command" => report.command.clone(),
            "succeeded" => report.succeeded,
            "errors_captured" => report.errors_captured,
        );
        if let Some(message) = &report.message {
            logging::error!(log, "command reported a failure"; "message" => message.clone());
        }
    }

    std::process::exit(report.exit_code());
}
