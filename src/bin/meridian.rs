use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use getopts::Options;

use meridian::dns::context::{ServerConfig, ServerContext};
use meridian::dns::server::DnsUdpServer;

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

/// Main entry point for the Meridian DNS server
fn main() {
    simple_logger::init().expect("Failed to initialize logger");

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt(
        "a",
        "address",
        "IP address to bind the UDP socket to (default 0.0.0.0)",
        "ADDRESS",
    );
    opts.optopt("p", "port", "port to listen on (default 53)", "PORT");
    opts.optopt(
        "j",
        "zones-dir",
        "The directory for the zone files",
        "DIRECTORY",
    );
    opts.optopt(
        "w",
        "workers",
        "number of request handler threads (default 4)",
        "COUNT",
    );

    let opt_matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            log::error!("Failed to parse arguments: {}", f);
            process::exit(1);
        }
    };

    if opt_matches.opt_present("h") {
        print_usage(&program, opts);
        return;
    }

    let mut config = ServerConfig::default();

    if let Some(address) = opt_matches.opt_str("a") {
        match address.parse::<IpAddr>() {
            Ok(addr) => config.bind_address = addr,
            Err(_) => {
                log::error!("Bind address {} is not a valid IP address", address);
                process::exit(1);
            }
        }
    }

    if let Some(port) = opt_matches.opt_str("p") {
        match port.parse::<u16>() {
            Ok(port) => config.dns_port = port,
            Err(_) => {
                log::error!("Port {} is not a valid port number", port);
                process::exit(1);
            }
        }
    }

    match opt_matches.opt_str("j") {
        Some(zones_dir) => config.zones_dir = PathBuf::from(zones_dir),
        None => {
            log::info!(
                "Zones dir not specified, using default: {}",
                config.zones_dir.display()
            );
        }
    }

    if let Some(workers) = opt_matches.opt_str("w") {
        match workers.parse::<usize>() {
            Ok(count) if count > 0 => config.worker_threads = count,
            _ => {
                log::error!("Worker count {} is not a positive integer", workers);
                process::exit(1);
            }
        }
    }

    // Zone data is loaded exactly once, before the socket is bound; a
    // malformed zone file stops the server here.
    let context = match ServerContext::new(config) {
        Ok(context) => Arc::new(context),
        Err(e) => {
            log::error!("Server failed to initialize: {}", e);
            process::exit(1);
        }
    };

    log::info!(
        "Serving {} zones on {}:{}",
        context.authority.zone_count(),
        context.config.bind_address,
        context.config.dns_port
    );

    let udp_server = DnsUdpServer::new(context);
    if let Err(e) = udp_server.run_server() {
        log::error!("Failed to run UDP server: {}", e);
        process::exit(1);
    }
}
