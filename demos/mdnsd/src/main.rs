use std::collections::HashSet;
use std::env;
use std::net::Ipv4Addr;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mdns_engine::{new_querier, new_responder, EngineOptions};
use mdns_types::protocol::types::{QueryType, RecordType};
use mdns_types::service::Service;

fn begin_logging() {
    let log_format = if let Ok(var) = env::var("RUST_LOG_FORMAT") {
        var.split(',').map(str::to_string).collect::<HashSet<_>>()
    } else {
        HashSet::new()
    };

    let logger = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(!log_format.contains("no-ansi"));

    if log_format.contains("json") {
        if log_format.contains("no-time") {
            logger.json().without_time().init();
        } else {
            logger.json().init();
        }
    } else if log_format.contains("no-time") {
        logger.without_time().init();
    } else {
        logger.init();
    }
}

/// Command-line front end for registering and querying mDNS/DNS-SD
/// services on the local network.
#[derive(Parser)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Advertise a service until interrupted, then send goodbye.
    Register {
        /// Service instance name, e.g. "My Printer"
        instance: String,
        /// Service type, e.g. "_ipp._tcp"
        service_type: String,
        /// Port the service listens on
        port: u16,
        /// Hostname to advertise (without ".local"), defaults to the
        /// machine's hostname
        #[clap(long)]
        hostname: Option<String>,
        /// IPv4 address to advertise, can be specified more than once
        #[clap(short, long)]
        address: Vec<Ipv4Addr>,
        /// TXT record entry in key=value form, can be specified more than once
        #[clap(short, long)]
        txt: Vec<String>,
    },
    /// Issue a one-shot PTR query for a service type and print the results.
    Query {
        /// Service type to browse for, e.g. "_ipp._tcp.local"
        name: String,
    },
}

#[tokio::main]
async fn main() {
    begin_logging();
    let args = Args::parse();

    match args.command {
        Command::Register {
            instance,
            service_type,
            port,
            hostname,
            address,
            txt,
        } => register(instance, service_type, port, hostname, address, txt).await,
        Command::Query { name } => query(name).await,
    }
}

async fn register(
    instance: String,
    service_type: String,
    port: u16,
    hostname: Option<String>,
    addresses: Vec<Ipv4Addr>,
    txt: Vec<String>,
) {
    let hostname = hostname.or_else(|| env::var("HOSTNAME").ok()).unwrap_or_else(|| "unknown-host".to_string());

    let txt_entries = txt
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((k, v)) => (k.to_string(), v.as_bytes().to_vec()),
            None => (entry.clone(), Vec::new()),
        })
        .collect();

    let service = match Service::new(instance, service_type, port, hostname, addresses)
        .and_then(|s| s.with_txt(txt_entries))
    {
        Ok(service) => service,
        Err(error) => {
            tracing::error!(%error, "invalid service description");
            process::exit(1);
        }
    };

    let responder = match new_responder(EngineOptions::default()).await {
        Ok(responder) => responder,
        Err(error) => {
            let hint = match &error {
                mdns_engine::Error::Network { source, .. } => mdns_engine::error::startup_hint("bind", source),
                _ => None,
            };
            tracing::error!(%error, ?hint, "could not start responder");
            process::exit(1);
        }
    };

    let instance_name = service.instance().to_string();
    let handle = responder.register(service).await;
    tracing::info!(instance = %instance_name, "registered, probing");

    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "could not wait for ctrl-c");
    }

    tracing::info!(instance = %instance_name, "shutting down, sending goodbye");
    responder.unregister(&handle).await;
    responder.close().await;
}

async fn query(name: String) {
    let querier = match new_querier(EngineOptions::default()).await {
        Ok(querier) => querier,
        Err(error) => {
            tracing::error!(%error, "could not start querier");
            process::exit(1);
        }
    };

    let results = match querier.query_default(&name, QueryType::Record(RecordType::Ptr)).await {
        Ok(results) => results,
        Err(error) => {
            tracing::error!(%error, "query failed");
            process::exit(1);
        }
    };

    for record in results {
        println!("{}\t{}\t{:?}", record.name, record.ttl, record.rtype_with_data);
    }

    querier.close().await;
}
