use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use async_std::task;
use clap::{Args, Parser, Subcommand};

use twinftp::tftp::client::Client;
use twinftp::tftp::config::{Binding, ClientConfig, ServerConfig, Timing, DEFAULT_PORT};
use twinftp::tftp::error::TransferError;
use twinftp::tftp::server::Server;

/// This doc string acts as a help message when the user runs '--help'
/// as do all doc strings on fields
#[derive(Parser, Debug)]
#[command(version, author = "shakram02")]
struct Opts {
    #[command(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand, Debug)]
enum SubCommand {
    /// act as a client.
    #[command(name = "client")]
    Client(ClientOperations),
    /// act as a server.
    #[command(name = "server")]
    Server(ServerArgs),
}

#[derive(Args, Debug)]
struct TransportArgs {
    /// Transport to run the protocol over.
    #[arg(short = 't', long = "transport", value_enum, default_value_t = Binding::Stream)]
    transport: Binding,
    /// How long (ms) to wait for an expected datagram before giving up.
    #[arg(
        long = "timeout-ms",
        default_value_t = 5000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    timeout_ms: u64,
    /// How often (ms) an unacknowledged datagram block is sent again.
    #[arg(
        long = "retransmit-ms",
        default_value_t = 1000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    retransmit_ms: u64,
}

impl TransportArgs {
    fn timing(&self) -> Timing {
        Timing::new(
            Duration::from_millis(self.timeout_ms),
            Duration::from_millis(self.retransmit_ms),
        )
    }
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// IP for the server to use.
    #[arg(short = 'a', long = "address", default_value = "127.0.0.1")]
    address: IpAddr,
    /// Port that the server will listen on.
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Directory files are served from and stored in.
    #[arg(short = 'd', long = "dir", default_value = ".")]
    dir: PathBuf,
    #[command(flatten)]
    transport: TransportArgs,
}

/// Transfers files with a server, one after another.
#[derive(Args, Debug)]
struct ClientOperations {
    /// names of the files to be downloaded.
    #[arg(required = true)]
    filenames: Vec<String>,
    /// If specified the files are uploaded instead
    #[arg(short = 'u', long = "upload")]
    upload: bool,
    /// Server address
    #[arg(short = 'a', long = "address", default_value = "127.0.0.1")]
    address: IpAddr,
    /// Server port
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Local directory files are read from and written to.
    #[arg(short = 'd', long = "dir", default_value = ".")]
    dir: PathBuf,
    #[command(flatten)]
    transport: TransportArgs,
}

async fn run_client(args: ClientOperations) -> Result<(), TransferError> {
    let server = SocketAddr::new(args.address, args.port);
    let config = ClientConfig::new(server, args.transport.transport)
        .with_directory(args.dir)
        .with_timing(args.transport.timing());
    let client = Client::new(config)?;

    for filename in &args.filenames {
        let summary = if args.upload {
            log::info!("[UPLOAD] FILE: ({}) TO SERVER: {}", filename, server);
            client.upload(filename).await?
        } else {
            log::info!("[DOWNLOAD] FILE: ({}) SERVER: {}", filename, server);
            client.download(filename).await?
        };
        log::info!("Transferred {}", summary);
    }

    Ok(())
}

async fn run_server(args: ServerArgs) -> Result<(), TransferError> {
    let config = ServerConfig::new(
        SocketAddr::new(args.address, args.port),
        args.transport.transport,
        args.dir,
    )
    .with_timing(args.transport.timing());

    log::info!("Serving {} over {}", config.directory.display(), config.binding);
    Server::bind(&config).await?.serve().await
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts: Opts = Opts::parse();
    let result = task::block_on(async {
        match opts.subcmd {
            SubCommand::Client(client_args) => run_client(client_args).await,
            SubCommand::Server(server_args) => run_server(server_args).await,
        }
    });

    if let Err(e) = result {
        log::error!("{}", e);
        process::exit(1);
    }
}
