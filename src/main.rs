use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kgv::certs::{self, TlsPaths};
use kgv::config::{Config, LogFormat, StartArgs, TlsSource, DEFAULT_CERT_DIR};
use kgv::hooks::HookRegistry;
use kgv::webhook::WebhookServer;
use kgv::Error;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the admission webhook server
    Start(StartArgs),
    /// Print the base64 CA bundle of a bootstrapped certificate
    CaBundle(CaBundleArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct CaBundleArgs {
    /// Directory holding the bootstrapped certificates
    #[arg(long, env = "KGV_CERT_DIR", default_value = DEFAULT_CERT_DIR)]
    cert_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_format = match &args.command {
        Commands::Start(start_args) => start_args.log_format,
        _ => LogFormat::default(),
    };
    kgv::telemetry::init_tracing(log_format);

    let result = match args.command {
        Commands::Version => {
            println!("kgv v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::CaBundle(ca_args) => print_ca_bundle(ca_args),
        Commands::Start(start_args) => run_server(start_args).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn print_ca_bundle(args: CaBundleArgs) -> Result<(), Error> {
    let bundle = certs::ca_bundle(&args.cert_dir)?;
    println!("{bundle}");
    Ok(())
}

async fn run_server(args: StartArgs) -> Result<(), Error> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        return Err(Error::ServerError(format!(
            "Failed to install TLS crypto provider: {e:?}"
        )));
    }

    info!(
        "Starting kgv admission webhook v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_args(&args)?;

    // No request is served before TLS material is on disk.
    let tls = match &config.tls {
        TlsSource::Provided { cert, key } => {
            info!(cert = %cert.display(), key = %key.display(), "Using provided TLS certificate");
            TlsPaths {
                cert: cert.clone(),
                key: key.clone(),
            }
        }
        TlsSource::Bootstrap { dir } => {
            let dir = dir.clone();
            let dns_names = config.dns_names.clone();
            tokio::task::spawn_blocking(move || certs::bootstrap(&dir, &dns_names))
                .await
                .map_err(|e| Error::ServerError(format!("Certificate bootstrap task failed: {e}")))??
        }
    };

    WebhookServer::new(HookRegistry::builtin())
        .start(config.listen_addr(), &tls)
        .await
}
