use clap::Parser;
use color_eyre::eyre::{eyre, WrapErr};
use std::net::SocketAddr;
use tracing::info;

mod progress;
mod routes;

/// Serve the contents of an S3 bucket as a single downloadable archive.
///
/// Every `GET /download` request lists the bucket, retrieves all of its objects, and responds
/// with an archive containing every object that could be retrieved.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(flatten)]
    config: s3pack::Config,

    /// Address and port to listen on for HTTP requests
    #[clap(long, default_value = "0.0.0.0:8081", value_name = "ADDR")]
    listen: SocketAddr,

    /// Enable verbose log output
    #[clap(short = 'v', long, conflicts_with = "quiet")]
    verbose: bool,

    /// Be quiet, suppress almost all output (except errors)
    #[clap(short = 'q', long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    init_logging(&args);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        target = env!("VERGEN_CARGO_TARGET_TRIPLE"),
        "Starting s3pack-server"
    );

    // The client is set up once and shared by every request
    let bucket = s3pack::connect_s3_bucket(&args.config)
        .await
        .map_err(|e| eyre!("{}: {}", e.kind(), e.detail()))?;

    let job = s3pack::BundleJob::new(&args.config, bucket);
    let bucket_name = job.bucket_name().to_string();
    let format = job.archive_format();

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .wrap_err_with(|| format!("Error listening on {}", args.listen))?;

    info!(address = %args.listen, bucket = %bucket_name, %format, "Serving bucket contents at /download");

    axum::serve(listener, routes::router(job))
        .await
        .wrap_err("HTTP server failed")?;

    Ok(())
}

fn init_logging(args: &Args) {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let default_filter = if args.verbose {
        "s3pack=debug,s3pack_server=debug,tower_http=debug,info"
    } else if args.quiet {
        "error"
    } else {
        "s3pack=info,s3pack_server=info,warn"
    };

    // RUST_LOG always wins
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
