use clap::Parser;
use log::info;
use blelink::cli::{run, Args};
use blelink::error::AppRunError;
use blelink::init_logging;

// the notification listener is the only concurrent task; everything runs on
// one event loop
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("blelink ", env!("CARGO_PKG_VERSION")));

    let args = Args::parse();
    run(args).await
}
