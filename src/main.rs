use tafil::{Result, cli, logger};
#[cfg(unix)]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::SignalKind;

#[macro_use]
extern crate log;

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();
    #[cfg(unix)]
    handle_epipe();
    cli::run().await
}

// Dev server output is often piped into `head` or `grep`
#[cfg(unix)]
fn handle_epipe() {
    match signal::unix::signal(SignalKind::pipe()) {
        Ok(mut pipe_stream) => {
            tokio::spawn(async move {
                pipe_stream.recv().await;
                debug!("received SIGPIPE");
            });
        }
        Err(e) => {
            warn!("Could not set up SIGPIPE handler: {e}");
        }
    }
}
