use crate::Result;
use crate::port_probe;
use crate::settings::Settings;
use miette::bail;

/// Print the first free port at or above a starting port
#[derive(Debug, clap::Args)]
#[clap(
    verbatim_doc_comment,
    long_about = "\
Print the first free port at or above a starting port

Ports are tried in ascending order, so the same machine state always
gives the same answer.

Examples:
  tafil free-port 3000
  tafil free-port 5173 --attempts 10"
)]
pub struct FreePort {
    /// First port to try
    pub start: u16,
    /// How many consecutive ports to try [default: ports.fallback_attempts]
    #[clap(long)]
    pub attempts: Option<u16>,
}

impl FreePort {
    pub async fn run(&self) -> Result<()> {
        let settings = Settings::get();
        let attempts = self.attempts.unwrap_or(settings.ports.fallback_attempts);
        match port_probe::find_free_port(self.start, attempts, settings.port_settle()).await {
            Some(port) => {
                println!("{port}");
                Ok(())
            }
            None => bail!(
                "no free port in {} attempts starting at {}",
                attempts,
                self.start
            ),
        }
    }
}
