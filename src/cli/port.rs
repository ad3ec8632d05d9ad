use crate::Result;
use crate::external_procs;
use crate::port_probe;
use crate::settings::Settings;

/// Show what is listening on a port
#[derive(Debug, clap::Args)]
#[clap(
    verbatim_doc_comment,
    long_about = "\
Show what is listening on a port

Examples:
  tafil port 3000

Output:
  Port 3000 is in use by node server.js (pid 41234)
  Directory: /home/me/code/api"
)]
pub struct Port {
    /// TCP port to look up
    port: u16,
}

impl Port {
    pub async fn run(&self) -> Result<()> {
        let settings = Settings::get();
        if port_probe::is_port_free(self.port, settings.port_settle()).await {
            println!("Port {} is free", self.port);
            return Ok(());
        }
        match external_procs::describe_occupant(self.port, settings).await {
            Some(o) => {
                println!(
                    "Port {} is in use by {} (pid {})",
                    self.port, o.command, o.pid
                );
                if let Some(cwd) = o.working_directory {
                    println!("Directory: {}", cwd.display());
                }
            }
            None => println!(
                "Port {} is in use, but its owner could not be determined",
                self.port
            ),
        }
        Ok(())
    }
}
