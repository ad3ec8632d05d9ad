use crate::Result;
use crate::external_procs;
use crate::settings::Settings;
use crate::ui::table::{new_table, print_table};
use comfy_table::Cell;

/// List dev servers started outside tafil
#[derive(Debug, clap::Args)]
#[clap(
    visible_alias = "ls",
    verbatim_doc_comment,
    long_about = "\
List dev servers started outside tafil

Scans the usual dev-server port band for node, bun and deno processes
listening on TCP and prints their port, PID, command and working directory.

Example:
  tafil ports

Output:
  Port  PID    Command                  Directory
  3000  41234  node server.js           /home/me/code/api
  5173  41301  node node_modules/.bin/vite  /home/me/code/shop"
)]
pub struct Ports {
    /// Hide the table header row
    #[clap(long)]
    hide_header: bool,
}

impl Ports {
    pub async fn run(&self) -> Result<()> {
        let occupants = external_procs::list_external_listeners(&[], Settings::get()).await;
        if occupants.is_empty() {
            info!("no external dev servers found");
            return Ok(());
        }
        let mut table = new_table(&["Port", "PID", "Command", "Directory"], self.hide_header);
        for o in occupants {
            table.add_row(vec![
                Cell::new(o.port),
                Cell::new(o.pid),
                Cell::new(&o.command),
                Cell::new(
                    o.working_directory
                        .as_ref()
                        .map(|d| d.display().to_string())
                        .unwrap_or_default(),
                ),
            ]);
        }
        print_table(table)
    }
}
