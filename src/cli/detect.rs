use crate::Result;
use crate::project_type;
use crate::settings::Settings;
use crate::{launcher, ui};
use comfy_table::Cell;
use miette::ensure;
use std::path::PathBuf;

/// Show what tafil would run for a project
#[derive(Debug, clap::Args)]
#[clap(
    verbatim_doc_comment,
    long_about = "\
Show what tafil would run for a project

Reads package.json and reports the detected framework, its default port,
the start script that would be used and whether dependencies are installed.
Nothing is started.

Example:
  tafil detect ~/code/shop

Output:
  Framework     Vite
  Default port  5173
  Command       npm run dev
  Dependencies  installed"
)]
pub struct Detect {
    /// Project folder containing package.json
    path: PathBuf,
    /// Print as JSON
    #[clap(long)]
    json: bool,
}

impl Detect {
    pub async fn run(&self) -> Result<()> {
        let path = std::path::absolute(&self.path).unwrap_or_else(|_| self.path.clone());
        ensure!(path.is_dir(), "not a directory: {}", path.display());

        let info = project_type::detect(&path);
        let script = project_type::pick_start_script(&path);
        let installed = project_type::dependencies_installed(&path);
        let settings = Settings::get();
        let default_port = settings.default_port(info.framework);
        let npm = launcher::npm_command(&settings.launch);
        let command = script.as_ref().ok().map(|s| s.command(&npm));

        if self.json {
            let out = serde_json::json!({
                "path": path,
                "framework": info.framework,
                "display_name": info.display_name,
                "default_port": default_port,
                "command": command,
                "dependencies_installed": installed,
            });
            println!("{out}");
            return Ok(());
        }

        let mut table = ui::table::new_table(&[], true);
        table.add_row(vec![Cell::new("Framework"), Cell::new(info.display_name)]);
        table.add_row(vec![
            Cell::new("Default port"),
            Cell::new(default_port),
        ]);
        table.add_row(vec![
            Cell::new("Command"),
            Cell::new(match (&command, &script) {
                (Some(c), _) => c.clone(),
                (None, Err(e)) => console::style(e.to_string()).red().to_string(),
                (None, Ok(_)) => String::new(),
            }),
        ]);
        table.add_row(vec![
            Cell::new("Dependencies"),
            Cell::new(if installed {
                console::style("installed").green().to_string()
            } else {
                console::style("missing (run npm install)").yellow().to_string()
            }),
        ]);
        ui::table::print_table(table)
    }
}
