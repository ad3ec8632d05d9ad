use crate::Result;
use clap::Parser;

mod detect;
mod free_port;
mod port;
mod ports;
mod run;

#[derive(Debug, clap::Parser)]
#[clap(name = "tafil", version, about = env!("CARGO_PKG_DESCRIPTION"))]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    Detect(detect::Detect),
    FreePort(free_port::FreePort),
    Port(port::Port),
    Ports(ports::Ports),
    Run(run::Run),
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();
    match args.command {
        Command::Detect(detect) => detect.run().await,
        Command::FreePort(free_port) => free_port.run().await,
        Command::Port(port) => port.run().await,
        Command::Ports(ports) => ports.run().await,
        Command::Run(run) => run.run().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_port() {
        let cli = Cli::try_parse_from(["tafil", "run", "/work/app", "--port", "4000"]).unwrap();
        match cli.command {
            Command::Run(run) => {
                assert_eq!(run.port, Some(4000));
                assert!(!run.force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_run_force() {
        let cli = Cli::try_parse_from(["tafil", "run", "/work/app", "-f"]).unwrap();
        match cli.command {
            Command::Run(run) => {
                assert!(run.force);
                assert_eq!(run.port, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_free_port_defaults() {
        let cli = Cli::try_parse_from(["tafil", "free-port", "3000"]).unwrap();
        match cli.command {
            Command::FreePort(fp) => {
                assert_eq!(fp.start, 3000);
                assert_eq!(fp.attempts, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
