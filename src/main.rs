use anyhow::Result;

use pcsc_uid_launcher::cli::commands::run_cli;

fn main() -> Result<()> {
    // Without a subcommand the CLI starts watching readers
    run_cli()
}
