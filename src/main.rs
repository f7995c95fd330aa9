use std::process::exit;

use anyhow::Result;
use clap::Parser;

use as111_rs::alias::AliasBook;
use as111_rs::cli::{self, Args};
use as111_rs::logging;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse_from(cli::all_marker_as_target(std::env::args_os()));

    if args.words.is_empty() {
        eprintln!("{}", Args::long_help());
        anyhow::bail!("no target or command given");
    }

    let plan = cli::parse_plan(&args.words, args.all)?;
    logging::init_logging(args.verbose.max(plan.verbosity));

    let aliases = AliasBook::load_or_default(args.aliases.as_deref())?;
    cli::execute(&plan, &aliases)
}
