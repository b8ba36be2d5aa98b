mod plan;

use clap::{ArgMatches, CommandFactory, FromArgMatches};

use crate::args::LoadfleetArgs;
use crate::error::AppResult;
use plan::{build_plan, execute_plan};

pub(crate) fn run() -> AppResult<()> {
    let args = parse_args()?;

    crate::system::logger::init_logging(args.verbose, args.no_color);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_async(args))
}

fn parse_args() -> AppResult<LoadfleetArgs> {
    let matches: ArgMatches = LoadfleetArgs::command().get_matches();
    Ok(LoadfleetArgs::from_arg_matches(&matches)?)
}

async fn run_async(args: LoadfleetArgs) -> AppResult<()> {
    let plan = build_plan(args)?;
    execute_plan(plan).await
}
