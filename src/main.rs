mod bridge;
mod chain;
mod cli;
mod confirmer;
mod config;
mod ledger;
mod rotator;
mod store;
mod wallet;

use clap::Parser;

use cli::{Cli, Command, PairAction};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evm_bridge_relay=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let result = dispatch(cli).await;
    if let Err(e) = result {
        eprintln!("[bridgecli] error: {e}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<(), cli::CliError> {
    let home = cli::resolve_home(cli.home)?;

    match cli.command {
        Command::Init => cli::init_cmd::run(&home),
        Command::Pair { action } => match action {
            PairAction::Set {
                in_addr,
                out_addr,
                in_type_wrapped,
            } => cli::pair_cmd::set(&home, &in_addr, &out_addr, in_type_wrapped),
            PairAction::Get { in_addr } => cli::pair_cmd::get(&home, &in_addr),
        },
        Command::Serve => cli::serve_cmd::run(&home).await,
    }
}
