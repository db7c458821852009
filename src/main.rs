// src/main.rs

use procworker::cli::{self, Command};
use procworker::{host, logging, run, workers};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("procworker error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<i32> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;

    match args.command {
        Command::Run(run_args) => {
            let all_ok = run(run_args, args.log_level).await?;
            Ok(if all_ok { 0 } else { 1 })
        }
        Command::Host => Ok(host::serve(&workers::builtin_registry()).await?),
    }
}
