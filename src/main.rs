use clap::Parser;
use reelflow::cli::{execute, Cli};
use reelflow::{logging, App, AppConfig, AppError};

async fn run(cli: Cli) -> Result<(), AppError> {
    let mut config = AppConfig::from_env()?;
    cli.apply(&mut config);
    logging::init(&config.log_filter);
    let app = App::open(config)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    execute(&app, cli.cmd, &mut out).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}
