mod cli;
mod commands;
mod discord;
mod env_loader;
mod error;
mod logging;
mod remote;
mod stats;

fn main() {
    env_loader::load_dotenv();
    if let Err(err) = logging::init() {
        eprintln!("warning: {err:#}");
    }

    if let Err(err) = cli::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
