//! # mmplay
//!
//! Command line front end for the mmaudio media core: play and probe media
//! files, play single notes, and render content through the audio tunnel.

use log::error;

mod cli;
mod logging;
mod runner;

fn main() {
    let args = cli::args::build_cli().get_matches();
    let log_buffer = logging::init(args.get_flag("debug"), args.get_flag("quiet"));

    let code = match runner::run(&args, log_buffer) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err.to_string().to_lowercase());
            1
        }
    };

    std::process::exit(code)
}
