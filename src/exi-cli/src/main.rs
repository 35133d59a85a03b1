mod cli;
mod options_args;
mod xml_serializer;
mod xml_source;

use env_logger::Env;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let code = cli::run();
    std::process::exit(code as i32);
}
