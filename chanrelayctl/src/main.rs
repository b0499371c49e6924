use clap::Parser;

fn main() {
    let cli = chanrelayctl::Cli::parse();
    chanrelayctl::init_tracing();
    if let Err(err) = chanrelayctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
