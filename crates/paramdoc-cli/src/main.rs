use std::process::ExitCode;

fn main() -> ExitCode {
    paramdoc_cli::run()
}
