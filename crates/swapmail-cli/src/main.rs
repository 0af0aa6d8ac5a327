#![forbid(unsafe_code)]

fn main() {
    std::process::exit(swapmail_cli::run());
}
