//! The `files` plugin.
fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    std::process::exit(holo::files::main(&args));
}
