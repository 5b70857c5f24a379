//! The `ssh-keys` plugin.
fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    std::process::exit(holo::sshkeys::main(&args));
}
