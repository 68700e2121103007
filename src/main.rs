use colored::Colorize;

fn main() {
    if let Err(e) = sortpipe::run() {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
}
