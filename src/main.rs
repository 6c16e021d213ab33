use bill_harmonizer::report::EXIT_FATAL;

fn main() {
    match bill_harmonizer::run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(EXIT_FATAL);
        }
    }
}
