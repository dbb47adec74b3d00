fn main() {
    use clap::Parser;
    use std::error::Error;
    let args = mangacrawl::cli::Args::parse();
    if let Err(e) = mangacrawl::logging::init(args.verbose, args.log_file.as_deref()) {
        eprintln!("Warning: logging disabled: {:#}", e);
    }
    if let Err(e) = mangacrawl::cli::run(&args) {
        eprintln!("{}", e);
        if args.verbose > 0 {
            let mut source = e.source();
            while let Some(s) = source {
                eprintln!("  cause: {}", s);
                source = s.source();
            }
        }
        std::process::exit(e.exit_code());
    }
}
