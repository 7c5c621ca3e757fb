use clap::Parser;
use gothon::{Outcome, Session, SessionEvent};

/// Run N workers of a Python program with shared typed variables.
#[derive(Parser, Debug)]
#[command(
    name = "gothon",
    about = "Run N workers of a Python program with shared typed variables"
)]
struct Args {
    /// Analyze the current directory and print the package as JSON instead
    /// of running
    #[arg(long)]
    analyze: bool,

    /// Number of worker processes
    node_count: Option<usize>,

    /// Module name (and arguments) handed to the Python interpreter
    #[arg(trailing_var_arg = true)]
    module: Vec<String>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if args.analyze {
        match gothon::analyzer::parse(".") {
            Ok(pkg) => {
                let json = serde_json::to_string_pretty(&pkg)
                    .expect("analyzed package is always serializable");
                println!("{json}");
            }
            Err(e) => {
                log::error!("analysis failed: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let Some(node_count) = args.node_count else {
        eprintln!("usage: gothon <node-count> <module> [args...]");
        std::process::exit(1);
    };
    let node_args = args.module.join(" ");

    let session = match Session::start(".", node_count, &node_args) {
        Ok(session) => session,
        Err(e) => {
            log::error!("startup failed: {e}");
            std::process::exit(1);
        }
    };

    let interrupt_tx = session.event_sender();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(SessionEvent::Interrupt);
    }) {
        log::warn!("could not install interrupt handler: {e}");
    }

    let outcome = session.wait();
    session.shutdown();

    match outcome {
        Outcome::Completed => {}
        Outcome::Interrupted => {
            log::warn!("interrupt received, session torn down");
            std::process::exit(130);
        }
    }
}
