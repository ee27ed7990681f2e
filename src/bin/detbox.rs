use clap::{crate_version, values_t, App, AppSettings, Arg, ArgMatches, SubCommand};
use log::error;

use detbox::{trace_command, TraceOptions};

// Fatal tracer errors must be distinguishable from any tracee status
// (0..=255 including 128+signal), so they use EX_SOFTWARE.
const EXIT_TRACER_FAILURE: i32 = 70;

fn setup_logging(matches: &ArgMatches) {
    if matches.is_present("verbose") {
        env_logger::Builder::new().parse_filters("debug").init();
        return;
    }

    let loglevel = matches.value_of("loglevel");
    if let Some(level) = loglevel {
        env_logger::Builder::new().parse_filters(level).init();
        return;
    }

    // default
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn run(args: &ArgMatches) -> ! {
    let command = clap::values_t!(args, "command", String).unwrap_or_else(|e| e.exit());
    let opts = TraceOptions { command };
    match trace_command(&opts) {
        Ok(outcome) => {
            if args.is_present("stats") {
                let c = outcome.counters;
                eprintln!("read retries:        {}", c.read_retries);
                eprintln!("write retries:       {}", c.write_retries);
                eprintln!("getrandom calls:     {}", c.getrandom_calls);
                eprintln!("/dev/urandom opens:  {}", c.dev_urandom_opens);
                eprintln!("/dev/random opens:   {}", c.dev_random_opens);
                eprintln!("time calls:          {}", c.time_calls);
                eprintln!("blocking replays:    {}", c.replays_due_to_blocking);
                eprintln!("total replays:       {}", c.total_replays);
                eprintln!("injected syscalls:   {}", c.injected_syscalls);
            }
            std::process::exit(outcome.exit_status);
        }
        Err(err) => {
            error!("{}", err);
            std::process::exit(EXIT_TRACER_FAILURE);
        }
    }
}

fn main() {
    let run_command = SubCommand::with_name("run")
        .about("Run a command with deterministic syscall results.")
        .version(crate_version!())
        .setting(AppSettings::TrailingVarArg)
        .arg(
            Arg::with_name("stats")
                .long("stats")
                .help("Print event counters after the run"),
        )
        .arg(
            Arg::with_name("command")
                .help("Command to trace")
                .multiple(true)
                .allow_hyphen_values(true)
                .required(true),
        );

    let main_app = App::new("detbox")
        .about("Deterministic execution sandbox")
        .version(crate_version!())
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .global(true)
                .help("Shorthand for --loglevel debug"),
        )
        .arg(
            Arg::with_name("loglevel")
                .short("l")
                .long("loglevel")
                .takes_value(true)
                .global(true)
                .help("Log filter, e.g. info or detbox=trace"),
        )
        .subcommand(run_command);

    let matches = main_app.get_matches();
    setup_logging(&matches);

    match matches.subcommand() {
        ("run", Some(args)) => run(args),
        (command, _) => {
            error!("unknown subcommand {}", command);
            std::process::exit(EXIT_TRACER_FAILURE);
        }
    }
}
