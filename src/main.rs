use backtrace::Backtrace;
use clap::{Arg, ArgMatches, Command};
use core::sync::atomic::{AtomicBool, Ordering};
use objperf::config::Config;
use objperf::pool::ObjectManager;
use objperf::workload::{launch_workload, Generator};
use objperf::{output, pacer, tool};
use ringlog::*;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Builder;
use tokio::time::sleep;

fn main() {
    // custom panic hook to terminate whole process after unwinding
    std::panic::set_hook(Box::new(|s| {
        eprintln!("{s}");
        eprintln!("{:?}", Backtrace::new());
        std::process::exit(101);
    }));

    // parse command line options
    let matches = Command::new(env!("CARGO_BIN_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_about(
            "A load generator for object-storage services which tracks the \
            objects it creates across runs.",
        )
        .arg(
            Arg::new("CONFIG")
                .help("Workload configuration file")
                .action(clap::ArgAction::Set)
                .index(1),
        )
        .subcommand(
            Command::new("objfile")
                .about("Inspect and convert object files")
                .subcommand_required(true)
                .subcommand(
                    Command::new("info")
                        .about("Show the format and record count of an object file")
                        .arg(Arg::new("FILE").required(true).index(1)),
                )
                .subcommand(
                    Command::new("to-text")
                        .about("Print an object file as text")
                        .arg(Arg::new("FILE").required(true).index(1)),
                )
                .subcommand(
                    Command::new("from-text")
                        .about("Build an object file from text")
                        .arg(Arg::new("TEXT").required(true).index(1))
                        .arg(Arg::new("FILE").required(true).index(2)),
                )
                .subcommand(
                    Command::new("upgrade")
                        .about("Rewrite an object file in the current format")
                        .arg(Arg::new("FILE").required(true).index(1))
                        .arg(
                            Arg::new("VERSION_LEN")
                                .long("version-len")
                                .help("Width of the version token field")
                                .value_parser(clap::value_parser!(u8))
                                .default_value("0"),
                        ),
                ),
        )
        .get_matches();

    if let Some(matches) = matches.subcommand_matches("objfile") {
        objfile(matches);
        return;
    }

    // load config from file
    let config = if let Some(file) = matches.get_one::<String>("CONFIG") {
        match Config::load(file) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(2);
            }
        }
    } else {
        eprintln!("configuration file not provided");
        std::process::exit(2);
    };

    // configure debug log
    let debug_output: Box<dyn Output> = if let Some(file) = config.debug().log_file() {
        let backup = config
            .debug()
            .log_backup()
            .unwrap_or(format!("{}.old", file));
        Box::new(
            File::new(&file, &backup, config.debug().log_max_size())
                .expect("failed to open debug log file"),
        )
    } else {
        // by default, log to stderr
        Box::new(Stderr::new())
    };

    let level = config.debug().log_level();

    let debug_log = if level <= Level::Info {
        LogBuilder::new().format(ringlog::default_format)
    } else {
        LogBuilder::new()
    }
    .output(debug_output)
    .log_queue_depth(config.debug().log_queue_depth())
    .single_message_size(config.debug().log_single_message_size())
    .build()
    .expect("failed to initialize debug log");

    let mut log = MultiLogBuilder::new()
        .level_filter(level.to_level_filter())
        .default(debug_log)
        .build()
        .start();

    info!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    // initialize async runtime for control plane
    let control_runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .build()
        .expect("failed to initialize tokio runtime");

    // spawn logging thread, which outlives the test so shutdown is logged
    let logging = Arc::new(AtomicBool::new(true));
    {
        let logging = logging.clone();
        control_runtime.spawn(async move {
            while logging.load(Ordering::Relaxed) {
                sleep(Duration::from_millis(1)).await;
                let _ = log.flush();
            }
            let _ = log.flush();
        });
    }

    let running = Arc::new(AtomicBool::new(true));

    let pool = match ObjectManager::open(config.pool(), running.clone()) {
        Ok(pool) => pool,
        Err(e) => exit(&logging, 1, format!("failed to open object pool: {e}")),
    };

    let scheduler = match pacer::build(config.scheduler()) {
        Ok(scheduler) => scheduler,
        Err(e) => exit(&logging, 2, format!("invalid scheduler configuration: {e}")),
    };

    let generator = match Generator::new(&config, pool.clone(), scheduler) {
        Ok(generator) => generator,
        Err(e) => exit(&logging, 2, format!("invalid workload configuration: {e}")),
    };

    // begin periodic stats output
    control_runtime.spawn(output::log(
        config.general().interval(),
        pool.clone(),
        running.clone(),
    ));

    // end the test early on ctrl-c
    {
        let running = running.clone();
        control_runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, stopping workload");
                running.store(false, Ordering::Relaxed);
            }
        });
    }

    debug!("Launching workload");
    let workload_runtime = match launch_workload(generator, &config, running.clone()) {
        Ok(rt) => rt,
        Err(e) => exit(&logging, 1, format!("failed to launch workload: {e}")),
    };

    debug!("Waiting for test to complete");
    let deadline = Instant::now() + config.general().duration();
    while running.load(Ordering::Relaxed) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(100));
    }
    running.store(false, Ordering::Relaxed);

    // shutdown thread pools
    workload_runtime.shutdown_timeout(Duration::from_millis(100));

    let status = match pool.shutdown() {
        Ok(()) => 0,
        Err(e) => {
            error!("{e}");
            1
        }
    };

    // delay before exiting
    logging.store(false, Ordering::Relaxed);
    std::thread::sleep(Duration::from_millis(100));
    std::process::exit(status);
}

fn exit(logging: &AtomicBool, code: i32, message: String) -> ! {
    eprintln!("{message}");
    logging.store(false, Ordering::Relaxed);
    std::thread::sleep(Duration::from_millis(100));
    std::process::exit(code);
}

fn objfile(matches: &ArgMatches) {
    let file = |m: &ArgMatches, name: &str| -> String {
        m.get_one::<String>(name).cloned().unwrap_or_default()
    };

    let result = match matches.subcommand() {
        Some(("info", m)) => tool::info(Path::new(&file(m, "FILE"))).map(|info| println!("{info}")),
        Some(("to-text", m)) => {
            tool::to_text(Path::new(&file(m, "FILE")), std::io::stdout().lock()).map(|_| ())
        }
        Some(("from-text", m)) => std::fs::File::open(file(m, "TEXT"))
            .map_err(Into::into)
            .and_then(|text| {
                tool::from_text(std::io::BufReader::new(text), Path::new(&file(m, "FILE")))
            })
            .map(|count| println!("wrote {count} objects")),
        Some(("upgrade", m)) => {
            let version_len = m.get_one::<u8>("VERSION_LEN").copied().unwrap_or(0);
            tool::upgrade(Path::new(&file(m, "FILE")), version_len)
                .map(|(old, new)| println!("{} -> {}", old.version(), new.version()))
        }
        _ => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
