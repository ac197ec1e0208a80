use std::fmt::Display;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::{bail, IntoDiagnostic, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use consolite::device::{Framebuffer, KeyState, SystemClock};
use consolite::{Batch, Features, RunConfig, RunEnvironment};

/// Wall-clock length of one host tick. Each tick runs one batch and sleeps out the rest.
const HOST_TICK: Duration = Duration::from_millis(16);

/// Consolite is an assembler and emulator for the Consolite 16-bit virtual console.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.asm` file to run
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run text `.asm` or binary `.bin` file directly
    Run {
        /// `.asm` or `.bin` file to run
        name: PathBuf,
        /// Stop after executing this many instructions
        #[arg(long, conflicts_with = "millis")]
        cycles: Option<u64>,
        /// Stop after running for this many milliseconds of wall-clock time
        #[arg(long)]
        millis: Option<u64>,
        /// Save the screen as a `.ppm` image once stopped
        #[arg(long)]
        screenshot: Option<PathBuf>,
        /// Input-ids held down for the whole run
        #[arg(long, value_delimiter = ',')]
        input: Vec<u16>,
        /// Comma-separated runtime features, e.g. `strict`
        #[arg(long)]
        features: Option<Features>,
        /// Seed for `RND`, for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
    },
    /// Create binary `.bin` file to run later
    Compile {
        /// `.asm` file to compile
        name: PathBuf,
        /// Destination to output `.bin` file
        dest: Option<PathBuf>,
    },
    /// Check `.asm` files without running or outputting binary
    Check {
        /// Files or glob patterns to check
        #[arg(required = true)]
        patterns: Vec<String>,
    },
}

#[derive(Default)]
struct RunOptions {
    cycles: Option<u64>,
    millis: Option<u64>,
    screenshot: Option<PathBuf>,
    input: Vec<u16>,
    features: Features,
    seed: Option<u64>,
    minimal: bool,
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("CONSOLITE_LOG").unwrap_or_else(|_| "warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    consolite::env::init();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(consolite::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    let Some(command) = args.command else {
        if let Some(path) = args.path {
            return run(&path, RunOptions::default());
        }
        println!("\n~ consolite v{VERSION} - Copyright (c) 2024 Artemis Rosman ~");
        println!("{}", LOGO.truecolor(255, 183, 197).bold());
        println!("{SHORT_INFO}");
        std::process::exit(0);
    };

    match command {
        Command::Run {
            name,
            cycles,
            millis,
            screenshot,
            input,
            features,
            seed,
            minimal,
        } => run(
            &name,
            RunOptions {
                cycles,
                millis,
                screenshot,
                input,
                features: features.unwrap_or_default(),
                seed,
                minimal,
            },
        ),
        Command::Compile { name, dest } => {
            file_message(Green, "Assembling", &name);
            let image = assemble_file(&name)?;

            let out_file_name = dest.unwrap_or_else(|| name.with_extension("bin"));
            fs::write(&out_file_name, &image).into_diagnostic()?;

            message(Green, "Finished", format!("emit binary ({} bytes)", image.len()));
            file_message(Green, "Saved", &out_file_name);
            Ok(())
        }
        Command::Check { patterns } => check(&patterns),
    }
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    message(color, left, format!("target {}", right.display()));
}

fn message(color: MsgColor, left: &str, right: impl Display) {
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

fn run(name: &Path, opts: RunOptions) -> Result<()> {
    let image = match name.extension().and_then(|ext| ext.to_str()) {
        Some("bin") => {
            if !opts.minimal {
                file_message(MsgColor::Green, "Loading", name);
            }
            fs::read(name).into_diagnostic()?
        }
        Some("asm") => {
            if !opts.minimal {
                file_message(MsgColor::Green, "Assembling", name);
            }
            assemble_file(name)?
        }
        Some(_) => bail!("File has unknown extension. Exiting..."),
        None => bail!("File has no extension. Exiting..."),
    };

    let mut config = RunConfig {
        features: opts.features,
        ..RunConfig::default()
    };
    if let Some(budget) = consolite::env::batch_budget() {
        config.batch_budget = budget;
    }
    if let Some(interval) = consolite::env::check_interval() {
        config.check_interval = interval;
    }

    let mut env = RunEnvironment::new(&image, Framebuffer::new(), KeyState::new(), SystemClock::new())?
        .with_config(config);
    if let Some(seed) = opts.seed {
        env = env.with_seed(seed);
    }
    for id in &opts.input {
        env.keypad_mut().set(*id, true);
    }

    if !opts.minimal {
        message(MsgColor::Green, "Running", "emitted binary");
        if opts.cycles.is_none() && opts.millis.is_none() {
            message(MsgColor::Cyan, "Help", "press CTRL+C to exit");
        }
    }

    match opts.cycles {
        Some(cycles) => env.run_cycles(cycles)?,
        None => drive(&mut env, opts.millis.map(Duration::from_millis))?,
    }

    if let Some(path) = &opts.screenshot {
        let file = File::create(path).into_diagnostic()?;
        env.screen().write_ppm(BufWriter::new(file)).into_diagnostic()?;
        if !opts.minimal {
            file_message(MsgColor::Green, "Saved", path);
        }
    }

    if !opts.minimal {
        file_message(MsgColor::Green, "Completed", name);
    }
    print_state(&env);
    Ok(())
}

/// Run one batch per host tick until `limit` has passed, or forever without one.
fn drive(env: &mut RunEnvironment, limit: Option<Duration>) -> Result<()> {
    let halt = env.halt_handle();
    let start = Instant::now();
    loop {
        let tick_start = Instant::now();
        if limit.is_some_and(|limit| start.elapsed() >= limit) {
            halt.halt();
        }
        match env.run_batch()? {
            Batch::Halted => return Ok(()),
            Batch::Yielded { .. } => {}
        }
        if let Some(rest) = HOST_TICK.checked_sub(tick_start.elapsed()) {
            sleep(rest);
        }
    }
}

fn print_state(env: &RunEnvironment) {
    let state = env.state();
    for (row, regs) in state.registers().chunks(4).enumerate() {
        let line: Vec<_> = regs
            .iter()
            .enumerate()
            .map(|(i, val)| format!("{:<4}0x{val:04x}", format!("R{}", row * 4 + i)))
            .collect();
        println!("{}", line.join("  "));
    }
    let flags = state.flags();
    println!(
        "IP  0x{:04x}  O={} C={} Z={} S={}  cycles={}",
        state.ip(),
        flags.overflow as u8,
        flags.carry as u8,
        flags.zero as u8,
        flags.sign as u8,
        state.cycles(),
    );
}

fn check(patterns: &[String]) -> Result<()> {
    let mut checked = 0;
    let mut failed = 0;
    for pattern in patterns {
        let paths = glob::glob(pattern).into_diagnostic()?;
        let mut matched = false;
        for path in paths {
            let path = path.into_diagnostic()?;
            matched = true;
            checked += 1;
            file_message(MsgColor::Green, "Checking", &path);
            if let Err(report) = assemble_file(&path) {
                failed += 1;
                eprintln!("{:?}", report);
            }
        }
        if !matched {
            bail!("No files match '{pattern}'. Exiting...");
        }
    }

    if failed > 0 {
        bail!("{failed} of {checked} file(s) failed to assemble");
    }
    message(MsgColor::Green, "Success", "no errors found!");
    Ok(())
}

/// Read and assemble a source file into a binary image
fn assemble_file(name: &Path) -> Result<Vec<u8>> {
    let contents = fs::read_to_string(name).into_diagnostic()?;
    Ok(consolite::assemble(&contents)?)
}

const LOGO: &str = r#"
                                ___ _ _
  ___ ___  _ __  ___  ___  ___ | (_) |_ ___
 / __/ _ \| '_ \/ __|/ _ \/ _ \| | | __/ _ \
| (_| (_) | | | \__ \ (_) | (_) | | | ||  __/
 \___\___/|_| |_|___/\___/\___/|_|_|\__\___|"#;

const SHORT_INFO: &str = r"
Welcome to consolite, an assembler and emulator for the Consolite
16-bit virtual console.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
