use std::env;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use log::info;

use crystal_assets::app::print_compile_report;
use crystal_assets::assets::WatchThread;
use crystal_assets::{Application, Settings};

const USAGE: &str =
    "Usage: crystal-assets <project-dir> [--declare <file>]... [--compile-all] [--cook-physics] [--watch]";

/// Interval of the pump loop in watch mode.
const TICK_INTERVAL: Duration = Duration::from_millis(16);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse()?;
    let mut settings = Settings::load(&options.project)
        .with_context(|| format!("failed to open project {}", options.project.display()))?;
    if options.cook_physics {
        settings.cook_physics = true;
    }
    let mut app = Application::with_settings(options.project.clone(), settings.clone());
    app.load_managers()?;

    for file in &options.declare {
        app.declare_asset(file)
            .with_context(|| format!("failed to declare {}", file.display()))?;
    }

    if options.compile_all {
        let report = app.compile_all();
        print_compile_report(&app.model().read(), &report);
    }
    app.save_managers()?;
    print!("{}", app.summary());

    if options.watch {
        run_watch(app, options.project, settings)
    } else {
        Ok(())
    }
}

/// Pump loop: a watcher thread queues changed sources, this thread compiles
/// them. Runs until the process is interrupted.
fn run_watch(mut app: Application, project: PathBuf, settings: Settings) -> Result<()> {
    let _watch = WatchThread::spawn(
        app.model().clone(),
        app.pipeline().queue(),
        project,
        settings,
        POLL_INTERVAL,
    );
    info!("Watching for source changes, press Ctrl+C to stop");
    loop {
        if let Some(report) = app.tick(Instant::now())? {
            print_compile_report(&app.model().read(), &report);
        }
        thread::sleep(TICK_INTERVAL);
    }
}

struct CliOptions {
    project: PathBuf,
    declare: Vec<PathBuf>,
    compile_all: bool,
    cook_physics: bool,
    watch: bool,
}

impl CliOptions {
    fn parse() -> Result<Self> {
        let mut args = env::args().skip(1);
        let Some(project) = args.next() else {
            return Err(anyhow!(USAGE));
        };
        let mut declare = Vec::new();
        let mut compile_all = false;
        let mut cook_physics = false;
        let mut watch = false;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--declare" => {
                    let file = args
                        .next()
                        .ok_or_else(|| anyhow!("--declare expects a file path"))?;
                    declare.push(PathBuf::from(file));
                }
                "--compile-all" => compile_all = true,
                "--cook-physics" => cook_physics = true,
                "--watch" => watch = true,
                other => {
                    return Err(anyhow!(
                        "Unknown argument: {other}. Expected --declare, --compile-all, --cook-physics or --watch"
                    ));
                }
            }
        }
        Ok(Self {
            project: PathBuf::from(project),
            declare,
            compile_all,
            cook_physics,
            watch,
        })
    }
}
