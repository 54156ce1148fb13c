// Commandline argument parser using clap for biolink

use crate::error::{Error, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Command line of the biolink binary.
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct LinkArgs {
    /// Which task to perform
    #[command(subcommand, long_about)]
    pub command: CommandTask,
}

/// Subcommands of the biolink binary.
#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Acquire from a device and log per-group levels
    #[command(about)]
    Run(RunCommand),

    /// Print the command frames a configuration would send
    #[command(about)]
    Frames(FramesCommand),

    /// Print a starting configuration for a device family
    #[command(about)]
    Template(TemplateCommand),
}

/// Arguments of `biolink run`.
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct RunCommand {
    /// RON configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Overrides the address in the configuration
    #[arg(short, long)]
    pub address: Option<String>,

    /// Stop after this many seconds; run until the link drops otherwise
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Talk to a built-in simulator instead of real hardware
    #[arg(short, long)]
    pub simulate: bool,

    /// How often to log the group summaries, in milliseconds
    #[arg(short, long, default_value_t = 1000)]
    pub interval: u64,
}

impl RunCommand {
    /// How long to run, or `None` to run until the link drops. Rejects
    /// negative and non-finite durations.
    pub fn deadline(&self) -> Result<Option<Duration>> {
        self.duration
            .map(|secs| {
                Duration::try_from_secs_f64(secs)
                    .map_err(|e| Error::Config(format!("duration {}: {}", secs, e)))
            })
            .transpose()
    }
}

/// Arguments of `biolink frames`.
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct FramesCommand {
    /// RON configuration file
    #[arg(short, long)]
    pub config: PathBuf,
}

/// The families a template can be written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[allow(missing_docs)]
pub enum Family {
    Quattrocento,
    Novecento,
    SyncStation,
    Sessantaquattro,
    Probe,
}

/// Arguments of `biolink template`.
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct TemplateCommand {
    /// Device family
    #[arg(value_enum)]
    pub family: Family,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_arguments() {
        let args = LinkArgs::parse_from([
            "biolink", "run", "--config", "due.ron", "--simulate", "-d", "2.5",
        ]);
        let CommandTask::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.config, PathBuf::from("due.ron"));
        assert!(run.simulate);
        assert_eq!(run.duration, Some(2.5));
        assert_eq!(run.interval, 1000);
        assert_eq!(run.address, None);
    }

    #[test]
    fn template_family() {
        let args = LinkArgs::parse_from(["biolink", "template", "sync-station"]);
        assert!(matches!(
            args.command,
            CommandTask::Template(TemplateCommand {
                family: Family::SyncStation
            })
        ));
    }

    #[test]
    fn config_is_required() {
        assert!(LinkArgs::try_parse_from(["biolink", "frames"]).is_err());
    }

    #[test]
    fn bad_durations_are_config_errors() {
        let run = |d: &str| {
            let duration = format!("--duration={}", d);
            let args = LinkArgs::parse_from(["biolink", "run", "-c", "x.ron", duration.as_str()]);
            let CommandTask::Run(run) = args.command else {
                panic!("expected run");
            };
            run.deadline()
        };
        assert_eq!(run("1.5").unwrap(), Some(Duration::from_millis(1500)));
        assert!(matches!(run("-2"), Err(Error::Config(_))));
        assert!(matches!(run("NaN"), Err(Error::Config(_))));
    }
}
