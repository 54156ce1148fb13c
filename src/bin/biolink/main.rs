//! Acquire from a data-logger and log what comes in.

use biolink::{
    args::{CommandTask, Family, FramesCommand, LinkArgs, RunCommand, TemplateCommand},
    component::run_component,
    config::{AcquisitionConfig, DeviceConfig, Role},
    demux::ChannelGroup,
    family::{
        NovecentoConfig, ProbeConfig, QuattrocentoConfig, SessantaquattroConfig, SlotConfig,
        SyncStationConfig,
    },
    handshake::ProbeSettings,
    session::Session,
    simulator::Simulator,
    stats::GroupStats,
    transport::Link,
    Result,
};
use clap::Parser;
use log::{error, info, warn};
use std::net::TcpListener;
use std::process::ExitCode;
use std::sync::mpsc::channel;
use std::thread::sleep;
use std::time::{Duration, Instant};

// Example:
// cargo run --bin biolink -- template sync-station > sync.ron
// cargo run --bin biolink -- run --config sync.ron --simulate --duration 5

/// What the simulator reports as plugged in: a Muovi on IN1 and a Muovi+ on
/// IN3.
const SIMULATED_PROBES: [u8; 10] = [3, 0, 5, 0, 0, 0, 0, 0, 0, 0];

fn main() -> ExitCode {
    env_logger::init();
    let args = LinkArgs::parse();

    let outcome = match args.command {
        CommandTask::Run(run_command) => run(run_command),
        CommandTask::Frames(frames_command) => frames(frames_command),
        CommandTask::Template(template_command) => template(template_command),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn template(cmd: TemplateCommand) -> Result<()> {
    let device = match cmd.family {
        Family::Quattrocento => DeviceConfig::Quattrocento(QuattrocentoConfig::default()),
        Family::Novecento => DeviceConfig::Novecento(NovecentoConfig::default()),
        Family::SyncStation => DeviceConfig::SyncStation(SyncStationConfig {
            slots: vec![SlotConfig::new(0), SlotConfig::new(6)],
        }),
        Family::Sessantaquattro => DeviceConfig::Sessantaquattro(SessantaquattroConfig::default()),
        Family::Probe => DeviceConfig::Probe(ProbeConfig::default()),
    };
    println!("{}", AcquisitionConfig::new(device).to_ron()?);
    Ok(())
}

fn frames(cmd: FramesCommand) -> Result<()> {
    let config = AcquisitionConfig::from_path(&cmd.config)?;
    let probes = ProbeSettings::new(SIMULATED_PROBES)?;
    let plan = config.plan(Some(&probes))?;
    for (i, frame) in plan.start.iter().enumerate() {
        println!("start {}: {}", i, frame);
    }
    println!("stop:    {}", plan.stop);
    println!("block:   {} bytes", plan.block_size());
    for group in plan.group_specs() {
        println!(
            "  {:<16} {:>4} channels @ {} Hz",
            group.name, group.channels, group.sample_rate_hz
        );
    }
    Ok(())
}

fn run(cmd: RunCommand) -> Result<()> {
    let mut config = AcquisitionConfig::from_path(&cmd.config)?;
    let deadline = cmd.deadline()?;
    if cmd.address.is_some() {
        config.address = cmd.address.clone();
    }

    // Keep the simulator alive for as long as the session.
    let (_simulator, link, plan) = if cmd.simulate {
        let (simulator, link, plan) = simulated(&config)?;
        (Some(simulator), link, plan)
    } else {
        let (link, plan) = config.open()?;
        (None, link, plan)
    };

    let (block_tx, block_rx) = channel::<Vec<ChannelGroup>>();
    let (stats_tx, stats_rx) = channel();
    let stats = run_component(Box::new(GroupStats::new()), block_rx, stats_tx);

    let session = Session::builder(link, plan)
        .window(config.window())
        .poll_interval(config.read_timeout())
        .on_block(move |groups| {
            // The stats thread only goes away after the session.
            let _ = block_tx.send(groups.to_vec());
        })
        .spawn()?;

    let started = Instant::now();
    let interval = Duration::from_millis(cmd.interval.max(1));
    while session.is_running() && deadline.map_or(true, |d| started.elapsed() < d) {
        sleep(interval);
        if let Some(summaries) = stats_rx.try_iter().last() {
            for summary in summaries {
                info!("{}", summary);
            }
        }
        let held = session
            .snapshot()
            .first()
            .map_or(0, |g| g.samples.samples_per_channel());
        info!("Window holds {} samples per channel", held);
    }

    let report = session.stop()?;
    if stats.join().is_err() {
        warn!("Statistics thread panicked");
    }
    info!(
        "{} blocks ({} bytes) in {:.1} s, {} dropped",
        report.blocks,
        report.bytes,
        started.elapsed().as_secs_f64(),
        report.dropped
    );
    Ok(())
}

/// Start a simulator that behaves like the configured device and connect to
/// it over loopback.
fn simulated(
    config: &AcquisitionConfig,
) -> Result<(Simulator, Link, biolink::plan::AcquisitionPlan)> {
    let probes = ProbeSettings::new(SIMULATED_PROBES)?;
    let plan = config.plan(Some(&probes))?;
    let timeout = Some(config.read_timeout());

    match config.device.role() {
        Role::Client => {
            let simulator = Simulator::builder(plan)
                .probes(probes)
                .listen("127.0.0.1:0")?;
            let mut local = config.clone();
            local.address = simulator.local_addr().map(|a| a.to_string());
            let (link, plan) = local.open()?;
            Ok((simulator, link, plan))
        }
        Role::Listener => {
            let listener = TcpListener::bind("127.0.0.1:0")?;
            let simulator = Simulator::builder(plan.clone()).connect(listener.local_addr()?)?;
            let link = Link::accept_on(&listener, timeout)?;
            Ok((simulator, link, plan))
        }
    }
}
