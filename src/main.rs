use anyhow::{bail, Context, Result};
use ariadne::{Label, Report, ReportKind, Source};
use clap::Parser;
use log::{error, info, warn};
use std::fs;
use std::io::Write;
use std::time::Duration;
use turret::channel::{ChannelKind, ChannelState, LineQueue};
use turret::gcodes::{Clock, GCodes, SystemClock};
use turret::machine::{MachineConfig, MachineType};
use turret::params::{CodeLine, ParamError};
use turret::reply::{GCodeResult, Reply};
use turret::sink::{EmissionSink, MoveQueue, ProgramWriter};

/// Expand a G-code program into the primitive moves a motion executor runs
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// G-code program to interpret
    program: String,

    /// Machine config as JSON
    #[arg(short, long)]
    config: Option<String>,

    /// Machine type when no config is given, e.g. lathe or milling
    #[arg(short, long)]
    machine: Option<String>,

    /// Write the expanded program here instead of stdout
    #[arg(short, long)]
    output: Option<String>,

    /// Move queue capacity, overriding the machine config
    #[arg(short, long)]
    queue: Option<usize>,

    /// Only check the program for syntax errors
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = load_config(&args)?;
    let source = fs::read_to_string(&args.program)
        .with_context(|| format!("cannot read {}", args.program))?;

    let errors = syntax_errors(&source);
    for (offset, e) in &errors {
        report(&args.program, &source, *offset, e)?;
    }
    if !errors.is_empty() {
        bail!("{} line(s) failed to parse", errors.len());
    }
    if args.check {
        return Ok(());
    }

    let writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            fs::File::create(path).with_context(|| format!("cannot create {}", path))?,
        ),
        None => Box::new(std::io::stdout()),
    };

    let outcome = interpret(&source, config, ProgramWriter::new(writer), SystemClock::new())?;
    for reply in &outcome.replies {
        match reply.result {
            GCodeResult::Error => error!("{}: {}", reply.line, reply.text),
            GCodeResult::Warning => warn!("{}: {}", reply.line, reply.text),
            GCodeResult::Ok => {}
        }
    }
    if let Some(reason) = outcome.aborted {
        bail!("program aborted: {}", reason);
    }
    if outcome.failed_lines > 0 {
        bail!("{} line(s) failed", outcome.failed_lines);
    }
    if let Some(path) = &args.output {
        info!("wrote {}", path);
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<MachineConfig> {
    let mut config = match &args.config {
        Some(path) => MachineConfig::from_file(path)?,
        None => MachineConfig::default(),
    };
    if let Some(name) = &args.machine {
        let machine_type = match MachineType::parse(name) {
            Some(t) => t,
            None => bail!("unknown machine type '{}'", name),
        };
        if args.config.is_none() && machine_type.is_lathe() {
            config = MachineConfig::new(machine_type, "XZC").with_diameter_mode(true);
        }
        config.machine_type = machine_type;
    }
    if let Some(capacity) = args.queue {
        config.move_queue_capacity = capacity;
    }
    Ok(config)
}

/// Every line that does not parse, with the byte offset of its first column
fn syntax_errors(source: &str) -> Vec<(usize, ParamError)> {
    let mut errors = Vec::new();
    let mut offset = 0;
    for line in source.split('\n') {
        if let Err(e) = CodeLine::parse(line) {
            errors.push((offset, e));
        }
        offset += line.len() + 1;
    }
    errors
}

/// Character range of the error within the whole source, which is what ariadne labels count
fn label_span(source: &str, line_offset: usize, e: &ParamError) -> std::ops::Range<usize> {
    let span = e.span().unwrap_or(0..1);
    let chars = |byte: usize| {
        let byte = (line_offset + byte).min(source.len());
        source.get(..byte).map_or(byte, |prefix| prefix.chars().count())
    };
    chars(span.start)..chars(span.end)
}

fn report(path: &str, source: &str, line_offset: usize, e: &ParamError) -> Result<()> {
    let span = label_span(source, line_offset, e);
    Report::build(ReportKind::Error, path, span.start)
        .with_message(e.to_string())
        .with_label(Label::new((path, span)).with_message("here"))
        .finish()
        .eprint((path, Source::from(source)))?;
    Ok(())
}

#[derive(Debug)]
struct Outcome {
    replies: Vec<Reply>,
    failed_lines: usize,
    aborted: Option<String>,
}

/// Run the whole program on one file channel until it runs dry or aborts
///
/// Primitives go through a bounded move queue; this loop plays the motion executor and
/// writes whatever the queue holds after every pass.
fn interpret<W: Write, C: Clock>(
    source: &str,
    config: MachineConfig,
    mut writer: ProgramWriter<W>,
    clock: C,
) -> Result<Outcome> {
    let queue = MoveQueue::new(config.move_queue_capacity);
    let mut gcodes = GCodes::new(config, queue, clock);
    let id = gcodes.add_channel(ChannelKind::File, Box::new(LineQueue::from_text(source)));

    loop {
        let mut busy = gcodes.spin();
        for command in gcodes.sink_mut().drain() {
            writer.emit(command)?;
            busy = true;
        }
        for message in gcodes.take_panel_messages() {
            info!("panel: {}", message);
        }
        let channel = match gcodes.channel(id) {
            Some(channel) => channel,
            None => bail!("file channel went away"),
        };
        if channel.state.is_aborted() || (channel.state.is_idle() && !channel.has_input()) {
            break;
        }
        if !busy {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    let aborted = match gcodes.channel(id).map(|c| &c.state) {
        Some(ChannelState::Aborted { reason }) => Some(reason.clone()),
        _ => None,
    };
    let replies = gcodes.take_replies();
    let failed_lines = replies.iter().filter(|r| r.is_error()).count();
    writer.flush()?;
    Ok(Outcome {
        replies,
        failed_lines,
        aborted,
    })
}
