//! The interpreter: channels, locks, interlocks and the sink, driven by `spin`
//!
//! Scheduling is cooperative and single threaded. Every `spin` gives each channel one
//! step. A step never waits: a channel that cannot get a lock, cannot push into a full
//! sink or is waiting on the tool clamp simply tries again on the next pass.

use crate::channel::{Channel, ChannelKind, ChannelState, LineSource};
use crate::dispatch::{self, Outcome};
use crate::interlock::Interlock;
use crate::machine::MachineConfig;
use crate::params::CodeLine;
use crate::reply::{CommandError, GCodeResult, Reply};
use crate::resource::{ChannelId, LockManager};
use crate::sink::EmissionSink;
use log::{debug, error, info, warn};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic milliseconds used for interlock deadlines
pub trait Clock {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Clock moved by hand; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

pub struct GCodes<S: EmissionSink, C: Clock = SystemClock> {
    config: MachineConfig,
    sink: S,
    clock: C,
    channels: Vec<Channel>,
    locks: LockManager,
    interlock: Interlock,
    replies: Vec<Reply>,
    /// Bumped by every emergency stop; channels compare it with what they have seen
    stops: u64,
}

impl<S: EmissionSink, C: Clock> GCodes<S, C> {
    pub fn new(config: MachineConfig, sink: S, clock: C) -> Self {
        Self {
            config,
            sink,
            clock,
            channels: Vec::new(),
            locks: LockManager::new(),
            interlock: Interlock::new(),
            replies: Vec::new(),
            stops: 0,
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn add_channel(&mut self, kind: ChannelKind, source: Box<dyn LineSource>) -> ChannelId {
        let id = self.channels.len();
        let mut channel = Channel::new(id, kind, source, &self.config.axes, self.config.units);
        channel.seen_stops = self.stops;
        self.channels.push(channel);
        info!("{} channel added as #{}", kind, id);
        id
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn push_line(&mut self, id: ChannelId, line: impl Into<String>) {
        if let Some(channel) = self.channels.get_mut(id) {
            channel.push_line(line);
        }
    }

    /// One round-robin pass; true if any channel did work
    pub fn spin(&mut self) -> bool {
        let mut busy = false;
        for id in 0..self.channels.len() {
            busy |= self.process_one_step(id);
        }
        busy
    }

    /// Spin until nothing moves or `max_passes` is reached; returns the passes taken
    pub fn run_until_idle(&mut self, max_passes: usize) -> usize {
        let mut passes = 0;
        while passes < max_passes && self.spin() {
            passes += 1;
        }
        passes
    }

    /// Every channel stops on its next step
    pub fn emergency_stop(&mut self) {
        error!("emergency stop");
        self.stops += 1;
    }

    pub fn cancel(&mut self, id: ChannelId) {
        if let Some(channel) = self.channels.get_mut(id) {
            channel.cancel_requested = true;
        }
    }

    pub fn reset(&mut self, id: ChannelId) {
        if let Some(channel) = self.channels.get_mut(id) {
            self.locks.unlock_all(id);
            channel.reset();
            info!("{} channel reset", channel.kind);
        }
    }

    pub fn take_replies(&mut self) -> Vec<Reply> {
        std::mem::take(&mut self.replies)
    }

    pub fn take_panel_messages(&mut self) -> Vec<String> {
        self.interlock.take_messages()
    }

    pub fn set_interlock_locked(&mut self, locked: bool) {
        self.interlock.set_locked(locked);
    }

    pub fn interlock(&self) -> &Interlock {
        &self.interlock
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// At most one state transition for one channel
    pub fn process_one_step(&mut self, id: ChannelId) -> bool {
        let Self {
            config,
            sink,
            clock,
            channels,
            locks,
            interlock,
            replies,
            stops,
        } = self;
        let channel = match channels.get_mut(id) {
            Some(channel) => channel,
            None => return false,
        };

        if channel.seen_stops != *stops {
            channel.seen_stops = *stops;
            stop(channel, locks, "Emergency stop");
            return true;
        }
        if channel.cancel_requested {
            channel.cancel_requested = false;
            stop(channel, locks, "Cancelled");
            return true;
        }

        match std::mem::replace(&mut channel.state, ChannelState::Idle) {
            ChannelState::Idle => {
                if channel.has_input() {
                    channel.state = ChannelState::FetchLine;
                    true
                } else {
                    false
                }
            }
            ChannelState::FetchLine => {
                let text = match channel.next_line() {
                    Some(text) => text,
                    None => return true,
                };
                match CodeLine::parse(&text) {
                    Ok(line) if line.is_empty() => {}
                    Ok(line) => channel.state = ChannelState::Dispatch(line),
                    Err(e) => {
                        let e = CommandError::from(e);
                        warn!("{}: {}", text.trim(), e);
                        replies.push(reply(id, &text, GCodeResult::Error, e.to_string()));
                    }
                }
                true
            }
            ChannelState::Dispatch(line) => dispatch_line(
                channel, line, false, config, sink, clock, locks, interlock, replies,
            ),
            ChannelState::AwaitResource(line) => dispatch_line(
                channel, line, true, config, sink, clock, locks, interlock, replies,
            ),
            ChannelState::AwaitCompletion => drain(channel, sink, locks, replies),
            ChannelState::AwaitInterlock { deadline } => {
                match interlock.poll_wait(deadline, clock.now_ms()) {
                    Ok(true) => {
                        finish(channel, locks, replies, GCodeResult::Ok, String::new());
                        true
                    }
                    Ok(false) => {
                        channel.state = ChannelState::AwaitInterlock { deadline };
                        false
                    }
                    Err(e) => {
                        fail(channel, locks, replies, e);
                        true
                    }
                }
            }
            aborted @ ChannelState::Aborted { .. } => {
                channel.state = aborted;
                false
            }
        }
    }
}

fn reply(channel: ChannelId, line: &str, result: GCodeResult, text: String) -> Reply {
    Reply {
        channel,
        line: line.trim().to_string(),
        result,
        text,
    }
}

fn stop(channel: &mut Channel, locks: &mut LockManager, reason: &str) {
    let discarded = channel.pending.len();
    locks.unlock_all(channel.id);
    channel.abort(reason);
    error!(
        "{} channel aborted ({}), {} primitives discarded",
        channel.kind, reason, discarded
    );
}

/// Lock, run the handler and queue its primitives
#[allow(clippy::too_many_arguments)]
fn dispatch_line<S: EmissionSink, C: Clock>(
    channel: &mut Channel,
    line: CodeLine,
    waiting: bool,
    config: &MachineConfig,
    sink: &mut S,
    clock: &C,
    locks: &mut LockManager,
    interlock: &mut Interlock,
    replies: &mut Vec<Reply>,
) -> bool {
    let handler = match dispatch::route(&line, &channel.modal.modal) {
        Ok(handler) => handler,
        Err(e) => {
            channel.current = Some(line);
            fail(channel, locks, replies, e);
            return true;
        }
    };

    let resources = handler.resources(sink.persists());
    if !locks.try_lock_all(channel.id, &resources) {
        if !waiting {
            debug!("{} channel waiting for {:?}", channel.kind, resources);
        }
        channel.state = ChannelState::AwaitResource(line);
        return false;
    }

    let outcome = dispatch::execute(handler, &line, channel, config, interlock, clock.now_ms());
    channel.current = Some(line);
    match outcome {
        Ok(Outcome::Program(program)) => {
            channel.pending.extend(program);
            channel.state = ChannelState::AwaitCompletion;
            drain(channel, sink, locks, replies);
        }
        Ok(Outcome::Wait { deadline }) => {
            channel.state = ChannelState::AwaitInterlock { deadline };
        }
        Ok(Outcome::Warning(text)) => {
            warn!("{}", text);
            finish(channel, locks, replies, GCodeResult::Warning, text);
        }
        Err(e) => fail(channel, locks, replies, e),
    }
    true
}

/// Hand pending primitives to the sink until it is full or they run out
fn drain<S: EmissionSink>(
    channel: &mut Channel,
    sink: &mut S,
    locks: &mut LockManager,
    replies: &mut Vec<Reply>,
) -> bool {
    let mut sent = 0;
    while sink.capacity_left() > 0 {
        let command = match channel.pending.pop_front() {
            Some(command) => command,
            None => break,
        };
        debug!("{} > {}", channel.kind, command);
        if let Err(e) = sink.emit(command.clone()) {
            fail(channel, locks, replies, CommandError::Emission(e));
            return true;
        }
        channel.position.follow(&command);
        sent += 1;
    }

    if channel.pending.is_empty() {
        finish(channel, locks, replies, GCodeResult::Ok, String::new());
        true
    } else {
        channel.state = ChannelState::AwaitCompletion;
        sent > 0
    }
}

fn finish(
    channel: &mut Channel,
    locks: &mut LockManager,
    replies: &mut Vec<Reply>,
    result: GCodeResult,
    text: String,
) {
    locks.unlock_all(channel.id);
    let line = channel.current.take().map(|l| l.text).unwrap_or_default();
    channel.record(&line);
    channel.state = ChannelState::Idle;
    replies.push(reply(channel.id, &line, result, text));
}

/// Line-level errors reply and go back to Idle; the others abort the channel
fn fail(channel: &mut Channel, locks: &mut LockManager, replies: &mut Vec<Reply>, e: CommandError) {
    let line = channel
        .current
        .as_ref()
        .map(|l| l.text.clone())
        .unwrap_or_default();
    replies.push(reply(channel.id, &line, GCodeResult::Error, e.to_string()));

    if e.escalates() {
        error!("{}: {}", line.trim(), e);
        channel.print_history();
        stop(channel, locks, &e.to_string());
    } else {
        warn!("{}: {}", line.trim(), e);
        locks.unlock_all(channel.id);
        channel.current = None;
        channel.state = ChannelState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LineQueue;
    use crate::machine::MachineType;
    use crate::resource::Resource;
    use crate::sink::{axis, MoveQueue, PrimitiveCommand, ProgramWriter};
    use pretty_assertions::assert_eq;

    fn mill<S: EmissionSink>(sink: S) -> (GCodes<S, ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let gcodes = GCodes::new(
            MachineConfig::new(MachineType::Milling, "XYZ"),
            sink,
            clock.clone(),
        );
        (gcodes, clock)
    }

    fn queue(text: &str) -> Box<dyn LineSource> {
        Box::new(LineQueue::from_text(text))
    }

    fn reply_texts(gcodes: &mut GCodes<impl EmissionSink, impl Clock>) -> Vec<String> {
        gcodes
            .take_replies()
            .iter()
            .map(|r| r.to_string().trim_end().to_string())
            .collect()
    }

    #[test]
    fn test_program_runs_in_order() {
        let (mut gcodes, _) = mill(Vec::new());
        let id = gcodes.add_channel(ChannelKind::File, queue("G0 X1\n; comment\nG1 Y2 F100\nM5"));
        gcodes.run_until_idle(100);

        assert_eq!(
            gcodes.sink(),
            &vec![
                PrimitiveCommand::rapid(axis('X', 1.0)),
                PrimitiveCommand::feed(axis('Y', 2.0), 100.0),
                PrimitiveCommand::spindle_off(),
            ]
        );
        assert_eq!(reply_texts(&mut gcodes), vec!["ok", "ok", "ok"]);
        let channel = gcodes.channel(id).unwrap();
        assert_eq!(channel.position.get('Y'), Some(2.0));
        assert!(channel.state.is_idle());
        assert_eq!(gcodes.locks().owner(Resource::Movement), None);
    }

    #[test]
    fn test_parameter_error_keeps_channel_running() {
        let (mut gcodes, _) = mill(Vec::new());
        let id = gcodes.add_channel(ChannelKind::Usb, queue("G83 R2 Z-3 F100\nG0 Z1"));
        gcodes.run_until_idle(100);

        let replies = gcodes.take_replies();
        assert_eq!(replies[0].text, "Q parameter not found");
        assert!(replies[0].is_error());
        assert_eq!(replies[0].line, "G83 R2 Z-3 F100");
        assert_eq!(replies[1].result, GCodeResult::Ok);
        assert_eq!(gcodes.sink().len(), 1);
        assert!(gcodes.channel(id).unwrap().state.is_idle());
    }

    #[test]
    fn test_movement_is_held_until_the_cycle_is_sent() {
        let (mut gcodes, _) = mill(MoveQueue::new(2));
        let a = gcodes.add_channel(ChannelKind::File, queue("G83 R2 Q1 Z-3 F100"));
        let b = gcodes.add_channel(ChannelKind::Http, queue("G0 Z9"));
        gcodes.run_until_idle(20);

        // A filled the queue mid-cycle and keeps Movement; B waits for it
        assert_eq!(gcodes.locks().owner(Resource::Movement), Some(a));
        assert!(matches!(
            gcodes.channel(b).unwrap().state,
            ChannelState::AwaitResource(_)
        ));

        let mut executed = Vec::new();
        while !gcodes.channel(b).unwrap().state.is_idle() {
            executed.extend(gcodes.sink_mut().drain());
            gcodes.run_until_idle(20);
        }
        executed.extend(gcodes.sink_mut().drain());

        // No primitive of B lands inside A's cycle
        assert_eq!(executed.len(), 5 * 5 + 1 + 1);
        assert_eq!(executed[25], PrimitiveCommand::rapid(axis('Z', 0.0)));
        assert_eq!(executed[26], PrimitiveCommand::rapid(axis('Z', 9.0)));
        assert!(gcodes.channel(a).unwrap().state.is_idle());
        assert_eq!(gcodes.locks().owner(Resource::Movement), None);
        assert_eq!(reply_texts(&mut gcodes), vec!["ok", "ok"]);
    }

    #[test]
    fn test_backpressure_resumes_where_it_stopped() {
        let (mut gcodes, _) = mill(MoveQueue::new(4));
        let id = gcodes.add_channel(ChannelKind::File, queue("G0 Z10\nG83 R2 Q1 Z-3 F100"));
        gcodes.run_until_idle(50);

        assert_eq!(
            gcodes.channel(id).unwrap().state,
            ChannelState::AwaitCompletion
        );
        let mut executed = Vec::new();
        while !gcodes.channel(id).unwrap().state.is_idle() {
            while let Some(cmd) = gcodes.sink_mut().pop_front() {
                executed.push(cmd);
            }
            gcodes.run_until_idle(50);
        }
        executed.extend(gcodes.sink_mut().drain());

        // Five pecks of five primitives, the rapid home and the G0 in front
        assert_eq!(executed.len(), 1 + 5 * 5 + 1);
        assert_eq!(executed.last(), Some(&PrimitiveCommand::rapid(axis('Z', 10.0))));
    }

    #[test]
    fn test_emergency_stop_discards_pending_and_locks() {
        let (mut gcodes, _) = mill(MoveQueue::new(3));
        let a = gcodes.add_channel(ChannelKind::File, queue("G0 Z10\nG83 R2 Q1 Z-3 F100"));
        let b = gcodes.add_channel(ChannelKind::Usb, queue(""));
        gcodes.run_until_idle(50);
        assert!(!gcodes.channel(a).unwrap().pending.is_empty());
        assert_eq!(gcodes.locks().owner(Resource::Movement), Some(a));

        gcodes.emergency_stop();
        gcodes.spin();
        for id in [a, b] {
            let channel = gcodes.channel(id).unwrap();
            assert!(channel.state.is_aborted());
            assert!(channel.pending.is_empty());
            assert_eq!(channel.modal.active_cycle(), None);
        }
        assert_eq!(gcodes.locks().owner(Resource::Movement), None);

        // Nothing more reaches the sink until the channel is reset
        gcodes.sink_mut().drain();
        gcodes.run_until_idle(50);
        assert!(gcodes.sink().is_empty());

        gcodes.reset(a);
        gcodes.push_line(a, "G0 X1");
        gcodes.run_until_idle(50);
        assert_eq!(gcodes.sink().len(), 1);
    }

    #[test]
    fn test_cancel_stops_one_channel() {
        let (mut gcodes, _) = mill(Vec::new());
        let a = gcodes.add_channel(ChannelKind::Usb, queue(""));
        let b = gcodes.add_channel(ChannelKind::Http, queue(""));
        gcodes.cancel(a);
        gcodes.spin();
        assert_eq!(
            gcodes.channel(a).unwrap().state,
            ChannelState::Aborted {
                reason: "Cancelled".to_string()
            }
        );
        assert!(gcodes.channel(b).unwrap().state.is_idle());
    }

    #[test]
    fn test_interlock_wait_succeeds_when_cleared() {
        let (mut gcodes, clock) = mill(Vec::new());
        let id = gcodes.add_channel(ChannelKind::Aux, queue("M799 P5000\nG0 X1"));
        gcodes.run_until_idle(20);
        assert!(matches!(
            gcodes.channel(id).unwrap().state,
            ChannelState::AwaitInterlock { deadline: 5000 }
        ));
        assert!(gcodes.sink().is_empty());

        clock.advance(1000);
        gcodes.set_interlock_locked(false);
        gcodes.run_until_idle(20);
        assert_eq!(
            gcodes.take_panel_messages(),
            vec![":S UNLOCK".to_string(), ":S IDLETOOL".to_string()]
        );
        assert_eq!(gcodes.sink().len(), 1);
        assert_eq!(reply_texts(&mut gcodes), vec!["ok", "ok"]);
    }

    #[test]
    fn test_interlock_timeout_aborts() {
        let (mut gcodes, clock) = mill(Vec::new());
        let id = gcodes.add_channel(ChannelKind::Aux, queue("M799 P200\nG0 X1"));
        gcodes.run_until_idle(20);
        clock.advance(199);
        assert!(!gcodes.spin());

        clock.advance(1);
        gcodes.spin();
        let channel = gcodes.channel(id).unwrap();
        assert_eq!(
            channel.state,
            ChannelState::Aborted {
                reason: "System Timeout!".to_string()
            }
        );
        assert!(gcodes.interlock().is_locked());
        assert_eq!(reply_texts(&mut gcodes), vec!["error: System Timeout!"]);
        assert_eq!(
            gcodes.take_panel_messages(),
            vec![":S UNLOCK".to_string(), ":S IDLETOOL".to_string()]
        );
        assert!(gcodes.sink().is_empty());
    }

    #[test]
    fn test_emission_failure_aborts() {
        let (mut gcodes, _) = mill(MoveQueue::new(8));
        gcodes.sink_mut().close();
        let id = gcodes.add_channel(ChannelKind::File, queue("G0 X1\nG0 X2"));
        gcodes.run_until_idle(20);
        assert!(gcodes.channel(id).unwrap().state.is_aborted());
        let replies = gcodes.take_replies();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].is_error());
    }

    #[test]
    fn test_program_writer_numbers_lines_across_channels() {
        let (mut gcodes, _) = mill(ProgramWriter::new(Vec::new()));
        gcodes.add_channel(ChannelKind::File, queue("G0 X1\nM799 P100"));
        gcodes.add_channel(ChannelKind::Usb, queue("G0 Y1"));
        gcodes.run_until_idle(20);
        assert_eq!(gcodes.locks().owner(Resource::FileSystem), None);

        let text = String::from_utf8(gcodes.into_sink().into_inner()).unwrap();
        assert_eq!(text, "N0010 G0 X1\nN0020 G0 Y1\n");
    }

    #[test]
    fn test_coordinate_systems_are_written_back_unchanged() {
        let (mut gcodes, _) = mill(ProgramWriter::new(Vec::new()));
        gcodes.add_channel(ChannelKind::File, queue("G54\nG56\nG59"));
        gcodes.run_until_idle(20);

        let text = String::from_utf8(gcodes.into_sink().into_inner()).unwrap();
        assert_eq!(text, "N0010 G54\nN0020 G56\nN0030 G59\n");
    }

    #[test]
    fn test_mode_error_reaches_reply() {
        let (mut gcodes, _) = mill(Vec::new());
        gcodes.add_channel(ChannelKind::Usb, queue("M2003 X20 E14 Z1 Q-30 P2.5 F120 S800\nX5"));
        gcodes.run_until_idle(20);
        assert_eq!(
            reply_texts(&mut gcodes),
            vec![
                "error: Change to Lathe Mode First!",
                "error: No modal command active"
            ]
        );
        assert!(gcodes.sink().is_empty());
    }
}
