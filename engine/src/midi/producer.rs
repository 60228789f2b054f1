//! Clip playback as a block synchronous MIDI event stream.

use crate::engine::AudioEngine;
use crate::midi::clip::{ClipGenerator, ClipScout, MidiClip};
use crate::midi::io::{MidiEvent, MidiEventType};
use crate::mutex::UnsafeMutex;
use crate::processor::{AudioProcessor, AudioProcessorInfo, ProcessorCore, make_processor};
use crate::speakers::SpeakerArrangement;
use crate::telemetry::TelemetryCell;
use arc_swap::ArcSwapOption;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

/// 2^53, the tick sentinel for "no position".
pub const M52MAX: i64 = 9_007_199_254_740_992;

/// Generators plus the policy that sequences them.
pub struct MidiFeed {
    pub generators: Vec<ClipGenerator>,
    pub scout: UnsafeMutex<ClipScout>,
    pub trigger: i32,
}

impl MidiFeed {
    /// A feed playing `generators` in list order.
    pub fn new(generators: Vec<ClipGenerator>) -> Self {
        let mut scout = ClipScout::default();
        scout.setup((0..generators.len() as i32).collect());
        Self {
            generators,
            scout: UnsafeMutex::new(scout),
            trigger: !0,
        }
    }

    pub fn from_clips(clips: impl IntoIterator<Item = Arc<MidiClip>>) -> Self {
        Self::new(clips.into_iter().map(ClipGenerator::new).collect())
    }
}

/// Playback position published to telemetry.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Position {
    pub next: i32,
    pub current: i32,
    pub tick: f64,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            next: -1,
            current: -1,
            tick: -(M52MAX as f64),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickEvent {
    pub tick: i64,
    pub event: MidiEvent,
}

struct ProducerState {
    generator_start: i64,
    must_flush: bool,
    /// Descending by tick, the soonest event is last.
    future_stack: Vec<TickEvent>,
}

impl ProducerState {
    fn new() -> Self {
        Self {
            generator_start: -1,
            must_flush: false,
            future_stack: Vec::with_capacity(64),
        }
    }
}

fn insert_future(stack: &mut Vec<TickEvent>, event: TickEvent) {
    let at = stack.partition_point(|e| e.tick > event.tick);
    stack.insert(at, event);
}

/// Renders the active feed into its event output.
///
/// `start`, `stop` and `update_feed` change render state and must run on the
/// render thread, see [`AudioEngine::run_on_render_thread`].
pub struct MidiProducer {
    core: ProcessorCore,
    feed: ArcSwapOption<MidiFeed>,
    position: TelemetryCell<Position>,
    state: UnsafeMutex<ProducerState>,
}

impl MidiProducer {
    pub fn new(engine: &Arc<AudioEngine>) -> Result<Arc<Self>, String> {
        let position = TelemetryCell::new(engine.telemetry(), Position::default())?;
        Ok(make_processor(Self {
            core: ProcessorCore::new(engine),
            feed: ArcSwapOption::empty(),
            position,
            state: UnsafeMutex::new(ProducerState::new()),
        }))
    }

    pub fn static_info() -> AudioProcessorInfo {
        AudioProcessorInfo {
            uri: "Anklang.Devices.MidiProducer".to_string(),
            version: "1".to_string(),
            label: "MIDI Producer".to_string(),
            category: "Generators".to_string(),
            description: "Clip driven MIDI event generator".to_string(),
            ..Default::default()
        }
    }

    pub fn feed(&self) -> Option<Arc<MidiFeed>> {
        self.feed.load_full()
    }

    /// Swap in `feed`, returns the previous one so the caller drops it.
    pub fn update_feed(&self, feed: Option<Arc<MidiFeed>>) -> Option<Arc<MidiFeed>> {
        let mut position = self.position.get();
        let last_play_position = match self.feed.load().as_ref() {
            Some(old) if position.current >= 0 => old
                .generators
                .get(position.current as usize)
                .map_or(0, |g| g.play_position()),
            _ => 0,
        };
        let old = self.feed.swap(feed);
        if position.current >= 0 {
            let restored = match self.feed.load().as_ref() {
                Some(new) => match new.generators.get(position.current as usize) {
                    Some(generator) => {
                        generator.jumpto(last_play_position);
                        true
                    }
                    None => false,
                },
                None => false,
            };
            if !restored {
                self.state.lock().must_flush = true;
                position.current = -1;
                self.position.set(position);
            }
        }
        old
    }

    /// Begin with the first generator, unless one is already playing.
    pub fn start(&self) {
        let guard = self.feed.load();
        let Some(feed) = guard.as_ref() else {
            return;
        };
        let mut position = self.position.get();
        if feed.generators.is_empty() || position.current >= 0 {
            return;
        }
        position.current = 0;
        self.state.lock().generator_start = self.core.transport().current_bar_tick;
        feed.scout.lock().reset();
        feed.generators[0].jumpto(0);
        self.position.set(position);
        debug!(target: "midifeed", "start: generator_start={}", self.state.lock().generator_start);
    }

    /// Flush pending note offs, `restart` also drops the playback position.
    pub fn stop(&self, restart: bool) {
        let state = self.state.lock();
        let mut position = self.position.get();
        position.tick = -(M52MAX as f64);
        state.must_flush = true;
        if restart {
            position.current = -1;
            state.generator_start = -1;
        }
        self.position.set(position);
    }

    pub fn position(&self) -> Position {
        self.position.get()
    }

    /// Byte offset of the [`Position`] inside the telemetry arena.
    pub fn position_offset(&self) -> u32 {
        self.position.offset()
    }

    /// Generated events waiting for a later block.
    pub fn pending_events(&self) -> Vec<TickEvent> {
        self.state.lock().future_stack.clone()
    }
}

impl AudioProcessor for MidiProducer {
    fn core(&self) -> &ProcessorCore {
        &self.core
    }

    fn info(&self) -> AudioProcessorInfo {
        Self::static_info()
    }

    fn initialize(&self, _busses: SpeakerArrangement) {
        self.core.prepare_event_input();
        self.core.prepare_event_output();
    }

    fn reset(&self, _target_stamp: u64) {
        let state = self.state.lock();
        state.future_stack.clear();
        state.must_flush = false;
        state.generator_start = -1;
        self.position.set(Position::default());
    }

    fn render(&self, n_frames: usize) {
        let Some(evout) = self.core.event_output() else {
            return;
        };
        let transport = self.core.transport();
        let state = self.state.lock();
        let begin_tick = transport.current_tick;
        let end_tick = begin_tick + transport.sample_to_tick(n_frames as i64);
        let bpm = transport.current_bpm;

        if state.must_flush || bpm <= 0.0 {
            for pending in state.future_stack.iter().rev() {
                if pending.event.kind == MidiEventType::NoteOff {
                    evout.append_unsorted(0, pending.event);
                }
            }
            state.future_stack.clear();
            state.must_flush = false;
        }
        while let Some(pending) = state.future_stack.last().copied()
            && pending.tick < end_tick
        {
            state.future_stack.pop();
            let frame = transport.sample_from_tick(pending.tick - begin_tick);
            debug_assert!((-2048..=2047).contains(&frame));
            debug!(target: "midifeed", "POP: t={} ev={} f={frame}", pending.tick, pending.event);
            evout.append_unsorted(frame as i32, pending.event);
        }
        for event in self.core.event_input() {
            evout.append(event.frame, *event);
        }

        let guard = self.feed.load();
        let mut position = self.position.get();
        if let Some(feed) = guard.as_ref()
            && !feed.generators.is_empty()
            && bpm > 0.0
            && position.current >= 0
            && state.generator_start >= 0
        {
            while position.current >= 0 {
                let Some(generator) = feed.generators.get(position.current as usize) else {
                    position.current = -1;
                    state.generator_start = -1;
                    break;
                };
                let generator_start = state.generator_start;
                if generator_start + generator.play_position() >= end_tick {
                    break;
                }
                let future_stack = &mut state.future_stack;
                generator.generate(end_tick - generator_start, |cliptick, event| {
                    let etick = generator_start + cliptick;
                    if etick < end_tick {
                        let frame = transport.sample_from_tick(etick - begin_tick);
                        debug_assert!((-2048..=2047).contains(&frame));
                        debug!(target: "midifeed", "NOW: t={etick} ev={event} f={frame}");
                        evout.append_unsorted(frame as i32, event);
                    } else {
                        debug!(target: "midifeed", "FUT: t={etick} ev={event}");
                        insert_future(future_stack, TickEvent { tick: etick, event });
                    }
                });
                if generator.done() {
                    let play_point = generator_start + generator.play_position();
                    position.current = feed.scout.lock().advance(position.current);
                    if let Some(next) = usize::try_from(position.current)
                        .ok()
                        .and_then(|i| feed.generators.get(i))
                    {
                        let bar_ticks = transport.tick_sig.bar_ticks().max(1);
                        let mut start = transport.current_bar_tick;
                        while start < play_point {
                            start += bar_ticks;
                        }
                        state.generator_start = start;
                        next.jumpto(0);
                        if next.done() {
                            position.current = -1;
                        }
                    } else {
                        position.current = -1;
                    }
                    if position.current == -1 {
                        state.generator_start = -1;
                    }
                    position.next = -1;
                }
                position.tick = match usize::try_from(position.current)
                    .ok()
                    .and_then(|i| feed.generators.get(i))
                {
                    Some(current) => current.clip_position() as f64,
                    None => -(M52MAX as f64),
                };
            }
            self.position.set(position);
        }
        evout.ensure_order();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
