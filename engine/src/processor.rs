//! Processor graph nodes: buses, channel buffers, connections and the
//! interface the render scheduler drives.

use crate::audio::io::{AUDIO_BLOCK_MAX_RENDER_SIZE, AudioIO, ZEROS};
use crate::engine::{AudioEngine, Scheduler};
use crate::midi::io::{MidiEvent, MidiEventStream};
use crate::mutex::UnsafeMutex;
use crate::routing;
use crate::speakers::SpeakerArrangement;
use crate::transport::AudioTransport;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

pub type AudioProcessorP = Arc<dyn AudioProcessor>;
type AudioProcessorW = Weak<dyn AudioProcessor>;

static NEXT_PROCESSOR_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessorId(u64);

/// 1-based input bus handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IBusId(pub u32);

/// 1-based output bus handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OBusId(pub u32);

impl IBusId {
    pub const MAIN: Self = Self(1);

    fn index(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

impl OBusId {
    pub const MAIN: Self = Self(1);

    fn index(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BusInfo {
    pub label: String,
    pub speakers: SpeakerArrangement,
    pub n_channels: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AudioProcessorInfo {
    pub uri: String,
    pub version: String,
    pub label: String,
    pub category: String,
    pub description: String,
    pub website_url: String,
    pub creator_name: String,
}

struct IBus {
    label: String,
    speakers: SpeakerArrangement,
    source: Option<(AudioProcessorP, OBusId)>,
}

struct OBus {
    label: String,
    speakers: SpeakerArrangement,
    channels: Vec<AudioIO>,
}

/// A node of the render graph.
///
/// Methods take `&self`: state that changes while rendering lives in
/// [`UnsafeMutex`] cells owned by the implementation.
pub trait AudioProcessor: Send + Sync + 'static {
    fn core(&self) -> &ProcessorCore;

    fn info(&self) -> AudioProcessorInfo {
        AudioProcessorInfo::default()
    }

    /// Declare buses. Called once, right after construction.
    fn initialize(&self, busses: SpeakerArrangement);

    fn reset(&self, target_stamp: u64);

    /// Fill the output buses with `n_frames` frames.
    fn render(&self, n_frames: usize);

    /// Schedule contained processors, returns the next free level.
    fn schedule_children(&self, _scheduler: &mut Scheduler) -> u32 {
        0
    }

    /// Processors that must render before this one.
    fn schedule_dependencies(&self) -> Vec<AudioProcessorP> {
        self.core().input_sources()
    }

    fn as_any(&self) -> &dyn Any;
}

/// Bus and connection state shared by every processor.
pub struct ProcessorCore {
    id: ProcessorId,
    engine: Arc<AudioEngine>,
    ibuses: UnsafeMutex<Vec<IBus>>,
    obuses: UnsafeMutex<Vec<OBus>>,
    has_event_input: AtomicBool,
    event_source: UnsafeMutex<Option<AudioProcessorP>>,
    event_output: UnsafeMutex<Option<MidiEventStream>>,
    consumers: UnsafeMutex<Vec<(ProcessorId, AudioProcessorW)>>,
    in_combo: AtomicBool,
}

impl ProcessorCore {
    pub fn new(engine: &Arc<AudioEngine>) -> Self {
        Self {
            id: ProcessorId(NEXT_PROCESSOR_ID.fetch_add(1, Ordering::Relaxed)),
            engine: engine.clone(),
            ibuses: UnsafeMutex::new(Vec::new()),
            obuses: UnsafeMutex::new(Vec::new()),
            has_event_input: AtomicBool::new(false),
            event_source: UnsafeMutex::new(None),
            event_output: UnsafeMutex::new(None),
            consumers: UnsafeMutex::new(Vec::new()),
            in_combo: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ProcessorId {
        self.id
    }

    pub fn engine(&self) -> &Arc<AudioEngine> {
        &self.engine
    }

    pub fn transport(&self) -> &AudioTransport {
        self.engine.transport()
    }

    pub fn sample_rate(&self) -> u32 {
        self.engine.sample_rate()
    }

    pub fn add_input_bus(&self, label: &str, speakers: SpeakerArrangement) -> IBusId {
        assert_return!(speakers.count_channels() > 0, IBusId(0));
        let ibuses = self.ibuses.lock();
        ibuses.push(IBus {
            label: label.to_string(),
            speakers,
            source: None,
        });
        IBusId(ibuses.len() as u32)
    }

    pub fn add_output_bus(&self, label: &str, speakers: SpeakerArrangement) -> OBusId {
        assert_return!(speakers.count_channels() > 0, OBusId(0));
        let obuses = self.obuses.lock();
        obuses.push(OBus {
            label: label.to_string(),
            speakers,
            channels: (0..speakers.count_channels())
                .map(|_| AudioIO::new(AUDIO_BLOCK_MAX_RENDER_SIZE))
                .collect(),
        });
        OBusId(obuses.len() as u32)
    }

    /// Drop all buses and event streams together with their connections.
    pub fn remove_all_buses(&self) {
        self.disconnect_ibuses();
        self.disconnect_obuses();
        self.ibuses.lock().clear();
        self.obuses.lock().clear();
        self.has_event_input.store(false, Ordering::Relaxed);
        *self.event_output.lock() = None;
    }

    pub fn n_ibuses(&self) -> usize {
        self.ibuses.lock().len()
    }

    pub fn n_obuses(&self) -> usize {
        self.obuses.lock().len()
    }

    pub fn ibus_info(&self, ibus: IBusId) -> Option<BusInfo> {
        let ibuses = self.ibuses.lock();
        let bus = ibuses.get(ibus.index()?)?;
        Some(BusInfo {
            label: bus.label.clone(),
            speakers: bus.speakers,
            n_channels: bus.speakers.count_channels(),
        })
    }

    pub fn obus_info(&self, obus: OBusId) -> Option<BusInfo> {
        let obuses = self.obuses.lock();
        let bus = obuses.get(obus.index()?)?;
        Some(BusInfo {
            label: bus.label.clone(),
            speakers: bus.speakers,
            n_channels: bus.channels.len(),
        })
    }

    pub fn n_ichannels(&self, ibus: IBusId) -> usize {
        let ibuses = self.ibuses.lock();
        ibus.index()
            .and_then(|i| ibuses.get(i))
            .map_or(0, |bus| bus.speakers.count_channels())
    }

    pub fn n_ochannels(&self, obus: OBusId) -> usize {
        let obuses = self.obuses.lock();
        obus.index()
            .and_then(|i| obuses.get(i))
            .map_or(0, |bus| bus.channels.len())
    }

    /// The processor and bus feeding `ibus`, if connected.
    pub fn ibus_source(&self, ibus: IBusId) -> Option<(AudioProcessorP, OBusId)> {
        let ibuses = self.ibuses.lock();
        ibuses.get(ibus.index()?)?.source.clone()
    }

    pub fn connected(&self, ibus: IBusId) -> bool {
        let ibuses = self.ibuses.lock();
        ibus.index()
            .and_then(|i| ibuses.get(i))
            .is_some_and(|bus| bus.source.is_some())
    }

    /// The output channel read by input `ibus`, channel `channel`.
    ///
    /// Channel indices beyond the source bus width read its last channel, so a
    /// mono source feeds both sides of a stereo input.
    pub fn ichannel(&self, ibus: IBusId, channel: usize) -> Option<&AudioIO> {
        let ibuses = self.ibuses.lock();
        let bus = ibuses.get(ibus.index()?)?;
        let (source, obus) = bus.source.as_ref()?;
        let width = source.core().n_ochannels(*obus);
        if width == 0 {
            return None;
        }
        source.core().ochannel(*obus, channel.min(width - 1))
    }

    pub fn ifloats(&self, ibus: IBusId, channel: usize) -> &[f32] {
        assert_return!(
            ibus.index().is_some_and(|i| i < self.n_ibuses()),
            &ZEROS[..]
        );
        match self.ichannel(ibus, channel) {
            Some(io) => io.floats(),
            None => &ZEROS[..],
        }
    }

    pub fn ochannel(&self, obus: OBusId, channel: usize) -> Option<&AudioIO> {
        let obuses = self.obuses.lock();
        obuses.get(obus.index()?)?.channels.get(channel)
    }

    pub fn ofloats(&self, obus: OBusId, channel: usize) -> &[f32] {
        let Some(io) = self.ochannel(obus, channel) else {
            crate::check::contract_violation("output channel in range", file!(), line!());
            return &ZEROS[..];
        };
        io.floats()
    }

    /// Writable output block, resets any redirect of that channel.
    #[allow(clippy::mut_from_ref)]
    pub fn oblock(&self, obus: OBusId, channel: usize) -> &mut [f32] {
        let Some(io) = self.ochannel(obus, channel) else {
            crate::check::contract_violation("output channel in range", file!(), line!());
            return &mut [];
        };
        io.block()
    }

    /// Point output channel at `target`, or at silence for `None`.
    pub fn redirect_oblock(&self, obus: OBusId, channel: usize, target: Option<&AudioIO>) {
        let Some(io) = self.ochannel(obus, channel) else {
            crate::check::contract_violation("output channel in range", file!(), line!());
            return;
        };
        io.redirect(target);
    }

    pub fn prepare_event_input(&self) {
        self.has_event_input.store(true, Ordering::Relaxed);
    }

    pub fn prepare_event_output(&self) {
        let output = self.event_output.lock();
        if output.is_none() {
            *output = Some(MidiEventStream::new());
        }
    }

    pub fn has_event_input(&self) -> bool {
        self.has_event_input.load(Ordering::Relaxed)
    }

    pub fn has_event_output(&self) -> bool {
        self.event_output.lock().is_some()
    }

    pub fn event_source(&self) -> Option<AudioProcessorP> {
        self.event_source.lock().clone()
    }

    /// The event stream written during `render()`, needs `prepare_event_output()`.
    #[allow(clippy::mut_from_ref)]
    pub fn event_output(&self) -> Option<&mut MidiEventStream> {
        self.event_output.lock().as_mut()
    }

    /// Events of the connected event source for the current block.
    pub fn event_input(&self) -> &[MidiEvent] {
        match self.event_source.lock() {
            Some(source) => match source.core().event_output.lock() {
                Some(stream) => stream.as_slice(),
                None => &[],
            },
            None => &[],
        }
    }

    pub(crate) fn begin_block(&self) {
        if let Some(stream) = self.event_output.lock() {
            stream.clear();
        }
    }

    /// Everything this processor reads from: bus sources and the event source.
    pub fn input_sources(&self) -> Vec<AudioProcessorP> {
        let mut sources: Vec<AudioProcessorP> = Vec::new();
        let mut push = |p: &AudioProcessorP| {
            if !sources.iter().any(|s| s.core().id == p.core().id) {
                sources.push(p.clone());
            }
        };
        if let Some(source) = self.event_source.lock().as_ref() {
            push(source);
        }
        for bus in self.ibuses.lock().iter() {
            if let Some((source, _)) = &bus.source {
                push(source);
            }
        }
        sources
    }

    /// Processors currently reading from this one.
    pub fn consumers(&self) -> Vec<AudioProcessorP> {
        self.consumers
            .lock()
            .iter()
            .filter_map(|(_, w)| w.upgrade())
            .collect()
    }

    pub fn in_combo(&self) -> bool {
        self.in_combo.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_combo(&self, member: bool) {
        self.in_combo.store(member, Ordering::Release);
    }

    fn is_fed_by(&self, source: ProcessorId) -> bool {
        let by_event = self
            .event_source
            .lock()
            .as_ref()
            .is_some_and(|s| s.core().id == source);
        by_event
            || self.ibuses.lock().iter().any(|bus| {
                bus.source
                    .as_ref()
                    .is_some_and(|(s, _)| s.core().id == source)
            })
    }

    fn add_consumer(&self, consumer: &AudioProcessorP) {
        let id = consumer.core().id;
        let consumers = self.consumers.lock();
        if !consumers.iter().any(|(cid, _)| *cid == id) {
            consumers.push((id, Arc::downgrade(consumer)));
        }
    }

    fn forget_consumer(&self, consumer: &ProcessorCore) {
        if !consumer.is_fed_by(self.id) {
            self.consumers.lock().retain(|(cid, _)| *cid != consumer.id);
        }
    }

    pub fn disconnect(&self, ibus: IBusId) {
        let source = {
            let ibuses = self.ibuses.lock();
            let Some(index) = ibus.index().filter(|&i| i < ibuses.len()) else {
                crate::check::contract_violation("input bus in range", file!(), line!());
                return;
            };
            ibuses[index].source.take()
        };
        if let Some((source, _)) = source {
            source.core().forget_consumer(self);
            self.engine.reschedule();
        }
    }

    pub fn disconnect_event_input(&self) {
        let source = self.event_source.lock().take();
        if let Some(source) = source {
            source.core().forget_consumer(self);
            self.engine.reschedule();
        }
    }

    /// Disconnect the event input and every input bus.
    pub fn disconnect_ibuses(&self) {
        self.disconnect_event_input();
        for i in 0..self.n_ibuses() {
            self.disconnect(IBusId(i as u32 + 1));
        }
    }

    /// Disconnect the inputs of all processors reading from this one.
    pub fn disconnect_obuses(&self) {
        let consumers = std::mem::take(self.consumers.lock());
        if !consumers.is_empty() {
            self.engine.reschedule();
        }
        for (_, consumer) in consumers {
            let Some(consumer) = consumer.upgrade() else {
                continue;
            };
            let core = consumer.core();
            for i in 0..core.n_ibuses() {
                let ibus = IBusId(i as u32 + 1);
                if core
                    .ibus_source(ibus)
                    .is_some_and(|(s, _)| s.core().id == self.id)
                {
                    core.ibuses.lock()[i].source = None;
                }
            }
            if core
                .event_source
                .lock()
                .as_ref()
                .is_some_and(|s| s.core().id == self.id)
            {
                *core.event_source.lock() = None;
            }
        }
    }
}

impl Drop for ProcessorCore {
    fn drop(&mut self) {
        let id = self.id;
        for bus in self.ibuses.lock().drain(..) {
            if let Some((source, _)) = bus.source {
                source.core().consumers.lock().retain(|(cid, _)| *cid != id);
            }
        }
        if let Some(source) = self.event_source.lock().take() {
            source.core().consumers.lock().retain(|(cid, _)| *cid != id);
        }
    }
}

/// Graph node keyed by processor identity, for cycle checks.
#[derive(Clone)]
struct GraphNode(AudioProcessorP);

impl PartialEq for GraphNode {
    fn eq(&self, other: &Self) -> bool {
        self.0.core().id == other.0.core().id
    }
}

impl Eq for GraphNode {}

impl Hash for GraphNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.core().id.hash(state);
    }
}

fn would_create_cycle(prev: &AudioProcessorP, next: &AudioProcessorP) -> bool {
    routing::would_create_cycle(
        &GraphNode(prev.clone()),
        &GraphNode(next.clone()),
        |node: &GraphNode| {
            node.0
                .core()
                .consumers()
                .into_iter()
                .map(GraphNode)
                .collect::<Vec<_>>()
        },
    )
}

/// Connect input `ibus` of `next` to output `obus` of `prev`.
pub fn connect(
    next: &AudioProcessorP,
    ibus: IBusId,
    prev: &AudioProcessorP,
    obus: OBusId,
) -> Result<(), String> {
    let Some(iinfo) = next.core().ibus_info(ibus) else {
        return Err(format!("Input bus {} out of range", ibus.0));
    };
    let Some(oinfo) = prev.core().obus_info(obus) else {
        return Err(format!("Output bus {} out of range", obus.0));
    };
    let upmix = iinfo.speakers.channels() == SpeakerArrangement::STEREO
        && oinfo.speakers.channels() == SpeakerArrangement::MONO;
    if iinfo.n_channels > oinfo.n_channels && !upmix {
        return Err(format!(
            "Cannot connect {} input '{}' to {} output '{}'",
            iinfo.speakers, iinfo.label, oinfo.speakers, oinfo.label
        ));
    }
    if would_create_cycle(prev, next) {
        return Err("Connection would create a processing cycle".to_string());
    }
    next.core().disconnect(ibus);
    if let Some(index) = ibus.index() {
        next.core().ibuses.lock()[index].source = Some((prev.clone(), obus));
    }
    prev.core().add_consumer(next);
    next.core().engine.reschedule();
    debug!(target: "engine", "connect: {:?}:{} <- {:?}:{}", next.core().id, ibus.0, prev.core().id, obus.0);
    Ok(())
}

/// Feed the event output of `source` into `proc`, replacing an earlier source.
pub fn connect_event_input(source: &AudioProcessorP, proc: &AudioProcessorP) -> Result<(), String> {
    if !proc.core().has_event_input() {
        return Err("Processor has no event input".to_string());
    }
    if !source.core().has_event_output() {
        return Err("Event source has no event output".to_string());
    }
    if proc
        .core()
        .event_source()
        .is_some_and(|s| s.core().id == source.core().id)
    {
        return Ok(());
    }
    if would_create_cycle(source, proc) {
        return Err("Event connection would create a processing cycle".to_string());
    }
    proc.core().disconnect_event_input();
    *proc.core().event_source.lock() = Some(source.clone());
    source.core().add_consumer(proc);
    proc.core().engine.reschedule();
    Ok(())
}

/// Identity comparison for processor handles.
pub fn same_processor(a: &AudioProcessorP, b: &AudioProcessorP) -> bool {
    a.core().id() == b.core().id()
}

/// Create, initialize and return a processor.
pub fn make_processor<P: AudioProcessor>(proc: P) -> Arc<P> {
    let proc = Arc::new(proc);
    proc.initialize(SpeakerArrangement::STEREO);
    proc
}

pub type ProcessorFactory = fn(&Arc<AudioEngine>) -> Result<AudioProcessorP, String>;

/// Processor types available for creation by URI.
#[derive(Default)]
pub struct ProcessorRegistry {
    factories: BTreeMap<String, (AudioProcessorInfo, ProcessorFactory)>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the processors this crate provides.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(crate::combo::AudioChain::static_info(), |engine| {
            Ok(crate::combo::AudioChain::new(engine, SpeakerArrangement::STEREO) as AudioProcessorP)
        });
        registry.register(crate::midi::producer::MidiProducer::static_info(), |engine| {
            Ok(crate::midi::producer::MidiProducer::new(engine)? as AudioProcessorP)
        });
        registry
    }

    pub fn register(&mut self, info: AudioProcessorInfo, factory: ProcessorFactory) {
        self.factories.insert(info.uri.clone(), (info, factory));
    }

    pub fn create(&self, uri: &str, engine: &Arc<AudioEngine>) -> Result<AudioProcessorP, String> {
        let (_, factory) = self
            .factories
            .get(uri)
            .ok_or_else(|| format!("Unknown processor: {uri}"))?;
        factory(engine)
    }

    pub fn list(&self) -> Vec<AudioProcessorInfo> {
        self.factories.values().map(|(info, _)| info.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineOptions;

    struct Gain {
        core: ProcessorCore,
        ispeakers: SpeakerArrangement,
        ospeakers: SpeakerArrangement,
    }

    impl Gain {
        fn create(
            engine: &Arc<AudioEngine>,
            ispeakers: SpeakerArrangement,
            ospeakers: SpeakerArrangement,
        ) -> AudioProcessorP {
            make_processor(Self {
                core: ProcessorCore::new(engine),
                ispeakers,
                ospeakers,
            })
        }
    }

    impl AudioProcessor for Gain {
        fn core(&self) -> &ProcessorCore {
            &self.core
        }
        fn initialize(&self, _busses: SpeakerArrangement) {
            self.core.add_input_bus("In", self.ispeakers);
            self.core.add_output_bus("Out", self.ospeakers);
        }
        fn reset(&self, _target_stamp: u64) {}
        fn render(&self, n_frames: usize) {
            for c in 0..self.core.n_ochannels(OBusId::MAIN) {
                let input = self.core.ifloats(IBusId::MAIN, c)[..n_frames].to_vec();
                let out = self.core.oblock(OBusId::MAIN, c);
                for (o, i) in out[..n_frames].iter_mut().zip(input) {
                    *o = i * 0.5;
                }
            }
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn engine() -> Arc<AudioEngine> {
        AudioEngine::new(EngineOptions::default()).unwrap()
    }

    #[test]
    fn test_connect_and_read_input() {
        let engine = engine();
        let a = Gain::create(&engine, SpeakerArrangement::STEREO, SpeakerArrangement::STEREO);
        let b = Gain::create(&engine, SpeakerArrangement::STEREO, SpeakerArrangement::STEREO);
        connect(&b, IBusId::MAIN, &a, OBusId::MAIN).unwrap();
        a.core().oblock(OBusId::MAIN, 1)[0] = 0.75;
        assert_eq!(b.core().ifloats(IBusId::MAIN, 1)[0], 0.75);
        assert_eq!(a.core().consumers().len(), 1);
        assert!(b.core().connected(IBusId::MAIN));
    }

    #[test]
    fn test_mono_source_feeds_both_channels() {
        let engine = engine();
        let mono = Gain::create(&engine, SpeakerArrangement::MONO, SpeakerArrangement::MONO);
        let stereo = Gain::create(&engine, SpeakerArrangement::STEREO, SpeakerArrangement::STEREO);
        connect(&stereo, IBusId::MAIN, &mono, OBusId::MAIN).unwrap();
        mono.core().oblock(OBusId::MAIN, 0)[3] = 0.25;
        assert_eq!(stereo.core().ifloats(IBusId::MAIN, 0)[3], 0.25);
        assert_eq!(stereo.core().ifloats(IBusId::MAIN, 1)[3], 0.25);
    }

    #[test]
    fn test_wider_input_is_rejected() {
        let engine = engine();
        let stereo = Gain::create(&engine, SpeakerArrangement::STEREO, SpeakerArrangement::STEREO);
        let surround = Gain::create(&engine, SpeakerArrangement::SURROUND_51, SpeakerArrangement::STEREO);
        assert!(connect(&surround, IBusId::MAIN, &stereo, OBusId::MAIN).is_err());
        assert!(!surround.core().connected(IBusId::MAIN));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let engine = engine();
        let a = Gain::create(&engine, SpeakerArrangement::STEREO, SpeakerArrangement::STEREO);
        let b = Gain::create(&engine, SpeakerArrangement::STEREO, SpeakerArrangement::STEREO);
        connect(&b, IBusId::MAIN, &a, OBusId::MAIN).unwrap();
        assert!(connect(&a, IBusId::MAIN, &b, OBusId::MAIN).is_err());
        assert!(connect(&a, IBusId::MAIN, &a, OBusId::MAIN).is_err());
    }

    #[test]
    fn test_disconnect_obuses_clears_consumers() {
        let engine = engine();
        let a = Gain::create(&engine, SpeakerArrangement::STEREO, SpeakerArrangement::STEREO);
        let b = Gain::create(&engine, SpeakerArrangement::STEREO, SpeakerArrangement::STEREO);
        let c = Gain::create(&engine, SpeakerArrangement::STEREO, SpeakerArrangement::STEREO);
        connect(&b, IBusId::MAIN, &a, OBusId::MAIN).unwrap();
        connect(&c, IBusId::MAIN, &a, OBusId::MAIN).unwrap();
        a.core().disconnect_obuses();
        assert!(!b.core().connected(IBusId::MAIN));
        assert!(!c.core().connected(IBusId::MAIN));
        assert!(a.core().consumers().is_empty());
    }

    #[test]
    fn test_dropped_consumer_unregisters() {
        let engine = engine();
        let a = Gain::create(&engine, SpeakerArrangement::STEREO, SpeakerArrangement::STEREO);
        let b = Gain::create(&engine, SpeakerArrangement::STEREO, SpeakerArrangement::STEREO);
        connect(&b, IBusId::MAIN, &a, OBusId::MAIN).unwrap();
        drop(b);
        assert!(a.core().consumers().is_empty());
    }

    #[test]
    fn test_registry_creates_builtins() {
        let engine = engine();
        let registry = ProcessorRegistry::with_builtins();
        let uris: Vec<String> = registry.list().into_iter().map(|i| i.uri).collect();
        assert!(uris.contains(&"Anklang.Devices.AudioChain".to_string()));
        let chain = registry.create("Anklang.Devices.AudioChain", &engine).unwrap();
        assert_eq!(chain.core().n_obuses(), 1);
        assert!(registry.create("Nope", &engine).is_err());
    }
}
