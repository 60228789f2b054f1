//! Processor containers: [`AudioCombo`] bookkeeping and the serial
//! [`AudioChain`].

use crate::engine::{AudioEngine, Scheduler};
use crate::mathutils::{DB_FLOOR, average_db, peak_db};
use crate::mutex::UnsafeMutex;
use crate::processor::{
    AudioProcessor, AudioProcessorInfo, AudioProcessorP, IBusId, OBusId, ProcessorCore, connect,
    connect_event_input, make_processor, same_processor,
};
use crate::speakers::SpeakerArrangement;
use crate::telemetry::TelemetryArray;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{error, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComboEvent {
    Insertion { index: usize },
    Removal { index: usize },
}

/// Ordered members plus the shared event source.
#[derive(Default)]
pub struct AudioCombo {
    processors: UnsafeMutex<Vec<AudioProcessorP>>,
    eproc: UnsafeMutex<Option<AudioProcessorP>>,
    listeners: Mutex<Vec<UnboundedSender<ComboEvent>>>,
}

impl AudioCombo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive insertion and removal notifications.
    pub fn subscribe(&self) -> UnboundedReceiver<ComboEvent> {
        let (tx, rx) = unbounded_channel();
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(tx);
        }
        rx
    }

    fn notify(&self, event: ComboEvent) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|tx| tx.send(event).is_ok());
        }
    }
}

impl Drop for AudioCombo {
    fn drop(&mut self) {
        *self.eproc.lock() = None;
        for proc in self.processors.lock().iter() {
            proc.core().set_in_combo(false);
        }
    }
}

/// A processor that contains other processors.
pub trait Combo: AudioProcessor {
    fn combo(&self) -> &AudioCombo;

    /// Rewire members from `index` onward after a structural change.
    fn reconnect(&self, index: usize, insertion: bool);

    /// Insert `proc` at `pos`, appending for `None`.
    fn insert(&self, proc: AudioProcessorP, pos: Option<usize>) {
        assert_return!(!proc.core().in_combo());
        assert_return!(proc.core().id() != self.core().id());
        let index = {
            let processors = self.combo().processors.lock();
            let index = pos.unwrap_or(processors.len()).min(processors.len());
            proc.core().set_in_combo(true);
            processors.insert(index, proc);
            index
        };
        self.reconnect(index, true);
        self.core().engine().reschedule();
        self.combo().notify(ComboEvent::Insertion { index });
    }

    /// Remove `proc`, returns false if it is not a member.
    fn remove(&self, proc: &AudioProcessorP) -> bool {
        let Some(pos) = self.find_pos(proc) else {
            return false;
        };
        let removed = self.combo().processors.lock().remove(pos);
        removed.core().set_in_combo(false);
        removed.core().disconnect_ibuses();
        removed.core().disconnect_obuses();
        self.reconnect(pos, false);
        self.combo().notify(ComboEvent::Removal { index: pos });
        self.core().engine().reschedule();
        true
    }

    fn at(&self, nth: usize) -> Option<AudioProcessorP> {
        self.combo().processors.lock().get(nth).cloned()
    }

    fn find_pos(&self, proc: &AudioProcessorP) -> Option<usize> {
        self.combo()
            .processors
            .lock()
            .iter()
            .position(|p| same_processor(p, proc))
    }

    fn size(&self) -> usize {
        self.combo().processors.lock().len()
    }

    fn list_processors(&self) -> Vec<AudioProcessorP> {
        self.combo().processors.lock().clone()
    }

    /// Feed the event inputs of members from `eproc`, which needs an event output.
    fn set_event_source(&self, eproc: Option<AudioProcessorP>) {
        if let Some(eproc) = &eproc {
            assert_return!(eproc.core().has_event_output());
        }
        *self.combo().eproc.lock() = eproc;
    }

    fn event_source(&self) -> Option<AudioProcessorP> {
        self.combo().eproc.lock().clone()
    }
}

/// Peak and average level of one chain output channel in dB.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Probe {
    pub dbspl: f32,
    pub dbavg: f32,
}

impl Default for Probe {
    fn default() -> Self {
        Self {
            dbspl: DB_FLOOR,
            dbavg: DB_FLOOR,
        }
    }
}

/// Exposes the chain input as an output bus for the first member.
struct Inlet {
    core: ProcessorCore,
    chain: Weak<AudioChain>,
    speakers: SpeakerArrangement,
}

impl AudioProcessor for Inlet {
    fn core(&self) -> &ProcessorCore {
        &self.core
    }

    fn info(&self) -> AudioProcessorInfo {
        AudioProcessorInfo {
            label: "Anklang.Devices.AudioChain.Inlet".to_string(),
            ..Default::default()
        }
    }

    fn initialize(&self, _busses: SpeakerArrangement) {
        self.core.remove_all_buses();
        self.core.add_output_bus("Output", self.speakers);
    }

    fn reset(&self, _target_stamp: u64) {}

    fn render(&self, _n_frames: usize) {
        let Some(chain) = self.chain.upgrade() else {
            return;
        };
        let ni = chain.core.n_ichannels(IBusId::MAIN);
        let no = self.core.n_ochannels(OBusId::MAIN);
        assert_return!(ni == no);
        for i in 0..ni {
            self.core
                .redirect_oblock(OBusId::MAIN, i, chain.core.ichannel(IBusId::MAIN, i));
        }
    }

    fn schedule_dependencies(&self) -> Vec<AudioProcessorP> {
        self.chain
            .upgrade()
            .map(|chain| chain.core.input_sources())
            .unwrap_or_default()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Members wired in series, the last member with an output bus is the
/// chain output.
pub struct AudioChain {
    core: ProcessorCore,
    combo: AudioCombo,
    ispeakers: SpeakerArrangement,
    ospeakers: SpeakerArrangement,
    inlet: Arc<Inlet>,
    last_output: UnsafeMutex<Option<AudioProcessorP>>,
    probes: Option<TelemetryArray<Probe>>,
    probes_enabled: AtomicBool,
}

impl AudioChain {
    pub fn new(engine: &Arc<AudioEngine>, speakers: SpeakerArrangement) -> Arc<Self> {
        let n_channels = speakers.count_channels();
        let probes = match TelemetryArray::new(engine.telemetry(), n_channels, Probe::default()) {
            Ok(probes) => Some(probes),
            Err(e) => {
                error!(target: "engine", "AudioChain: no probe memory: {e}");
                None
            }
        };
        let chain = Arc::new_cyclic(|weak: &Weak<AudioChain>| Self {
            core: ProcessorCore::new(engine),
            combo: AudioCombo::new(),
            ispeakers: speakers,
            ospeakers: speakers,
            inlet: make_processor(Inlet {
                core: ProcessorCore::new(engine),
                chain: weak.clone(),
                speakers,
            }),
            last_output: UnsafeMutex::new(None),
            probes,
            probes_enabled: AtomicBool::new(false),
        });
        chain.initialize(speakers);
        chain
    }

    pub fn static_info() -> AudioProcessorInfo {
        AudioProcessorInfo {
            uri: "Anklang.Devices.AudioChain".to_string(),
            version: "1".to_string(),
            label: "Ase.AudioChain".to_string(),
            category: "Routing".to_string(),
            creator_name: "Anklang Authors".to_string(),
            website_url: "https://anklang.testbit.eu".to_string(),
            ..Default::default()
        }
    }

    pub fn inlet(&self) -> AudioProcessorP {
        self.inlet.clone()
    }

    /// Member providing the chain output, as of the last schedule pass.
    pub fn last_output(&self) -> Option<AudioProcessorP> {
        self.last_output.lock().clone()
    }

    /// Enable or disable level probes. Enabling resets all probe values.
    /// Returns false if no probe memory is available.
    pub fn run_probes(&self, enable: bool) -> bool {
        let Some(probes) = &self.probes else {
            return false;
        };
        if enable && !self.probes_enabled.load(Ordering::Acquire) {
            probes.fill(Probe::default());
        }
        self.probes_enabled.store(enable, Ordering::Release);
        true
    }

    pub fn probes(&self) -> Option<Vec<Probe>> {
        if !self.probes_enabled.load(Ordering::Acquire) {
            return None;
        }
        self.probes.as_ref().map(|p| p.to_vec())
    }

    /// Telemetry offset of the probe array.
    pub fn probes_offset(&self) -> Option<u32> {
        self.probes.as_ref().map(|p| p.offset())
    }

    /// Connect the main input of `next` to the main output of `prev`.
    /// Returns the number of connected channels.
    pub fn chain_up(&self, prev: &AudioProcessorP, next: &AudioProcessorP) -> usize {
        assert_return!(prev.core().id() != self.core.id(), 0);
        assert_return!(next.core().id() != self.core.id(), 0);
        if let Some(eproc) = self.event_source() {
            for proc in [prev, next] {
                if proc.core().has_event_input()
                    && let Err(e) = connect_event_input(&eproc, proc)
                {
                    warn!(target: "engine", "AudioChain: event input: {e}");
                }
            }
        }
        if next.core().n_ibuses() == 0 || prev.core().n_obuses() == 0 {
            return 0;
        }
        let (Some(oinfo), Some(iinfo)) = (
            prev.core().obus_info(OBusId::MAIN),
            next.core().ibus_info(IBusId::MAIN),
        ) else {
            return 0;
        };
        let ospa = oinfo.speakers.channels();
        let ispa = iinfo.speakers.channels();
        if ispa.is_subset_of(ospa)
            || (ospa == SpeakerArrangement::MONO && ispa == SpeakerArrangement::STEREO)
        {
            return match connect(next, IBusId::MAIN, prev, OBusId::MAIN) {
                Ok(()) => ispa.count_channels(),
                Err(e) => {
                    warn!(target: "engine", "AudioChain: {e}");
                    0
                }
            };
        }
        0
    }

    fn probe(&self, channel: usize, samples: Option<&[f32]>) {
        let Some(probes) = &self.probes else {
            return;
        };
        let probe = match samples {
            Some(samples) => Probe {
                dbspl: peak_db(samples),
                dbavg: average_db(samples),
            },
            None => Probe::default(),
        };
        probes.set(channel, probe);
    }
}

impl Drop for AudioChain {
    fn drop(&mut self) {
        self.inlet.core.disconnect_obuses();
        *self.last_output.lock() = None;
    }
}

impl AudioProcessor for AudioChain {
    fn core(&self) -> &ProcessorCore {
        &self.core
    }

    fn info(&self) -> AudioProcessorInfo {
        Self::static_info()
    }

    fn initialize(&self, _busses: SpeakerArrangement) {
        self.core.add_input_bus("Input", self.ispeakers);
        self.core.add_output_bus("Output", self.ospeakers);
    }

    fn reset(&self, _target_stamp: u64) {}

    fn schedule_children(&self, scheduler: &mut Scheduler) -> u32 {
        let inlet: AudioProcessorP = self.inlet.clone();
        let mut last_output = None;
        let mut level = scheduler.schedule_processor(&inlet);
        for proc in self.list_processors() {
            level = level.max(scheduler.schedule_processor(&proc));
            if proc.core().n_obuses() > 0 {
                last_output = Some(proc);
            }
        }
        *self.last_output.lock() = last_output;
        level
    }

    fn render(&self, n_frames: usize) {
        let last = self.last_output.lock().as_ref();
        let n_last = last.map_or(0, |p| p.core().n_ochannels(OBusId::MAIN));
        let n_och = self.core.n_ochannels(OBusId::MAIN);
        let probing = n_och <= 2 && self.probes_enabled.load(Ordering::Relaxed);
        for c in 0..n_och {
            let source = match last {
                Some(proc) if n_last > 0 => proc.core().ochannel(OBusId::MAIN, c.min(n_last - 1)),
                _ => None,
            };
            self.core.redirect_oblock(OBusId::MAIN, c, source);
            if probing {
                self.probe(c, source.map(|io| &io.floats()[..n_frames]));
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Combo for AudioChain {
    fn combo(&self) -> &AudioCombo {
        &self.combo
    }

    fn reconnect(&self, index: usize, _insertion: bool) {
        let processors = self.list_processors();
        for proc in processors.iter().skip(index) {
            proc.core().disconnect_ibuses();
        }
        for i in index..processors.len() {
            let prev = if i > 0 {
                processors[i - 1].clone()
            } else {
                self.inlet()
            };
            self.chain_up(&prev, &processors[i]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineOptions;
    use crate::midi::producer::MidiProducer;

    struct Passthru {
        core: ProcessorCore,
    }

    impl AudioProcessor for Passthru {
        fn core(&self) -> &ProcessorCore {
            &self.core
        }
        fn initialize(&self, _busses: SpeakerArrangement) {
            self.core.add_input_bus("In", SpeakerArrangement::STEREO);
            self.core.add_output_bus("Out", SpeakerArrangement::STEREO);
            self.core.prepare_event_input();
        }
        fn reset(&self, _target_stamp: u64) {}
        fn render(&self, _n_frames: usize) {}
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn engine() -> Arc<AudioEngine> {
        AudioEngine::new(EngineOptions::default()).unwrap()
    }

    fn passthru(engine: &Arc<AudioEngine>) -> AudioProcessorP {
        make_processor(Passthru {
            core: ProcessorCore::new(engine),
        })
    }

    #[test]
    fn test_insert_position_is_clamped() {
        let engine = engine();
        let chain = AudioChain::new(&engine, SpeakerArrangement::STEREO);
        let a = passthru(&engine);
        let b = passthru(&engine);
        chain.insert(a.clone(), Some(7));
        chain.insert(b.clone(), Some(0));
        assert_eq!(chain.size(), 2);
        assert_eq!(chain.find_pos(&b), Some(0));
        assert_eq!(chain.find_pos(&a), Some(1));
        assert!(chain.at(2).is_none());
        assert!(a.core().in_combo());
    }

    #[test]
    fn test_remove_non_member() {
        let engine = engine();
        let chain = AudioChain::new(&engine, SpeakerArrangement::STEREO);
        let a = passthru(&engine);
        assert!(!chain.remove(&a));
        chain.insert(a.clone(), None);
        assert!(chain.remove(&a));
        assert!(!a.core().in_combo());
        assert!(!a.core().connected(IBusId::MAIN));
        assert_eq!(chain.size(), 0);
    }

    #[test]
    fn test_notifications() {
        let engine = engine();
        let chain = AudioChain::new(&engine, SpeakerArrangement::STEREO);
        let mut rx = chain.combo().subscribe();
        let a = passthru(&engine);
        chain.insert(a.clone(), None);
        chain.remove(&a);
        assert_eq!(rx.try_recv().unwrap(), ComboEvent::Insertion { index: 0 });
        assert_eq!(rx.try_recv().unwrap(), ComboEvent::Removal { index: 0 });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_source_wires_members() {
        let engine = engine();
        let chain = AudioChain::new(&engine, SpeakerArrangement::STEREO);
        let producer: AudioProcessorP = MidiProducer::new(&engine).unwrap();
        chain.set_event_source(Some(producer.clone()));
        let a = passthru(&engine);
        chain.insert(a.clone(), None);
        let source = a.core().event_source().unwrap();
        assert!(same_processor(&source, &producer));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "has_event_output")]
    fn test_event_source_needs_event_output() {
        let engine = engine();
        let chain = AudioChain::new(&engine, SpeakerArrangement::STEREO);
        chain.set_event_source(Some(passthru(&engine)));
    }

    #[test]
    fn test_probes_reset_on_enable() {
        let engine = engine();
        let chain = AudioChain::new(&engine, SpeakerArrangement::STEREO);
        assert!(chain.probes().is_none());
        assert!(chain.run_probes(true));
        assert_eq!(chain.probes().unwrap(), vec![Probe::default(); 2]);
        assert!(chain.probes_offset().is_some());
    }
}
