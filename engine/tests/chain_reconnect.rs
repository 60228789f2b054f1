use anklang_engine::combo::{AudioChain, Combo, ComboEvent};
use anklang_engine::config::EngineOptions;
use anklang_engine::engine::{AudioEngine, RenderGraph};
use anklang_engine::processor::{
    AudioProcessor, AudioProcessorP, IBusId, OBusId, ProcessorCore, connect, make_processor,
    same_processor,
};
use anklang_engine::speakers::SpeakerArrangement;
use std::any::Any;
use std::sync::Arc;

const FRAMES: usize = 64;

/// Writes a constant to both channels.
struct Constant {
    core: ProcessorCore,
    value: f32,
}

impl AudioProcessor for Constant {
    fn core(&self) -> &ProcessorCore {
        &self.core
    }
    fn initialize(&self, _busses: SpeakerArrangement) {
        self.core.add_output_bus("Out", SpeakerArrangement::STEREO);
    }
    fn reset(&self, _target_stamp: u64) {}
    fn render(&self, n_frames: usize) {
        for ch in 0..self.core.n_ochannels(OBusId::MAIN) {
            self.core.oblock(OBusId::MAIN, ch)[..n_frames].fill(self.value);
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Multiplies its stereo input.
struct Gain {
    core: ProcessorCore,
    factor: f32,
}

impl AudioProcessor for Gain {
    fn core(&self) -> &ProcessorCore {
        &self.core
    }
    fn initialize(&self, _busses: SpeakerArrangement) {
        self.core.add_input_bus("In", SpeakerArrangement::STEREO);
        self.core.add_output_bus("Out", SpeakerArrangement::STEREO);
    }
    fn reset(&self, _target_stamp: u64) {}
    fn render(&self, n_frames: usize) {
        for ch in 0..self.core.n_ochannels(OBusId::MAIN) {
            let input = self.core.ifloats(IBusId::MAIN, ch)[..n_frames].to_vec();
            let output = self.core.oblock(OBusId::MAIN, ch);
            for (o, i) in output.iter_mut().zip(input) {
                *o = i * self.factor;
            }
        }
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Event sink without audio buses.
struct NoteSink {
    core: ProcessorCore,
}

impl AudioProcessor for NoteSink {
    fn core(&self) -> &ProcessorCore {
        &self.core
    }
    fn initialize(&self, _busses: SpeakerArrangement) {
        self.core.prepare_event_input();
    }
    fn reset(&self, _target_stamp: u64) {}
    fn render(&self, _n_frames: usize) {}
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn engine() -> Arc<AudioEngine> {
    AudioEngine::new(EngineOptions {
        block_frames: FRAMES,
        ..Default::default()
    })
    .unwrap()
}

fn gain(engine: &Arc<AudioEngine>, factor: f32) -> AudioProcessorP {
    make_processor(Gain {
        core: ProcessorCore::new(engine),
        factor,
    })
}

fn output(chain: &AudioChain) -> (f32, f32) {
    (
        chain.core().ofloats(OBusId::MAIN, 0)[0],
        chain.core().ofloats(OBusId::MAIN, 1)[FRAMES - 1],
    )
}

#[test]
fn test_chain_follows_membership_changes() {
    let engine = engine();
    let source: AudioProcessorP = make_processor(Constant {
        core: ProcessorCore::new(&engine),
        value: 1.0,
    });
    let chain = AudioChain::new(&engine, SpeakerArrangement::STEREO);
    let chain_p: AudioProcessorP = chain.clone();
    connect(&chain_p, IBusId::MAIN, &source, OBusId::MAIN).unwrap();
    let mut graph = RenderGraph::new(&engine);
    graph.add_root(chain_p.clone());

    // An empty chain is silent.
    graph.render_block(FRAMES);
    assert_eq!(output(&chain), (0.0, 0.0));
    assert!(chain.last_output().is_none());

    let double = gain(&engine, 2.0);
    let triple = gain(&engine, 3.0);
    chain.insert(double.clone(), None);
    chain.insert(triple.clone(), None);
    graph.render_block(FRAMES);
    assert_eq!(output(&chain), (6.0, 6.0));
    assert!(same_processor(&chain.last_output().unwrap(), &triple));

    let half = gain(&engine, 0.5);
    chain.insert(half.clone(), Some(1));
    assert_eq!(chain.find_pos(&half), Some(1));
    graph.render_block(FRAMES);
    assert_eq!(output(&chain), (3.0, 3.0));

    assert!(chain.remove(&double));
    graph.render_block(FRAMES);
    assert_eq!(output(&chain), (1.5, 1.5));
    assert!(!double.core().connected(IBusId::MAIN));

    assert!(chain.remove(&half));
    assert!(chain.remove(&triple));
    graph.render_block(FRAMES);
    assert_eq!(output(&chain), (0.0, 0.0));
    assert_eq!(chain.size(), 0);
}

#[test]
fn test_sink_without_output_keeps_previous_output() {
    let engine = engine();
    let source: AudioProcessorP = make_processor(Constant {
        core: ProcessorCore::new(&engine),
        value: 0.5,
    });
    let chain = AudioChain::new(&engine, SpeakerArrangement::STEREO);
    let chain_p: AudioProcessorP = chain.clone();
    connect(&chain_p, IBusId::MAIN, &source, OBusId::MAIN).unwrap();
    let mut graph = RenderGraph::new(&engine);
    graph.add_root(chain_p);

    let double = gain(&engine, 2.0);
    let sink: AudioProcessorP = make_processor(NoteSink {
        core: ProcessorCore::new(&engine),
    });
    chain.insert(double.clone(), None);
    chain.insert(sink.clone(), None);
    let mut events = chain.combo().subscribe();
    let after = gain(&engine, 4.0);
    chain.insert(after.clone(), None);
    assert_eq!(events.try_recv().unwrap(), ComboEvent::Insertion { index: 2 });

    graph.render_block(FRAMES);
    // The sink has no audio output, `after` reads from its main input which
    // stays unconnected.
    assert_eq!(output(&chain), (0.0, 0.0));
    assert!(same_processor(&chain.last_output().unwrap(), &after));

    assert!(chain.remove(&after));
    graph.render_block(FRAMES);
    assert_eq!(output(&chain), (1.0, 1.0));
    assert!(same_processor(&chain.last_output().unwrap(), &double));
}

#[test]
fn test_probes_measure_chain_output() {
    let engine = engine();
    let source: AudioProcessorP = make_processor(Constant {
        core: ProcessorCore::new(&engine),
        value: 1.0,
    });
    let chain = AudioChain::new(&engine, SpeakerArrangement::STEREO);
    let chain_p: AudioProcessorP = chain.clone();
    connect(&chain_p, IBusId::MAIN, &source, OBusId::MAIN).unwrap();
    chain.insert(gain(&engine, 1.0), None);
    let mut graph = RenderGraph::new(&engine);
    graph.add_root(chain_p);
    assert!(chain.run_probes(true));
    graph.render_block(FRAMES);
    let probes = chain.probes().unwrap();
    assert_eq!(probes.len(), 2);
    for probe in probes {
        assert!(probe.dbspl.abs() < 0.01, "{probe:?}");
        assert!(probe.dbavg.abs() < 0.01, "{probe:?}");
    }
    assert!(chain.run_probes(false));
    assert!(chain.probes().is_none());
}

/// Bus layout only, renders nothing.
struct Node {
    core: ProcessorCore,
    input: Option<SpeakerArrangement>,
    output: Option<SpeakerArrangement>,
}

impl AudioProcessor for Node {
    fn core(&self) -> &ProcessorCore {
        &self.core
    }
    fn initialize(&self, _busses: SpeakerArrangement) {
        if let Some(speakers) = self.input {
            self.core.add_input_bus("In", speakers);
        }
        if let Some(speakers) = self.output {
            self.core.add_output_bus("Out", speakers);
        }
    }
    fn reset(&self, _target_stamp: u64) {}
    fn render(&self, _n_frames: usize) {}
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn node(
    engine: &Arc<AudioEngine>,
    input: Option<SpeakerArrangement>,
    output: Option<SpeakerArrangement>,
) -> AudioProcessorP {
    make_processor(Node {
        core: ProcessorCore::new(engine),
        input,
        output,
    })
}

fn source_of(proc: &AudioProcessorP) -> Option<AudioProcessorP> {
    proc.core().ibus_source(IBusId::MAIN).map(|(source, _)| source)
}

#[test]
fn test_remove_then_insert_rewires_from_inlet() {
    let engine = engine();
    let stereo = Some(SpeakerArrangement::STEREO);
    let chain = AudioChain::new(&engine, SpeakerArrangement::STEREO);
    let a = node(&engine, stereo, stereo);
    let b = node(&engine, stereo, stereo);
    chain.insert(a.clone(), None);
    chain.insert(b.clone(), None);
    assert!(same_processor(&source_of(&a).unwrap(), &chain.inlet()));
    assert!(same_processor(&source_of(&b).unwrap(), &a));

    assert!(chain.remove(&a));
    assert!(same_processor(&source_of(&b).unwrap(), &chain.inlet()));
    assert!(source_of(&a).is_none());
    assert!(a.core().consumers().is_empty());

    let c = node(&engine, stereo, stereo);
    chain.insert(c.clone(), Some(0));
    assert!(same_processor(&source_of(&c).unwrap(), &chain.inlet()));
    assert!(same_processor(&source_of(&b).unwrap(), &c));
    assert_eq!(chain.list_processors().len(), 2);
}

#[test]
fn test_chain_up_match_policy() {
    let engine = engine();
    let chain = AudioChain::new(&engine, SpeakerArrangement::STEREO);
    let mono = Some(SpeakerArrangement::MONO);
    let stereo = Some(SpeakerArrangement::STEREO);

    // Stereo into stereo, and mono upmixed into stereo.
    assert_eq!(chain.chain_up(&node(&engine, None, stereo), &node(&engine, stereo, None)), 2);
    assert_eq!(chain.chain_up(&node(&engine, None, mono), &node(&engine, stereo, None)), 2);
    // A mono input is a subset of a stereo output.
    assert_eq!(chain.chain_up(&node(&engine, None, stereo), &node(&engine, mono, None)), 1);
    // No buses on one side.
    assert_eq!(chain.chain_up(&node(&engine, None, None), &node(&engine, stereo, None)), 0);
    assert_eq!(chain.chain_up(&node(&engine, None, stereo), &node(&engine, None, stereo)), 0);

    let surround =
        SpeakerArrangement::STEREO | SpeakerArrangement::BACK_LEFT | SpeakerArrangement::BACK_RIGHT;
    let next = node(&engine, Some(surround), None);
    assert_eq!(chain.chain_up(&node(&engine, None, stereo), &next), 0);
    assert!(!next.core().connected(IBusId::MAIN));
}
