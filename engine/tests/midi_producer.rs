use anklang_engine::config::EngineOptions;
use anklang_engine::engine::{AudioEngine, RenderGraph};
use anklang_engine::midi::clip::{ClipNote, MidiClip};
use anklang_engine::midi::io::MidiEventType;
use anklang_engine::midi::producer::{MidiFeed, MidiProducer};
use anklang_engine::processor::{AudioProcessor, AudioProcessorP, connect_event_input};
use anklang_engine::transport::TRANSPORT_PPQN;
use std::sync::Arc;

const FRAMES: usize = 64;
/// 125 bpm at 48 kHz.
const TICKS_PER_FRAME: i64 = 210;
const TICKS_PER_BLOCK: i64 = TICKS_PER_FRAME * FRAMES as i64;

fn engine() -> Arc<AudioEngine> {
    let engine = AudioEngine::new(EngineOptions {
        sample_rate: 48000,
        block_frames: FRAMES,
        bpm: 125.0,
        ..Default::default()
    })
    .unwrap();
    engine.transport_mut().set_running(true);
    engine
}

fn note(tick: i64, duration: i64, key: u8) -> ClipNote {
    ClipNote {
        tick,
        duration,
        key,
        channel: 0,
        velocity: 1.0,
        id: key as u32,
    }
}

fn clip(length: i64, notes: impl IntoIterator<Item = ClipNote>) -> Arc<MidiClip> {
    Arc::new(MidiClip::with_notes(length, false, notes))
}

/// Render `blocks` blocks, returns `(absolute frame, kind, key)` per event.
fn render(
    graph: &mut RenderGraph,
    producer: &MidiProducer,
    blocks: usize,
) -> Vec<(i64, MidiEventType, u8)> {
    let mut events = Vec::new();
    for _ in 0..blocks {
        let block_start = graph.engine().frame_counter() as i64;
        graph.render_block(FRAMES);
        for event in producer.core().event_output().unwrap().iter() {
            events.push((block_start + event.frame as i64, event.kind, event.key));
        }
    }
    events
}

fn setup(clips: Vec<Arc<MidiClip>>) -> (Arc<AudioEngine>, Arc<MidiProducer>, RenderGraph) {
    let engine = engine();
    let producer = MidiProducer::new(&engine).unwrap();
    producer.update_feed(Some(Arc::new(MidiFeed::from_clips(clips))));
    producer.start();
    let mut graph = RenderGraph::new(&engine);
    graph.add_root(producer.clone());
    (engine, producer, graph)
}

#[test]
fn test_notes_land_on_frames_across_blocks() {
    assert_eq!(engine().transport().sample_to_tick(FRAMES as i64), TICKS_PER_BLOCK);
    let (_engine, producer, mut graph) = setup(vec![clip(
        4 * TRANSPORT_PPQN,
        [
            note(10 * TICKS_PER_FRAME, 100 * TICKS_PER_FRAME, 60),
            note(TICKS_PER_BLOCK + 20 * TICKS_PER_FRAME, 5 * TICKS_PER_FRAME, 62),
        ],
    )]);

    let first = render(&mut graph, &producer, 1);
    assert_eq!(first, vec![(10, MidiEventType::NoteOn, 60)]);
    assert_eq!(producer.pending_events().len(), 1);

    let second = render(&mut graph, &producer, 1);
    assert_eq!(
        second,
        vec![
            (84, MidiEventType::NoteOn, 62),
            (89, MidiEventType::NoteOff, 62),
            (110, MidiEventType::NoteOff, 60),
        ]
    );
    assert!(producer.pending_events().is_empty());
    assert_eq!(producer.position().current, 0);
    assert!(producer.position().tick > 0.0);
}

#[test]
fn test_next_clip_starts_on_bar_boundary() {
    let (_engine, producer, mut graph) = setup(vec![
        clip(TRANSPORT_PPQN, [note(0, TRANSPORT_PPQN / 2, 60)]),
        clip(TRANSPORT_PPQN, [note(0, TRANSPORT_PPQN / 2, 72)]),
    ]);
    let bar_frames = 4 * TRANSPORT_PPQN / TICKS_PER_FRAME;
    let blocks = bar_frames as usize / FRAMES + 2;
    let events = render(&mut graph, &producer, blocks);
    let half_beat = TRANSPORT_PPQN / 2 / TICKS_PER_FRAME;
    assert_eq!(
        events,
        vec![
            (0, MidiEventType::NoteOn, 60),
            (half_beat, MidiEventType::NoteOff, 60),
            (bar_frames, MidiEventType::NoteOn, 72),
        ]
    );
    assert_eq!(producer.position().current, 1);
}

#[test]
fn test_feed_swap_keeps_play_position() {
    let (engine, producer, mut graph) = setup(vec![clip(
        4 * TRANSPORT_PPQN,
        [note(0, TICKS_PER_FRAME, 60), note(2 * TICKS_PER_BLOCK, TICKS_PER_FRAME, 61)],
    )]);
    render(&mut graph, &producer, 1);

    let replacement = Arc::new(MidiFeed::from_clips([clip(
        4 * TRANSPORT_PPQN,
        [note(0, TICKS_PER_FRAME, 69), note(2 * TICKS_PER_BLOCK, TICKS_PER_FRAME, 70)],
    )]));
    let swap = producer.clone();
    let old = engine
        .run_on_render_thread(move || swap.update_feed(Some(replacement)))
        .unwrap();
    assert!(old.is_some());

    let events = render(&mut graph, &producer, 2);
    assert_eq!(
        events,
        vec![
            (2 * FRAMES as i64, MidiEventType::NoteOn, 70),
            (2 * FRAMES as i64 + 1, MidiEventType::NoteOff, 70),
        ]
    );
}

#[test]
fn test_removing_feed_flushes_note_offs() {
    let (_engine, producer, mut graph) =
        setup(vec![clip(4 * TRANSPORT_PPQN, [note(0, TRANSPORT_PPQN, 60)])]);
    render(&mut graph, &producer, 1);
    assert_eq!(producer.pending_events().len(), 1);

    assert!(producer.update_feed(None).is_some());
    assert_eq!(producer.position().current, -1);
    let events = render(&mut graph, &producer, 2);
    assert_eq!(events, vec![(FRAMES as i64, MidiEventType::NoteOff, 60)]);
    assert!(producer.pending_events().is_empty());
}

#[test]
fn test_stopping_transport_flushes_note_offs() {
    let (engine, producer, mut graph) =
        setup(vec![clip(4 * TRANSPORT_PPQN, [note(0, 4 * TICKS_PER_BLOCK, 60)])]);
    let events = render(&mut graph, &producer, 1);
    assert_eq!(events, vec![(0, MidiEventType::NoteOn, 60)]);
    assert_eq!(producer.pending_events().len(), 1);

    engine.transport_mut().set_running(false);
    let events = render(&mut graph, &producer, 2);
    assert_eq!(events, vec![(FRAMES as i64, MidiEventType::NoteOff, 60)]);
    assert!(producer.pending_events().is_empty());
}

#[test]
fn test_event_input_is_merged_in_frame_order() {
    let engine = engine();
    let upstream = MidiProducer::new(&engine).unwrap();
    upstream.update_feed(Some(Arc::new(MidiFeed::from_clips([clip(
        4 * TRANSPORT_PPQN,
        [
            note(5 * TICKS_PER_FRAME, 2 * TICKS_PER_FRAME, 60),
            note(30 * TICKS_PER_FRAME, 2 * TICKS_PER_FRAME, 61),
        ],
    )]))));
    let producer = MidiProducer::new(&engine).unwrap();
    producer.update_feed(Some(Arc::new(MidiFeed::from_clips([clip(
        4 * TRANSPORT_PPQN,
        [note(10 * TICKS_PER_FRAME, 30 * TICKS_PER_FRAME, 70)],
    )]))));
    let source: AudioProcessorP = upstream.clone();
    let target: AudioProcessorP = producer.clone();
    connect_event_input(&source, &target).unwrap();
    upstream.start();
    producer.start();
    let mut graph = RenderGraph::new(&engine);
    graph.add_root(producer.clone());

    let events = render(&mut graph, &producer, 1);
    assert_eq!(
        events,
        vec![
            (5, MidiEventType::NoteOn, 60),
            (7, MidiEventType::NoteOff, 60),
            (10, MidiEventType::NoteOn, 70),
            (30, MidiEventType::NoteOn, 61),
            (32, MidiEventType::NoteOff, 61),
            (40, MidiEventType::NoteOff, 70),
        ]
    );
    assert!(events.windows(2).all(|pair| pair[0].0 <= pair[1].0));
    // Upstream keeps its own stream.
    assert_eq!(upstream.core().event_output().unwrap().len(), 4);
}
