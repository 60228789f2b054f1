use anklang_engine::combo::{AudioChain, Combo};
use anklang_engine::config::EngineOptions;
use anklang_engine::engine::{AudioEngine, RenderGraph};
use anklang_engine::event_loop::EventLoop;
use anklang_engine::midi::clip::{ClipNote, MidiClip};
use anklang_engine::midi::producer::{MidiFeed, MidiProducer};
use anklang_engine::plugins::clap::{
    ClapAudioWrapper, ClapHostContext, ClapPluginHandle, ClapPluginRegistry, WindowingBridge,
};
use anklang_engine::processor::{AudioProcessor, AudioProcessorP};
use anklang_engine::speakers::SpeakerArrangement;
use anklang_engine::transport::TRANSPORT_PPQN;
use clap::Args;
use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// CLAP plugin id to insert into the chain.
    #[arg(long)]
    pub plugin: Option<String>,
    #[arg(long, default_value_t = 32)]
    pub blocks: usize,
    /// Engine configuration file (TOML).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Standard MIDI file to play instead of the demo arpeggio.
    #[arg(long)]
    pub midi: Option<PathBuf>,
    /// Keep the plugin editor open for this many seconds.
    #[arg(long, default_value_t = 0)]
    pub gui: u64,
}

/// One bar of a C major arpeggio in sixteenth notes.
fn demo_clip() -> MidiClip {
    let sixteenth = TRANSPORT_PPQN / 4;
    let keys = [60u8, 64, 67, 72];
    let notes = (0..16).map(|step| ClipNote {
        tick: step * sixteenth,
        duration: sixteenth / 2,
        key: keys[step as usize % keys.len()],
        channel: 0,
        velocity: 0.8,
        id: step as u32 + 1,
    });
    MidiClip::with_notes(4 * TRANSPORT_PPQN, true, notes)
}

fn load_clip(args: &RenderArgs) -> Result<MidiClip, String> {
    let Some(path) = &args.midi else {
        return Ok(demo_clip());
    };
    let bytes = std::fs::read(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    MidiClip::from_smf(&bytes, 0)
}

fn load_plugin(
    engine: &Arc<AudioEngine>,
    options: &EngineOptions,
    id: &str,
) -> Result<Arc<ClapAudioWrapper>, String> {
    let registry = ClapPluginRegistry::from_options(options);
    let descriptor = registry
        .find(id)
        .ok_or_else(|| format!("No such CLAP plugin: {id}"))?;
    let context = ClapHostContext {
        main_loop: Arc::new(EventLoop::spawn("clap-main")?),
        windowing: Arc::new(WindowingBridge::from_options(options)),
    };
    let wrapper = ClapAudioWrapper::create(engine, &descriptor, context)?;
    if !wrapper.handle().activate(engine) {
        return Err(format!("{}: activation failed", descriptor.id));
    }
    Ok(wrapper)
}

/// Run `job` on the plugin's main loop and wait for its result.
fn on_main_loop<R: Send + 'static>(
    handle: &Arc<ClapPluginHandle>,
    job: impl FnOnce(&ClapPluginHandle) -> R + Send + 'static,
) -> Option<R> {
    let (tx, rx) = mpsc::channel();
    let target = handle.clone();
    let queued = handle.context().main_loop.exec_callback(move || {
        let _ = tx.send(job(&target));
    });
    if !queued {
        return None;
    }
    rx.recv().ok()
}

fn print_block(block: usize, chain: &AudioChain, producer: &MidiProducer) {
    let events = producer.core().event_output().map_or(0, |stream| stream.len());
    let levels = chain
        .probes()
        .unwrap_or_default()
        .iter()
        .map(|probe| format!("{:7.1} dB", probe.dbspl))
        .collect::<Vec<_>>()
        .join(" ");
    println!("block {block:4}: {events:2} events  {levels}");
}

pub fn run(options: EngineOptions, args: &RenderArgs) -> Result<(), String> {
    let engine = AudioEngine::new(options.clone())?;
    engine.transport_mut().set_running(true);
    let frames = engine.block_frames();

    let producer = MidiProducer::new(&engine)?;
    producer.update_feed(Some(Arc::new(MidiFeed::from_clips([Arc::new(load_clip(args)?)]))));
    producer.start();

    let chain = AudioChain::new(&engine, SpeakerArrangement::STEREO);
    chain.set_event_source(Some(producer.clone()));
    chain.run_probes(true);

    let wrapper = match &args.plugin {
        Some(id) => Some(load_plugin(&engine, &options, id)?),
        None => None,
    };
    let wrapper_p: Option<AudioProcessorP> = wrapper.clone().map(|w| w as AudioProcessorP);
    if let Some(proc) = &wrapper_p {
        chain.insert(proc.clone(), None);
    }
    if let Some(wrapper) = &wrapper
        && args.gui > 0
        && !on_main_loop(wrapper.handle(), |handle| handle.show_gui()).unwrap_or(false)
    {
        info!("{}: no editor available", wrapper.handle().clapid());
    }

    let mut graph = RenderGraph::new(&engine);
    graph.add_root(chain.clone());
    info!(
        "rendering {} blocks of {frames} frames at {} Hz",
        args.blocks,
        engine.sample_rate()
    );
    for block in 0..args.blocks {
        graph.render_block(frames);
        print_block(block, &chain, &producer);
    }
    if let Some(wrapper) = &wrapper {
        debug!("{}: last process status {}", wrapper.handle().clapid(), wrapper.last_status());
        if args.gui > 0 && wrapper.handle().gui_visible() {
            std::thread::sleep(Duration::from_secs(args.gui));
        }
    }

    producer.stop(false);
    if let (Some(wrapper), Some(proc)) = (&wrapper, &wrapper_p) {
        wrapper.handle().deactivate();
        chain.remove(proc);
        on_main_loop(wrapper.handle(), |handle| handle.destroy());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_clip_covers_one_bar() {
        let clip = demo_clip();
        assert_eq!(clip.notes().len(), 16);
        assert_eq!(clip.length(), 4 * TRANSPORT_PPQN);
        assert!(clip.notes().iter().all(|n| n.tick + n.duration <= clip.length()));
    }

    #[test]
    fn test_render_without_plugin() {
        let options = EngineOptions {
            block_frames: 64,
            ..Default::default()
        };
        let args = RenderArgs {
            plugin: None,
            blocks: 4,
            config: None,
            midi: None,
            gui: 0,
        };
        assert!(run(options, &args).is_ok());
    }
}
