use crate::audio::io::AUDIO_BLOCK_MAX_RENDER_SIZE;
use crate::config::EngineOptions;
use crate::mutex::UnsafeMutex;
use crate::processor::{AudioProcessorP, ProcessorId, same_processor};
use crate::telemetry::TelemetryArena;
use crate::transport::AudioTransport;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, error};

thread_local! {
    static ENGINE_THREAD: Cell<bool> = const { Cell::new(false) };
}

pub type EngineJob = Box<dyn FnOnce() + Send + 'static>;

/// Shared engine state handed to every processor.
pub struct AudioEngine {
    options: EngineOptions,
    transport: UnsafeMutex<AudioTransport>,
    telemetry: Arc<TelemetryArena>,
    jobs_tx: UnboundedSender<EngineJob>,
    jobs_rx: Mutex<UnboundedReceiver<EngineJob>>,
    reschedule: AtomicBool,
    driver_running: AtomicBool,
    frame_counter: AtomicU64,
}

impl AudioEngine {
    pub fn new(options: EngineOptions) -> Result<Arc<Self>, String> {
        options.validate()?;
        let mut transport = AudioTransport::new(options.sample_rate);
        transport.tempo(options.bpm, options.beats_per_bar, options.beat_unit);
        let telemetry = TelemetryArena::new(options.telemetry_bytes)?;
        let (jobs_tx, jobs_rx) = unbounded_channel();
        Ok(Arc::new(Self {
            options,
            transport: UnsafeMutex::new(transport),
            telemetry,
            jobs_tx,
            jobs_rx: Mutex::new(jobs_rx),
            reschedule: AtomicBool::new(true),
            driver_running: AtomicBool::new(false),
            frame_counter: AtomicU64::new(0),
        }))
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn sample_rate(&self) -> u32 {
        self.options.sample_rate
    }

    pub fn block_frames(&self) -> usize {
        self.options.block_frames
    }

    pub fn transport(&self) -> &AudioTransport {
        self.transport.lock()
    }

    /// Mutable transport, only touch from the render thread or while stopped.
    #[allow(clippy::mut_from_ref)]
    pub fn transport_mut(&self) -> &mut AudioTransport {
        self.transport.lock()
    }

    pub fn telemetry(&self) -> &Arc<TelemetryArena> {
        &self.telemetry
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter.load(Ordering::Relaxed)
    }

    /// Request a schedule rebuild before the next block.
    pub fn reschedule(&self) {
        self.reschedule.store(true, Ordering::Release);
    }

    pub fn take_reschedule(&self) -> bool {
        self.reschedule.swap(false, Ordering::AcqRel)
    }

    pub fn driver_running(&self) -> bool {
        self.driver_running.load(Ordering::Acquire)
    }

    /// Queue `job` for the start of the next render block.
    pub fn async_job(&self, job: impl FnOnce() + Send + 'static) {
        if self.jobs_tx.send(Box::new(job)).is_err() {
            error!(target: "engine", "job queue closed");
        }
    }

    /// Run `job` on the render thread and wait for its result.
    ///
    /// Runs inline on the engine thread or while no driver is running.
    pub fn run_on_render_thread<R: Send + 'static>(
        &self,
        job: impl FnOnce() -> R + Send + 'static,
    ) -> Result<R, String> {
        if Self::thread_is_engine() || !self.driver_running() {
            return Ok(job());
        }
        let (tx, rx) = mpsc::channel();
        self.async_job(move || {
            let _ = tx.send(job());
        });
        loop {
            match rx.recv_timeout(Duration::from_millis(20)) {
                Ok(result) => return Ok(result),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if !self.driver_running() {
                        self.run_jobs();
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err("Render job was dropped".to_string());
                }
            }
        }
    }

    /// Whether the calling thread renders audio.
    pub fn thread_is_engine() -> bool {
        ENGINE_THREAD.with(|flag| flag.get())
    }

    pub(crate) fn mark_engine_thread(yes: bool) {
        ENGINE_THREAD.with(|flag| flag.set(yes));
    }

    pub(crate) fn run_jobs(&self) {
        let jobs: Vec<EngineJob> = match self.jobs_rx.lock() {
            Ok(mut rx) => std::iter::from_fn(|| rx.try_recv().ok()).collect(),
            Err(_) => return,
        };
        for job in jobs {
            job();
        }
    }

    fn set_driver_running(&self, running: bool) {
        self.driver_running.store(running, Ordering::Release);
    }
}

/// Level assignment for one schedule pass.
#[derive(Default)]
pub struct Scheduler {
    levels: HashMap<ProcessorId, u32>,
    order: Vec<(u32, AudioProcessorP)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `proc` after everything it depends on. Returns the next level.
    pub fn schedule_processor(&mut self, proc: &AudioProcessorP) -> u32 {
        let id = proc.core().id();
        if let Some(level) = self.levels.get(&id) {
            return level + 1;
        }
        let mut level = 0;
        for dependency in proc.schedule_dependencies() {
            assert_return!(!same_processor(&dependency, proc), level + 1);
            level = level.max(self.schedule_processor(&dependency));
        }
        level = level.max(proc.schedule_children(self));
        self.levels.insert(id, level);
        self.order.push((level, proc.clone()));
        level + 1
    }

    pub fn level(&self, proc: &AudioProcessorP) -> Option<u32> {
        self.levels.get(&proc.core().id()).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn into_render_order(mut self) -> Vec<AudioProcessorP> {
        self.order.sort_by_key(|(level, _)| *level);
        self.order.into_iter().map(|(_, proc)| proc).collect()
    }
}

/// Root processors plus their level-sorted render order.
pub struct RenderGraph {
    engine: Arc<AudioEngine>,
    roots: Vec<AudioProcessorP>,
    schedule: Vec<AudioProcessorP>,
}

impl RenderGraph {
    pub fn new(engine: &Arc<AudioEngine>) -> Self {
        Self {
            engine: engine.clone(),
            roots: Vec::new(),
            schedule: Vec::new(),
        }
    }

    pub fn engine(&self) -> &Arc<AudioEngine> {
        &self.engine
    }

    pub fn add_root(&mut self, proc: AudioProcessorP) {
        if !self.roots.iter().any(|r| same_processor(r, &proc)) {
            self.roots.push(proc);
            self.engine.reschedule();
        }
    }

    pub fn remove_root(&mut self, proc: &AudioProcessorP) -> bool {
        let before = self.roots.len();
        self.roots.retain(|r| !same_processor(r, proc));
        let removed = self.roots.len() != before;
        if removed {
            self.engine.reschedule();
        }
        removed
    }

    pub fn roots(&self) -> &[AudioProcessorP] {
        &self.roots
    }

    pub fn render_order(&self) -> &[AudioProcessorP] {
        &self.schedule
    }

    pub fn reschedule_now(&mut self) {
        let mut scheduler = Scheduler::new();
        for root in &self.roots {
            scheduler.schedule_processor(root);
        }
        self.schedule = scheduler.into_render_order();
        debug!(target: "engine", "schedule: {} processors", self.schedule.len());
    }

    pub fn reset(&mut self) {
        let stamp = self.engine.frame_counter();
        for proc in &self.schedule {
            proc.reset(stamp);
        }
    }

    /// Render one block of `n_frames` and advance the transport.
    pub fn render_block(&mut self, n_frames: usize) {
        assert_return!(n_frames > 0 && n_frames <= AUDIO_BLOCK_MAX_RENDER_SIZE);
        let was_engine = AudioEngine::thread_is_engine();
        AudioEngine::mark_engine_thread(true);
        self.engine.run_jobs();
        if self.engine.take_reschedule() {
            self.reschedule_now();
        }
        for proc in &self.schedule {
            proc.core().begin_block();
        }
        for proc in &self.schedule {
            proc.render(n_frames);
        }
        self.engine.transport_mut().advance(n_frames);
        self.engine
            .frame_counter
            .fetch_add(n_frames as u64, Ordering::Relaxed);
        AudioEngine::mark_engine_thread(was_engine);
    }
}

/// Dedicated audio thread rendering at the engine's block cadence.
pub struct RenderDriver {
    engine: Arc<AudioEngine>,
    stop: Arc<AtomicBool>,
    thread: thread::JoinHandle<RenderGraph>,
}

impl RenderDriver {
    pub fn start(mut graph: RenderGraph) -> Result<Self, String> {
        let engine = graph.engine.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let block_frames = engine.block_frames();
        let period = Duration::from_secs_f64(block_frames as f64 / engine.sample_rate() as f64);
        engine.set_driver_running(true);
        let thread = thread::Builder::new()
            .name("anklang-audio".to_string())
            .spawn(move || {
                AudioEngine::mark_engine_thread(true);
                let mut deadline = Instant::now();
                while !stop_flag.load(Ordering::Acquire) {
                    graph.render_block(block_frames);
                    deadline += period;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    } else {
                        deadline = now;
                    }
                }
                graph.engine.run_jobs();
                AudioEngine::mark_engine_thread(false);
                graph
            })
            .map_err(|e| {
                engine.set_driver_running(false);
                format!("Failed to spawn audio thread: {e}")
            })?;
        Ok(Self {
            engine,
            stop,
            thread,
        })
    }

    pub fn stop(self) -> Result<RenderGraph, String> {
        self.stop.store(true, Ordering::Release);
        let graph = self
            .thread
            .join()
            .map_err(|_| "Audio thread panicked".to_string());
        self.engine.set_driver_running(false);
        self.engine.run_jobs();
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combo::{AudioChain, Combo};
    use crate::speakers::SpeakerArrangement;

    fn engine() -> Arc<AudioEngine> {
        AudioEngine::new(EngineOptions {
            block_frames: 64,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let options = EngineOptions {
            block_frames: 0,
            ..Default::default()
        };
        assert!(AudioEngine::new(options).is_err());
    }

    #[test]
    fn test_jobs_run_at_block_start() {
        let engine = engine();
        let mut graph = RenderGraph::new(&engine);
        let (tx, rx) = mpsc::channel();
        engine.async_job(move || {
            let _ = tx.send(AudioEngine::thread_is_engine());
        });
        assert!(rx.try_recv().is_err());
        graph.render_block(64);
        assert!(rx.try_recv().unwrap());
        assert_eq!(engine.frame_counter(), 64);
        assert!(!AudioEngine::thread_is_engine());
    }

    #[test]
    fn test_inline_job_without_driver() {
        let engine = engine();
        assert_eq!(engine.run_on_render_thread(|| 7).unwrap(), 7);
    }

    #[test]
    fn test_chain_renders_after_members() {
        let engine = engine();
        let outer = AudioChain::new(&engine, SpeakerArrangement::STEREO);
        let inner = AudioChain::new(&engine, SpeakerArrangement::STEREO);
        outer.insert(inner.clone(), None);
        let mut graph = RenderGraph::new(&engine);
        graph.add_root(outer.clone());
        graph.render_block(64);
        let order = graph.render_order();
        let pos = |p: &AudioProcessorP| order.iter().position(|q| same_processor(p, q));
        let outer_p: AudioProcessorP = outer;
        let inner_p: AudioProcessorP = inner;
        assert!(pos(&inner_p).unwrap() < pos(&outer_p).unwrap());
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn test_driver_runs_jobs() {
        let engine = engine();
        let graph = RenderGraph::new(&engine);
        let driver = RenderDriver::start(graph).unwrap();
        assert!(engine.driver_running());
        let on_engine = engine
            .run_on_render_thread(AudioEngine::thread_is_engine)
            .unwrap();
        assert!(on_engine);
        driver.stop().unwrap();
        assert!(!engine.driver_running());
    }
}
