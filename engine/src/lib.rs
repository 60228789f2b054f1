#[macro_use]
pub mod check;
pub mod audio;
pub mod combo;
pub mod config;
pub mod engine;
pub mod event_loop;
pub mod mathutils;
pub mod midi;
pub mod mutex;
pub mod plugins;
pub mod processor;
pub mod routing;
pub mod speakers;
pub mod telemetry;
pub mod transport;

pub use combo::{AudioChain, AudioCombo, Combo};
pub use config::EngineOptions;
pub use engine::AudioEngine;
pub use event_loop::EventLoop;
pub use midi::producer::MidiProducer;
pub use processor::{AudioProcessor, AudioProcessorInfo, AudioProcessorP, ProcessorRegistry};
