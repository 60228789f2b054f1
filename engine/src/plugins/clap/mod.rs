//! CLAP plugin hosting: module discovery, instance lifecycle and the render
//! graph adapter.

pub mod abi;
pub mod events;
pub mod file;
pub mod gui;
mod host;
pub mod handle;
pub mod wrapper;

pub use file::{ClapFileHandle, ClapPluginDescriptor, ClapPluginRegistry, list_clap_files};
pub use gui::{WindowBridge, WindowSetup, WindowingBridge};
pub use handle::{ClapExtensionSet, ClapHostContext, ClapPluginHandle, ClapPortInfos};
pub use wrapper::ClapAudioWrapper;
