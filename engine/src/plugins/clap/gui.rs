//! Host side windows that embed plugin editors.

use crate::config::EngineOptions;
use libloading::Library;
use std::collections::HashMap;
use std::ffi::{CString, c_char, c_ulong, c_void};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, warn};

pub struct WindowSetup {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Called from the toolkit thread when the user closes the window.
    pub on_delete: Box<dyn Fn() + Send + Sync>,
}

/// Native top level windows, identified by X11 window id.
pub trait WindowBridge: Send + Sync {
    /// Returns 0 when no window could be created.
    fn create_window(&self, setup: WindowSetup) -> u64;
    fn show_window(&self, window_id: u64);
    fn hide_window(&self, window_id: u64);
    fn resize_window(&self, window_id: u64, width: u32, height: u32) -> bool;
    fn destroy_window(&self, window_id: u64);
}

pub const WINDOW_BRIDGE_SYMBOL: &[u8] = b"anklang_window_bridge\0";

/// Function table exported by a bridge module through `anklang_window_bridge()`.
#[repr(C)]
pub struct WindowBridgeTable {
    pub create_window: Option<
        unsafe extern "C" fn(
            title: *const c_char,
            width: u32,
            height: u32,
            on_delete: Option<unsafe extern "C" fn(*mut c_void)>,
            data: *mut c_void,
        ) -> c_ulong,
    >,
    pub show_window: Option<unsafe extern "C" fn(c_ulong)>,
    pub hide_window: Option<unsafe extern "C" fn(c_ulong)>,
    pub resize_window: Option<unsafe extern "C" fn(c_ulong, u32, u32) -> bool>,
    pub destroy_window: Option<unsafe extern "C" fn(c_ulong)>,
}

struct DeleteHook(Box<dyn Fn() + Send + Sync>);

unsafe extern "C" fn delete_trampoline(data: *mut c_void) {
    if data.is_null() {
        return;
    }
    // SAFETY: data is the boxed hook registered with the window, it lives
    // until destroy_window removes it.
    let hook = unsafe { &*(data as *const DeleteHook) };
    (hook.0)();
}

struct ModuleBridge {
    _library: Library,
    table: *const WindowBridgeTable,
    hooks: Mutex<HashMap<u64, Box<DeleteHook>>>,
}

// SAFETY: the table is immutable and lives as long as `_library`; the module
// contract requires its functions to be callable from any thread.
unsafe impl Send for ModuleBridge {}
// SAFETY: see Send, mutable state is behind the hooks mutex.
unsafe impl Sync for ModuleBridge {}

impl ModuleBridge {
    fn load(path: &PathBuf) -> Result<Self, String> {
        // SAFETY: the bridge module is configured explicitly by the user.
        let library = unsafe { Library::new(path) }.map_err(|e| e.to_string())?;
        // SAFETY: the symbol is a function returning the bridge table.
        let table = unsafe {
            let sym = library
                .get::<unsafe extern "C" fn() -> *const WindowBridgeTable>(WINDOW_BRIDGE_SYMBOL)
                .map_err(|e| e.to_string())?;
            sym()
        };
        if table.is_null() {
            return Err("window bridge table is null".to_string());
        }
        Ok(Self {
            _library: library,
            table,
            hooks: Mutex::new(HashMap::new()),
        })
    }

    fn table(&self) -> &WindowBridgeTable {
        // SAFETY: validated non-null in `load`, owned by `_library`.
        unsafe { &*self.table }
    }
}

impl WindowBridge for ModuleBridge {
    fn create_window(&self, setup: WindowSetup) -> u64 {
        let Some(create) = self.table().create_window else {
            return 0;
        };
        let Ok(title) = CString::new(setup.title.replace('\0', " ")) else {
            return 0;
        };
        let hook = Box::new(DeleteHook(setup.on_delete));
        let data = &*hook as *const DeleteHook as *mut c_void;
        // SAFETY: title outlives the call, the hook outlives the window.
        let window_id =
            unsafe { create(title.as_ptr(), setup.width, setup.height, Some(delete_trampoline), data) }
                as u64;
        if window_id != 0 {
            self.hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(window_id, hook);
        }
        window_id
    }

    fn show_window(&self, window_id: u64) {
        if let Some(show) = self.table().show_window {
            // SAFETY: bridge function from the loaded table.
            unsafe { show(window_id as c_ulong) };
        }
    }

    fn hide_window(&self, window_id: u64) {
        if let Some(hide) = self.table().hide_window {
            // SAFETY: bridge function from the loaded table.
            unsafe { hide(window_id as c_ulong) };
        }
    }

    fn resize_window(&self, window_id: u64, width: u32, height: u32) -> bool {
        match self.table().resize_window {
            // SAFETY: bridge function from the loaded table.
            Some(resize) => unsafe { resize(window_id as c_ulong, width, height) },
            None => false,
        }
    }

    fn destroy_window(&self, window_id: u64) {
        if let Some(destroy) = self.table().destroy_window {
            // SAFETY: bridge function from the loaded table.
            unsafe { destroy(window_id as c_ulong) };
        }
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&window_id);
    }
}

enum BridgeSource {
    Module(PathBuf),
    Provided(Arc<dyn WindowBridge>),
    Disabled,
}

/// Window bridge resolved on first use, a failed load leaves GUIs unsupported.
pub struct WindowingBridge {
    source: BridgeSource,
    bridge: OnceLock<Option<Arc<dyn WindowBridge>>>,
}

impl WindowingBridge {
    pub fn module(path: impl Into<PathBuf>) -> Self {
        Self::with_source(BridgeSource::Module(path.into()))
    }

    pub fn provided(bridge: Arc<dyn WindowBridge>) -> Self {
        Self::with_source(BridgeSource::Provided(bridge))
    }

    pub fn disabled() -> Self {
        Self::with_source(BridgeSource::Disabled)
    }

    pub fn from_options(options: &EngineOptions) -> Self {
        match &options.gui_bridge {
            Some(path) => Self::module(path.clone()),
            None => Self::disabled(),
        }
    }

    fn with_source(source: BridgeSource) -> Self {
        Self {
            source,
            bridge: OnceLock::new(),
        }
    }

    pub fn bridge(&self) -> Option<Arc<dyn WindowBridge>> {
        self.bridge
            .get_or_init(|| match &self.source {
                BridgeSource::Module(path) => match ModuleBridge::load(path) {
                    Ok(bridge) => {
                        debug!(target: "clap", "window bridge: {}", path.display());
                        Some(Arc::new(bridge) as Arc<dyn WindowBridge>)
                    }
                    Err(e) => {
                        warn!(target: "clap", "window bridge unavailable: {}: {e}", path.display());
                        None
                    }
                },
                BridgeSource::Provided(bridge) => Some(bridge.clone()),
                BridgeSource::Disabled => None,
            })
            .clone()
    }
}
