use super::abi::*;
use super::file::ClapPluginDescriptor;
use super::gui::{WindowSetup, WindowingBridge};
use super::host;
use crate::audio::io::{AUDIO_BLOCK_MAX_RENDER_SIZE, ZEROS};
use crate::engine::AudioEngine;
use crate::event_loop::{EventLoop, PRIORITY_UPDATE};
use crate::mutex::UnsafeMutex;
use std::ffi::{CStr, CString, c_ulong, c_void};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error, warn};

/// Shortest timer period granted to plugins.
pub const MIN_TIMER_PERIOD_MS: u32 = 30;
pub const ACTIVATE_MIN_FRAMES: u32 = 32;
pub const ACTIVATE_MAX_FRAMES: u32 = 4096;

/// Non-real-time services a plugin instance calls back into.
#[derive(Clone)]
pub struct ClapHostContext {
    pub main_loop: Arc<EventLoop>,
    pub windowing: Arc<WindowingBridge>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClapAudioPortInfo {
    pub id: u32,
    pub name: String,
    pub flags: u32,
    pub channel_count: u32,
    pub port_type: Option<String>,
    pub in_place_pair: u32,
}

impl ClapAudioPortInfo {
    fn invalid() -> Self {
        Self {
            id: CLAP_INVALID_ID,
            name: String::new(),
            flags: 0,
            channel_count: 0,
            port_type: None,
            in_place_pair: CLAP_INVALID_ID,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.id != CLAP_INVALID_ID
    }

    pub fn is_main(&self) -> bool {
        self.flags & CLAP_AUDIO_PORT_IS_MAIN != 0
    }

    pub fn is_stereo(&self) -> bool {
        self.channel_count == 2 && self.port_type.as_deref() == Some(CLAP_PORT_STEREO)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClapNotePortInfo {
    pub id: u32,
    pub supported_dialects: u32,
    pub preferred_dialect: u32,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClapAudioPortsConfig {
    pub id: u32,
    pub name: String,
    pub input_port_count: u32,
    pub output_port_count: u32,
    pub main_input: Option<(u32, String)>,
    pub main_output: Option<(u32, String)>,
}

/// Port topology, captured once before activation.
#[derive(Clone, Debug, Default)]
pub struct ClapPortInfos {
    pub audio_ports_configs: Vec<ClapAudioPortsConfig>,
    pub note_iports: Vec<ClapNotePortInfo>,
    pub note_oports: Vec<ClapNotePortInfo>,
    pub audio_iports: Vec<ClapAudioPortInfo>,
    pub audio_oports: Vec<ClapAudioPortInfo>,
}

/// Which optional plugin extensions were found after `init`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClapExtensionSet {
    pub gui: bool,
    pub params: bool,
    pub timer_support: bool,
    pub audio_ports_config: bool,
    pub audio_ports: bool,
    pub note_ports: bool,
}

#[derive(Clone, Copy)]
struct PluginExtensions {
    gui: *const ClapPluginGui,
    params: *const ClapPluginParams,
    timer_support: *const ClapPluginTimerSupport,
    audio_ports_config: *const ClapPluginAudioPortsConfig,
    audio_ports: *const ClapPluginAudioPorts,
    note_ports: *const ClapPluginNotePorts,
}

impl Default for PluginExtensions {
    fn default() -> Self {
        Self {
            gui: std::ptr::null(),
            params: std::ptr::null(),
            timer_support: std::ptr::null(),
            audio_ports_config: std::ptr::null(),
            audio_ports: std::ptr::null(),
            note_ports: std::ptr::null(),
        }
    }
}

// SAFETY: extension tables are immutable and owned by the plugin instance.
unsafe impl Send for PluginExtensions {}

/// Channel pointer arrays handed to `process`.
struct PortBuffers {
    data32: Vec<*mut f32>,
    inputs: Vec<ClapAudioBuffer>,
    outputs: Vec<ClapAudioBuffer>,
    scratch: Vec<f32>,
    steady_time: i64,
}

impl PortBuffers {
    fn empty() -> Self {
        Self {
            data32: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            scratch: Vec::new(),
            steady_time: 0,
        }
    }
}

// SAFETY: the pointers refer to heap storage owned by this struct, to the
// static silence buffer, or to processor buffers bound for one render call.
unsafe impl Send for PortBuffers {}

#[derive(Clone, Copy, Debug, Default)]
struct GuiState {
    visible: bool,
    can_resize: bool,
    window_id: u64,
}

struct HostStrings {
    _name: CString,
    _vendor: CString,
    _url: CString,
    _version: CString,
}

fn anklang_host_name() -> String {
    let exe = std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_default();
    format!("Anklang//{exe}")
}

/// One instance of a CLAP plugin and the host table it calls back into.
pub struct ClapPluginHandle {
    descriptor: Arc<ClapPluginDescriptor>,
    ctx: ClapHostContext,
    self_weak: Weak<ClapPluginHandle>,
    _strings: HostStrings,
    clapid: CString,
    host: ClapHost,
    plugin: AtomicPtr<ClapPlugin>,
    extensions: UnsafeMutex<PluginExtensions>,
    ports: UnsafeMutex<ClapPortInfos>,
    buffers: UnsafeMutex<PortBuffers>,
    activated: AtomicBool,
    processing: AtomicBool,
    engine: UnsafeMutex<Option<Arc<AudioEngine>>>,
    gui: UnsafeMutex<GuiState>,
    timers: Mutex<Vec<u32>>,
}

// SAFETY: the host table only points at strings and at this handle, both
// immutable for its lifetime. Render state (buffers, processing) is touched by
// the render thread only, GUI and timer state by the main loop.
unsafe impl Send for ClapPluginHandle {}
// SAFETY: see Send.
unsafe impl Sync for ClapPluginHandle {}

impl ClapPluginHandle {
    /// Instantiate and initialize the plugin `descriptor` names.
    ///
    /// A failed `init` destroys the instance again and yields an error.
    pub fn create(
        descriptor: &Arc<ClapPluginDescriptor>,
        ctx: ClapHostContext,
    ) -> Result<Arc<Self>, String> {
        let clapid = CString::new(descriptor.id.as_str()).map_err(|e| e.to_string())?;
        let strings = HostStrings {
            _name: CString::new(anklang_host_name()).map_err(|e| e.to_string())?,
            _vendor: CString::new("anklang.testbit.eu").map_err(|e| e.to_string())?,
            _url: CString::new("https://anklang.testbit.eu/").map_err(|e| e.to_string())?,
            _version: CString::new(env!("CARGO_PKG_VERSION")).map_err(|e| e.to_string())?,
        };
        descriptor.open();
        let handle = Arc::new_cyclic(|weak: &Weak<Self>| Self {
            descriptor: descriptor.clone(),
            ctx,
            self_weak: weak.clone(),
            host: ClapHost {
                clap_version: CLAP_VERSION,
                host_data: weak.as_ptr() as *mut c_void,
                name: strings._name.as_ptr(),
                vendor: strings._vendor.as_ptr(),
                url: strings._url.as_ptr(),
                version: strings._version.as_ptr(),
                get_extension: Some(host::host_get_extension),
                request_restart: Some(host::host_request_restart),
                request_process: Some(host::host_request_process),
                request_callback: Some(host::host_request_callback),
            },
            _strings: strings,
            clapid,
            plugin: AtomicPtr::new(std::ptr::null_mut()),
            extensions: UnsafeMutex::new(PluginExtensions::default()),
            ports: UnsafeMutex::new(ClapPortInfos::default()),
            buffers: UnsafeMutex::new(PortBuffers::empty()),
            activated: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            engine: UnsafeMutex::new(None),
            gui: UnsafeMutex::new(GuiState::default()),
            timers: Mutex::new(Vec::new()),
        });
        handle.instantiate()?;
        Ok(handle)
    }

    fn instantiate(&self) -> Result<(), String> {
        let entry = self.descriptor.entry();
        if entry.is_null() {
            return Err(format!("{}: plugin module is not loaded", self.clapid()));
        }
        // SAFETY: entry is initialized while the descriptor is open.
        let entry = unsafe { &*entry };
        let get_factory = entry
            .get_factory
            .ok_or_else(|| "CLAP entry missing get_factory()".to_string())?;
        // SAFETY: static factory id.
        let factory = unsafe { get_factory(CLAP_PLUGIN_FACTORY_ID.as_ptr()) } as *const ClapPluginFactory;
        if factory.is_null() {
            return Err("CLAP plugin factory not found".to_string());
        }
        // SAFETY: factory pointer validated above.
        let create = unsafe { (*factory).create_plugin }
            .ok_or_else(|| "CLAP factory missing create_plugin()".to_string())?;
        // SAFETY: the host table lives inside this handle, at a stable address.
        let plugin = unsafe { create(factory, &self.host, self.clapid.as_ptr()) };
        if plugin.is_null() {
            return Err(format!("{}: create_plugin failed", self.clapid()));
        }
        self.plugin.store(plugin as *mut ClapPlugin, Ordering::Release);
        // SAFETY: plugin pointer validated above.
        let initialized = match unsafe { (*plugin).init } {
            // SAFETY: init is the first call on a new instance.
            Some(init) => unsafe { init(plugin) },
            None => false,
        };
        if !initialized {
            debug!(target: "clap", "{}: initialization failed", self.clapid());
            self.destroy();
            return Err(format!("{}: plugin init() failed", self.clapid()));
        }
        debug!(target: "clap", "{}: initialized", self.clapid());
        let ext = |id: &CStr| -> *const c_void {
            // SAFETY: plugin is initialized, id is a static C string.
            match unsafe { (*plugin).get_extension } {
                Some(get_extension) => unsafe { get_extension(plugin, id.as_ptr()) },
                None => std::ptr::null(),
            }
        };
        self.extensions.set(PluginExtensions {
            gui: ext(CLAP_EXT_GUI).cast(),
            params: ext(CLAP_EXT_PARAMS).cast(),
            timer_support: ext(CLAP_EXT_TIMER_SUPPORT).cast(),
            audio_ports_config: ext(CLAP_EXT_AUDIO_PORTS_CONFIG).cast(),
            audio_ports: ext(CLAP_EXT_AUDIO_PORTS).cast(),
            note_ports: ext(CLAP_EXT_NOTE_PORTS).cast(),
        });
        self.get_port_infos();
        Ok(())
    }

    pub fn clapid(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &Arc<ClapPluginDescriptor> {
        &self.descriptor
    }

    pub fn context(&self) -> &ClapHostContext {
        &self.ctx
    }

    /// The table the plugin got at creation.
    pub fn clap_host(&self) -> *const ClapHost {
        &self.host
    }

    fn plugin_ptr(&self) -> *const ClapPlugin {
        self.plugin.load(Ordering::Acquire)
    }

    pub fn has_plugin(&self) -> bool {
        !self.plugin_ptr().is_null()
    }

    pub fn extensions(&self) -> ClapExtensionSet {
        let ext = self.extensions.get();
        ClapExtensionSet {
            gui: !ext.gui.is_null(),
            params: !ext.params.is_null(),
            timer_support: !ext.timer_support.is_null(),
            audio_ports_config: !ext.audio_ports_config.is_null(),
            audio_ports: !ext.audio_ports.is_null(),
            note_ports: !ext.note_ports.is_null(),
        }
    }

    pub fn param_count(&self) -> u32 {
        let plugin = self.plugin_ptr();
        let params = self.extensions.get().params;
        if plugin.is_null() || params.is_null() {
            return 0;
        }
        // SAFETY: extension table of a live plugin.
        match unsafe { (*params).count } {
            // SAFETY: see above.
            Some(count) => unsafe { count(plugin) },
            None => 0,
        }
    }

    pub fn port_infos(&self) -> ClapPortInfos {
        self.ports.lock().clone()
    }

    /// Query port topology and prepare the channel pointer arrays, inputs
    /// read silence and outputs write to scratch until bound.
    fn get_port_infos(&self) {
        assert_return!(!self.activated());
        let plugin = self.plugin_ptr();
        let ext = self.extensions.get();
        let mut infos = ClapPortInfos::default();

        if !ext.audio_ports_config.is_null() {
            // SAFETY: extension table of a live plugin.
            let table = unsafe { &*ext.audio_ports_config };
            if let (Some(count), Some(get)) = (table.count, table.get) {
                // SAFETY: plugin functions from its extension table.
                for i in 0..unsafe { count(plugin) } {
                    // SAFETY: zeroed plain C struct, filled by the plugin.
                    let mut raw: ClapAudioPortsConfigRaw = unsafe { std::mem::zeroed() };
                    // SAFETY: i < count, raw is writable.
                    let config = if unsafe { get(plugin, i, &mut raw) } {
                        // SAFETY: port type strings are null or NUL terminated.
                        let port_type = |ptr| unsafe { c_str_to_option(ptr) }.unwrap_or_default();
                        ClapAudioPortsConfig {
                            id: raw.id,
                            name: c_char_buf_to_string(&raw.name),
                            input_port_count: raw.input_port_count,
                            output_port_count: raw.output_port_count,
                            main_input: raw.has_main_input.then(|| {
                                (raw.main_input_channel_count, port_type(raw.main_input_port_type))
                            }),
                            main_output: raw.has_main_output.then(|| {
                                (raw.main_output_channel_count, port_type(raw.main_output_port_type))
                            }),
                        }
                    } else {
                        ClapAudioPortsConfig {
                            id: CLAP_INVALID_ID,
                            name: String::new(),
                            input_port_count: 0,
                            output_port_count: 0,
                            main_input: None,
                            main_output: None,
                        }
                    };
                    infos.audio_ports_configs.push(config);
                }
            }
        }
        if !infos.audio_ports_configs.is_empty() {
            let mut s = format!("audio_configs:{}:", infos.audio_ports_configs.len());
            for c in infos.audio_ports_configs.iter().filter(|c| c.id != CLAP_INVALID_ID) {
                s += &format!(" {}:{}:iports={}:oports={}:imain={:?}:omain={:?}",
                              c.id, c.name, c.input_port_count, c.output_port_count,
                              c.main_input, c.main_output);
            }
            debug!(target: "clap", "{}: {s}", self.clapid());
        }

        for is_input in [true, false] {
            let mut ports = Vec::new();
            if !ext.note_ports.is_null() {
                // SAFETY: extension table of a live plugin.
                let table = unsafe { &*ext.note_ports };
                if let (Some(count), Some(get)) = (table.count, table.get) {
                    // SAFETY: plugin functions from its extension table.
                    for i in 0..unsafe { count(plugin, is_input) } {
                        // SAFETY: zeroed plain C struct, filled by the plugin.
                        let mut raw: ClapNotePortInfoRaw = unsafe { std::mem::zeroed() };
                        // SAFETY: i < count, raw is writable.
                        let ok = unsafe { get(plugin, i, is_input, &mut raw) };
                        ports.push(ClapNotePortInfo {
                            id: if ok { raw.id } else { CLAP_INVALID_ID },
                            supported_dialects: if ok { raw.supported_dialects } else { 0 },
                            preferred_dialect: if ok { raw.preferred_dialect } else { 0 },
                            name: if ok { c_char_buf_to_string(&raw.name) } else { String::new() },
                        });
                    }
                }
            }
            if !ports.is_empty() {
                let mut s = format!("note_{}ports={}:", if is_input { "i" } else { "o" }, ports.len());
                for p in ports.iter().filter(|p| p.id != CLAP_INVALID_ID) {
                    s += &format!(" {}:{}:can={:x}:want={:x}", p.id, p.name,
                                  p.supported_dialects, p.preferred_dialect);
                }
                debug!(target: "clap", "{}: {s}", self.clapid());
            }
            if is_input {
                infos.note_iports = ports;
            } else {
                infos.note_oports = ports;
            }
        }

        for is_input in [true, false] {
            let mut ports = Vec::new();
            if !ext.audio_ports.is_null() {
                // SAFETY: extension table of a live plugin.
                let table = unsafe { &*ext.audio_ports };
                if let (Some(count), Some(get)) = (table.count, table.get) {
                    // SAFETY: plugin functions from its extension table.
                    for i in 0..unsafe { count(plugin, is_input) } {
                        // SAFETY: zeroed plain C struct, filled by the plugin.
                        let mut raw: ClapAudioPortInfoRaw = unsafe { std::mem::zeroed() };
                        // SAFETY: i < count, raw is writable.
                        let info = if unsafe { get(plugin, i, is_input, &mut raw) } {
                            ClapAudioPortInfo {
                                id: raw.id,
                                name: c_char_buf_to_string(&raw.name),
                                flags: raw.flags,
                                channel_count: raw.channel_count,
                                // SAFETY: port type is null or NUL terminated.
                                port_type: unsafe { c_str_to_option(raw.port_type) },
                                in_place_pair: raw.in_place_pair,
                            }
                        } else {
                            ClapAudioPortInfo::invalid()
                        };
                        ports.push(info);
                    }
                }
            }
            if !ports.is_empty() {
                let mut s = format!("audio_{}ports={}:", if is_input { "i" } else { "o" }, ports.len());
                for p in ports.iter().filter(|p| p.is_valid() && p.port_type.is_some()) {
                    s += &format!(" {}:ch={}:{}:m={}:{}:", p.id, p.channel_count, p.name,
                                  p.is_main() as u8, p.port_type.as_deref().unwrap_or_default());
                }
                debug!(target: "clap", "{}: {s}", self.clapid());
            }
            if is_input {
                infos.audio_iports = ports;
            } else {
                infos.audio_oports = ports;
            }
        }

        let total_channels: usize = infos
            .audio_iports
            .iter()
            .chain(infos.audio_oports.iter())
            .filter(|p| p.is_valid())
            .map(|p| p.channel_count as usize)
            .sum();
        let mut buffers = PortBuffers {
            data32: vec![std::ptr::null_mut(); total_channels],
            inputs: vec![ClapAudioBuffer::EMPTY; infos.audio_iports.len()],
            outputs: vec![ClapAudioBuffer::EMPTY; infos.audio_oports.len()],
            scratch: vec![0.0; AUDIO_BLOCK_MAX_RENDER_SIZE],
            steady_time: 0,
        };
        let zeros = ZEROS.as_ptr() as *mut f32;
        let scratch = buffers.scratch.as_mut_ptr();
        let mut offset = 0;
        let base = buffers.data32.as_mut_ptr();
        for (ports, clap_buffers, fill) in [
            (&infos.audio_iports, &mut buffers.inputs, zeros),
            (&infos.audio_oports, &mut buffers.outputs, scratch),
        ] {
            for (port, buffer) in ports.iter().zip(clap_buffers.iter_mut()) {
                if !port.is_valid() {
                    continue;
                }
                let channels = port.channel_count as usize;
                // SAFETY: offset + channels <= total_channels by construction.
                buffer.data32 = unsafe { base.add(offset) };
                buffer.channel_count = port.channel_count;
                for ch in 0..channels {
                    // SAFETY: within the slice reserved for this port.
                    unsafe { *buffer.data32.add(ch) = fill };
                }
                offset += channels;
            }
        }
        debug_assert_eq!(offset, total_channels);
        *self.ports.lock() = infos;
        *self.buffers.lock() = buffers;
    }

    pub fn activated(&self) -> bool {
        self.activated.load(Ordering::Acquire)
    }

    pub fn processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Activate for the engine sample rate and start processing on the
    /// render thread. Returns the activation state.
    pub fn activate(self: &Arc<Self>, engine: &Arc<AudioEngine>) -> bool {
        let plugin = self.plugin_ptr();
        assert_return!(!plugin.is_null(), false);
        if self.activated() {
            warn!(target: "clap", "{}: activate: already activated", self.clapid());
            return true;
        }
        // SAFETY: plugin pointer validated above.
        let activated = match unsafe { (*plugin).activate } {
            // SAFETY: the instance is initialized and inactive.
            Some(activate) => unsafe {
                activate(
                    plugin,
                    engine.sample_rate() as f64,
                    ACTIVATE_MIN_FRAMES,
                    ACTIVATE_MAX_FRAMES,
                )
            },
            None => false,
        };
        self.activated.store(activated, Ordering::Release);
        debug!(target: "clap", "{}: activate: {activated}", self.clapid());
        if activated {
            *self.engine.lock() = Some(engine.clone());
            let handle = self.clone();
            if let Err(e) = engine.run_on_render_thread(move || handle.start_processing()) {
                error!(target: "clap", "{}: start_processing: {e}", self.clapid());
            }
        }
        activated
    }

    /// Stop processing on the render thread, then deactivate.
    pub fn deactivate(&self) {
        let plugin = self.plugin_ptr();
        if plugin.is_null() || !self.activated() {
            return;
        }
        let engine = self.engine.lock().take();
        match (self.self_weak.upgrade(), engine) {
            (Some(handle), Some(engine)) => {
                if let Err(e) = engine.run_on_render_thread(move || handle.stop_processing()) {
                    error!(target: "clap", "{}: stop_processing: {e}", self.clapid());
                }
            }
            // Last reference is gone, nothing renders this handle anymore.
            _ => self.stop_processing(),
        }
        self.activated.store(false, Ordering::Release);
        // SAFETY: plugin pointer validated above.
        if let Some(deactivate) = unsafe { (*plugin).deactivate } {
            // SAFETY: the instance is active and no longer processing.
            unsafe { deactivate(plugin) };
        }
        debug!(target: "clap", "{}: deactivated", self.clapid());
    }

    /// Render thread only.
    pub fn start_processing(&self) -> bool {
        if self.processing() {
            return true;
        }
        let plugin = self.plugin_ptr();
        assert_return!(!plugin.is_null() && self.activated(), false);
        // SAFETY: plugin pointer validated above.
        let started = match unsafe { (*plugin).start_processing } {
            // SAFETY: the instance is active.
            Some(start) => unsafe { start(plugin) },
            None => false,
        };
        if started {
            let frame_counter = self.engine.lock().as_ref().map_or(0, |e| e.frame_counter());
            self.buffers.lock().steady_time = frame_counter as i64;
        }
        self.processing.store(started, Ordering::Release);
        debug!(target: "clap", "{}: start_processing: {started}", self.clapid());
        started
    }

    /// Render thread only.
    pub fn stop_processing(&self) {
        if !self.processing() {
            return;
        }
        self.processing.store(false, Ordering::Release);
        let plugin = self.plugin_ptr();
        if plugin.is_null() {
            return;
        }
        // SAFETY: plugin pointer validated above.
        if let Some(stop) = unsafe { (*plugin).stop_processing } {
            // SAFETY: the instance is processing.
            unsafe { stop(plugin) };
        }
        debug!(target: "clap", "{}: stop_processing", self.clapid());
    }

    /// Point channel `channel` of audio port `port` at `data` for the next
    /// `process` call.
    pub fn bind_channel(&self, is_input: bool, port: usize, channel: usize, data: *mut f32) -> bool {
        let buffers = self.buffers.lock();
        let ports = if is_input {
            &mut buffers.inputs
        } else {
            &mut buffers.outputs
        };
        let Some(buffer) = ports.get_mut(port) else {
            return false;
        };
        assert_return!(channel < buffer.channel_count as usize, false);
        // SAFETY: channel < channel_count, data32 holds channel_count pointers.
        unsafe { *buffer.data32.add(channel) = data };
        true
    }

    /// Render `frames` frames, returns the plugin's process status.
    pub fn process(
        &self,
        frames: u32,
        in_events: &ClapInputEvents,
        out_events: &ClapOutputEvents,
    ) -> i32 {
        assert_return!(self.processing(), CLAP_PROCESS_ERROR);
        let plugin = self.plugin_ptr();
        assert_return!(!plugin.is_null(), CLAP_PROCESS_ERROR);
        // SAFETY: plugin pointer validated above.
        let Some(process) = (unsafe { (*plugin).process }) else {
            return CLAP_PROCESS_ERROR;
        };
        let buffers = self.buffers.lock();
        let info = ClapProcess {
            steady_time: buffers.steady_time,
            frames_count: frames,
            transport: std::ptr::null(),
            audio_inputs: buffers.inputs.as_ptr(),
            audio_outputs: buffers.outputs.as_mut_ptr(),
            audio_inputs_count: buffers.inputs.len() as u32,
            audio_outputs_count: buffers.outputs.len() as u32,
            in_events,
            out_events,
        };
        buffers.steady_time += frames as i64;
        // SAFETY: all pointers in `info` stay valid for the duration of the call.
        unsafe { process(plugin, &info) }
    }

    /// Tear down in order: GUI, activation, timers, instance. Repeatable.
    pub fn destroy(&self) {
        self.destroy_gui();
        if self.activated() {
            self.deactivate();
        }
        let plugin = self.plugin_ptr();
        if !plugin.is_null() {
            debug!(target: "clap", "{}: destroying", self.clapid());
        }
        loop {
            let Some(timer_id) = self.timers().last().copied() else {
                break;
            };
            self.unregister_timer(timer_id);
        }
        if !plugin.is_null() {
            // SAFETY: plugin pointer validated above.
            if let Some(destroy) = unsafe { (*plugin).destroy } {
                // SAFETY: last call on this instance.
                unsafe { destroy(plugin) };
            }
        }
        self.plugin.store(std::ptr::null_mut(), Ordering::Release);
        self.extensions.set(PluginExtensions::default());
    }

    fn timers(&self) -> MutexGuard<'_, Vec<u32>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn timer_ids(&self) -> Vec<u32> {
        self.timers().clone()
    }

    pub(super) fn register_timer(&self, period_ms: u32) -> u32 {
        let period_ms = period_ms.max(MIN_TIMER_PERIOD_MS);
        let weak = self.self_weak.clone();
        let id_cell = Arc::new(AtomicU32::new(0));
        let timer_id = id_cell.clone();
        let id = self.ctx.main_loop.exec_timer(
            move || {
                let Some(handle) = weak.upgrade() else {
                    return false;
                };
                handle.call_on_timer(timer_id.load(Ordering::Acquire));
                true
            },
            period_ms,
            period_ms,
            PRIORITY_UPDATE,
        );
        id_cell.store(id, Ordering::Release);
        self.timers().push(id);
        debug!(target: "clap", "{}: register_timer: ms={period_ms}: id={id}", self.clapid());
        id
    }

    pub(super) fn unregister_timer(&self, timer_id: u32) -> bool {
        let deleted = {
            let mut timers = self.timers();
            match timers.iter().position(|&id| id == timer_id) {
                Some(pos) => {
                    timers.remove(pos);
                    true
                }
                None => false,
            }
        };
        if deleted {
            self.ctx.main_loop.remove(timer_id);
        }
        debug!(target: "clap", "{}: unregister_timer: deleted={deleted}: id={timer_id}", self.clapid());
        deleted
    }

    fn call_on_timer(&self, timer_id: u32) {
        let plugin = self.plugin_ptr();
        // Plugins may register timers during init, before the extension is known.
        let timer_support = self.extensions.get().timer_support;
        if plugin.is_null() || timer_support.is_null() {
            return;
        }
        // SAFETY: extension table of a live plugin.
        if let Some(on_timer) = unsafe { (*timer_support).on_timer } {
            // SAFETY: main loop thread, live instance.
            unsafe { on_timer(plugin, timer_id) };
        }
    }

    pub(super) fn is_main_thread(&self) -> bool {
        self.ctx.main_loop.is_loop_thread()
    }

    pub(super) fn request_callback(&self) {
        let weak = self.self_weak.clone();
        self.ctx.main_loop.exec_callback(move || {
            if let Some(handle) = weak.upgrade() {
                handle.on_main_thread();
            }
        });
    }

    fn on_main_thread(&self) {
        let plugin = self.plugin_ptr();
        if plugin.is_null() {
            return;
        }
        // SAFETY: plugin pointer validated above.
        if let Some(on_main_thread) = unsafe { (*plugin).on_main_thread } {
            // SAFETY: called from the main loop for a live instance.
            unsafe { on_main_thread(plugin) };
        }
    }

    pub fn gui_visible(&self) -> bool {
        self.gui.get().visible
    }

    pub fn gui_window_id(&self) -> u64 {
        self.gui.get().window_id
    }

    fn gui_ext(&self) -> Option<(*const ClapPlugin, &ClapPluginGui)> {
        let plugin = self.plugin_ptr();
        let gui = self.extensions.get().gui;
        if plugin.is_null() || gui.is_null() {
            return None;
        }
        // SAFETY: extension table of a live plugin.
        Some((plugin, unsafe { &*gui }))
    }

    /// Create the editor window on first use and show it.
    pub fn show_gui(&self) -> bool {
        let Some((plugin, gui)) = self.gui_ext() else {
            return false;
        };
        let Some(bridge) = self.ctx.windowing.bridge() else {
            debug!(target: "clap", "{}: show_gui: no window bridge", self.clapid());
            return false;
        };
        let mut state = self.gui.get();
        if state.window_id == 0 {
            let api = CLAP_WINDOW_API_X11;
            let floating = false;
            // SAFETY (all GUI calls below): live instance, main thread, api is a static C string.
            let supported = gui
                .is_api_supported
                .is_some_and(|f| unsafe { f(plugin, api.as_ptr(), floating) });
            if !supported {
                debug!(target: "clap", "{}: gui: x11 unsupported", self.clapid());
                return false;
            }
            let created = gui.create.is_some_and(|f| unsafe { f(plugin, api.as_ptr(), floating) });
            debug!(target: "clap", "{}: gui_create: {created}", self.clapid());
            if !created {
                return false;
            }
            state.can_resize = gui.can_resize.is_some_and(|f| unsafe { f(plugin) });
            let scale = 1.0;
            let scaled = gui.set_scale.is_some_and(|f| unsafe { f(plugin, scale) });
            let (mut width, mut height) = (0_u32, 0_u32);
            let sized = gui
                .get_size
                .is_some_and(|f| unsafe { f(plugin, &mut width, &mut height) });
            debug!(target: "clap", "{}: gui: can_resize={} scale={scaled} size={width}x{height}:{sized}",
                   self.clapid(), state.can_resize);

            let weak = self.self_weak.clone();
            let main_loop = self.ctx.main_loop.clone();
            let window_id = bridge.create_window(WindowSetup {
                title: self.clapid().to_string(),
                width,
                height,
                on_delete: Box::new(move || {
                    let weak = weak.clone();
                    main_loop.exec_callback(move || {
                        if let Some(handle) = weak.upgrade() {
                            debug!(target: "clap", "{}: gui delete request", handle.clapid());
                            handle.destroy_gui();
                        }
                    });
                }),
            });
            if window_id == 0 {
                warn!(target: "clap", "{}: failed to create editor window", self.clapid());
                if let Some(destroy) = gui.destroy {
                    unsafe { destroy(plugin) };
                }
                return false;
            }
            let window = ClapWindow {
                api: api.as_ptr(),
                handle: ClapWindowHandle {
                    x11: window_id as c_ulong,
                },
            };
            let parented = gui.set_parent.is_some_and(|f| unsafe { f(plugin, &window) });
            debug!(target: "clap", "{}: gui_set_parent: {parented}", self.clapid());
            state.window_id = window_id;
            self.gui.set(state);
        }
        // Some plugins report false from show() although the editor appears.
        let shown = gui.show.is_some_and(|f| unsafe { f(plugin) });
        debug!(target: "clap", "{}: gui_show: {shown}", self.clapid());
        bridge.show_window(state.window_id);
        state.visible = shown;
        self.gui.set(state);
        true
    }

    pub fn hide_gui(&self) {
        let mut state = self.gui.get();
        if state.window_id == 0 {
            return;
        }
        if let Some((plugin, gui)) = self.gui_ext()
            && let Some(hide) = gui.hide
        {
            // SAFETY: live instance with a created editor.
            unsafe { hide(plugin) };
        }
        if let Some(bridge) = self.ctx.windowing.bridge() {
            bridge.hide_window(state.window_id);
        }
        state.visible = false;
        self.gui.set(state);
    }

    pub fn destroy_gui(&self) {
        self.hide_gui();
        let mut state = self.gui.get();
        if state.window_id == 0 {
            return;
        }
        if let Some((plugin, gui)) = self.gui_ext()
            && let Some(destroy) = gui.destroy
        {
            // SAFETY: live instance with a created editor.
            unsafe { destroy(plugin) };
        }
        if let Some(bridge) = self.ctx.windowing.bridge() {
            bridge.destroy_window(state.window_id);
        }
        state.window_id = 0;
        self.gui.set(state);
    }

    /// Host window first, the plugin follows only if it can resize.
    pub(super) fn request_resize(&self, width: u32, height: u32) -> bool {
        let state = self.gui.get();
        debug!(target: "clap", "{}: request_resize({width},{height})", self.clapid());
        if state.window_id == 0 {
            return false;
        }
        let Some(bridge) = self.ctx.windowing.bridge() else {
            return false;
        };
        if !bridge.resize_window(state.window_id, width, height) {
            return false;
        }
        if let Some((plugin, gui)) = self.gui_ext() {
            // SAFETY: live instance with a created editor.
            let can_resize = gui.can_resize.is_some_and(|f| unsafe { f(plugin) });
            if can_resize && let Some(set_size) = gui.set_size {
                // SAFETY: see above.
                unsafe { set_size(plugin, width, height) };
            }
        }
        true
    }

    /// The plugin closed its editor on its own.
    pub(super) fn gui_closed(&self, was_destroyed: bool) {
        debug!(target: "clap", "{}: gui closed (was_destroyed={was_destroyed})", self.clapid());
        let mut state = self.gui.get();
        state.visible = false;
        if was_destroyed && let Some((plugin, gui)) = self.gui_ext() {
            let window_id = std::mem::take(&mut state.window_id);
            if let Some(destroy) = gui.destroy {
                // SAFETY: live instance, the editor is gone on the plugin side.
                unsafe { destroy(plugin) };
            }
            if window_id != 0
                && let Some(bridge) = self.ctx.windowing.bridge()
            {
                bridge.destroy_window(window_id);
            }
        }
        self.gui.set(state);
    }

    pub(super) fn log(&self, severity: i32, message: &str) {
        const TAGS: [&str; 7] = [
            "DEBUG",
            "INFO",
            "WARNING",
            "ERROR",
            "FATAL",
            "BADHOST",
            "BADPLUGIN",
        ];
        let tag = usize::try_from(severity)
            .ok()
            .and_then(|i| TAGS.get(i))
            .copied()
            .unwrap_or("MISC");
        match severity {
            CLAP_LOG_DEBUG => debug!(target: "clap", "{}: {message}", self.clapid()),
            CLAP_LOG_INFO | CLAP_LOG_WARNING => {
                warn!(target: "clap", "CLAP-{tag}:{}: {message}", self.clapid())
            }
            _ => error!(target: "clap", "CLAP-{tag}:{}: {message}", self.clapid()),
        }
    }
}

impl Drop for ClapPluginHandle {
    fn drop(&mut self) {
        self.destroy();
        self.descriptor.close();
    }
}

/// Cast the plugin's `host` argument back to its handle.
///
/// # Safety
/// `host` must be null or the table of a live [`ClapPluginHandle`].
pub(super) unsafe fn handle_from_host<'a>(host: *const ClapHost) -> Option<&'a ClapPluginHandle> {
    if host.is_null() {
        return None;
    }
    // SAFETY: per the caller contract.
    let data = unsafe { (*host).host_data } as *const ClapPluginHandle;
    // SAFETY: host_data was set to the handle owning this table.
    (!data.is_null()).then(|| unsafe { &*data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_port_predicates() {
        let mut port = ClapAudioPortInfo::invalid();
        assert!(!port.is_valid() && !port.is_main() && !port.is_stereo());
        port.id = 7;
        port.flags = CLAP_AUDIO_PORT_IS_MAIN;
        port.channel_count = 2;
        assert!(port.is_valid() && port.is_main());
        assert!(!port.is_stereo());
        port.port_type = Some(CLAP_PORT_STEREO.to_string());
        assert!(port.is_stereo());
        port.channel_count = 1;
        assert!(!port.is_stereo());
    }
}
