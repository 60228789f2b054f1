//! C layout of the CLAP structures the host touches.
//!
//! Field order and types follow the CLAP 1.x headers, function tables are
//! `Option<unsafe extern "C" fn>` so a missing entry reads as `None`.

use std::ffi::{CStr, c_char, c_ulong, c_void};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClapVersion {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
}

pub const CLAP_VERSION: ClapVersion = ClapVersion {
    major: 1,
    minor: 2,
    revision: 0,
};

pub fn clap_version_is_compatible(version: ClapVersion) -> bool {
    version.major >= 1
}

pub const CLAP_INVALID_ID: u32 = u32::MAX;
pub const CLAP_CORE_EVENT_SPACE_ID: u16 = 0;

pub const CLAP_PLUGIN_FACTORY_ID: &CStr = c"clap.plugin-factory";
pub const CLAP_EXT_LOG: &CStr = c"clap.log";
pub const CLAP_EXT_GUI: &CStr = c"clap.gui";
pub const CLAP_EXT_PARAMS: &CStr = c"clap.params";
pub const CLAP_EXT_TIMER_SUPPORT: &CStr = c"clap.timer-support";
pub const CLAP_EXT_THREAD_CHECK: &CStr = c"clap.thread-check";
pub const CLAP_EXT_AUDIO_PORTS: &CStr = c"clap.audio-ports";
pub const CLAP_EXT_AUDIO_PORTS_CONFIG: &CStr = c"clap.audio-ports-config";
pub const CLAP_EXT_NOTE_PORTS: &CStr = c"clap.note-ports";
pub const CLAP_WINDOW_API_X11: &CStr = c"x11";
pub const CLAP_PORT_STEREO: &str = "stereo";
pub const CLAP_PORT_MONO: &str = "mono";

pub const CLAP_EVENT_NOTE_ON: u16 = 0;
pub const CLAP_EVENT_NOTE_OFF: u16 = 1;
pub const CLAP_EVENT_NOTE_CHOKE: u16 = 2;
pub const CLAP_EVENT_NOTE_END: u16 = 3;
pub const CLAP_EVENT_NOTE_EXPRESSION: u16 = 4;
pub const CLAP_EVENT_PARAM_VALUE: u16 = 5;
pub const CLAP_EVENT_PARAM_MOD: u16 = 6;
pub const CLAP_EVENT_PARAM_GESTURE_BEGIN: u16 = 7;
pub const CLAP_EVENT_PARAM_GESTURE_END: u16 = 8;
pub const CLAP_EVENT_TRANSPORT: u16 = 9;
pub const CLAP_EVENT_MIDI: u16 = 10;
pub const CLAP_EVENT_MIDI_SYSEX: u16 = 11;
pub const CLAP_EVENT_MIDI2: u16 = 12;

pub const CLAP_PROCESS_ERROR: i32 = 0;
pub const CLAP_PROCESS_CONTINUE: i32 = 1;
pub const CLAP_PROCESS_CONTINUE_IF_NOT_QUIET: i32 = 2;
pub const CLAP_PROCESS_TAIL: i32 = 3;
pub const CLAP_PROCESS_SLEEP: i32 = 4;

pub const CLAP_NOTE_DIALECT_CLAP: u32 = 1 << 0;
pub const CLAP_NOTE_DIALECT_MIDI: u32 = 1 << 1;
pub const CLAP_NOTE_DIALECT_MIDI_MPE: u32 = 1 << 2;
pub const CLAP_NOTE_DIALECT_MIDI2: u32 = 1 << 3;

pub const CLAP_AUDIO_PORT_IS_MAIN: u32 = 1 << 0;

pub const CLAP_LOG_DEBUG: i32 = 0;
pub const CLAP_LOG_INFO: i32 = 1;
pub const CLAP_LOG_WARNING: i32 = 2;
pub const CLAP_LOG_ERROR: i32 = 3;
pub const CLAP_LOG_FATAL: i32 = 4;
pub const CLAP_LOG_HOST_MISBEHAVING: i32 = 5;
pub const CLAP_LOG_PLUGIN_MISBEHAVING: i32 = 6;

#[repr(C)]
pub struct ClapHost {
    pub clap_version: ClapVersion,
    pub host_data: *mut c_void,
    pub name: *const c_char,
    pub vendor: *const c_char,
    pub url: *const c_char,
    pub version: *const c_char,
    pub get_extension: Option<unsafe extern "C" fn(*const ClapHost, *const c_char) -> *const c_void>,
    pub request_restart: Option<unsafe extern "C" fn(*const ClapHost)>,
    pub request_process: Option<unsafe extern "C" fn(*const ClapHost)>,
    pub request_callback: Option<unsafe extern "C" fn(*const ClapHost)>,
}

#[repr(C)]
pub struct ClapPluginEntry {
    pub clap_version: ClapVersion,
    pub init: Option<unsafe extern "C" fn(*const c_char) -> bool>,
    pub deinit: Option<unsafe extern "C" fn()>,
    pub get_factory: Option<unsafe extern "C" fn(*const c_char) -> *const c_void>,
}

#[repr(C)]
pub struct ClapPluginFactory {
    pub get_plugin_count: Option<unsafe extern "C" fn(*const ClapPluginFactory) -> u32>,
    pub get_plugin_descriptor:
        Option<unsafe extern "C" fn(*const ClapPluginFactory, u32) -> *const ClapPluginDescriptorRaw>,
    pub create_plugin: Option<
        unsafe extern "C" fn(
            *const ClapPluginFactory,
            *const ClapHost,
            *const c_char,
        ) -> *const ClapPlugin,
    >,
}

#[repr(C)]
pub struct ClapPluginDescriptorRaw {
    pub clap_version: ClapVersion,
    pub id: *const c_char,
    pub name: *const c_char,
    pub vendor: *const c_char,
    pub url: *const c_char,
    pub manual_url: *const c_char,
    pub support_url: *const c_char,
    pub version: *const c_char,
    pub description: *const c_char,
    pub features: *const *const c_char,
}

#[repr(C)]
pub struct ClapPlugin {
    pub desc: *const ClapPluginDescriptorRaw,
    pub plugin_data: *mut c_void,
    pub init: Option<unsafe extern "C" fn(*const ClapPlugin) -> bool>,
    pub destroy: Option<unsafe extern "C" fn(*const ClapPlugin)>,
    pub activate: Option<unsafe extern "C" fn(*const ClapPlugin, f64, u32, u32) -> bool>,
    pub deactivate: Option<unsafe extern "C" fn(*const ClapPlugin)>,
    pub start_processing: Option<unsafe extern "C" fn(*const ClapPlugin) -> bool>,
    pub stop_processing: Option<unsafe extern "C" fn(*const ClapPlugin)>,
    pub reset: Option<unsafe extern "C" fn(*const ClapPlugin)>,
    pub process: Option<unsafe extern "C" fn(*const ClapPlugin, *const ClapProcess) -> i32>,
    pub get_extension: Option<unsafe extern "C" fn(*const ClapPlugin, *const c_char) -> *const c_void>,
    pub on_main_thread: Option<unsafe extern "C" fn(*const ClapPlugin)>,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClapEventHeader {
    pub size: u32,
    pub time: u32,
    pub space_id: u16,
    pub type_: u16,
    pub flags: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClapEventNote {
    pub header: ClapEventHeader,
    pub note_id: i32,
    pub port_index: i16,
    pub channel: i16,
    pub key: i16,
    pub velocity: f64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClapEventMidi {
    pub header: ClapEventHeader,
    pub port_index: u16,
    pub data: [u8; 3],
}

#[repr(C)]
pub struct ClapInputEvents {
    pub ctx: *const c_void,
    pub size: Option<unsafe extern "C" fn(*const ClapInputEvents) -> u32>,
    pub get: Option<unsafe extern "C" fn(*const ClapInputEvents, u32) -> *const ClapEventHeader>,
}

#[repr(C)]
pub struct ClapOutputEvents {
    pub ctx: *mut c_void,
    pub try_push:
        Option<unsafe extern "C" fn(*const ClapOutputEvents, *const ClapEventHeader) -> bool>,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ClapAudioBuffer {
    pub data32: *mut *mut f32,
    pub data64: *mut *mut f64,
    pub channel_count: u32,
    pub latency: u32,
    pub constant_mask: u64,
}

impl ClapAudioBuffer {
    pub const EMPTY: Self = Self {
        data32: std::ptr::null_mut(),
        data64: std::ptr::null_mut(),
        channel_count: 0,
        latency: 0,
        constant_mask: 0,
    };
}

#[repr(C)]
pub struct ClapProcess {
    pub steady_time: i64,
    pub frames_count: u32,
    pub transport: *const c_void,
    pub audio_inputs: *const ClapAudioBuffer,
    pub audio_outputs: *mut ClapAudioBuffer,
    pub audio_inputs_count: u32,
    pub audio_outputs_count: u32,
    pub in_events: *const ClapInputEvents,
    pub out_events: *const ClapOutputEvents,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ClapAudioPortInfoRaw {
    pub id: u32,
    pub name: [c_char; 256],
    pub flags: u32,
    pub channel_count: u32,
    pub port_type: *const c_char,
    pub in_place_pair: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ClapAudioPortsConfigRaw {
    pub id: u32,
    pub name: [c_char; 256],
    pub input_port_count: u32,
    pub output_port_count: u32,
    pub has_main_input: bool,
    pub main_input_channel_count: u32,
    pub main_input_port_type: *const c_char,
    pub has_main_output: bool,
    pub main_output_channel_count: u32,
    pub main_output_port_type: *const c_char,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ClapNotePortInfoRaw {
    pub id: u32,
    pub supported_dialects: u32,
    pub preferred_dialect: u32,
    pub name: [c_char; 256],
}

#[repr(C)]
pub struct ClapPluginAudioPorts {
    pub count: Option<unsafe extern "C" fn(*const ClapPlugin, bool) -> u32>,
    pub get: Option<unsafe extern "C" fn(*const ClapPlugin, u32, bool, *mut ClapAudioPortInfoRaw) -> bool>,
}

#[repr(C)]
pub struct ClapPluginAudioPortsConfig {
    pub count: Option<unsafe extern "C" fn(*const ClapPlugin) -> u32>,
    pub get: Option<unsafe extern "C" fn(*const ClapPlugin, u32, *mut ClapAudioPortsConfigRaw) -> bool>,
    pub select: Option<unsafe extern "C" fn(*const ClapPlugin, u32) -> bool>,
}

#[repr(C)]
pub struct ClapPluginNotePorts {
    pub count: Option<unsafe extern "C" fn(*const ClapPlugin, bool) -> u32>,
    pub get: Option<unsafe extern "C" fn(*const ClapPlugin, u32, bool, *mut ClapNotePortInfoRaw) -> bool>,
}

#[repr(C)]
pub struct ClapPluginParams {
    pub count: Option<unsafe extern "C" fn(*const ClapPlugin) -> u32>,
    pub get_info: Option<unsafe extern "C" fn(*const ClapPlugin, u32, *mut c_void) -> bool>,
    pub get_value: Option<unsafe extern "C" fn(*const ClapPlugin, u32, *mut f64) -> bool>,
    pub value_to_text:
        Option<unsafe extern "C" fn(*const ClapPlugin, u32, f64, *mut c_char, u32) -> bool>,
    pub text_to_value:
        Option<unsafe extern "C" fn(*const ClapPlugin, u32, *const c_char, *mut f64) -> bool>,
    pub flush: Option<
        unsafe extern "C" fn(*const ClapPlugin, *const ClapInputEvents, *const ClapOutputEvents),
    >,
}

#[repr(C)]
pub struct ClapPluginTimerSupport {
    pub on_timer: Option<unsafe extern "C" fn(*const ClapPlugin, u32)>,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union ClapWindowHandle {
    pub x11: c_ulong,
    pub ptr: *mut c_void,
}

#[repr(C)]
pub struct ClapWindow {
    pub api: *const c_char,
    pub handle: ClapWindowHandle,
}

#[repr(C)]
pub struct ClapPluginGui {
    pub is_api_supported: Option<unsafe extern "C" fn(*const ClapPlugin, *const c_char, bool) -> bool>,
    pub get_preferred_api:
        Option<unsafe extern "C" fn(*const ClapPlugin, *mut *const c_char, *mut bool) -> bool>,
    pub create: Option<unsafe extern "C" fn(*const ClapPlugin, *const c_char, bool) -> bool>,
    pub destroy: Option<unsafe extern "C" fn(*const ClapPlugin)>,
    pub set_scale: Option<unsafe extern "C" fn(*const ClapPlugin, f64) -> bool>,
    pub get_size: Option<unsafe extern "C" fn(*const ClapPlugin, *mut u32, *mut u32) -> bool>,
    pub can_resize: Option<unsafe extern "C" fn(*const ClapPlugin) -> bool>,
    pub get_resize_hints: Option<unsafe extern "C" fn(*const ClapPlugin, *mut c_void) -> bool>,
    pub adjust_size: Option<unsafe extern "C" fn(*const ClapPlugin, *mut u32, *mut u32) -> bool>,
    pub set_size: Option<unsafe extern "C" fn(*const ClapPlugin, u32, u32) -> bool>,
    pub set_parent: Option<unsafe extern "C" fn(*const ClapPlugin, *const ClapWindow) -> bool>,
    pub set_transient: Option<unsafe extern "C" fn(*const ClapPlugin, *const ClapWindow) -> bool>,
    pub suggest_title: Option<unsafe extern "C" fn(*const ClapPlugin, *const c_char)>,
    pub show: Option<unsafe extern "C" fn(*const ClapPlugin) -> bool>,
    pub hide: Option<unsafe extern "C" fn(*const ClapPlugin) -> bool>,
}

#[repr(C)]
pub struct ClapHostLog {
    pub log: Option<unsafe extern "C" fn(*const ClapHost, i32, *const c_char)>,
}

#[repr(C)]
pub struct ClapHostGui {
    pub resize_hints_changed: Option<unsafe extern "C" fn(*const ClapHost)>,
    pub request_resize: Option<unsafe extern "C" fn(*const ClapHost, u32, u32) -> bool>,
    pub request_show: Option<unsafe extern "C" fn(*const ClapHost) -> bool>,
    pub request_hide: Option<unsafe extern "C" fn(*const ClapHost) -> bool>,
    pub closed: Option<unsafe extern "C" fn(*const ClapHost, bool)>,
}

#[repr(C)]
pub struct ClapHostTimerSupport {
    pub register_timer: Option<unsafe extern "C" fn(*const ClapHost, u32, *mut u32) -> bool>,
    pub unregister_timer: Option<unsafe extern "C" fn(*const ClapHost, u32) -> bool>,
}

#[repr(C)]
pub struct ClapHostThreadCheck {
    pub is_main_thread: Option<unsafe extern "C" fn(*const ClapHost) -> bool>,
    pub is_audio_thread: Option<unsafe extern "C" fn(*const ClapHost) -> bool>,
}

#[repr(C)]
pub struct ClapHostAudioPorts {
    pub is_rescan_flag_supported: Option<unsafe extern "C" fn(*const ClapHost, u32) -> bool>,
    pub rescan: Option<unsafe extern "C" fn(*const ClapHost, u32)>,
}

#[repr(C)]
pub struct ClapHostParams {
    pub rescan: Option<unsafe extern "C" fn(*const ClapHost, u32)>,
    pub clear: Option<unsafe extern "C" fn(*const ClapHost, u32, u32)>,
    pub request_flush: Option<unsafe extern "C" fn(*const ClapHost)>,
}

pub fn c_char_buf_to_string<const N: usize>(buf: &[c_char; N]) -> String {
    let bytes = buf
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as u8)
        .collect::<Vec<u8>>();
    String::from_utf8_lossy(&bytes).to_string()
}

/// Copy `text` into a fixed C name buffer, truncating and NUL terminating.
pub fn string_to_c_char_buf<const N: usize>(text: &str) -> [c_char; N] {
    let mut buf = [0 as c_char; N];
    for (dst, src) in buf.iter_mut().zip(text.bytes().take(N.saturating_sub(1))) {
        *dst = src as c_char;
    }
    buf
}

/// Owned copy of a nullable C string.
///
/// # Safety
/// `ptr` must be null or point at a NUL terminated string.
pub unsafe fn c_str_to_option(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL terminated per the caller contract.
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_buffers() {
        let buf: [c_char; 8] = string_to_c_char_buf("stereo out");
        assert_eq!(c_char_buf_to_string(&buf), "stereo ");
        let buf: [c_char; 256] = string_to_c_char_buf("Main");
        assert_eq!(c_char_buf_to_string(&buf), "Main");
    }

    #[test]
    fn test_version_compatibility() {
        assert!(clap_version_is_compatible(CLAP_VERSION));
        assert!(!clap_version_is_compatible(ClapVersion {
            major: 0,
            minor: 9,
            revision: 0
        }));
    }

    #[test]
    fn test_nullable_strings() {
        // SAFETY: null and a static C string literal.
        unsafe {
            assert_eq!(c_str_to_option(std::ptr::null()), None);
            assert_eq!(c_str_to_option(c"x11".as_ptr()).as_deref(), Some("x11"));
        }
    }
}
