//! `extern "C"` entry points of the host table handed to plugins.

use super::abi::*;
use super::handle::handle_from_host;
use crate::engine::AudioEngine;
use std::ffi::{CStr, c_char, c_void};
use tracing::{debug, warn};

static HOST_LOG_EXT: ClapHostLog = ClapHostLog {
    log: Some(host_log),
};

static HOST_GUI_EXT: ClapHostGui = ClapHostGui {
    resize_hints_changed: Some(host_gui_resize_hints_changed),
    request_resize: Some(host_gui_request_resize),
    request_show: Some(host_gui_request_show),
    request_hide: Some(host_gui_request_hide),
    closed: Some(host_gui_closed),
};

static HOST_TIMER_EXT: ClapHostTimerSupport = ClapHostTimerSupport {
    register_timer: Some(host_register_timer),
    unregister_timer: Some(host_unregister_timer),
};

static HOST_THREAD_CHECK_EXT: ClapHostThreadCheck = ClapHostThreadCheck {
    is_main_thread: Some(host_is_main_thread),
    is_audio_thread: Some(host_is_audio_thread),
};

static HOST_AUDIO_PORTS_EXT: ClapHostAudioPorts = ClapHostAudioPorts {
    is_rescan_flag_supported: Some(host_audio_ports_is_rescan_flag_supported),
    rescan: Some(host_audio_ports_rescan),
};

static HOST_PARAMS_EXT: ClapHostParams = ClapHostParams {
    rescan: Some(host_params_rescan),
    clear: Some(host_params_clear),
    request_flush: Some(host_params_request_flush),
};

fn ext_ptr<T>(ext: &'static T) -> *const c_void {
    ext as *const T as *const c_void
}

pub(super) unsafe extern "C" fn host_get_extension(
    _host: *const ClapHost,
    extension_id: *const c_char,
) -> *const c_void {
    if extension_id.is_null() {
        return std::ptr::null();
    }
    // SAFETY: plugins pass NUL terminated extension ids.
    let id = unsafe { CStr::from_ptr(extension_id) };
    match id {
        id if id == CLAP_EXT_LOG => ext_ptr(&HOST_LOG_EXT),
        id if id == CLAP_EXT_GUI => ext_ptr(&HOST_GUI_EXT),
        id if id == CLAP_EXT_TIMER_SUPPORT => ext_ptr(&HOST_TIMER_EXT),
        id if id == CLAP_EXT_THREAD_CHECK => ext_ptr(&HOST_THREAD_CHECK_EXT),
        id if id == CLAP_EXT_AUDIO_PORTS => ext_ptr(&HOST_AUDIO_PORTS_EXT),
        id if id == CLAP_EXT_PARAMS => ext_ptr(&HOST_PARAMS_EXT),
        _ => std::ptr::null(),
    }
}

pub(super) unsafe extern "C" fn host_request_restart(host: *const ClapHost) {
    // SAFETY: the plugin passes back the table it was created with.
    if let Some(handle) = unsafe { handle_from_host(host) } {
        debug!(target: "clap", "{}: request_restart", handle.clapid());
    }
}

pub(super) unsafe extern "C" fn host_request_process(host: *const ClapHost) {
    // SAFETY: the plugin passes back the table it was created with.
    if let Some(handle) = unsafe { handle_from_host(host) } {
        debug!(target: "clap", "{}: request_process", handle.clapid());
    }
}

pub(super) unsafe extern "C" fn host_request_callback(host: *const ClapHost) {
    // SAFETY: the plugin passes back the table it was created with.
    if let Some(handle) = unsafe { handle_from_host(host) } {
        handle.request_callback();
    }
}

unsafe extern "C" fn host_log(host: *const ClapHost, severity: i32, msg: *const c_char) {
    // SAFETY: message is null or a NUL terminated string.
    let message = unsafe { c_str_to_option(msg) }.unwrap_or_default();
    // SAFETY: the plugin passes back the table it was created with.
    match unsafe { handle_from_host(host) } {
        Some(handle) => handle.log(severity, &message),
        None => warn!(target: "clap", "CLAP: {message}"),
    }
}

unsafe extern "C" fn host_gui_resize_hints_changed(host: *const ClapHost) {
    // SAFETY: the plugin passes back the table it was created with.
    if let Some(handle) = unsafe { handle_from_host(host) } {
        debug!(target: "clap", "{}: resize_hints_changed", handle.clapid());
    }
}

unsafe extern "C" fn host_gui_request_resize(host: *const ClapHost, width: u32, height: u32) -> bool {
    // SAFETY: the plugin passes back the table it was created with.
    unsafe { handle_from_host(host) }.is_some_and(|handle| handle.request_resize(width, height))
}

unsafe extern "C" fn host_gui_request_show(host: *const ClapHost) -> bool {
    // SAFETY: the plugin passes back the table it was created with.
    if let Some(handle) = unsafe { handle_from_host(host) } {
        debug!(target: "clap", "{}: request_show", handle.clapid());
    }
    false
}

unsafe extern "C" fn host_gui_request_hide(host: *const ClapHost) -> bool {
    // SAFETY: the plugin passes back the table it was created with.
    if let Some(handle) = unsafe { handle_from_host(host) } {
        debug!(target: "clap", "{}: request_hide", handle.clapid());
    }
    false
}

unsafe extern "C" fn host_gui_closed(host: *const ClapHost, was_destroyed: bool) {
    // SAFETY: the plugin passes back the table it was created with.
    if let Some(handle) = unsafe { handle_from_host(host) } {
        handle.gui_closed(was_destroyed);
    }
}

unsafe extern "C" fn host_register_timer(host: *const ClapHost, period_ms: u32, timer_id: *mut u32) -> bool {
    // SAFETY: the plugin passes back the table it was created with.
    let Some(handle) = (unsafe { handle_from_host(host) }) else {
        return false;
    };
    if timer_id.is_null() {
        return false;
    }
    let id = handle.register_timer(period_ms);
    // SAFETY: non-null out parameter provided by the plugin.
    unsafe { *timer_id = id };
    true
}

unsafe extern "C" fn host_unregister_timer(host: *const ClapHost, timer_id: u32) -> bool {
    // SAFETY: the plugin passes back the table it was created with.
    unsafe { handle_from_host(host) }.is_some_and(|handle| handle.unregister_timer(timer_id))
}

unsafe extern "C" fn host_is_main_thread(host: *const ClapHost) -> bool {
    // SAFETY: the plugin passes back the table it was created with.
    unsafe { handle_from_host(host) }.is_some_and(|handle| handle.is_main_thread())
}

unsafe extern "C" fn host_is_audio_thread(_host: *const ClapHost) -> bool {
    AudioEngine::thread_is_engine()
}

unsafe extern "C" fn host_audio_ports_is_rescan_flag_supported(_host: *const ClapHost, _flag: u32) -> bool {
    false
}

unsafe extern "C" fn host_audio_ports_rescan(host: *const ClapHost, flags: u32) {
    // SAFETY: the plugin passes back the table it was created with.
    if let Some(handle) = unsafe { handle_from_host(host) } {
        debug!(target: "clap", "{}: audio_ports_rescan({flags:#x})", handle.clapid());
    }
}

unsafe extern "C" fn host_params_rescan(host: *const ClapHost, flags: u32) {
    // SAFETY: the plugin passes back the table it was created with.
    if let Some(handle) = unsafe { handle_from_host(host) } {
        debug!(target: "clap", "{}: params_rescan({flags:#x})", handle.clapid());
    }
}

unsafe extern "C" fn host_params_clear(host: *const ClapHost, param_id: u32, flags: u32) {
    // SAFETY: the plugin passes back the table it was created with.
    if let Some(handle) = unsafe { handle_from_host(host) } {
        debug!(target: "clap", "{}: params_clear({param_id},{flags:#x})", handle.clapid());
    }
}

unsafe extern "C" fn host_params_request_flush(host: *const ClapHost) {
    // SAFETY: the plugin passes back the table it was created with.
    if let Some(handle) = unsafe { handle_from_host(host) } {
        debug!(target: "clap", "{}: params_request_flush", handle.clapid());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_lookup() {
        // SAFETY: static C strings.
        unsafe {
            for id in [
                CLAP_EXT_LOG,
                CLAP_EXT_GUI,
                CLAP_EXT_TIMER_SUPPORT,
                CLAP_EXT_THREAD_CHECK,
                CLAP_EXT_AUDIO_PORTS,
                CLAP_EXT_PARAMS,
            ] {
                assert!(!host_get_extension(std::ptr::null(), id.as_ptr()).is_null(), "{id:?}");
            }
            assert!(host_get_extension(std::ptr::null(), c"clap.state".as_ptr()).is_null());
            assert!(host_get_extension(std::ptr::null(), std::ptr::null()).is_null());
            assert_eq!(
                host_get_extension(std::ptr::null(), CLAP_EXT_LOG.as_ptr()),
                ext_ptr(&HOST_LOG_EXT)
            );
        }
    }

    #[test]
    fn test_null_host_is_tolerated() {
        // SAFETY: a null host resolves to no handle.
        unsafe {
            let mut id = 0;
            assert!(!host_register_timer(std::ptr::null(), 10, &mut id));
            assert!(!host_unregister_timer(std::ptr::null(), 1));
            assert!(!host_is_main_thread(std::ptr::null()));
            assert!(!host_gui_request_resize(std::ptr::null(), 100, 100));
            assert!(!host_gui_request_show(std::ptr::null()));
            host_log(std::ptr::null(), CLAP_LOG_INFO, c"hello".as_ptr());
            host_request_callback(std::ptr::null());
        }
    }
}
