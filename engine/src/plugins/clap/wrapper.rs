use super::abi::*;
use super::events::ClapInputEvent;
use super::file::ClapPluginDescriptor;
use super::handle::{ClapAudioPortInfo, ClapHostContext, ClapPluginHandle};
use crate::engine::AudioEngine;
use crate::midi::io::MidiEvent;
use crate::mutex::UnsafeMutex;
use crate::processor::{
    AudioProcessor, AudioProcessorInfo, IBusId, OBusId, ProcessorCore, make_processor,
};
use crate::speakers::SpeakerArrangement;
use std::any::Any;
use std::ffi::c_void;
use std::sync::Arc;
use tracing::debug;

const INPUT_EVENTS_RESERVE: usize = 256;

struct WrapperState {
    imain: Option<(usize, IBusId)>,
    iside: Option<(usize, IBusId)>,
    omain: Option<(usize, OBusId)>,
    oside: Option<(usize, OBusId)>,
    input_dialect: u32,
    output_dialect: u32,
    input_events: Vec<ClapInputEvent>,
    last_status: i32,
}

/// Render graph node that runs a CLAP plugin instance.
pub struct ClapAudioWrapper {
    core: ProcessorCore,
    handle: Arc<ClapPluginHandle>,
    state: UnsafeMutex<WrapperState>,
}

unsafe extern "C" fn input_events_size(list: *const ClapInputEvents) -> u32 {
    // SAFETY: ctx is the event vector of the wrapper rendering right now.
    let events = unsafe { &*((*list).ctx as *const Vec<ClapInputEvent>) };
    events.len() as u32
}

unsafe extern "C" fn input_events_get(list: *const ClapInputEvents, index: u32) -> *const ClapEventHeader {
    // SAFETY: ctx is the event vector of the wrapper rendering right now.
    let events = unsafe { &*((*list).ctx as *const Vec<ClapInputEvent>) };
    events
        .get(index as usize)
        .map_or(std::ptr::null(), ClapInputEvent::header_ptr)
}

unsafe extern "C" fn output_events_try_push(
    _list: *const ClapOutputEvents,
    _event: *const ClapEventHeader,
) -> bool {
    false
}

fn find_stereo_ports<'a>(
    ports: impl Iterator<Item = &'a ClapAudioPortInfo>,
) -> (Option<usize>, Option<usize>) {
    let (mut main, mut side) = (None, None);
    for (i, port) in ports.enumerate() {
        if !port.is_valid() || !port.is_stereo() {
            continue;
        }
        if port.is_main() {
            main.get_or_insert(i);
        } else {
            side.get_or_insert(i);
        }
    }
    (main, side)
}

impl ClapAudioWrapper {
    pub fn new(engine: &Arc<AudioEngine>, handle: Arc<ClapPluginHandle>) -> Arc<Self> {
        make_processor(Self {
            core: ProcessorCore::new(engine),
            handle,
            state: UnsafeMutex::new(WrapperState {
                imain: None,
                iside: None,
                omain: None,
                oside: None,
                input_dialect: 0,
                output_dialect: 0,
                input_events: Vec::with_capacity(INPUT_EVENTS_RESERVE),
                last_status: CLAP_PROCESS_CONTINUE,
            }),
        })
    }

    /// Instantiate the plugin and wrap it, activation is left to the caller.
    pub fn create(
        engine: &Arc<AudioEngine>,
        descriptor: &Arc<ClapPluginDescriptor>,
        ctx: ClapHostContext,
    ) -> Result<Arc<Self>, String> {
        let handle = ClapPluginHandle::create(descriptor, ctx)?;
        Ok(Self::new(engine, handle))
    }

    pub fn static_info() -> AudioProcessorInfo {
        AudioProcessorInfo {
            label: "Anklang.Devices.ClapAudioWrapper".to_string(),
            ..Default::default()
        }
    }

    pub fn handle(&self) -> &Arc<ClapPluginHandle> {
        &self.handle
    }

    /// Status of the most recent `process` call.
    pub fn last_status(&self) -> i32 {
        self.state.lock().last_status
    }

    pub fn input_dialect(&self) -> u32 {
        self.state.lock().input_dialect
    }

    pub fn main_ibus(&self) -> Option<IBusId> {
        self.state.lock().imain.map(|(_, bus)| bus)
    }

    pub fn main_obus(&self) -> Option<OBusId> {
        self.state.lock().omain.map(|(_, bus)| bus)
    }

    fn silence_outputs(&self) {
        for obus in 1..=self.core.n_obuses() as u32 {
            let obus = OBusId(obus);
            for ch in 0..self.core.n_ochannels(obus) {
                self.core.redirect_oblock(obus, ch, None);
            }
        }
    }

    fn bind_inputs(&self, port: Option<(usize, IBusId)>) -> bool {
        let Some((index, ibus)) = port else {
            return true;
        };
        for ch in 0..self.core.n_ichannels(ibus) {
            let data = self.core.ifloats(ibus, ch).as_ptr() as *mut f32;
            assert_return!(self.handle.bind_channel(true, index, ch, data), false);
        }
        true
    }

    fn bind_outputs(&self, port: Option<(usize, OBusId)>) -> bool {
        let Some((index, obus)) = port else {
            return true;
        };
        for ch in 0..self.core.n_ochannels(obus) {
            let data = self.core.oblock(obus, ch).as_mut_ptr();
            assert_return!(self.handle.bind_channel(false, index, ch, data), false);
        }
        true
    }
}

impl AudioProcessor for ClapAudioWrapper {
    fn core(&self) -> &ProcessorCore {
        &self.core
    }

    fn info(&self) -> AudioProcessorInfo {
        self.handle.descriptor().device_info()
    }

    fn initialize(&self, _busses: SpeakerArrangement) {
        self.core.remove_all_buses();
        let infos = self.handle.port_infos();
        let (imain, iside) = find_stereo_ports(infos.audio_iports.iter());
        let (omain, oside) = find_stereo_ports(infos.audio_oports.iter());
        let state = self.state.lock();
        state.input_dialect = infos.note_iports.first().map_or(0, |p| p.supported_dialects);
        state.output_dialect = infos.note_oports.first().map_or(0, |p| p.supported_dialects);

        let add_ibus = |index: usize| {
            let bus = self.core.add_input_bus(&infos.audio_iports[index].name, SpeakerArrangement::STEREO);
            (index, bus)
        };
        let add_obus = |index: usize| {
            let bus = self.core.add_output_bus(&infos.audio_oports[index].name, SpeakerArrangement::STEREO);
            (index, bus)
        };
        state.imain = imain.map(add_ibus);
        state.iside = iside.map(add_ibus);
        state.omain = omain.map(add_obus);
        state.oside = oside.map(add_obus);

        let note_dialects = CLAP_NOTE_DIALECT_CLAP | CLAP_NOTE_DIALECT_MIDI;
        if state.input_dialect & note_dialects != 0 {
            self.core.prepare_event_input();
        }
        if state.output_dialect & note_dialects != 0 {
            self.core.prepare_event_output();
        }
        // A processor without any IO would never be scheduled.
        if !self.core.has_event_input()
            && !self.core.has_event_output()
            && self.core.n_ibuses() == 0
            && self.core.n_obuses() == 0
        {
            self.core.prepare_event_input();
        }
        debug!(target: "clap", "{}: buses: imain={:?} iside={:?} omain={:?} oside={:?} dialects={:x}/{:x}",
               self.handle.clapid(), state.imain, state.iside, state.omain, state.oside,
               state.input_dialect, state.output_dialect);
    }

    fn reset(&self, _target_stamp: u64) {}

    fn render(&self, n_frames: usize) {
        if !self.handle.processing() {
            self.silence_outputs();
            return;
        }
        let state = self.state.lock();
        if !(self.bind_inputs(state.imain)
            && self.bind_inputs(state.iside)
            && self.bind_outputs(state.omain)
            && self.bind_outputs(state.oside))
        {
            return;
        }

        state.input_events.clear();
        if self.core.has_event_input() {
            let convert: Option<fn(&MidiEvent) -> Option<ClapInputEvent>> =
                if state.input_dialect & CLAP_NOTE_DIALECT_CLAP != 0 {
                    Some(ClapInputEvent::clap_note)
                } else if state.input_dialect & CLAP_NOTE_DIALECT_MIDI != 0 {
                    Some(ClapInputEvent::midi1)
                } else {
                    None
                };
            if let Some(convert) = convert {
                state
                    .input_events
                    .extend(self.core.event_input().iter().filter_map(convert));
            }
        }

        let in_events = ClapInputEvents {
            ctx: &state.input_events as *const Vec<ClapInputEvent> as *const c_void,
            size: Some(input_events_size),
            get: Some(input_events_get),
        };
        let out_events = ClapOutputEvents {
            ctx: std::ptr::null_mut(),
            try_push: Some(output_events_try_push),
        };
        state.last_status = self.handle.process(n_frames as u32, &in_events, &out_events);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(flags: u32, channels: u32, port_type: Option<&str>) -> ClapAudioPortInfo {
        ClapAudioPortInfo {
            id: 0,
            name: "port".to_string(),
            flags,
            channel_count: channels,
            port_type: port_type.map(str::to_string),
            in_place_pair: CLAP_INVALID_ID,
        }
    }

    #[test]
    fn test_find_stereo_ports() {
        let ports = [
            port(CLAP_AUDIO_PORT_IS_MAIN, 1, Some(CLAP_PORT_MONO)),
            port(0, 2, Some(CLAP_PORT_STEREO)),
            port(CLAP_AUDIO_PORT_IS_MAIN, 2, Some(CLAP_PORT_STEREO)),
            port(CLAP_AUDIO_PORT_IS_MAIN, 2, Some(CLAP_PORT_STEREO)),
            port(0, 2, None),
        ];
        assert_eq!(find_stereo_ports(ports.iter()), (Some(2), Some(1)));
        assert_eq!(find_stereo_ports(ports[..1].iter()), (None, None));
    }
}
