use super::abi::*;
use crate::midi::io::{MidiEvent, MidiMessage};

/// One entry of the input event list handed to `process`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClapInputEvent {
    Note(ClapEventNote),
    Midi(ClapEventMidi),
}

impl ClapInputEvent {
    pub fn header(&self) -> &ClapEventHeader {
        match self {
            Self::Note(e) => &e.header,
            Self::Midi(e) => &e.header,
        }
    }

    pub fn header_ptr(&self) -> *const ClapEventHeader {
        self.header() as *const ClapEventHeader
    }

    fn header_for<T>(type_: u16, frame: i32) -> ClapEventHeader {
        ClapEventHeader {
            size: std::mem::size_of::<T>() as u32,
            time: frame.max(0) as u32,
            space_id: CLAP_CORE_EVENT_SPACE_ID,
            type_,
            flags: 0,
        }
    }

    /// CLAP note dialect form, `None` for messages without a note equivalent.
    pub fn clap_note(event: &MidiEvent) -> Option<Self> {
        let note = match event.message() {
            message @ (MidiMessage::NoteOn | MidiMessage::NoteOff) => ClapEventNote {
                header: Self::header_for::<ClapEventNote>(
                    if message == MidiMessage::NoteOn {
                        CLAP_EVENT_NOTE_ON
                    } else {
                        CLAP_EVENT_NOTE_OFF
                    },
                    event.frame,
                ),
                note_id: event.note_id as i32,
                port_index: 0,
                channel: event.channel as i16,
                key: event.key as i16,
                velocity: event.velocity() as f64,
            },
            MidiMessage::AllNotesOff => ClapEventNote {
                header: Self::header_for::<ClapEventNote>(CLAP_EVENT_NOTE_CHOKE, event.frame),
                note_id: -1,
                port_index: 0,
                channel: -1,
                key: -1,
                velocity: 0.0,
            },
            _ => return None,
        };
        Some(Self::Note(note))
    }

    /// MIDI 1 dialect form, `None` for messages without a MIDI 1 equivalent.
    pub fn midi1(event: &MidiEvent) -> Option<Self> {
        let channel = event.channel & 0x0f;
        let data = match event.message() {
            MidiMessage::NoteOn => [0x90 + channel, event.key, (event.velocity() * 127.0) as u8],
            MidiMessage::NoteOff => [0x80 + channel, event.key, (event.velocity() * 127.0) as u8],
            MidiMessage::AllNotesOff => [0xB0 + channel, 123, 0],
            _ => return None,
        };
        Some(Self::Midi(ClapEventMidi {
            header: Self::header_for::<ClapEventMidi>(CLAP_EVENT_MIDI, event.frame),
            port_index: 0,
            data,
        }))
    }
}

pub fn clap_event_type_string(type_: u16) -> &'static str {
    match type_ {
        CLAP_EVENT_NOTE_ON => "NOTE_ON",
        CLAP_EVENT_NOTE_OFF => "NOTE_OFF",
        CLAP_EVENT_NOTE_CHOKE => "NOTE_CHOKE",
        CLAP_EVENT_NOTE_END => "NOTE_END",
        CLAP_EVENT_NOTE_EXPRESSION => "NOTE_EXPRESSION",
        CLAP_EVENT_PARAM_VALUE => "PARAM_VALUE",
        CLAP_EVENT_PARAM_MOD => "PARAM_MOD",
        CLAP_EVENT_PARAM_GESTURE_BEGIN => "PARAM_GESTURE_BEGIN",
        CLAP_EVENT_PARAM_GESTURE_END => "PARAM_GESTURE_END",
        CLAP_EVENT_TRANSPORT => "TRANSPORT",
        CLAP_EVENT_MIDI => "MIDI",
        CLAP_EVENT_MIDI_SYSEX => "MIDI_SYSEX",
        CLAP_EVENT_MIDI2 => "MIDI2",
        _ => "<UNKNOWN>",
    }
}

pub fn clap_event_to_string(event: &ClapInputEvent) -> String {
    let h = event.header();
    let et = clap_event_type_string(h.type_);
    match event {
        ClapInputEvent::Note(n) => format!(
            "{:+4} ch={:<2} {:<14} pitch={} vel={:.6} id={:x} sz={} spc={} flags={:x} port={}",
            h.time as i32, n.channel, et, n.key, n.velocity, n.note_id, h.size, h.space_id, h.flags,
            n.port_index
        ),
        ClapInputEvent::Midi(m) => format!(
            "{:+4} {:<20} sz={} spc={} flags={:x} port={} data={:02x} {:02x} {:02x}",
            h.time as i32, et, h.size, h.space_id, h.flags, m.port_index, m.data[0], m.data[1],
            m.data[2]
        ),
    }
}
