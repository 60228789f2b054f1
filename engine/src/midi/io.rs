use midly::{
    MidiMessage as WireMessage, PitchBend,
    live::LiveEvent,
    num::{u4, u7, u14},
};
use std::fmt;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MidiEventType {
    ParamValue = 0x70,
    NoteOff = 0x80,
    NoteOn = 0x90,
    Aftertouch = 0xA0,
    ControlChange = 0xB0,
    ProgramChange = 0xC0,
    ChannelPressure = 0xD0,
    PitchBend = 0xE0,
    Sysex = 0xF0,
}

impl MidiEventType {
    pub fn name(self) -> &'static str {
        match self {
            Self::ParamValue => "PARAM_VALUE",
            Self::NoteOff => "NOTE_OFF",
            Self::NoteOn => "NOTE_ON",
            Self::Aftertouch => "AFTERTOUCH",
            Self::ControlChange => "CONTROL_CHANGE",
            Self::ProgramChange => "PROGRAM_CHANGE",
            Self::ChannelPressure => "CHANNEL_PRESSURE",
            Self::PitchBend => "PITCH_BEND",
            Self::Sysex => "SYSEX",
        }
    }
}

/// Event type extended by the channel mode messages of CC 120..=127.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MidiMessage {
    AllSoundOff = 120,
    ResetAllControllers = 121,
    LocalControl = 122,
    AllNotesOff = 123,
    OmniModeOff = 124,
    OmniModeOn = 125,
    MonoModeOn = 126,
    PolyModeOn = 127,
    ParamValue = 0x70,
    NoteOff = 0x80,
    NoteOn = 0x90,
    Aftertouch = 0xA0,
    ControlChange = 0xB0,
    ProgramChange = 0xC0,
    ChannelPressure = 0xD0,
    PitchBend = 0xE0,
    Sysex = 0xF0,
}

/// Note id used when an event carries none.
pub const NO_NOTE_ID: u32 = 0xff_ffff;

/// A timed MIDI event within the current render block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MidiEvent {
    /// Offset into the current block, delayed if negative.
    pub frame: i32,
    pub kind: MidiEventType,
    pub channel: u8,
    pub key: u8,
    /// Controller or program number, parameter id for `ParamValue`.
    pub param: u32,
    pub note_id: u32,
    /// Velocity for notes, 0..=1 value for controls and pressure, -1..=1 for bends.
    pub value: f32,
    /// Fine tuning in cents.
    pub tuning: f32,
    /// 7-bit controller value.
    pub cval: u8,
}

impl MidiEvent {
    pub fn new(kind: MidiEventType) -> Self {
        Self {
            frame: 0,
            kind,
            channel: 0,
            key: 0,
            param: 0,
            note_id: 0,
            value: 0.0,
            tuning: 0.0,
            cval: 0,
        }
    }

    /// Note on, or note off for a zero velocity.
    pub fn note_on(channel: u8, key: u8, velocity: f32, tuning: f32, note_id: u32) -> Self {
        let kind = if velocity > 0.0 {
            MidiEventType::NoteOn
        } else {
            MidiEventType::NoteOff
        };
        Self {
            channel: channel & 0x0f,
            key,
            value: velocity,
            tuning,
            note_id,
            ..Self::new(kind)
        }
    }

    pub fn note_off(channel: u8, key: u8, velocity: f32, tuning: f32, note_id: u32) -> Self {
        Self {
            channel: channel & 0x0f,
            key,
            value: velocity,
            tuning,
            note_id,
            ..Self::new(MidiEventType::NoteOff)
        }
    }

    pub fn aftertouch(channel: u8, key: u8, velocity: f32) -> Self {
        Self {
            channel: channel & 0x0f,
            key,
            value: velocity,
            note_id: NO_NOTE_ID,
            ..Self::new(MidiEventType::Aftertouch)
        }
    }

    pub fn pressure(channel: u8, velocity: f32) -> Self {
        Self {
            channel: channel & 0x0f,
            value: velocity,
            ..Self::new(MidiEventType::ChannelPressure)
        }
    }

    pub fn control(channel: u8, controller: u32, value: f32) -> Self {
        let value = value.clamp(0.0, 1.0);
        Self {
            channel: channel & 0x0f,
            param: controller,
            value,
            cval: (value * 127.0) as u8,
            ..Self::new(MidiEventType::ControlChange)
        }
    }

    pub fn control8(channel: u8, controller: u32, cval: u8) -> Self {
        let cval = cval.min(127);
        Self {
            channel: channel & 0x0f,
            param: controller,
            value: cval as f32 / 127.0,
            cval,
            ..Self::new(MidiEventType::ControlChange)
        }
    }

    pub fn program(channel: u8, program: u32) -> Self {
        Self {
            channel: channel & 0x0f,
            param: program,
            ..Self::new(MidiEventType::ProgramChange)
        }
    }

    pub fn pitch_bend(channel: u8, value: f32) -> Self {
        Self {
            channel: channel & 0x0f,
            value: value.clamp(-1.0, 1.0),
            ..Self::new(MidiEventType::PitchBend)
        }
    }

    pub fn all_notes_off(channel: u8) -> Self {
        Self::control8(channel, MidiMessage::AllNotesOff as u32, 0)
    }

    pub fn velocity(&self) -> f32 {
        self.value
    }

    pub fn message(&self) -> MidiMessage {
        if self.kind == MidiEventType::ControlChange {
            match self.param {
                120 => return MidiMessage::AllSoundOff,
                121 => return MidiMessage::ResetAllControllers,
                122 => return MidiMessage::LocalControl,
                123 => return MidiMessage::AllNotesOff,
                124 => return MidiMessage::OmniModeOff,
                125 => return MidiMessage::OmniModeOn,
                126 => return MidiMessage::MonoModeOn,
                127 => return MidiMessage::PolyModeOn,
                _ => {}
            }
        }
        match self.kind {
            MidiEventType::ParamValue => MidiMessage::ParamValue,
            MidiEventType::NoteOff => MidiMessage::NoteOff,
            MidiEventType::NoteOn => MidiMessage::NoteOn,
            MidiEventType::Aftertouch => MidiMessage::Aftertouch,
            MidiEventType::ControlChange => MidiMessage::ControlChange,
            MidiEventType::ProgramChange => MidiMessage::ProgramChange,
            MidiEventType::ChannelPressure => MidiMessage::ChannelPressure,
            MidiEventType::PitchBend => MidiMessage::PitchBend,
            MidiEventType::Sysex => MidiMessage::Sysex,
        }
    }

    /// Parse a MIDI 1.0 channel message. System messages are not represented.
    pub fn from_midi1(frame: i32, data: &[u8]) -> Option<Self> {
        let Ok(LiveEvent::Midi { channel, message }) = LiveEvent::parse(data) else {
            return None;
        };
        let channel = channel.as_int();
        let unit = |v: u7| v.as_int() as f32 / 127.0;
        let mut event = match message {
            WireMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                Self::note_on(channel, key.as_int(), unit(vel), 0.0, NO_NOTE_ID)
            }
            WireMessage::NoteOn { key, vel } | WireMessage::NoteOff { key, vel } => {
                Self::note_off(channel, key.as_int(), unit(vel), 0.0, NO_NOTE_ID)
            }
            WireMessage::Aftertouch { key, vel } => Self::aftertouch(channel, key.as_int(), unit(vel)),
            WireMessage::Controller { controller, value } => {
                Self::control8(channel, controller.as_int() as u32, value.as_int())
            }
            WireMessage::ProgramChange { program } => Self::program(channel, program.as_int() as u32),
            WireMessage::ChannelAftertouch { vel } => Self::pressure(channel, unit(vel)),
            WireMessage::PitchBend { bend } => {
                Self::pitch_bend(channel, (bend.0.as_int() as f32 - 8192.0) / 8192.0)
            }
        };
        event.frame = frame;
        Some(event)
    }

    /// Serialize as MIDI 1.0 bytes, empty for events without a wire form.
    pub fn to_midi1(&self) -> Vec<u8> {
        let seven = |v: f32| u7::new((v.clamp(0.0, 1.0) * 127.0).round() as u8);
        let key = u7::new(self.key.min(127));
        let message = match self.kind {
            MidiEventType::NoteOn => WireMessage::NoteOn {
                key,
                vel: u7::new(((self.value.clamp(0.0, 1.0) * 127.0).round() as u8).max(1)),
            },
            MidiEventType::NoteOff => WireMessage::NoteOff {
                key,
                vel: seven(self.value),
            },
            MidiEventType::Aftertouch => WireMessage::Aftertouch {
                key,
                vel: seven(self.value),
            },
            MidiEventType::ControlChange => WireMessage::Controller {
                controller: u7::new(self.param.min(127) as u8),
                value: u7::new(self.cval.min(127)),
            },
            MidiEventType::ProgramChange => WireMessage::ProgramChange {
                program: u7::new(self.param.min(127) as u8),
            },
            MidiEventType::ChannelPressure => WireMessage::ChannelAftertouch {
                vel: seven(self.value),
            },
            MidiEventType::PitchBend => {
                let raw = (self.value.clamp(-1.0, 1.0) * 8192.0 + 8192.0).clamp(0.0, 16383.0);
                WireMessage::PitchBend {
                    bend: PitchBend(u14::new(raw as u16)),
                }
            }
            MidiEventType::ParamValue | MidiEventType::Sysex => return Vec::new(),
        };
        let mut bytes = Vec::with_capacity(3);
        let live = LiveEvent::Midi {
            channel: u4::new(self.channel & 0x0f),
            message,
        };
        if live.write_std(&mut bytes).is_err() {
            bytes.clear();
        }
        bytes
    }
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.kind.name();
        match self.kind {
            MidiEventType::NoteOff | MidiEventType::NoteOn | MidiEventType::Aftertouch => write!(
                f,
                "{:+4} ch={:<2} {:<10} pitch={} vel={:.6} tune={:.6} id={:x}",
                self.frame, self.channel, name, self.key, self.value, self.tuning, self.note_id
            ),
            MidiEventType::ControlChange => write!(
                f,
                "{:+4} ch={:<2} {} control={} value={:.6} ({:02x})",
                self.frame, self.channel, name, self.param, self.value, self.cval
            ),
            MidiEventType::ProgramChange => write!(
                f,
                "{:+4} ch={:<2} {} program={}",
                self.frame, self.channel, name, self.param
            ),
            MidiEventType::ChannelPressure | MidiEventType::PitchBend => write!(
                f,
                "{:+4} ch={:<2} {} value={:+.6}",
                self.frame, self.channel, name, self.value
            ),
            MidiEventType::ParamValue => write!(
                f,
                "{:+4} {} id={} value={:.6}",
                self.frame, name, self.param, self.value
            ),
            MidiEventType::Sysex => write!(f, "{:+4} {} (unhandled)", self.frame, name),
        }
    }
}

/// Frame ordered events of one render block.
#[derive(Clone, Debug, Default)]
pub struct MidiEventStream {
    events: Vec<MidiEvent>,
}

impl MidiEventStream {
    pub fn new() -> Self {
        Self {
            events: Vec::with_capacity(64),
        }
    }

    /// Append at `frame`, an earlier frame is inserted at its sorted position.
    pub fn append(&mut self, frame: i32, event: MidiEvent) {
        let mut event = event;
        event.frame = frame;
        if self.last_frame().is_none_or(|last| last <= frame) {
            self.events.push(event);
        } else {
            let at = self.events.partition_point(|e| e.frame <= frame);
            self.events.insert(at, event);
        }
    }

    /// Append without keeping order. Returns true if `ensure_order()` is needed.
    pub fn append_unsorted(&mut self, frame: i32, event: MidiEvent) -> bool {
        let out_of_order = self.last_frame().is_some_and(|last| frame < last);
        let mut event = event;
        event.frame = frame;
        self.events.push(event);
        out_of_order
    }

    /// Stable in-place sort by frame.
    pub fn ensure_order(&mut self) {
        for i in 1..self.events.len() {
            let mut j = i;
            while j > 0 && self.events[j - 1].frame > self.events[j].frame {
                self.events.swap(j - 1, j);
                j -= 1;
            }
        }
    }

    pub fn last_frame(&self) -> Option<i32> {
        self.events.last().map(|e| e.frame)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MidiEvent> {
        self.events.iter()
    }

    pub fn as_slice(&self) -> &[MidiEvent] {
        &self.events
    }
}

impl<'a> IntoIterator for &'a MidiEventStream {
    type Item = &'a MidiEvent;
    type IntoIter = std::slice::Iter<'a, MidiEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
