use crate::midi::io::MidiEvent;
use crate::mutex::UnsafeMutex;
use crate::transport::TRANSPORT_PPQN;
use midly::{MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipNote {
    pub tick: i64,
    pub duration: i64,
    pub key: u8,
    pub channel: u8,
    pub velocity: f32,
    pub id: u32,
}

/// Notes on a tick grid of `TRANSPORT_PPQN` per quarter note.
#[derive(Clone, Debug, Default)]
pub struct MidiClip {
    notes: Vec<ClipNote>,
    length: i64,
    looping: bool,
}

impl MidiClip {
    pub fn new(length: i64, looping: bool) -> Self {
        Self {
            notes: Vec::new(),
            length: length.max(0),
            looping,
        }
    }

    pub fn with_notes(length: i64, looping: bool, notes: impl IntoIterator<Item = ClipNote>) -> Self {
        let mut clip = Self::new(length, looping);
        for note in notes {
            clip.add_note(note);
        }
        clip
    }

    pub fn add_note(&mut self, note: ClipNote) {
        let at = self.notes.partition_point(|n| n.tick <= note.tick);
        self.notes.insert(at, note);
    }

    pub fn notes(&self) -> &[ClipNote] {
        &self.notes
    }

    pub fn length(&self) -> i64 {
        self.length
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    /// Import the notes of one track of a Standard MIDI File.
    pub fn from_smf(bytes: &[u8], track: usize) -> Result<Self, String> {
        let smf = Smf::parse(bytes).map_err(|e| format!("Failed to parse MIDI file: {e}"))?;
        let Timing::Metrical(ppq) = smf.header.timing else {
            return Err("Timecode based MIDI files are not supported".to_string());
        };
        let ppq = i64::from(ppq.as_int().max(1));
        let scale = |tick: u64| tick as i64 * TRANSPORT_PPQN / ppq;
        let events = smf
            .tracks
            .get(track)
            .ok_or_else(|| format!("MIDI file has no track {track}"))?;

        let mut clip = Self::new(0, false);
        let mut active: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();
        let mut tick = 0_u64;
        let mut next_id = 1_u32;
        let mut finish = |clip: &mut Self, channel: u8, key: u8, start: u64, vel: u8, end: u64| {
            clip.add_note(ClipNote {
                tick: scale(start),
                duration: (scale(end) - scale(start)).max(1),
                key,
                channel,
                velocity: vel as f32 / 127.0,
                id: next_id,
            });
            next_id += 1;
        };
        for event in events {
            tick = tick.saturating_add(event.delta.as_int() as u64);
            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let channel = channel.as_int();
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    active
                        .entry((channel, key.as_int()))
                        .or_default()
                        .push((tick, vel.as_int()));
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    let key = key.as_int();
                    if let Some(starts) = active.get_mut(&(channel, key))
                        && let Some((start, vel)) = starts.pop()
                    {
                        finish(&mut clip, channel, key, start, vel, tick);
                    }
                }
                _ => {}
            }
        }
        for ((channel, key), starts) in active {
            for (start, vel) in starts {
                finish(&mut clip, channel, key, start, vel, tick);
            }
        }
        let end = scale(tick);
        let quarter = TRANSPORT_PPQN;
        clip.length = (end.max(1) + quarter - 1) / quarter * quarter;
        Ok(clip)
    }
}

#[derive(Debug, Default)]
struct GeneratorState {
    xtick: i64,
    done: bool,
}

/// Plays one clip, positions are ticks relative to the generator start.
pub struct ClipGenerator {
    clip: Arc<MidiClip>,
    state: UnsafeMutex<GeneratorState>,
}

impl ClipGenerator {
    pub fn new(clip: Arc<MidiClip>) -> Self {
        let generator = Self {
            clip,
            state: UnsafeMutex::new(GeneratorState::default()),
        };
        generator.jumpto(0);
        generator
    }

    pub fn clip(&self) -> &Arc<MidiClip> {
        &self.clip
    }

    pub fn jumpto(&self, target: i64) {
        let state = self.state.lock();
        state.xtick = target.max(0);
        state.done =
            self.clip.length <= 0 || (!self.clip.looping && state.xtick >= self.clip.length);
    }

    /// Ticks advanced since the generator start.
    pub fn play_position(&self) -> i64 {
        self.state.lock().xtick
    }

    /// Position inside the clip, wraps for looping clips.
    pub fn clip_position(&self) -> i64 {
        let xtick = self.state.lock().xtick;
        match self.clip.length {
            length if length <= 0 => 0,
            length if self.clip.looping => xtick % length,
            length => xtick.min(length),
        }
    }

    pub fn done(&self) -> bool {
        self.state.lock().done
    }

    /// Advance to `target`, or to the clip end, passing every note on and
    /// note off with its generator tick to `sink`. Returns the ticks advanced.
    pub fn generate(&self, target: i64, mut sink: impl FnMut(i64, MidiEvent)) -> i64 {
        let state = self.state.lock();
        if state.done || target <= state.xtick {
            return 0;
        }
        let length = self.clip.length;
        let start = state.xtick;
        let end = if self.clip.looping {
            target
        } else {
            target.min(length)
        };
        let mut cycle = start / length;
        while cycle * length < end {
            let base = cycle * length;
            for note in self.clip.notes.iter().filter(|n| n.tick < length) {
                let tick = base + note.tick;
                if tick < start || tick >= end {
                    continue;
                }
                sink(
                    tick,
                    MidiEvent::note_on(note.channel, note.key, note.velocity, 0.0, note.id),
                );
                sink(
                    tick + note.duration,
                    MidiEvent::note_off(note.channel, note.key, 0.0, 0.0, note.id),
                );
            }
            if !self.clip.looping {
                break;
            }
            cycle += 1;
        }
        state.xtick = end;
        if !self.clip.looping && end >= length {
            state.done = true;
        }
        end - start
    }
}

/// Picks the generator that follows the current one.
#[derive(Debug, Default)]
pub struct ClipScout {
    order: Vec<i32>,
    last: usize,
}

impl ClipScout {
    pub fn setup(&mut self, order: Vec<i32>) {
        self.order = order;
        self.last = 0;
    }

    pub fn order(&self) -> &[i32] {
        &self.order
    }

    /// Successor of `previous` in the play order, -1 at the end.
    pub fn advance(&mut self, previous: i32) -> i32 {
        let found = (self.last..self.order.len())
            .chain(0..self.last.min(self.order.len()))
            .find(|&i| self.order[i] == previous);
        let Some(i) = found else {
            return -1;
        };
        self.last = i + 1;
        self.order.get(i + 1).copied().unwrap_or(-1)
    }

    pub fn reset(&mut self) {
        self.last = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::io::MidiEventType;

    const Q: i64 = TRANSPORT_PPQN;

    fn note(tick: i64, duration: i64, key: u8) -> ClipNote {
        ClipNote {
            tick,
            duration,
            key,
            channel: 0,
            velocity: 0.8,
            id: key as u32,
        }
    }

    #[test]
    fn test_generate_emits_note_pairs() {
        let clip = MidiClip::with_notes(4 * Q, false, [note(Q, Q / 2, 60), note(0, Q, 64)]);
        let generator = ClipGenerator::new(Arc::new(clip));
        let mut events = Vec::new();
        let advanced = generator.generate(2 * Q, |tick, ev| events.push((tick, ev.kind, ev.key)));
        assert_eq!(advanced, 2 * Q);
        assert_eq!(
            events,
            vec![
                (0, MidiEventType::NoteOn, 64),
                (Q, MidiEventType::NoteOff, 64),
                (Q, MidiEventType::NoteOn, 60),
                (Q + Q / 2, MidiEventType::NoteOff, 60),
            ]
        );
        assert!(!generator.done());
        assert_eq!(generator.generate(10 * Q, |_, _| {}), 2 * Q);
        assert!(generator.done());
        assert_eq!(generator.play_position(), 4 * Q);
    }

    #[test]
    fn test_looping_clip_wraps() {
        let clip = MidiClip::with_notes(Q, true, [note(0, Q / 4, 60)]);
        let generator = ClipGenerator::new(Arc::new(clip));
        let mut ticks = Vec::new();
        generator.generate(3 * Q, |tick, ev| {
            if ev.kind == MidiEventType::NoteOn {
                ticks.push(tick);
            }
        });
        assert_eq!(ticks, vec![0, Q, 2 * Q]);
        assert!(!generator.done());
        generator.jumpto(Q + 5);
        assert_eq!(generator.clip_position(), 5);
    }

    #[test]
    fn test_empty_clip_is_done() {
        let generator = ClipGenerator::new(Arc::new(MidiClip::new(0, false)));
        assert!(generator.done());
        assert_eq!(generator.generate(Q, |_, _| {}), 0);
    }

    #[test]
    fn test_scout_sequence_with_duplicates() {
        let mut scout = ClipScout::default();
        scout.setup(vec![0, 1, 0, 2]);
        assert_eq!(scout.advance(0), 1);
        assert_eq!(scout.advance(1), 0);
        assert_eq!(scout.advance(0), 2);
        assert_eq!(scout.advance(2), -1);
        scout.reset();
        assert_eq!(scout.advance(0), 1);
        assert_eq!(scout.advance(7), -1);
    }

    #[test]
    fn test_smf_import_rescales_ticks() {
        // format 0, 96 ppq, note 60 from tick 0 to 48, note 62 from 96 to 192
        let bytes: Vec<u8> = [
            &b"MThd"[..],
            &[0, 0, 0, 6, 0, 0, 0, 1, 0, 96],
            &b"MTrk"[..],
            &[0, 0, 0, 20],
            &[0x00, 0x90, 60, 100],
            &[0x30, 0x80, 60, 0],
            &[0x30, 0x90, 62, 64],
            &[0x60, 0x90, 62, 0],
            &[0x00, 0xFF, 0x2F, 0x00],
        ]
        .concat();
        let clip = MidiClip::from_smf(&bytes, 0).unwrap();
        assert_eq!(clip.notes().len(), 2);
        assert_eq!(clip.notes()[0].tick, 0);
        assert_eq!(clip.notes()[0].duration, Q / 2);
        assert_eq!(clip.notes()[1].tick, Q);
        assert_eq!(clip.notes()[1].key, 62);
        assert_eq!(clip.length(), 2 * Q);
        assert!(MidiClip::from_smf(&bytes, 1).is_err());
    }
}
