/// Ticks per quarter note, divisible by all common tuplets.
pub const TRANSPORT_PPQN: i64 = 4_838_400;

/// Tempo and time signature with precomputed tick/sample ratios.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickSignature {
    beats_per_bar: u8,
    beat_unit: u8,
    beat_ticks: i64,
    bar_ticks: i64,
    samplerate: u32,
    bpm: f64,
    ticks_per_sample: f64,
    samples_per_tick: f64,
}

impl Default for TickSignature {
    fn default() -> Self {
        Self::new(120.0, 4, 4, 48000)
    }
}

impl TickSignature {
    pub fn new(bpm: f64, beats_per_bar: u8, beat_unit: u8, samplerate: u32) -> Self {
        let mut sig = Self {
            beats_per_bar: 4,
            beat_unit: 4,
            beat_ticks: 0,
            bar_ticks: 0,
            samplerate,
            bpm: 0.0,
            ticks_per_sample: 0.0,
            samples_per_tick: 0.0,
        };
        if !sig.set_signature(beats_per_bar, beat_unit) {
            sig.set_signature(4, 4);
        }
        sig.set_bpm(bpm);
        sig
    }

    pub fn samplerate(&self) -> u32 {
        self.samplerate
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn beats_per_bar(&self) -> u8 {
        self.beats_per_bar
    }

    pub fn beat_unit(&self) -> u8 {
        self.beat_unit
    }

    pub fn beat_ticks(&self) -> i64 {
        self.beat_ticks
    }

    pub fn bar_ticks(&self) -> i64 {
        self.bar_ticks
    }

    pub fn ticks_per_sample(&self) -> f64 {
        self.ticks_per_sample
    }

    pub fn set_samplerate(&mut self, samplerate: u32) {
        self.samplerate = samplerate;
        self.update_ratios();
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = if bpm.is_finite() { bpm.clamp(0.0, 1024.0) } else { 0.0 };
        self.update_ratios();
    }

    /// Returns false and keeps the old signature for an invalid beat unit.
    pub fn set_signature(&mut self, beats_per_bar: u8, beat_unit: u8) -> bool {
        if beats_per_bar == 0 || !matches!(beat_unit, 1 | 2 | 4 | 8 | 16) {
            return false;
        }
        self.beats_per_bar = beats_per_bar;
        self.beat_unit = beat_unit;
        self.beat_ticks = TRANSPORT_PPQN * 4 / beat_unit as i64;
        self.bar_ticks = self.beat_ticks * beats_per_bar as i64;
        true
    }

    fn update_ratios(&mut self) {
        let ticks_per_second = TRANSPORT_PPQN as f64 * self.bpm / 60.0;
        if self.samplerate == 0 || ticks_per_second <= 0.0 {
            self.ticks_per_sample = 0.0;
            self.samples_per_tick = 0.0;
            return;
        }
        self.ticks_per_sample = ticks_per_second / self.samplerate as f64;
        self.samples_per_tick = 1.0 / self.ticks_per_sample;
    }

    pub fn sample_to_tick(&self, sample: i64) -> i64 {
        (self.ticks_per_sample * sample as f64) as i64
    }

    pub fn sample_from_tick(&self, tick: i64) -> i64 {
        if self.ticks_per_sample <= 0.0 {
            return 0;
        }
        (tick as f64 / self.ticks_per_sample) as i64
    }

    pub fn bar_from_tick(&self, tick: i64) -> i64 {
        tick.div_euclid(self.bar_ticks)
    }

    pub fn bar_to_tick(&self, bar: i64) -> i64 {
        bar * self.bar_ticks
    }
}

/// Playback position and tempo seen by processors during a render block.
#[derive(Clone, Debug)]
pub struct AudioTransport {
    pub samplerate: u32,
    pub tick_sig: TickSignature,
    /// Frames processed since playback start.
    pub current_frame: i64,
    pub current_tick: i64,
    pub current_bar: i64,
    /// Running tempo, 0 while stopped.
    pub current_bpm: f64,
    pub current_bar_tick: i64,
    pub next_bar_tick: i64,
}

impl AudioTransport {
    pub fn new(samplerate: u32) -> Self {
        let mut transport = Self {
            samplerate,
            tick_sig: TickSignature::new(120.0, 4, 4, samplerate),
            current_frame: 0,
            current_tick: 0,
            current_bar: 0,
            current_bpm: 0.0,
            current_bar_tick: 0,
            next_bar_tick: 0,
        };
        transport.update_current();
        transport
    }

    pub fn running(&self) -> bool {
        self.current_bpm != 0.0
    }

    pub fn set_running(&mut self, running: bool) {
        self.current_bpm = if running { self.tick_sig.bpm() } else { 0.0 };
    }

    pub fn tempo(&mut self, bpm: f64, beats_per_bar: u8, beat_unit: u8) {
        let was_running = self.running();
        self.tick_sig.set_bpm(bpm);
        self.tick_sig.set_signature(beats_per_bar, beat_unit);
        if was_running {
            self.current_bpm = self.tick_sig.bpm();
        }
        self.update_current();
    }

    pub fn set_tick(&mut self, tick: i64) {
        self.current_tick = tick.max(0);
        self.update_current();
    }

    /// Move forward by `nsamples`, ticks only advance while running.
    pub fn advance(&mut self, nsamples: usize) {
        self.current_frame += nsamples as i64;
        if self.running() {
            self.current_tick += self.tick_sig.sample_to_tick(nsamples as i64);
        }
        self.update_current();
    }

    pub fn update_current(&mut self) {
        self.current_bar = self.tick_sig.bar_from_tick(self.current_tick);
        self.current_bar_tick = self.tick_sig.bar_to_tick(self.current_bar);
        self.next_bar_tick = self.current_bar_tick + self.tick_sig.bar_ticks();
    }

    pub fn sample_to_tick(&self, sample: i64) -> i64 {
        self.tick_sig.sample_to_tick(sample)
    }

    pub fn sample_from_tick(&self, tick: i64) -> i64 {
        self.tick_sig.sample_from_tick(tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integral_tick_ratio() {
        let sig = TickSignature::new(125.0, 4, 4, 48000);
        assert_eq!(sig.ticks_per_sample(), 210.0);
        assert_eq!(sig.sample_to_tick(64), 13440);
        assert_eq!(sig.sample_from_tick(21000), 100);
        assert_eq!(sig.sample_from_tick(-210), -1);
    }

    #[test]
    fn test_bar_ticks() {
        let sig = TickSignature::new(120.0, 3, 8, 44100);
        assert_eq!(sig.beat_ticks(), TRANSPORT_PPQN / 2);
        assert_eq!(sig.bar_ticks(), TRANSPORT_PPQN * 3 / 2);
        assert_eq!(sig.bar_from_tick(sig.bar_ticks() * 2 + 1), 2);
    }

    #[test]
    fn test_invalid_signature_is_rejected() {
        let mut sig = TickSignature::default();
        assert!(!sig.set_signature(4, 3));
        assert_eq!(sig.beat_unit(), 4);
    }

    #[test]
    fn test_zero_tempo_has_no_frames() {
        let sig = TickSignature::new(0.0, 4, 4, 48000);
        assert_eq!(sig.sample_to_tick(1000), 0);
        assert_eq!(sig.sample_from_tick(1000), 0);
    }

    #[test]
    fn test_advance_tracks_bars() {
        let mut transport = AudioTransport::new(48000);
        transport.tempo(125.0, 4, 4);
        transport.advance(100);
        assert_eq!(transport.current_frame, 100);
        assert_eq!(transport.current_tick, 0);
        transport.set_running(true);
        let bar_frames = transport.sample_from_tick(transport.tick_sig.bar_ticks());
        transport.advance(bar_frames as usize);
        assert_eq!(transport.current_bar, 1);
        assert_eq!(transport.current_bar_tick, transport.tick_sig.bar_ticks());
        assert_eq!(
            transport.next_bar_tick,
            2 * transport.tick_sig.bar_ticks()
        );
    }
}
