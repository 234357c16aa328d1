//! Oscillator voices and their allocation.

/// Track identifier inside one synthesizer.
pub type TrackId = u64;

const ATTACK_MS: f32 = 4.0;
const RELEASE_MS: f32 = 40.0;
const PERCUSSION_DECAY_MS: f32 = 120.0;

/// Oscillator shape of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
    Noise,
}

/// Frequency in Hz of a MIDI key, shifted by `cents`.
pub fn key_frequency(key: u8, cents: f32) -> f32 {
    440.0 * 2f32.powf((key as f32 - 69.0 + cents / 100.0) / 12.0)
}

/// Parameters of a note-on.
#[derive(Debug, Clone, Copy)]
pub struct NoteSpec {
    pub track: TrackId,
    pub channel: u8,
    pub key: u8,
    pub velocity: u8,
    pub waveform: Waveform,
    /// Percussive notes decay on their own.
    pub percussive: bool,
}

#[derive(Debug, Clone)]
struct Voice {
    active: bool,
    gate: bool,
    track: TrackId,
    channel: u8,
    key: u8,
    velocity: f32,
    waveform: Waveform,
    percussive: bool,
    phase: f32,
    envelope: f32,
    started_at: u64,
    noise: u32,
}

impl Voice {
    fn idle() -> Self {
        Self {
            active: false,
            gate: false,
            track: 0,
            channel: 0,
            key: 0,
            velocity: 0.0,
            waveform: Waveform::Sine,
            percussive: false,
            phase: 0.0,
            envelope: 0.0,
            started_at: 0,
            noise: 0x1234_5678,
        }
    }

    fn start(&mut self, spec: NoteSpec, clock: u64) {
        self.active = true;
        self.gate = true;
        self.track = spec.track;
        self.channel = spec.channel;
        self.key = spec.key;
        self.velocity = spec.velocity as f32 / 127.0;
        self.waveform = spec.waveform;
        self.percussive = spec.percussive;
        self.phase = 0.0;
        self.envelope = if spec.percussive { 1.0 } else { 0.0 };
        self.started_at = clock;
    }

    fn oscillate(&mut self, step: f32) -> f32 {
        let value = match self.waveform {
            Waveform::Sine => (self.phase * std::f32::consts::TAU).sin(),
            Waveform::Square => {
                if self.phase < 0.5 {
                    0.6
                } else {
                    -0.6
                }
            }
            Waveform::Sawtooth => (2.0 * self.phase - 1.0) * 0.6,
            Waveform::Triangle => 1.0 - 4.0 * (self.phase - 0.5).abs(),
            Waveform::Noise => {
                self.noise ^= self.noise << 13;
                self.noise ^= self.noise >> 17;
                self.noise ^= self.noise << 5;
                (self.noise as f32 / u32::MAX as f32) * 2.0 - 1.0
            }
        };
        self.phase = (self.phase + step).fract();
        value
    }
}

/// Per-voice gain and pitch factors supplied at render time.
#[derive(Debug, Clone, Copy)]
pub struct VoiceMix {
    pub gain: f32,
    pub pan: f32,
    pub cents: f32,
}

/// Fixed set of voices shared by every track of a synthesizer.
#[derive(Debug, Clone)]
pub struct VoicePool {
    voices: Vec<Voice>,
    sample_rate: f32,
    clock: u64,
}

impl VoicePool {
    pub fn new(max_voices: usize, sample_rate: u32) -> Self {
        Self {
            voices: (0..max_voices.max(1)).map(|_| Voice::idle()).collect(),
            sample_rate: sample_rate.max(1) as f32,
            clock: 0,
        }
    }

    /// Start a note, stealing the oldest voice when all are busy.
    pub fn note_on(&mut self, spec: NoteSpec) {
        self.clock += 1;
        let clock = self.clock;
        if let Some(voice) = self.voices.iter_mut().find(|v| !v.active) {
            voice.start(spec, clock);
            return;
        }
        let oldest = self
            .voices
            .iter_mut()
            .min_by_key(|v| (v.gate, v.started_at));
        if let Some(voice) = oldest {
            voice.start(spec, clock);
        }
    }

    /// Release the sounding voices of a key.
    pub fn note_off(&mut self, track: TrackId, channel: u8, key: u8) {
        for voice in self
            .voices
            .iter_mut()
            .filter(|v| v.active && v.gate && v.track == track && v.channel == channel && v.key == key)
        {
            voice.gate = false;
        }
    }

    /// Release every voice of a track, optionally limited to one channel.
    pub fn release_all(&mut self, track: TrackId, channel: Option<u8>) {
        for voice in self.voices.iter_mut().filter(|v| {
            v.active && v.track == track && channel.map_or(true, |c| v.channel == c)
        }) {
            voice.gate = false;
        }
    }

    /// Silence every voice of a track immediately.
    pub fn kill_track(&mut self, track: TrackId) {
        for voice in self.voices.iter_mut().filter(|v| v.track == track) {
            voice.active = false;
            voice.gate = false;
        }
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    pub fn active_on(&self, track: TrackId) -> usize {
        self.voices
            .iter()
            .filter(|v| v.active && v.track == track)
            .count()
    }

    /// Add all voices into an interleaved float buffer.
    ///
    /// # Arguments
    ///
    /// * `out` - Interleaved frames, mono or stereo.
    /// * `channels` - Output channel count.
    /// * `mix` - Gain, pan and detune of a voice's track and MIDI channel.
    pub fn render<F>(&mut self, out: &mut [f32], channels: usize, mix: F)
    where
        F: Fn(TrackId, u8) -> VoiceMix,
    {
        let attack = 1.0 / (ATTACK_MS * self.sample_rate / 1000.0);
        let release = 1.0 / (RELEASE_MS * self.sample_rate / 1000.0);
        let decay = 1.0 / (PERCUSSION_DECAY_MS * self.sample_rate / 1000.0);
        let sample_rate = self.sample_rate;

        for voice in self.voices.iter_mut().filter(|v| v.active) {
            let params = mix(voice.track, voice.channel);
            let step = key_frequency(voice.key, params.cents) / sample_rate;
            let gain = params.gain * voice.velocity * 0.25;
            let (left, right) = (1.0 - params.pan.max(0.0), 1.0 + params.pan.min(0.0));

            for frame in out.chunks_exact_mut(channels.max(1)) {
                if voice.gate && !voice.percussive {
                    voice.envelope = (voice.envelope + attack).min(1.0);
                } else {
                    let rate = if voice.percussive { decay } else { release };
                    voice.envelope -= rate;
                    if voice.envelope <= 0.0 {
                        voice.envelope = 0.0;
                        voice.active = false;
                        break;
                    }
                }
                let sample = voice.oscillate(step) * voice.envelope * gain;
                if frame.len() == 2 {
                    frame[0] += sample * left;
                    frame[1] += sample * right;
                } else {
                    frame[0] += sample;
                }
            }
        }
    }
}
