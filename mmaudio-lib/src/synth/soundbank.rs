//! Instrument definitions for the synthesizer.
//!
//! The built-in bank covers the 128 General MIDI programs. A DLS file can
//! override program names; its waveforms are approximated by the built-in
//! oscillators.

use std::path::Path;

use log::{debug, info};

use crate::error::{MediaError, Result};

use super::voice::Waveform;

const GM_PROGRAM_NAMES: [&str; 128] = [
    "Acoustic Grand Piano", "Bright Acoustic Piano", "Electric Grand Piano", "Honky-tonk Piano",
    "Electric Piano 1", "Electric Piano 2", "Harpsichord", "Clavinet",
    "Celesta", "Glockenspiel", "Music Box", "Vibraphone",
    "Marimba", "Xylophone", "Tubular Bells", "Dulcimer",
    "Drawbar Organ", "Percussive Organ", "Rock Organ", "Church Organ",
    "Reed Organ", "Accordion", "Harmonica", "Tango Accordion",
    "Acoustic Guitar (nylon)", "Acoustic Guitar (steel)", "Electric Guitar (jazz)", "Electric Guitar (clean)",
    "Electric Guitar (muted)", "Overdriven Guitar", "Distortion Guitar", "Guitar Harmonics",
    "Acoustic Bass", "Electric Bass (finger)", "Electric Bass (pick)", "Fretless Bass",
    "Slap Bass 1", "Slap Bass 2", "Synth Bass 1", "Synth Bass 2",
    "Violin", "Viola", "Cello", "Contrabass",
    "Tremolo Strings", "Pizzicato Strings", "Orchestral Harp", "Timpani",
    "String Ensemble 1", "String Ensemble 2", "Synth Strings 1", "Synth Strings 2",
    "Choir Aahs", "Voice Oohs", "Synth Voice", "Orchestra Hit",
    "Trumpet", "Trombone", "Tuba", "Muted Trumpet",
    "French Horn", "Brass Section", "Synth Brass 1", "Synth Brass 2",
    "Soprano Sax", "Alto Sax", "Tenor Sax", "Baritone Sax",
    "Oboe", "English Horn", "Bassoon", "Clarinet",
    "Piccolo", "Flute", "Recorder", "Pan Flute",
    "Blown Bottle", "Shakuhachi", "Whistle", "Ocarina",
    "Lead 1 (square)", "Lead 2 (sawtooth)", "Lead 3 (calliope)", "Lead 4 (chiff)",
    "Lead 5 (charang)", "Lead 6 (voice)", "Lead 7 (fifths)", "Lead 8 (bass + lead)",
    "Pad 1 (new age)", "Pad 2 (warm)", "Pad 3 (polysynth)", "Pad 4 (choir)",
    "Pad 5 (bowed)", "Pad 6 (metallic)", "Pad 7 (halo)", "Pad 8 (sweep)",
    "FX 1 (rain)", "FX 2 (soundtrack)", "FX 3 (crystal)", "FX 4 (atmosphere)",
    "FX 5 (brightness)", "FX 6 (goblins)", "FX 7 (echoes)", "FX 8 (sci-fi)",
    "Sitar", "Banjo", "Shamisen", "Koto",
    "Kalimba", "Bagpipe", "Fiddle", "Shanai",
    "Tinkle Bell", "Agogo", "Steel Drums", "Woodblock",
    "Taiko Drum", "Melodic Tom", "Synth Drum", "Reverse Cymbal",
    "Guitar Fret Noise", "Breath Noise", "Seashore", "Bird Tweet",
    "Telephone Ring", "Helicopter", "Applause", "Gunshot",
];

const FIRST_DRUM_KEY: u8 = 35;
const GM_DRUM_NAMES: [&str; 47] = [
    "Acoustic Bass Drum", "Bass Drum 1", "Side Stick", "Acoustic Snare",
    "Hand Clap", "Electric Snare", "Low Floor Tom", "Closed Hi-Hat",
    "High Floor Tom", "Pedal Hi-Hat", "Low Tom", "Open Hi-Hat",
    "Low-Mid Tom", "Hi-Mid Tom", "Crash Cymbal 1", "High Tom",
    "Ride Cymbal 1", "Chinese Cymbal", "Ride Bell", "Tambourine",
    "Splash Cymbal", "Cowbell", "Crash Cymbal 2", "Vibraslap",
    "Ride Cymbal 2", "Hi Bongo", "Low Bongo", "Mute Hi Conga",
    "Open Hi Conga", "Low Conga", "High Timbale", "Low Timbale",
    "High Agogo", "Low Agogo", "Cabasa", "Maracas",
    "Short Whistle", "Long Whistle", "Short Guiro", "Long Guiro",
    "Claves", "Hi Wood Block", "Low Wood Block", "Mute Cuica",
    "Open Cuica", "Mute Triangle", "Open Triangle",
];

/// Oscillator family for a General MIDI program.
fn waveform_for(program: u8) -> Waveform {
    match program {
        0..=15 => Waveform::Triangle,
        16..=23 => Waveform::Square,
        24..=39 => Waveform::Sawtooth,
        40..=55 => Waveform::Sawtooth,
        56..=71 => Waveform::Square,
        72..=79 => Waveform::Sine,
        80 => Waveform::Square,
        81..=87 => Waveform::Sawtooth,
        88..=111 => Waveform::Triangle,
        112..=119 => Waveform::Noise,
        _ => Waveform::Noise,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub name: String,
    pub waveform: Waveform,
}

/// Melodic instruments by program number.
#[derive(Debug, Clone)]
pub struct Soundbank {
    pub name: String,
    instruments: Vec<Instrument>,
}

impl Soundbank {
    /// Bank built from the General MIDI program table.
    pub fn builtin() -> Self {
        Self {
            name: "General MIDI".to_string(),
            instruments: GM_PROGRAM_NAMES
                .iter()
                .enumerate()
                .map(|(program, name)| Instrument {
                    name: name.to_string(),
                    waveform: waveform_for(program as u8),
                })
                .collect(),
        }
    }

    /// Load a DLS soundbank from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|err| {
            MediaError::Soundbank(format!("cannot read {}: {}", path.display(), err))
        })?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "soundbank".to_string());
        let bank = Self::from_dls(&name, &data)?;
        info!("loaded soundbank {} from {}", bank.name, path.display());
        Ok(bank)
    }

    /// Parse a DLS image, taking instrument names from its `lins` list.
    pub fn from_dls(name: &str, data: &[u8]) -> Result<Self> {
        if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"DLS " {
            return Err(MediaError::Soundbank(format!("{} is not a DLS soundbank", name)));
        }
        let mut bank = Self::builtin();
        bank.name = name.to_string();

        let mut renamed = 0;
        for (id, body) in riff_chunks(&data[12..]) {
            if id != *b"LIST" || body.len() < 4 || &body[0..4] != b"lins" {
                continue;
            }
            for (ins_id, ins_body) in riff_chunks(&body[4..]) {
                if ins_id != *b"LIST" || ins_body.len() < 4 || &ins_body[0..4] != b"ins " {
                    continue;
                }
                if let Some((program, label)) = parse_instrument(&ins_body[4..]) {
                    bank.instruments[program as usize].name = label;
                    renamed += 1;
                }
            }
        }
        debug!("soundbank {} names {} instruments", bank.name, renamed);
        Ok(bank)
    }

    pub fn instrument(&self, program: u8) -> &Instrument {
        &self.instruments[(program & 0x7F) as usize]
    }

    pub fn program_name(&self, program: u8) -> Option<&str> {
        self.instruments
            .get(program as usize)
            .map(|instrument| instrument.name.as_str())
    }

    pub fn program_count(&self) -> usize {
        self.instruments.len()
    }
}

/// Name of a percussion key, if the key is mapped in the drum kit.
pub fn drum_key_name(key: u8) -> Option<&'static str> {
    key.checked_sub(FIRST_DRUM_KEY)
        .and_then(|index| GM_DRUM_NAMES.get(index as usize))
        .copied()
}

/// Split a RIFF body into `(id, payload)` pairs.
fn riff_chunks(mut data: &[u8]) -> Vec<([u8; 4], &[u8])> {
    let mut chunks = Vec::new();
    while data.len() >= 8 {
        let id = [data[0], data[1], data[2], data[3]];
        let len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let end = (8 + len).min(data.len());
        chunks.push((id, &data[8..end]));
        let padded = end + (len % 2);
        data = &data[padded.min(data.len())..];
    }
    chunks
}

/// Program number and display name of one melodic `ins ` list.
fn parse_instrument(data: &[u8]) -> Option<(u8, String)> {
    let mut program = None;
    let mut label = None;
    for (id, body) in riff_chunks(data) {
        match &id {
            b"insh" if body.len() >= 12 => {
                let bank = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
                let instrument = u32::from_le_bytes([body[8], body[9], body[10], body[11]]);
                if bank & 0x8000_0000 == 0 {
                    program = Some((instrument & 0x7F) as u8);
                }
            }
            b"LIST" if body.len() >= 4 && &body[0..4] == b"INFO" => {
                for (info_id, info_body) in riff_chunks(&body[4..]) {
                    if &info_id == b"INAM" {
                        let text = String::from_utf8_lossy(info_body)
                            .trim_end_matches('\0')
                            .trim()
                            .to_string();
                        if !text.is_empty() {
                            label = Some(text);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Some((program?, label?))
}
