//! Shared constants for sessions, buffering and the audio tunnel.

/// Maximum number of concurrent mixer sessions (one per application).
pub const GLOBMAN_INDEX_MAX: usize = 20;

/// Minimum chunk requested from the data source while buffering.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// Initial buffer size when the content length is unknown.
pub const DEFAULT_BUFFER_SIZE: usize = 100 * 1024;

/// Number of leading bytes inspected for the SP-MIDI signature.
pub const SPMIDI_SEARCH_LIMIT: usize = 512;

/// Metadata key indexes at or above this value are rejected.
pub const MAX_METADATA_KEYS: usize = 64;

/// Maximum number of tunnels a single tunnel mixer can serve.
pub const MAX_SUPPORTED_ISOLATES: usize = 16;

/// Default size of one tunnel segment, header included.
pub const MM_SHMEM_SIZE: usize = 16 * 1024;

/// Header words at the start of a tunnel segment: write, read and play size.
pub const TUNNEL_HEADER_INTS: usize = 3;

/// Synthesizer engine time units per millisecond.
///
/// Positions handed to the synthesizer are multiplied by this factor and
/// positions reported back are divided by it.
pub const ENGINE_TICKS_PER_MS: i64 = 10;

/// Rate control values are expressed in milli-percent.
pub const DEFAULT_RATE: i32 = 100_000;
pub const MIN_RATE: i32 = 25_000;
pub const MAX_RATE: i32 = 400_000;

/// Tempo control values are expressed in milli-beats per minute.
pub const DEFAULT_TEMPO: i32 = 120_000;
pub const MIN_TEMPO: i32 = 10_000;
pub const MAX_TEMPO: i32 = 300_000;

/// Pitch control values are expressed in milli-semitones.
pub const MIN_PITCH: i32 = -12_000;
pub const MAX_PITCH: i32 = 12_000;

/// Number of MIDI channels per synthesizer track.
pub const MIDI_CHANNELS: usize = 16;

/// Channel and program used for one-shot tone notes.
pub const TONE_NOTE_CHANNEL: u8 = 5;
pub const TONE_NOTE_PROGRAM: u8 = 0x4B;

/// Program used to voice tone sequences (square lead).
pub const TONE_SEQUENCE_PROGRAM: u8 = 80;

/// Bank number reported for the percussion kit.
pub const DRUM_BANK: i32 = 128;
