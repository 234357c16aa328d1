//! Media types, locator resolution and per-type control capabilities.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{MediaError, Result};

/// Locator for the interactive tone player.
pub const TONE_DEVICE_LOCATOR: &str = "device://tone";
/// Locator for the interactive MIDI player.
pub const MIDI_DEVICE_LOCATOR: &str = "device://midi";
/// Locator prefix for capture devices.
pub const CAPTURE_LOCATOR: &str = "capture://";

/// Kind of content a player renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Tone,
    DeviceTone,
    Midi,
    SpMidi,
    DeviceMidi,
    Pcm,
    Amr,
}

impl MediaType {
    /// Map a MIME content type onto a media type.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.split(';').next().unwrap_or("").trim();
        match mime.to_ascii_lowercase().as_str() {
            "audio/x-wav" | "audio/wav" => Some(Self::Pcm),
            "audio/midi" | "audio/mid" | "audio/x-midi" => Some(Self::Midi),
            "audio/sp-midi" => Some(Self::SpMidi),
            "audio/x-tone-seq" | "audio/tone" => Some(Self::Tone),
            "audio/amr" => Some(Self::Amr),
            _ => None,
        }
    }

    /// Guess the media type from a locator.
    ///
    /// Device locators resolve directly; other locators are resolved from the
    /// file extension. `Ok(None)` means the locator was understood but its
    /// extension does not identify a type.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionNotFound` for unknown schemes, capture locators and
    /// video content.
    pub fn from_uri(uri: &str) -> Result<Option<Self>> {
        let lower = uri.trim().to_ascii_lowercase();
        if lower == TONE_DEVICE_LOCATOR {
            return Ok(Some(Self::DeviceTone));
        }
        if lower == MIDI_DEVICE_LOCATOR {
            return Ok(Some(Self::DeviceMidi));
        }
        if lower.starts_with(CAPTURE_LOCATOR) {
            return Err(MediaError::ConnectionNotFound(format!(
                "capture is not available: {}",
                uri
            )));
        }

        if let Some((scheme, _)) = lower.split_once("://") {
            if !matches!(scheme, "file" | "http" | "https" | "resource") {
                return Err(MediaError::ConnectionNotFound(uri.to_string()));
            }
        }

        let path = lower
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        let extension = match path.rsplit_once('.') {
            Some((_, ext)) if !ext.contains('/') => ext,
            _ => return Ok(None),
        };

        match extension {
            "mid" | "midi" | "kar" => Ok(Some(Self::Midi)),
            "jts" => Ok(Some(Self::Tone)),
            "amr" => Ok(Some(Self::Amr)),
            "wav" => Ok(Some(Self::Pcm)),
            "gif" | "wmv" | "mpg" | "mp4" | "3gp" => Err(MediaError::ConnectionNotFound(format!(
                "unsupported content: {}",
                uri
            ))),
            _ => Ok(None),
        }
    }

    /// Controls available to players of this type.
    pub fn capabilities(self) -> Capabilities {
        match self {
            Self::Tone | Self::DeviceTone => Capabilities::of(&[
                Control::Volume,
                Control::Tone,
                Control::Metadata,
                Control::Tempo,
                Control::Rate,
                Control::Pitch,
            ]),
            Self::Midi | Self::SpMidi | Self::DeviceMidi => Capabilities::of(&[
                Control::Volume,
                Control::Metadata,
                Control::Midi,
                Control::Tempo,
                Control::Rate,
                Control::Pitch,
            ]),
            Self::Pcm | Self::Amr => Capabilities::of(&[Control::Volume, Control::Rate]),
        }
    }

    /// True for types rendered by the synthesizer rather than a wave stream.
    pub fn is_synthesized(self) -> bool {
        !matches!(self, Self::Pcm | Self::Amr)
    }

    /// True for interactive device players that carry no downloaded content.
    pub fn is_device(self) -> bool {
        matches!(self, Self::DeviceTone | Self::DeviceMidi)
    }

    pub fn is_tone(self) -> bool {
        matches!(self, Self::Tone | Self::DeviceTone)
    }
}

impl Display for MediaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Tone => "audio/x-tone-seq",
            Self::DeviceTone => TONE_DEVICE_LOCATOR,
            Self::Midi => "audio/midi",
            Self::SpMidi => "audio/sp-midi",
            Self::DeviceMidi => MIDI_DEVICE_LOCATOR,
            Self::Pcm => "audio/x-wav",
            Self::Amr => "audio/amr",
        };
        write!(f, "{}", name)
    }
}

/// A player control interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Volume,
    Tone,
    Metadata,
    Midi,
    Tempo,
    Rate,
    Pitch,
}

impl Control {
    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Set of controls resolved once from a media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub fn of(controls: &[Control]) -> Self {
        Self(controls.iter().fold(0, |bits, control| bits | control.bit()))
    }

    pub fn supports(self, control: Control) -> bool {
        self.0 & control.bit() != 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_types_resolve() {
        assert_eq!(MediaType::from_mime("audio/x-wav"), Some(MediaType::Pcm));
        assert_eq!(MediaType::from_mime("audio/wav"), Some(MediaType::Pcm));
        assert_eq!(MediaType::from_mime("audio/x-midi"), Some(MediaType::Midi));
        assert_eq!(MediaType::from_mime("audio/sp-midi"), Some(MediaType::SpMidi));
        assert_eq!(MediaType::from_mime("audio/tone"), Some(MediaType::Tone));
        assert_eq!(MediaType::from_mime("audio/AMR"), Some(MediaType::Amr));
        assert_eq!(
            MediaType::from_mime("audio/midi; charset=binary"),
            Some(MediaType::Midi)
        );
        assert_eq!(MediaType::from_mime("video/mpeg"), None);
    }

    #[test]
    fn locators_resolve_by_scheme_and_extension() {
        assert_eq!(
            MediaType::from_uri("device://tone").unwrap(),
            Some(MediaType::DeviceTone)
        );
        assert_eq!(
            MediaType::from_uri("device://midi").unwrap(),
            Some(MediaType::DeviceMidi)
        );
        assert_eq!(
            MediaType::from_uri("http://host/a/song.MID?x=1").unwrap(),
            Some(MediaType::Midi)
        );
        assert_eq!(
            MediaType::from_uri("file:///tmp/ring.jts").unwrap(),
            Some(MediaType::Tone)
        );
        assert_eq!(MediaType::from_uri("/tmp/a.wav").unwrap(), Some(MediaType::Pcm));
        assert_eq!(MediaType::from_uri("http://host/dir.d/stream").unwrap(), None);
    }

    #[test]
    fn unknown_schemes_and_capture_are_rejected() {
        assert!(matches!(
            MediaType::from_uri("rtsp://host/stream"),
            Err(MediaError::ConnectionNotFound(_))
        ));
        assert!(matches!(
            MediaType::from_uri("capture://audio"),
            Err(MediaError::ConnectionNotFound(_))
        ));
        assert!(matches!(
            MediaType::from_uri("http://host/clip.wmv"),
            Err(MediaError::ConnectionNotFound(_))
        ));
    }

    #[test]
    fn capability_table_matches_media_families() {
        let tone = MediaType::Tone.capabilities();
        assert!(tone.supports(Control::Tone));
        assert!(!tone.supports(Control::Midi));
        assert_eq!(tone.len(), 6);

        let midi = MediaType::SpMidi.capabilities();
        assert!(midi.supports(Control::Midi));
        assert!(!midi.supports(Control::Tone));

        let pcm = MediaType::Pcm.capabilities();
        assert!(pcm.supports(Control::Volume));
        assert!(pcm.supports(Control::Rate));
        assert!(!pcm.supports(Control::Metadata));
        assert_eq!(pcm.len(), 2);
    }
}
