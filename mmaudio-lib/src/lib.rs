//! # mmaudio
//!
//! Native audio core of a mobile media player: reference counted mixer
//! sessions shared by the players of one application, the player lifecycle
//! state machine, a streaming content buffer with download backpressure, a
//! small General MIDI synthesizer and the ring-buffer audio tunnel that
//! carries mixed PCM from an application to the tunnel mixer.

pub mod buffering;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod manager;
pub mod media;
pub mod output;
pub mod player;
pub mod reporter;
pub mod session;
pub mod synth;
pub mod test_data;
pub mod tunnel;

pub use config::EngineConfig;
pub use error::{MediaError, Result};
pub use events::{EventListener, MediaEvent, Notification, Status};
pub use manager::{ControlOp, ControlValue, Creation, MediaManager, PlayerHandle};
pub use media::MediaType;
pub use player::PlayerState;
