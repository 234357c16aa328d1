//! Shared setup for the subcommands: configuration, engine and content.

use std::path::Path;
use std::sync::Arc;

use clap::ArgMatches;
use log::{debug, info};

use mmaudio_lib::output::AudioBackend;
use mmaudio_lib::{
    EngineConfig, EventListener, MediaError, MediaManager, MediaType, PlayerHandle, Result,
    Status,
};

/// Application id every player of this process is created under.
pub const APP_ID: i32 = 1;

/// Load `--config` when given, otherwise use the defaults.
pub fn load_config(args: &ArgMatches) -> Result<EngineConfig> {
    match args.get_one::<String>("config") {
        Some(path) => {
            info!("loading engine config from {}", path);
            EngineConfig::load(Path::new(path))
        }
        None => Ok(EngineConfig::default()),
    }
}

/// Media type forced with `--mime`, if any.
pub fn media_hint(args: &ArgMatches) -> Result<Option<MediaType>> {
    let Some(mime) = args.get_one::<String>("mime") else {
        return Ok(None);
    };
    MediaType::from_mime(mime)
        .map(Some)
        .ok_or_else(|| MediaError::InvalidArgument(format!("unknown content type {}", mime)))
}

pub fn open_engine(
    config: EngineConfig,
    backend: Arc<dyn AudioBackend>,
    listener: Option<EventListener>,
) -> Result<Arc<MediaManager>> {
    Ok(Arc::new(MediaManager::new(config, backend, listener)?))
}

/// Create a player for `name` and stream `content` into it in `chunk`
/// sized pieces, the way a download would arrive.
pub fn load_player(
    manager: &MediaManager,
    player_id: i64,
    name: &str,
    hint: Option<MediaType>,
    content: &[u8],
    chunk: usize,
) -> Result<PlayerHandle> {
    let creation = manager.create(
        APP_ID,
        player_id,
        hint,
        Some(name),
        Some(content.len() as u64),
    )?;
    if creation.status == Status::NoAudioDevice {
        log::warn!("no audio output device, {} will not be audible", name);
    }
    let handle = creation.handle;

    let mut offset = 0;
    while offset < content.len() {
        let end = (offset + chunk.max(1)).min(content.len());
        let report = manager.submit_data(handle, Some(&content[offset..end]))?;
        offset += report.consumed;
        if !report.need_more_data {
            break;
        }
        if report.consumed == 0 {
            return Err(MediaError::Fail(format!(
                "player stopped accepting data at byte {}",
                offset
            )));
        }
    }
    manager.submit_data(handle, None)?;
    debug!("{}: {} bytes submitted", name, offset);

    if let Some(ticket) = creation.realize {
        ticket.wait()?;
    }
    Ok(handle)
}

pub fn read_input(path: &str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            MediaError::ConnectionNotFound(path.to_string())
        } else {
            MediaError::Io(err)
        }
    })
}
