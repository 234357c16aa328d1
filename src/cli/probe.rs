//! `mmplay probe`: load a file without playing it and describe it as JSON.

use std::collections::BTreeMap;
use std::sync::Arc;

use clap::ArgMatches;
use serde::Serialize;

use mmaudio_lib::output::ManualBackend;
use mmaudio_lib::{ControlOp, ControlValue, MediaManager, MediaType, PlayerHandle, Result};

use super::load;

#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub path: String,
    pub media_type: MediaType,
    pub bytes: usize,
    pub duration_ms: Option<i64>,
    pub tempo_milli_bpm: Option<i64>,
    pub metadata: BTreeMap<String, String>,
}

fn optional_int(manager: &MediaManager, handle: PlayerHandle, op: ControlOp) -> Option<i64> {
    manager
        .control(handle, op)
        .ok()
        .and_then(|value| value.as_int())
        .filter(|value| *value >= 0)
}

fn metadata(manager: &MediaManager, handle: PlayerHandle) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    let count = optional_int(manager, handle, ControlOp::MetadataKeyCount).unwrap_or(0);
    for index in 0..count as i32 {
        let Ok(ControlValue::Text(key)) = manager.control(handle, ControlOp::MetadataKey(index))
        else {
            continue;
        };
        if let Ok(ControlValue::MaybeText(Some(value))) =
            manager.control(handle, ControlOp::MetadataValue(key.clone()))
        {
            entries.insert(key, value);
        }
    }
    entries
}

/// Probe `path` on an engine with no audio output.
pub fn probe(args: &ArgMatches, path: &str) -> Result<ProbeReport> {
    let config = load::load_config(args)?;
    let manager = load::open_engine(config, Arc::new(ManualBackend::new()), None)?;
    let content = load::read_input(path)?;
    let handle = load::load_player(
        &manager,
        1,
        path,
        load::media_hint(args)?,
        &content,
        content.len(),
    )?;
    manager.control(handle, ControlOp::AcquireDevice)?;

    let report = ProbeReport {
        path: path.to_string(),
        media_type: manager.media_type(handle)?,
        bytes: content.len(),
        duration_ms: optional_int(&manager, handle, ControlOp::GetDuration),
        tempo_milli_bpm: optional_int(&manager, handle, ControlOp::GetTempo),
        metadata: metadata(&manager, handle),
    };
    manager.destroy(handle)?;
    Ok(report)
}

pub fn run_probe(args: &ArgMatches) -> Result<i32> {
    let path = args
        .get_one::<String>("INPUT")
        .map(String::as_str)
        .unwrap_or_default();
    let report = probe(args, path)?;
    let json = serde_json::to_string_pretty(&report)
        .map_err(|err| mmaudio_lib::MediaError::Fail(err.to_string()))?;
    println!("{}", json);
    Ok(0)
}
