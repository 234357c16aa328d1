//! Offline rendering: the session is pulled through an audio tunnel by the
//! tunnel mixer, and the mixer's output is written to a WAV file.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::ArgMatches;
use log::{debug, error, info};

use mmaudio_lib::output::{ManualBackend, OutputFormat};
use mmaudio_lib::tunnel::{AudioTunnel, SessionSource, TunnelMixer, TunnelRegistry};
use mmaudio_lib::{ControlOp, MediaError, MediaManager, PlayerHandle, Result};

use super::load;

type WavFile = hound::WavWriter<BufWriter<File>>;

fn wav_error(err: hound::Error) -> MediaError {
    MediaError::Fail(format!("wav writer: {}", err))
}

fn write_block(writer: &mut WavFile, format: OutputFormat, block: &[u8]) -> hound::Result<()> {
    if format.bits == 8 {
        for byte in block {
            writer.write_sample((*byte as i16 - 128) as i8)?;
        }
    } else {
        for pair in block.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
    }
    Ok(())
}

/// Start `handle` and render `length_ms` of its session into `output`.
///
/// Returns the number of PCM bytes written.
pub fn render_to_wav(
    manager: &MediaManager,
    handle: PlayerHandle,
    length_ms: u64,
    output: &Path,
) -> Result<u64> {
    let config = manager.pool().config().clone();
    let format = config.output_format();
    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bits,
        sample_format: hound::SampleFormat::Int,
    };
    let writer = Arc::new(Mutex::new(WavFile::create(output, spec).map_err(wav_error)?));

    let registry = Arc::new(TunnelRegistry::new(config.tunnel_segment_size)?);
    let mut tunnel = AudioTunnel::new(registry.clone(), load::APP_ID);
    tunnel.create()?;
    let mixer = Arc::new(TunnelMixer::new(registry, format));
    mixer.open_tunnel(load::APP_ID)?;
    mixer.mixer_start(load::APP_ID)?;

    manager.control(handle, ControlOp::Start)?;
    let attachment = manager.pool().acquire(load::APP_ID)?;

    let sink_writer = writer.clone();
    let mixer_thread = mixer.spawn(move |block: &[u8]| {
        let mut writer = sink_writer.lock().unwrap();
        if let Err(err) = write_block(&mut writer, format, block) {
            error!("failed to write {} bytes: {}", block.len(), err);
        }
        Duration::ZERO
    });

    let source = SessionSource::new(attachment.mixer.clone(), format).limited_to_ms(length_ms);
    let producer = tunnel.spawn_producer(Box::new(source), Arc::new(AtomicBool::new(false)))?;
    let produced = producer
        .join()
        .map_err(|_| MediaError::Fail("tunnel producer panicked".to_string()))?;
    mixer_thread.stop();
    debug!("tunnel carried {} bytes", produced);

    manager.pool().release(attachment.handle)?;
    mixer.close_tunnel(load::APP_ID)?;
    tunnel.destroy();

    let writer = Arc::try_unwrap(writer)
        .map_err(|_| MediaError::Fail("wav writer still in use".to_string()))?
        .into_inner()
        .map_err(|_| MediaError::Fail("wav writer lock poisoned".to_string()))?;
    writer.finalize().map_err(wav_error)?;
    info!("rendered {} ms to {}", length_ms, output.display());
    Ok(produced)
}

/// Duration to render when `--length` is absent.
pub fn media_length(manager: &MediaManager, handle: PlayerHandle) -> Result<u64> {
    manager.control(handle, ControlOp::AcquireDevice)?;
    let duration = manager
        .control(handle, ControlOp::GetDuration)?
        .as_int()
        .unwrap_or(-1);
    if duration < 0 {
        return Err(MediaError::InvalidArgument(
            "media duration is unknown, pass --length".to_string(),
        ));
    }
    Ok(duration as u64)
}

pub fn run_render(args: &ArgMatches) -> Result<i32> {
    let path = args
        .get_one::<String>("INPUT")
        .map(String::as_str)
        .unwrap_or_default();
    let output = args
        .get_one::<String>("output")
        .map(String::as_str)
        .unwrap_or_default();

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

    let length_ms = match args.get_one::<u64>("length") {
        Some(ms) => *ms,
        None => media_length(&manager, handle)?,
    };
    let bytes = render_to_wav(&manager, handle, length_ms, Path::new(output))?;
    manager.destroy(handle)?;
    println!("{} ms ({} bytes) written to {}", length_ms, bytes, output);
    Ok(0)
}
