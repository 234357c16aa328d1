use std::{
    collections::VecDeque,
    io::{self, Write},
    path::Path,
    sync::{mpsc, Arc, Mutex},
    thread::sleep,
    time::Duration,
};

use clap::ArgMatches;
use log::{debug, info, warn};
use mmaudio_lib::{
    output::{ManualBackend, RodioBackend},
    reporter::{Report, Reporter},
    test_data::midi_melody,
    ControlOp, EngineConfig, MediaEvent, MediaManager, MediaType, Notification, PlayerHandle,
    Result,
};

use crate::cli::{load, probe, render};
use crate::logging;

const PLAYER_ID: i64 = 1;

pub fn run(args: &ArgMatches, log_buffer: Arc<Mutex<VecDeque<String>>>) -> Result<i32> {
    debug!("starting mmplay");
    let code = match args.subcommand() {
        Some(("play", sub)) => run_play(sub)?,
        Some(("tone", sub)) => run_tone(sub)?,
        Some(("probe", sub)) => probe::run_probe(sub)?,
        Some(("render", sub)) => render::run_render(sub)?,
        Some(("demo", sub)) => run_demo(sub)?,
        Some(("create", sub)) => run_create(sub)?,
        _ => 2,
    };

    let problems = logging::problem_count(&log_buffer);
    if problems > 0 {
        debug!("{} warnings logged during the run", problems);
    }
    Ok(code)
}

fn format_ms(ms: i64) -> String {
    if ms < 0 {
        return "--:--".to_string();
    }
    let seconds = ms / 1000;
    format!("{:02}:{:02}.{}", seconds / 60, seconds % 60, (ms % 1000) / 100)
}

fn progress_line(report: &Report) -> String {
    format!(
        "{} {} / {}  vol {}",
        if report.playing() { ">" } else { "||" },
        format_ms(report.time_ms),
        format_ms(report.duration_ms),
        report.volume
    )
}

/// Play already loaded content on the rodio output until it ends.
fn play_content(
    sub: &ArgMatches,
    name: &str,
    hint: Option<MediaType>,
    content: &[u8],
) -> Result<i32> {
    let quiet = sub.get_flag("quiet");
    let config = load::load_config(sub)?;

    let (tx, rx) = mpsc::channel::<Notification>();
    let tx = Mutex::new(tx);
    let listener = Arc::new(move |notification: Notification| {
        let _ = tx.lock().unwrap().send(notification);
    });
    let manager = load::open_engine(config, Arc::new(RodioBackend::new()), Some(listener))?;

    let chunk = option::<usize>(sub, "chunk").unwrap_or(4096);
    let handle = load::load_player(&manager, PLAYER_ID, name, hint, content, chunk)?;
    apply_settings(&manager, handle, sub)?;

    manager.control(handle, ControlOp::Start)?;
    info!("playing {}", name);

    let reporter = if quiet {
        None
    } else {
        let report = Arc::new(Mutex::new(|report: Report| {
            eprint!("\r{:<40}", progress_line(&report));
            let _ = io::stderr().flush();
        }));
        let reporter = Reporter::new(manager.clone(), handle, report, Duration::from_millis(100));
        reporter.start();
        Some(reporter)
    };

    let outcome = wait_for_end(&rx);
    if let Some(reporter) = reporter {
        reporter.stop();
        eprintln!();
    }
    manager.destroy(handle)?;
    Ok(outcome)
}

/// Value of an argument that not every subcommand defines.
fn option<T: Clone + Send + Sync + 'static>(sub: &ArgMatches, id: &str) -> Option<T> {
    sub.try_get_one::<T>(id).ok().flatten().cloned()
}

fn apply_settings(manager: &MediaManager, handle: PlayerHandle, sub: &ArgMatches) -> Result<()> {
    if let Some(volume) = option::<i32>(sub, "volume") {
        manager.control(handle, ControlOp::SetVolume(volume))?;
    }
    if let Some(rate) = option::<i32>(sub, "rate") {
        let applied = manager.control(handle, ControlOp::SetRate(rate))?;
        debug!("rate set to {:?}", applied);
    }
    if let Some(start) = option::<i64>(sub, "start") {
        manager.control(handle, ControlOp::SetTime(start))?;
    }
    Ok(())
}

/// Block until the player reports end of media or is torn down.
fn wait_for_end(rx: &mpsc::Receiver<Notification>) -> i32 {
    loop {
        let Ok(notification) = rx.recv() else {
            return 0;
        };
        if notification.player_id != PLAYER_ID {
            continue;
        }
        debug!("{:?}", notification);
        match notification.event {
            MediaEvent::EndOfMedia => return 0,
            MediaEvent::DestroyFinished => {
                warn!("player destroyed before the end of media");
                return 1;
            }
            _ => {}
        }
    }
}

fn run_play(sub: &ArgMatches) -> Result<i32> {
    let path = sub
        .get_one::<String>("INPUT")
        .map(String::as_str)
        .unwrap_or_default();
    let content = load::read_input(path)?;
    play_content(sub, path, load::media_hint(sub)?, &content)
}

fn run_tone(sub: &ArgMatches) -> Result<i32> {
    let config = load::load_config(sub)?;
    let manager = load::open_engine(config, Arc::new(RodioBackend::new()), None)?;
    let note = sub.get_one::<i32>("note").copied().unwrap_or(69);
    let duration = sub.get_one::<u32>("duration").copied().unwrap_or(500);
    let volume = sub.get_one::<i32>("volume").copied().unwrap_or(100);

    let status = manager.play_tone(load::APP_ID, note, duration, volume)?;
    info!("tone {} for {} ms: {:?}", note, duration, status);
    sleep(Duration::from_millis(duration as u64 + 100));
    Ok(0)
}

fn demo_melody() -> Vec<u8> {
    midi_melody(&[60, 62, 64, 65, 67, 69, 71, 72], 200, Some("mmaudio demo"), false)
}

fn run_demo(sub: &ArgMatches) -> Result<i32> {
    let content = demo_melody();
    let Some(output) = sub.get_one::<String>("render") else {
        return play_content(sub, "demo.mid", Some(MediaType::Midi), &content);
    };

    let config = load::load_config(sub)?;
    let manager = load::open_engine(config, Arc::new(ManualBackend::new()), None)?;
    let handle = load::load_player(
        &manager,
        PLAYER_ID,
        "demo.mid",
        Some(MediaType::Midi),
        &content,
        content.len(),
    )?;
    let length_ms = render::media_length(&manager, handle)?;
    render::render_to_wav(&manager, handle, length_ms, Path::new(output))?;
    manager.destroy(handle)?;
    println!("demo written to {}", output);
    Ok(0)
}

fn run_create(sub: &ArgMatches) -> Result<i32> {
    match sub.subcommand() {
        Some(("config-json", _)) => {
            let json = serde_json::to_string_pretty(&EngineConfig::default())
                .map_err(|err| mmaudio_lib::MediaError::Fail(err.to_string()))?;
            println!("{}", json);
            Ok(0)
        }
        _ => Ok(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_progress_times() {
        assert_eq!(format_ms(-1), "--:--");
        assert_eq!(format_ms(0), "00:00.0");
        assert_eq!(format_ms(61_250), "01:01.2");
    }

    #[test]
    fn demo_melody_lasts_eight_notes() {
        let content = demo_melody();
        let manager = load::open_engine(
            EngineConfig::default(),
            Arc::new(ManualBackend::new()),
            None,
        )
        .unwrap();
        let handle = load::load_player(
            &manager,
            PLAYER_ID,
            "demo.mid",
            None,
            &content,
            content.len(),
        )
        .unwrap();
        assert_eq!(render::media_length(&manager, handle).unwrap(), 1600);
        assert_eq!(
            manager.control(handle, ControlOp::MetadataValue("title".to_string())).unwrap(),
            mmaudio_lib::ControlValue::MaybeText(Some("mmaudio demo".to_string()))
        );
    }
}
