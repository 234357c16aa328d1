//! CLI argument definitions for `mmplay`.

use clap::{Arg, ArgAction, Command};

fn input_arg() -> Arg {
    Arg::new("INPUT")
        .help("Media file (.mid, .kar, .wav, .jts, ...)")
        .required(true)
        .index(1)
}

fn mime_arg() -> Arg {
    Arg::new("mime")
        .long("mime")
        .short('m')
        .value_name("TYPE")
        .help("Content type to use instead of the file extension (e.g. audio/midi)")
}

/// Build the CLI argument parser and command definitions.
pub fn build_cli() -> Command {
    Command::new("mmplay")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Play, probe and render media through the mmaudio core")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("PATH")
                .global(true)
                .help("Engine configuration JSON"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .short('d')
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Show debug output"),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Suppress progress and log output"),
        )
        .subcommand(
            Command::new("play")
                .about("Play a media file on the default output device")
                .arg(input_arg())
                .arg(mime_arg())
                .arg(
                    Arg::new("volume")
                        .long("volume")
                        .short('v')
                        .value_name("LEVEL")
                        .default_value("100")
                        .value_parser(clap::value_parser!(i32))
                        .help("Playback volume, 0-100"),
                )
                .arg(
                    Arg::new("rate")
                        .long("rate")
                        .value_name("MILLI_PERCENT")
                        .value_parser(clap::value_parser!(i32))
                        .help("Playback rate in milli-percent (100000 is normal speed)"),
                )
                .arg(
                    Arg::new("start")
                        .long("start")
                        .short('s')
                        .value_name("MS")
                        .value_parser(clap::value_parser!(i64))
                        .help("Start position in milliseconds"),
                )
                .arg(
                    Arg::new("chunk")
                        .long("chunk")
                        .value_name("BYTES")
                        .default_value("4096")
                        .value_parser(clap::value_parser!(usize))
                        .help("Size of the chunks the file is streamed in"),
                ),
        )
        .subcommand(
            Command::new("tone")
                .about("Play a single note")
                .arg(
                    Arg::new("note")
                        .long("note")
                        .short('n')
                        .value_name("KEY")
                        .default_value("69")
                        .value_parser(clap::value_parser!(i32))
                        .help("MIDI key, 0-127"),
                )
                .arg(
                    Arg::new("duration")
                        .long("duration")
                        .value_name("MS")
                        .default_value("500")
                        .value_parser(clap::value_parser!(u32))
                        .help("Note length in milliseconds"),
                )
                .arg(
                    Arg::new("volume")
                        .long("volume")
                        .short('v')
                        .value_name("LEVEL")
                        .default_value("100")
                        .value_parser(clap::value_parser!(i32))
                        .help("Note volume, 0-100"),
                ),
        )
        .subcommand(
            Command::new("probe")
                .about("Print media type, duration and metadata as JSON")
                .arg(input_arg())
                .arg(mime_arg()),
        )
        .subcommand(
            Command::new("render")
                .about("Render a media file through the audio tunnel into a WAV file")
                .arg(input_arg())
                .arg(mime_arg())
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .value_name("PATH")
                        .required(true)
                        .help("WAV file to write"),
                )
                .arg(
                    Arg::new("length")
                        .long("length")
                        .short('l')
                        .value_name("MS")
                        .value_parser(clap::value_parser!(u64))
                        .help("Milliseconds to render; defaults to the media duration"),
                ),
        )
        .subcommand(
            Command::new("demo")
                .about("Play a built-in MIDI melody")
                .arg(
                    Arg::new("render")
                        .long("render")
                        .value_name("PATH")
                        .help("Write the melody to a WAV file instead of playing it"),
                ),
        )
        .subcommand(
            Command::new("create")
                .about("Emit default JSON payloads")
                .subcommand_required(true)
                .subcommand(
                    Command::new("config-json").about("Print the default engine configuration"),
                ),
        )
}
