// Haptika
// Copyright (c) 2024-2025 The Project Haptika Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::fs;
use std::process::exit;

use clap::{App, Arg, ArgMatches};
use log::{error, info};

use haptika::codec::{decode_band, WaveletEncoder};
use haptika::core::errors::{Error, Result};
use haptika::core::model::{BandType, Channel, Haptic, Perception, PerceptionModality};
use haptika::{read_hmpg, read_mihs, write_hmpg, write_mihs};

fn main() {
    pretty_env_logger::init();

    let matches = App::new("Haptika")
        .version("0.3")
        .about("Encode, decode, and stream MPEG haptic experiences")
        .subcommand(
            App::new("encode")
                .about("Encode a WAV signal into an .hmpg experience")
                .arg(Arg::new("in").long("in").value_name("FILE").required(true))
                .arg(Arg::new("out").long("out").value_name("FILE").required(true))
                .arg(
                    Arg::new("bl")
                        .long("bl")
                        .value_name("SAMPLES")
                        .default_value("512")
                        .help("Wavelet block length in samples, a power of two"),
                )
                .arg(
                    Arg::new("budget")
                        .long("budget")
                        .value_name("BITS")
                        .default_value("1024")
                        .help("Bit budget per wavelet block"),
                )
                .arg(
                    Arg::new("cutoff")
                        .long("cutoff")
                        .value_name("HZ")
                        .default_value("72")
                        .help("Lower frequency limit of the wavelet band"),
                ),
        )
        .subcommand(
            App::new("decode")
                .about("Decode an .hmpg experience back into a WAV signal")
                .arg(Arg::new("in").long("in").value_name("FILE").required(true))
                .arg(Arg::new("out").long("out").value_name("FILE").required(true)),
        )
        .subcommand(
            App::new("stream")
                .about("Packetize an .hmpg experience into an .mpg unit stream")
                .arg(Arg::new("in").long("in").value_name("FILE").required(true))
                .arg(Arg::new("out").long("out").value_name("FILE").required(true))
                .arg(
                    Arg::new("packet-ms")
                        .long("packet-ms")
                        .value_name("MS")
                        .default_value("128")
                        .help("Packet window duration in milliseconds"),
                )
                .arg(
                    Arg::new("verify")
                        .long("verify")
                        .takes_value(false)
                        .help("Reassemble the stream and compare it against the input"),
                ),
        )
        .get_matches();

    let code = match matches.subcommand() {
        Some(("encode", args)) => run(encode(args)),
        Some(("decode", args)) => run(decode(args)),
        Some(("stream", args)) => run(stream(args)),
        _ => {
            eprintln!("no command given, try --help");
            1
        }
    };

    exit(code)
}

fn run(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            error!("{}", err);
            match err {
                Error::IoError(_) => 1,
                Error::Inconsistent(_) => 3,
                _ => 2,
            }
        }
    }
}

fn parse_arg<T: std::str::FromStr>(args: &ArgMatches, name: &str) -> Result<T> {
    args.value_of(name)
        .unwrap()
        .parse::<T>()
        .map_err(|_| Error::RangeViolation("malformed numeric argument"))
}

fn encode(args: &ArgMatches) -> Result<()> {
    let input = args.value_of("in").unwrap();
    let output = args.value_of("out").unwrap();

    let bl: usize = parse_arg(args, "bl")?;
    let budget: u32 = parse_arg(args, "budget")?;
    let cutoff: u32 = parse_arg(args, "cutoff")?;

    let (samples, sample_rate) = read_wav(input)?;

    info!("encoding {} samples at {} Hz from {}", samples.len(), sample_rate, input);

    let mut haptic = Haptic::new("encoded from pcm");

    let mut perception = Perception::new(0, 0, input, PerceptionModality::Vibration);
    let mut channel = Channel::new(0, "pcm signal");
    channel.frequency_sampling = Some(sample_rate);
    channel.sample_count = Some(samples.len() as u32);

    let mut encoder = WaveletEncoder::try_new(bl, sample_rate)?;
    let band = encoder.encode_signal(&samples, budget, cutoff, haptic.timescale)?;

    channel.bands.push(band);
    perception.channels.push(channel);
    haptic.perceptions.push(perception);

    fs::write(output, write_hmpg(&haptic)?)?;

    info!("wrote {}", output);
    Ok(())
}

fn decode(args: &ArgMatches) -> Result<()> {
    let input = args.value_of("in").unwrap();
    let output = args.value_of("out").unwrap();

    let haptic = read_hmpg(&fs::read(input)?)?;

    // Reconstruct the first wavelet band in the experience.
    let band = haptic
        .perceptions
        .iter()
        .flat_map(|p| p.channels.iter())
        .flat_map(|c| c.bands.iter())
        .find(|b| b.band_type == BandType::WaveletWave)
        .ok_or(Error::Inconsistent("no wavelet band to decode"))?;

    let samples = decode_band(band, haptic.timescale)?;

    write_wav(output, &samples, band.upper_frequency_limit as u32)?;

    info!("wrote {} samples to {}", samples.len(), output);
    Ok(())
}

fn stream(args: &ArgMatches) -> Result<()> {
    let input = args.value_of("in").unwrap();
    let output = args.value_of("out").unwrap();

    let packet_ms: u32 = parse_arg(args, "packet-ms")?;

    let haptic = read_hmpg(&fs::read(input)?)?;
    let buf = write_mihs(&haptic, packet_ms)?;

    if args.is_present("verify") {
        let mut check = haptic.clone();
        check.linearize_timelines();

        if read_mihs(&buf)? != check {
            return Err(Error::Inconsistent("reassembled stream differs from input"));
        }
        info!("stream verified against input");
    }

    fs::write(output, &buf)?;

    info!("wrote {} stream bytes to {}", buf.len(), output);
    Ok(())
}

/// Reads a WAV file into mono samples normalized to `[-1, 1]`.
fn read_wav(path: &str) -> Result<(Vec<f64>, u32)> {
    let mut reader = hound::WavReader::open(path).map_err(wav_error)?;

    let spec = reader.spec();

    let samples: Vec<f64> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = f64::from(1u32 << (spec.bits_per_sample - 1));
            reader
                .samples::<i32>()
                .step_by(spec.channels as usize)
                .map(|s| s.map(|v| f64::from(v) / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(wav_error)?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .step_by(spec.channels as usize)
            .map(|s| s.map(f64::from))
            .collect::<std::result::Result<_, _>>()
            .map_err(wav_error)?,
    };

    Ok((samples, spec.sample_rate))
}

/// Writes mono samples to a 16-bit WAV file.
fn write_wav(path: &str, samples: &[f64], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_error)?;

    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * f64::from(i16::MAX)).round() as i16;
        writer.write_sample(value).map_err(wav_error)?;
    }

    writer.finalize().map_err(wav_error)?;
    Ok(())
}

fn wav_error(err: hound::Error) -> Error {
    match err {
        hound::Error::IoError(io) => Error::IoError(io),
        _ => Error::RangeViolation("malformed wav file"),
    }
}
