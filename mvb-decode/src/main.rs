use anyhow::{Context, Result};
use mvb::{
    Decoder, DecoderOptions, Polarity, ProcessVariables, Record, SlaveReply, Telegram,
    TelegramError,
};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    about = "An MVB (IEC 61375-3-1) decoder for raw 12 MS/s line captures: recovers physical frames, pairs master frames with their replies, and interprets the resulting telegrams."
)]
struct Opt {
    #[structopt(
        long = "--csv",
        help = "Treat FILE as an intermediate t,master,slave dump instead of raw samples."
    )]
    csv: bool,

    #[structopt(
        long = "--dump-frames",
        help = "Emit intermediate t,master,slave lines instead of decoded telegrams."
    )]
    dump_frames: bool,

    #[structopt(
        long = "--direct-polarity",
        help = "Read 0xfe as line level 0 (the default reads 0x02 as 0)."
    )]
    direct_polarity: bool,

    #[structopt(long = "--ignore-eof")]
    ignore_eof: bool,

    #[structopt(
        long = "--variables",
        help = "Print the per-port process variable summary on exit."
    )]
    variables: bool,

    #[structopt(name = "FILE", parse(from_os_str), help = "Capture input file.")]
    file: PathBuf,

    #[structopt(name = "COUNT", help = "Stop after this many pairing records.")]
    count: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let mut variables = ProcessVariables::new();
    if opt.csv {
        decode_dump(&opt, &mut variables)?;
    } else {
        decode_capture(&opt, &mut variables)?;
    }

    if opt.variables {
        print!("{}", variables);
    }
    Ok(())
}

/// Raw path: samples -> physical frames -> pairing records.
fn decode_capture(opt: &Opt, variables: &mut ProcessVariables) -> Result<()> {
    let file = File::open(&opt.file).context("failed to open capture file")?;
    let mut decoder = Decoder::<File>::new(
        file,
        DecoderOptions {
            polarity: if opt.direct_polarity {
                Polarity::Direct
            } else {
                Polarity::Inverted
            },
            ignore_eof: opt.ignore_eof,
        },
    );

    let mut emitted = 0;
    for record in decoder.pairs() {
        match record {
            Err(e) if e.is_recoverable() => {
                eprintln!("t={:.6}s :: {}", e.time().unwrap_or_default(), e);
            }
            Err(e) => return Err(e).context("capture source failed"),
            Ok(pair) => {
                if opt.dump_frames {
                    println!("{}", Record::from(&pair));
                } else {
                    report(pair.master.t_start, Telegram::from_pair(&pair), variables);
                }
                emitted += 1;
                if Some(emitted) == opt.count {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Telegram-parser-only path over a dump produced by `--dump-frames`.
fn decode_dump(opt: &Opt, variables: &mut ProcessVariables) -> Result<()> {
    let file = File::open(&opt.file).context("failed to open frame dump")?;
    let mut emitted = 0;
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.context("failed to read frame dump")?;
        let record: Record = match line.parse() {
            Ok(record) => record,
            Err(e) => {
                eprintln!("line {}: {}", number + 1, e);
                continue;
            }
        };
        report(record.t, Telegram::from_record(&record), variables);
        emitted += 1;
        if Some(emitted) == opt.count {
            break;
        }
    }
    Ok(())
}

fn report(t: f64, telegram: Result<Telegram, TelegramError>, variables: &mut ProcessVariables) {
    let telegram = match telegram {
        Ok(telegram) => telegram,
        Err(e) => {
            eprintln!("t={:.6}s :: {}", t, e);
            return;
        }
    };
    match &telegram.reply {
        None => println!("t={:.6} :: {} :: no slave frame", t, telegram.master),
        Some(reply) => {
            if let SlaveReply::ProcessData(process) = reply {
                variables.record(process);
            }
            println!("t={:.6} :: {} :: {}", t, telegram.master, reply);
        }
    }
}
