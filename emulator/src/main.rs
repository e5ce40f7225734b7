mod session;
mod sim;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use crossterm::style::Stylize;

use session::{Response, Session, SessionOptions, Tone};

const USAGE: &str =
    "Usage: epm-emulator [--transcript <path>] [--charge-rate <volts-per-tick>] [--hardpoint-id <id>]";

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(&options)?;
    let mut line = String::new();

    writeln!(
        writer,
        "EPM Controller Emulator ready (hardpoint {}). Type `help` for commands or `exit` to quit.",
        options.hardpoint_id
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_command(trimmed)? {
            write_response(&mut writer, &response)?;
        }
    }

    Ok(())
}

fn write_response<W: Write>(writer: &mut W, response: &Response) -> io::Result<()> {
    let text = response.text.as_str();
    match response.tone {
        Tone::Plain => writeln!(writer, "{text}"),
        Tone::Good => writeln!(writer, "{}", text.green()),
        Tone::Warn => writeln!(writer, "{}", text.yellow()),
        Tone::Bad => writeln!(writer, "{}", text.red().bold()),
    }
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<SessionOptions, String> {
    let mut options = SessionOptions::default();

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| format!("Expected value after {flag}"))
        };

        match flag.as_str() {
            "--transcript" => options.transcript = Some(PathBuf::from(value()?)),
            "--charge-rate" => {
                let raw = value()?;
                options.charge_rate = match raw.parse::<u32>() {
                    Ok(rate) if rate > 0 => rate,
                    _ => return Err(format!("Invalid charge rate `{raw}`")),
                };
            }
            "--hardpoint-id" => {
                let raw = value()?;
                options.hardpoint_id = raw
                    .parse::<u8>()
                    .map_err(|_| format!("Invalid hardpoint id `{raw}`"))?;
            }
            other => return Err(format!("Unknown option `{other}`")),
        }
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|arg| (*arg).to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn defaults_without_flags() {
        let options = parse_options(args(&[])).unwrap();
        assert!(options.transcript.is_none());
        assert_eq!(options.charge_rate, session::DEFAULT_CHARGE_RATE);
    }

    #[test]
    fn accepts_split_and_inline_values() {
        let options = parse_options(args(&[
            "--transcript",
            "out.log",
            "--charge-rate=40",
            "--hardpoint-id",
            "3",
        ]))
        .unwrap();
        assert_eq!(options.transcript, Some(PathBuf::from("out.log")));
        assert_eq!(options.charge_rate, 40);
        assert_eq!(options.hardpoint_id, 3);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse_options(args(&["--charge-rate", "0"])).is_err());
        assert!(parse_options(args(&["--hardpoint-id", "300"])).is_err());
        assert!(parse_options(args(&["--verbose"])).is_err());
        assert!(parse_options(args(&["--transcript"])).is_err());
    }
}
