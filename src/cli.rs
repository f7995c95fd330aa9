//! Command-line front end.
//!
//! The command line is a target followed by a list of command words, e.g.
//! `as111 kitchen vol +2 countdown 01:30 sync`. The whole list is parsed
//! and validated before any dock is contacted.

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use log::{error, info, warn};

use crate::alias::AliasBook;
use crate::cancel::{AnyOf, Interrupt, StopFile};
use crate::config::{SessionConfig, DATE_HOLD_SECS, MAX_TIMED_SECS};
use crate::device::Device;
use crate::discovery;
use crate::errors::DriverError;
use crate::session::{DeviceSession, Direction};
use crate::transport::TransportKind;

const COMMANDS_HELP: &str = "\
Commands:
  sync                     set the dock clock to local time
  vol [+-]N                set volume (0-32), or change it by N
  mute                     set volume to 0
  alarm-led on|off         switch the alarm LED
  alarm-led blink N        blink the alarm LED for N seconds
  date                     show day and month for a few seconds
  mins-n-secs N            show minutes and seconds of the clock for N seconds
  countdown mm:ss          count down to 00:00
  countup mm:ss            count up from 00:00
  display SECS NUMBER      show a four-digit number for SECS seconds
  sleep N                  wait N seconds
  info                     print what is known about the dock
  json                     print the same as JSON
  stop                     stop a countdown/display running elsewhere
  docks                    list paired and attached docks
  help                     print this help
  verbose | debug          more logging

TARGET is a MAC address, a serial port, an alias, or `all`.
The clock is synced again when the commands are done.";

#[derive(Parser, Debug)]
#[command(
    name = "as111",
    version,
    about = "Control Philips AS111 alarm-clock docks over Bluetooth or USB serial",
    after_long_help = COMMANDS_HELP
)]
pub struct Args {
    /// Run the commands on every dock found
    #[arg(short, long)]
    pub all: bool,

    /// Alias file with one `<address> <alias>` per line
    #[arg(long, env = "AS111_ALIASES", value_name = "PATH")]
    pub aliases: Option<PathBuf>,

    /// More logging (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Target followed by commands
    #[arg(
        value_name = "TARGET|COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub words: Vec<String>,
}

impl Args {
    pub fn long_help() -> String {
        Args::command().render_long_help().to_string()
    }
}

/// Rewrite a leading `--` target into `all`.
///
/// clap always takes the first `--` as the end of options, so a `--` in the
/// target position would otherwise never reach [`parse_plan`]. Only the
/// first positional word is considered; later `--` words are left alone.
pub fn all_marker_as_target<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut out = Vec::new();
    let mut takes_value = false;
    let mut seen_target = false;
    for (i, arg) in args.into_iter().map(Into::into).enumerate() {
        if i == 0 || seen_target {
            out.push(arg);
            continue;
        }
        if takes_value {
            takes_value = false;
            out.push(arg);
            continue;
        }
        match arg.to_str() {
            Some("--") => {
                seen_target = true;
                out.push(OsString::from("all"));
                continue;
            }
            Some("--aliases") => takes_value = true,
            Some(word) if !word.starts_with('-') => seen_target = true,
            None => seen_target = true,
            _ => {}
        }
        out.push(arg);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeChange {
    Absolute(i32),
    Relative(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Sync,
    Volume(VolumeChange),
    Mute,
    AlarmLed(bool),
    BlinkLed(u32),
    Date,
    MinutesAndSeconds(u32),
    Countdown {
        minutes: u32,
        seconds: u32,
        direction: Direction,
    },
    Display {
        hold: u32,
        number: u16,
    },
    Sleep(u32),
    Info,
    Json,
    Stop,
    Docks,
    Help,
}

impl Command {
    /// Runs without talking to a dock.
    pub fn is_local(self) -> bool {
        matches!(self, Command::Stop | Command::Docks | Command::Help)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    None,
    All,
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub target: Target,
    pub commands: Vec<Command>,
    /// Extra verbosity from `verbose`/`debug` words.
    pub verbosity: u8,
}

impl Plan {
    pub fn needs_device(&self) -> bool {
        self.commands.iter().any(|c| !c.is_local())
    }
}

const KEYWORDS: [&str; 17] = [
    "sync",
    "vol",
    "mute",
    "alarm-led",
    "date",
    "mins-n-secs",
    "countdown",
    "countup",
    "display",
    "sleep",
    "info",
    "json",
    "stop",
    "docks",
    "help",
    "debug",
    "verbose",
];

fn invalid(msg: impl Into<String>) -> DriverError {
    DriverError::Validation(msg.into())
}

fn next_arg<'a>(
    words: &mut impl Iterator<Item = &'a String>,
    command: &str,
) -> Result<&'a str, DriverError> {
    words
        .next()
        .map(String::as_str)
        .ok_or_else(|| invalid(format!("'{command}' needs an argument")))
}

fn parse_number<T: std::str::FromStr>(value: &str, what: &str) -> Result<T, DriverError> {
    value
        .parse()
        .map_err(|_| invalid(format!("{what} must be a number, got '{value}'")))
}

/// Digits only, no sign of its own.
fn parse_magnitude(value: &str) -> Result<i32, DriverError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(format!("volume must be a number, got '{value}'")));
    }
    parse_number(value, "volume")
}

pub fn parse_volume(value: &str) -> Result<VolumeChange, DriverError> {
    if let Some(rest) = value.strip_prefix('+') {
        Ok(VolumeChange::Relative(parse_magnitude(rest)?))
    } else if let Some(rest) = value.strip_prefix('-') {
        Ok(VolumeChange::Relative(-parse_magnitude(rest)?))
    } else {
        Ok(VolumeChange::Absolute(parse_magnitude(value)?))
    }
}

/// A duration in seconds, at most [`MAX_TIMED_SECS`].
fn parse_secs(value: &str, what: &str) -> Result<u32, DriverError> {
    let secs: u32 = parse_number(value, what)?;
    if secs > MAX_TIMED_SECS {
        return Err(invalid(format!(
            "{what} must be at most {MAX_TIMED_SECS}, got {secs}"
        )));
    }
    Ok(secs)
}

/// Parse `mm:ss` with `mm <= 99` and `ss <= 59`.
pub fn parse_mmss(value: &str) -> Result<(u32, u32), DriverError> {
    let malformed = || invalid(format!("expected mm:ss, got '{value}'"));
    let (mm, ss) = value.split_once(':').ok_or_else(malformed)?;
    let minutes: u32 = mm.parse().map_err(|_| malformed())?;
    let seconds: u32 = ss.parse().map_err(|_| malformed())?;
    if minutes > 99 || seconds > 59 {
        return Err(malformed());
    }
    Ok((minutes, seconds))
}

/// Turn command-line words into a validated plan.
pub fn parse_plan(words: &[String], all: bool) -> Result<Plan, DriverError> {
    let mut iter = words.iter().peekable();

    let target = match iter.peek() {
        Some(first) if !KEYWORDS.contains(&first.as_str()) => {
            let first = iter.next().map(String::as_str).unwrap_or_default();
            match first {
                "all" | "--" => Target::All,
                _ if all => {
                    return Err(invalid(format!(
                        "--all and target '{first}' cannot be combined"
                    )))
                }
                _ => Target::Named(first.to_string()),
            }
        }
        _ if all => Target::All,
        _ => Target::None,
    };

    let mut commands = Vec::new();
    let mut verbosity = 0;
    while let Some(word) = iter.next() {
        let command = match word.as_str() {
            "sync" => Command::Sync,
            "vol" => Command::Volume(parse_volume(next_arg(&mut iter, word)?)?),
            "mute" => Command::Mute,
            "alarm-led" => match next_arg(&mut iter, word)? {
                "on" => Command::AlarmLed(true),
                "off" => Command::AlarmLed(false),
                "blink" => Command::BlinkLed(parse_secs(
                    next_arg(&mut iter, "alarm-led blink")?,
                    "blink seconds",
                )?),
                other => {
                    return Err(invalid(format!(
                        "alarm-led takes on, off or blink N, got '{other}'"
                    )))
                }
            },
            "date" => Command::Date,
            "mins-n-secs" => {
                Command::MinutesAndSeconds(parse_secs(next_arg(&mut iter, word)?, "seconds")?)
            }
            "countdown" | "countup" => {
                let (minutes, seconds) = parse_mmss(next_arg(&mut iter, word)?)?;
                let direction = if word == "countdown" {
                    Direction::Down
                } else {
                    Direction::Up
                };
                Command::Countdown {
                    minutes,
                    seconds,
                    direction,
                }
            }
            "display" => {
                let hold = parse_secs(next_arg(&mut iter, word)?, "display seconds")?;
                let number: u16 = parse_number(next_arg(&mut iter, word)?, "display number")?;
                if number > 9999 {
                    return Err(invalid(format!("display number {number} has more than 4 digits")));
                }
                Command::Display { hold, number }
            }
            "sleep" => Command::Sleep(parse_secs(next_arg(&mut iter, word)?, "seconds")?),
            "info" => Command::Info,
            "json" => Command::Json,
            "stop" => Command::Stop,
            "docks" => Command::Docks,
            "help" => Command::Help,
            "verbose" => {
                verbosity = verbosity.max(1);
                continue;
            }
            "debug" => {
                verbosity = verbosity.max(2);
                continue;
            }
            other => return Err(invalid(format!("unknown command '{other}'"))),
        };
        commands.push(command);
    }

    let plan = Plan {
        target,
        commands,
        verbosity,
    };
    if plan.needs_device() && plan.target == Target::None {
        return Err(invalid("no dock given; name a MAC address, port or alias"));
    }
    Ok(plan)
}

// ============================================================================
// Execution
// ============================================================================

/// Run a parsed plan. Any failed dock makes the whole run fail.
pub fn execute(plan: &Plan, aliases: &AliasBook) -> Result<()> {
    let stop = StopFile::shared();

    for command in plan.commands.iter().filter(|c| c.is_local()) {
        match command {
            Command::Stop => stop
                .request()
                .with_context(|| format!("cannot create {}", stop.path().display()))?,
            Command::Docks => print_docks(aliases),
            Command::Help => println!("{}", Args::long_help()),
            _ => {}
        }
    }

    if !plan.needs_device() {
        return Ok(());
    }

    let devices = resolve_devices(&plan.target, aliases)?;
    let interrupt = Interrupt::install().unwrap_or_else(|e| {
        warn!("Ctrl-C will not stop loops gracefully: {}", e);
        Interrupt
    });

    let sessions = devices.into_iter().map(|device| {
        let label = device.to_string();
        DeviceSession::connect(device, SessionConfig::default())
            .map(|session| session.with_cancel(AnyOf(stop.clone(), interrupt)))
            .with_context(|| format!("cannot connect to {label}"))
    });
    run_sequences(sessions, &plan.commands, &stop)
}

/// Run the command sequence on each session in turn.
///
/// A stop request left over from an earlier run is dropped first, and any
/// request still pending is dropped at the end. Every session is tried
/// even after another one failed.
pub fn run_sequences<I>(sessions: I, commands: &[Command], stop: &StopFile) -> Result<()>
where
    I: IntoIterator<Item = Result<DeviceSession>>,
{
    stop.clear();

    let mut failed = 0;
    for session in sessions {
        if let Err(e) = session.and_then(|session| run_commands(session, commands)) {
            error!("{:#}", e);
            eprintln!("{e:#}");
            failed += 1;
        }
    }
    stop.clear();

    if failed > 0 {
        bail!("{failed} dock(s) failed");
    }
    Ok(())
}

fn resolve_devices(target: &Target, aliases: &AliasBook) -> Result<Vec<Device>> {
    match target {
        Target::None => bail!(DriverError::Resolution("no target".into())),
        Target::All => {
            let docks = discovery::docks(aliases);
            if docks.is_empty() {
                bail!(DriverError::Resolution("no docks found".into()));
            }
            Ok(docks)
        }
        Target::Named(name) => {
            let address = aliases.resolve(name)?;
            let kind = TransportKind::classify(&address).ok_or_else(|| {
                DriverError::Resolution(format!("alias '{name}' points at '{address}'"))
            })?;
            let alias = aliases.alias_for(&address).map(str::to_string);
            Ok(vec![Device::new(kind, address).with_alias(alias)])
        }
    }
}

/// Run the dock commands of `commands` on one session, then sync the clock
/// and disconnect whatever the outcome.
pub fn run_commands(mut session: DeviceSession, commands: &[Command]) -> Result<()> {
    let address = session.device().address.clone();
    let outcome = commands
        .iter()
        .filter(|c| !c.is_local())
        .try_for_each(|&command| run_command(&mut session, command));

    // leave the dock showing the time even after a failed command
    if let Err(e) = session.sync_time() {
        warn!("final time sync failed: {}", e);
    }
    session.disconnect();
    outcome.with_context(|| address)
}

fn run_command(session: &mut DeviceSession, command: Command) -> Result<()> {
    info!("{}: {:?}", session.device().address, command);
    match command {
        Command::Sync => session.sync_time()?,
        Command::Volume(VolumeChange::Absolute(v)) => {
            session.set_volume(v)?;
        }
        Command::Volume(VolumeChange::Relative(d)) => {
            session.change_volume(d)?;
        }
        Command::Mute => {
            session.mute()?;
        }
        Command::AlarmLed(on) => session.set_alarm_led(on)?,
        Command::BlinkLed(secs) => {
            session.blink_led(secs)?;
        }
        Command::Date => {
            session.display_date(DATE_HOLD_SECS)?;
        }
        Command::MinutesAndSeconds(secs) => {
            session.display_minutes_and_seconds(secs)?;
        }
        Command::Countdown {
            minutes,
            seconds,
            direction,
        } => {
            session.countdown(minutes, seconds, direction)?;
        }
        Command::Display { hold, number } => {
            session.display_number(hold, number)?;
        }
        Command::Sleep(secs) => {
            session.hold(secs)?;
        }
        Command::Info => println!("{}\n", session.device().report()),
        Command::Json => println!("{}", serde_json::to_string_pretty(session.device())?),
        Command::Stop | Command::Docks | Command::Help => {}
    }
    Ok(())
}

fn print_docks(aliases: &AliasBook) {
    let docks = discovery::docks(aliases);
    if docks.is_empty() {
        println!("no docks found");
    }
    for dock in docks {
        println!(
            "{:<20} {:<10} {:<20} {}",
            dock.address,
            dock.kind,
            dock.name,
            dock.alias.as_deref().unwrap_or("")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn parses_a_command_sequence() {
        let plan = parse_plan(
            &words("kitchen vol +3 alarm-led blink 4 countdown 01:30 countup 0:03 display 5 8765 debug info"),
            false,
        )
        .unwrap();
        assert_eq!(plan.target, Target::Named("kitchen".into()));
        assert_eq!(plan.verbosity, 2);
        assert_eq!(
            plan.commands,
            vec![
                Command::Volume(VolumeChange::Relative(3)),
                Command::BlinkLed(4),
                Command::Countdown {
                    minutes: 1,
                    seconds: 30,
                    direction: Direction::Down
                },
                Command::Countdown {
                    minutes: 0,
                    seconds: 3,
                    direction: Direction::Up
                },
                Command::Display {
                    hold: 5,
                    number: 8765
                },
                Command::Info,
            ]
        );
    }

    #[test]
    fn volume_forms() {
        assert_eq!(parse_volume("12").unwrap(), VolumeChange::Absolute(12));
        assert_eq!(parse_volume("+2").unwrap(), VolumeChange::Relative(2));
        assert_eq!(parse_volume("-5").unwrap(), VolumeChange::Relative(-5));
        assert!(matches!(
            parse_volume("loud"),
            Err(DriverError::Validation(_))
        ));
        for doubled in ["--5", "+-5", "-+5", "++5", "+", "-"] {
            assert!(parse_volume(doubled).is_err(), "{doubled} accepted");
        }
    }

    #[test]
    fn mmss_validation() {
        assert_eq!(parse_mmss("05:07").unwrap(), (5, 7));
        for bad in ["5", "5:60", "100:00", "a:b", "1:2:3"] {
            assert!(parse_mmss(bad).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn local_commands_need_no_target() {
        let plan = parse_plan(&words("stop"), false).unwrap();
        assert_eq!(plan.target, Target::None);
        assert!(!plan.needs_device());

        let plan = parse_plan(&words("docks help"), false).unwrap();
        assert_eq!(plan.commands, vec![Command::Docks, Command::Help]);
    }

    #[test]
    fn all_targets() {
        assert_eq!(parse_plan(&words("sync"), true).unwrap().target, Target::All);
        assert_eq!(
            parse_plan(&words("all sync"), false).unwrap().target,
            Target::All
        );
        assert!(parse_plan(&words("kitchen sync"), true).is_err());
    }

    #[test]
    fn malformed_sequences_are_rejected() {
        for line in [
            "sync",
            "kitchen vol",
            "kitchen countdown 90",
            "kitchen alarm-led maybe",
            "kitchen display 5 12345",
            "kitchen dance",
            "kitchen sleep x",
        ] {
            assert!(
                matches!(
                    parse_plan(&words(line), false),
                    Err(DriverError::Validation(_))
                ),
                "{line} accepted"
            );
        }
    }

    #[test]
    fn clap_accepts_negative_volume_after_target() {
        let args = Args::try_parse_from(["as111", "-v", "kitchen", "vol", "-3"]).unwrap();
        assert_eq!(args.verbose, 1);
        assert_eq!(args.words, words("kitchen vol -3"));
    }

    #[test]
    fn double_dash_target_means_all_docks() {
        let args =
            Args::try_parse_from(all_marker_as_target(["as111", "-v", "--", "sync"])).unwrap();
        assert_eq!(args.words, words("all sync"));
        let plan = parse_plan(&args.words, args.all).unwrap();
        assert_eq!(plan.target, Target::All);
        assert_eq!(plan.commands, vec![Command::Sync]);

        let args = Args::try_parse_from(all_marker_as_target([
            "as111",
            "--aliases",
            "/tmp/aliases",
            "--",
            "info",
        ]))
        .unwrap();
        assert_eq!(args.aliases, Some(PathBuf::from("/tmp/aliases")));
        assert_eq!(args.words, words("all info"));

        let untouched = all_marker_as_target(["as111", "kitchen", "vol", "--"]);
        assert_eq!(untouched[3], OsString::from("--"));
    }

    #[test]
    fn durations_are_bounded() {
        for line in [
            "kitchen alarm-led blink 3000000000",
            "kitchen alarm-led blink 86401",
            "kitchen sleep 4294967295",
            "kitchen mins-n-secs 100000",
            "kitchen display 100000 1234",
        ] {
            assert!(
                matches!(
                    parse_plan(&words(line), false),
                    Err(DriverError::Validation(_))
                ),
                "{line} accepted"
            );
        }
        let plan = parse_plan(&words("kitchen alarm-led blink 86400"), false).unwrap();
        assert_eq!(plan.commands, vec![Command::BlinkLed(MAX_TIMED_SECS)]);
    }
}
