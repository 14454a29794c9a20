//! Shutdown/wake schedule arithmetic and the remote file formats.
//!
//! A schedule is one crontab line that runs a small script at the shutdown
//! time. The script arms the RTC alarm for the wake time and powers off:
//!
//! ```text
//! #!/bin/sh
//! # SLEEP_SECONDS=25200
//! rtcwake -m no -s 25200
//! shutdown -h now
//! ```
//!
//! The crontab line carries a tag so only lines created here are ever
//! rewritten or removed.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::BridgeError;

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// Directory and name prefix of generated scripts.
pub const SCRIPT_PREFIX: &str = "/usr/local/bin/shell-bridge-poweroff-";

/// Tag appended to every managed crontab line.
pub const CRON_TAG: &str = "# shell-bridge-poweroff";

/// Marker line carrying the sleep duration inside a script.
pub const SLEEP_MARKER: &str = "# SLEEP_SECONDS=";

/// Wall-clock time of day with minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockTime {
    hour: u8,
    minute: u8,
}

impl ClockTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self, BridgeError> {
        if hour > 23 || minute > 59 {
            return Err(BridgeError::InvalidTime(format!("{}:{}", hour, minute)));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn seconds_of_day(&self) -> u32 {
        u32::from(self.hour) * 3600 + u32::from(self.minute) * 60
    }

    /// The time `seconds` later, wrapping at midnight.
    pub fn after(&self, seconds: u32) -> Self {
        let total = (self.seconds_of_day() + seconds % SECONDS_PER_DAY) % SECONDS_PER_DAY;
        Self {
            hour: (total / 3600) as u8,
            minute: (total % 3600 / 60) as u8,
        }
    }

    /// `HHMM`, used as schedule ID and in the script name.
    pub fn compact(&self) -> String {
        format!("{:02}{:02}", self.hour, self.minute)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for ClockTime {
    type Err = BridgeError;

    /// Parse `H:MM` or `HH:MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BridgeError::InvalidTime(s.to_string());
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;

        let digits = |part: &str, max_len: usize| {
            !part.is_empty() && part.len() <= max_len && part.bytes().all(|b| b.is_ascii_digit())
        };
        if !digits(hour, 2) || !digits(minute, 2) || minute.len() != 2 {
            return Err(invalid());
        }

        let hour = hour.parse().map_err(|_| invalid())?;
        let minute = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl Serialize for ClockTime {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Seconds from `shutdown` until `wake`. A wake time at or before the
/// shutdown time is taken to be on the next day.
pub fn sleep_seconds(shutdown: ClockTime, wake: ClockTime) -> u32 {
    let from = shutdown.seconds_of_day();
    let to = wake.seconds_of_day();
    if to > from {
        to - from
    } else {
        to + SECONDS_PER_DAY - from
    }
}

/// One installed shutdown/wake pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schedule {
    pub id: String,
    pub shutdown: ClockTime,
    pub wakeup: ClockTime,
}

impl Schedule {
    pub fn new(shutdown: ClockTime, wakeup: ClockTime) -> Self {
        Self {
            id: shutdown.compact(),
            shutdown,
            wakeup,
        }
    }
}

pub fn script_path(shutdown: ClockTime) -> String {
    format!("{}{}.sh", SCRIPT_PREFIX, shutdown.compact())
}

pub fn render_script(sleep: u32) -> String {
    format!(
        "#!/bin/sh\n{}{}\nrtcwake -m no -s {}\nshutdown -h now\n",
        SLEEP_MARKER, sleep, sleep
    )
}

/// Sleep duration recorded in a script, if present.
pub fn parse_sleep_marker(script: &str) -> Option<u32> {
    script
        .lines()
        .find_map(|line| line.trim().strip_prefix(SLEEP_MARKER))
        .and_then(|value| value.trim().parse().ok())
}

pub fn cron_line(shutdown: ClockTime) -> String {
    format!(
        "{} {} * * * {} {}",
        shutdown.minute,
        shutdown.hour,
        script_path(shutdown),
        CRON_TAG
    )
}

/// Shutdown time of a managed crontab line.
pub fn parse_cron_line(line: &str) -> Option<ClockTime> {
    let line = line.trim();
    if line.starts_with('#') || !line.ends_with(CRON_TAG) {
        return None;
    }
    let mut fields = line.split_whitespace();
    let minute = fields.next()?.parse().ok()?;
    let hour = fields.next()?.parse().ok()?;
    ClockTime::new(hour, minute).ok()
}

/// Managed shutdown times in crontab order.
pub fn managed_entries(crontab: &str) -> Vec<ClockTime> {
    crontab.lines().filter_map(parse_cron_line).collect()
}

/// Crontab with any managed line for the same minute/hour replaced by a
/// fresh one. Unmanaged lines are kept verbatim.
pub fn install_entry(crontab: &str, shutdown: ClockTime) -> String {
    let entry = cron_line(shutdown);
    let mut lines: Vec<&str> = crontab
        .lines()
        .filter(|line| parse_cron_line(line) != Some(shutdown))
        .collect();
    lines.push(&entry);

    let mut table = lines.join("\n");
    table.push('\n');
    table
}

/// Crontab without the managed line whose ID is `id`, or `None` if there
/// is no such line.
pub fn remove_entry(crontab: &str, id: &str) -> Option<String> {
    let mut found = false;
    let kept: Vec<&str> = crontab
        .lines()
        .filter(|line| match parse_cron_line(line) {
            Some(time) if time.compact() == id => {
                found = true;
                false
            }
            _ => true,
        })
        .collect();

    if !found {
        return None;
    }
    let mut table = kept.join("\n");
    if !table.is_empty() {
        table.push('\n');
    }
    Some(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> ClockTime {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_clock_time() {
        assert_eq!(t("06:05"), ClockTime::new(6, 5).unwrap());
        assert_eq!(t("6:05"), ClockTime::new(6, 5).unwrap());
        assert_eq!(t("23:59").to_string(), "23:59");

        for bad in ["24:00", "12:60", "1200", "12:5", "aa:bb", "", "12:345", "-1:00"] {
            assert!(
                matches!(bad.parse::<ClockTime>(), Err(BridgeError::InvalidTime(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_sleep_overnight() {
        assert_eq!(sleep_seconds(t("23:00"), t("06:00")), 25200);
    }

    #[test]
    fn test_sleep_same_day() {
        assert_eq!(sleep_seconds(t("08:00"), t("09:00")), 3600);
    }

    #[test]
    fn test_sleep_equal_times_is_a_full_day() {
        assert_eq!(sleep_seconds(t("07:30"), t("07:30")), 86400);
    }

    #[test]
    fn test_after_wraps_midnight() {
        assert_eq!(t("23:00").after(25200), t("06:00"));
        assert_eq!(t("08:00").after(3600), t("09:00"));
    }

    #[test]
    fn test_script_round_trip() {
        let script = render_script(25200);
        assert!(script.contains("rtcwake -m no -s 25200"));
        assert!(script.contains("shutdown -h now"));
        assert_eq!(parse_sleep_marker(&script), Some(25200));
        assert_eq!(parse_sleep_marker("#!/bin/sh\nshutdown -h now\n"), None);
    }

    #[test]
    fn test_cron_line() {
        let line = cron_line(t("23:00"));
        assert_eq!(
            line,
            "0 23 * * * /usr/local/bin/shell-bridge-poweroff-2300.sh # shell-bridge-poweroff"
        );
        assert_eq!(parse_cron_line(&line), Some(t("23:00")));
        assert_eq!(parse_cron_line("0 23 * * * /usr/bin/backup"), None);
        assert_eq!(parse_cron_line(&format!("# {}", line)), None);
    }

    #[test]
    fn test_install_replaces_same_time_only() {
        let existing = format!(
            "MAILTO=\"\"\n0 23 * * * /usr/bin/backup\n{}\n{}\n",
            cron_line(t("23:00")),
            cron_line(t("01:30"))
        );
        let table = install_entry(&existing, t("23:00"));

        assert!(table.contains("/usr/bin/backup"));
        assert!(table.contains("MAILTO"));
        assert_eq!(managed_entries(&table), vec![t("01:30"), t("23:00")]);
        assert!(table.ends_with('\n'));
    }

    #[test]
    fn test_install_into_empty_table() {
        let table = install_entry("", t("22:15"));
        assert_eq!(table, format!("{}\n", cron_line(t("22:15"))));
    }

    #[test]
    fn test_remove_entry() {
        let existing = format!("0 4 * * * /usr/bin/backup\n{}\n", cron_line(t("23:00")));
        let table = remove_entry(&existing, "2300").unwrap();
        assert_eq!(table, "0 4 * * * /usr/bin/backup\n");
        assert!(remove_entry(&table, "2300").is_none());
    }

    #[test]
    fn test_schedule_id_and_json() {
        let schedule = Schedule::new(t("23:00"), t("06:00"));
        assert_eq!(schedule.id, "2300");
        let json = serde_json::to_value(&schedule).unwrap();
        assert_eq!(json["shutdown"], "23:00");
        assert_eq!(json["wakeup"], "06:00");
    }
}
