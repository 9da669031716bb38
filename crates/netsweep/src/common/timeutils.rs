use std::time::Duration;

use anyhow::{anyhow, bail};
use nom::IResult;
use nom::character::complete::{char, digit1};
use nom::combinator::{all_consuming, map, map_res, opt};
use nom::sequence::{preceded, tuple};

fn p_u32(input: &str) -> IResult<&str, u32> {
    map_res(digit1, |value: &str| value.parse::<u32>())(input)
}

/// A single hh/mm/ss component. An empty component counts as zero, so inputs
/// like `::30` are accepted.
fn p_field(input: &str) -> IResult<&str, u32> {
    map(opt(p_u32), |value| value.unwrap_or(0))(input)
}

fn p_hms_time(input: &str) -> IResult<&str, (u32, Option<u32>, Option<u32>)> {
    tuple((
        p_field,
        opt(preceded(char(':'), p_field)),
        opt(preceded(char(':'), p_field)),
    ))(input)
}

/// Parses time strings in the format [[hh:]mm:]ss.
/// Individual time values may be zero padded or left empty.
pub fn parse_hms_time(input: &str) -> anyhow::Result<Duration> {
    let (_, parsed) = all_consuming(p_hms_time)(input)
        .map_err(|e| anyhow!("Could not parse {input:?} as [[hh:]mm:]ss: {e}"))?;
    let seconds = match parsed {
        (seconds, None, None) => u64::from(seconds),
        (minutes, Some(seconds), None) => {
            if seconds >= 60 {
                bail!("invalid seconds value in {input:?}, 0 <= seconds < 60");
            }
            u64::from(minutes) * 60 + u64::from(seconds)
        }
        (hours, Some(minutes), Some(seconds)) => {
            if minutes >= 60 {
                bail!("invalid minutes value in {input:?}, 0 <= minutes < 60");
            }
            if seconds >= 60 {
                bail!("invalid seconds value in {input:?}, 0 <= seconds < 60");
            }
            u64::from(hours) * 3600 + u64::from(minutes) * 60 + u64::from(seconds)
        }
        _ => bail!("invalid time specification {input:?}"),
    };
    Ok(Duration::from_secs(seconds))
}

#[cfg(not(test))]
pub fn now_monotonic() -> std::time::Instant {
    std::time::Instant::now()
}

#[cfg(test)]
pub use mock_time::now_monotonic;

/// Testing utilities for mocking (monotonic) timestamps.
/// Use the `now_monotonic` function if you want to be able to mock the time in tests.
#[cfg(test)]
pub mod mock_time {
    use std::cell::RefCell;
    use std::time::Instant;

    thread_local! {
        static MOCK_TIME: RefCell<Option<Instant>> = const { RefCell::new(None) };
    }

    pub struct MockTime;

    impl MockTime {
        pub fn mock(time: Instant) -> Self {
            MOCK_TIME.with(|cell| {
                assert!(cell.borrow().is_none());
                *cell.borrow_mut() = Some(time);
            });
            MockTime
        }
    }

    impl Drop for MockTime {
        fn drop(&mut self) {
            MOCK_TIME.with(|cell| *cell.borrow_mut() = None);
        }
    }

    pub fn now_monotonic() -> Instant {
        MOCK_TIME.with(|cell| cell.borrow().as_ref().cloned().unwrap_or_else(Instant::now))
    }
}

#[cfg(test)]
mod tests {
    use super::parse_hms_time;

    #[test]
    fn parse_hms_seconds() {
        assert_eq!(parse_hms_time("01").unwrap().as_secs(), 1);
        assert_eq!(parse_hms_time("45").unwrap().as_secs(), 45);
    }

    #[test]
    fn parse_hms_minutes() {
        assert_eq!(parse_hms_time("1:1").unwrap().as_secs(), 61);
        assert_eq!(parse_hms_time("80:02").unwrap().as_secs(), 80 * 60 + 2);
    }

    #[test]
    fn parse_hms_hours() {
        assert_eq!(parse_hms_time("1:1:1").unwrap().as_secs(), 3661);
        assert_eq!(
            parse_hms_time("02:03:04").unwrap().as_secs(),
            2 * 3600 + 3 * 60 + 4
        );
    }

    #[test]
    fn parse_hms_empty_components() {
        assert_eq!(parse_hms_time("::30").unwrap().as_secs(), 30);
        assert_eq!(parse_hms_time("1::").unwrap().as_secs(), 3600);
    }

    #[test]
    fn parse_hms_range_checks() {
        assert!(parse_hms_time("00:61:00").is_err());
        assert!(parse_hms_time("00:00:75").is_err());
        assert!(parse_hms_time("x").is_err());
        assert!(parse_hms_time("1:2:3:4").is_err());
    }
}
