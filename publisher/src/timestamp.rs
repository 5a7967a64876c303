use log::debug;
use time::{format_description::BorrowedFormatItem, macros::format_description, OffsetDateTime};
use time_local::OffsetDateTimeExt;

/// `YYYY-MM-DDTHHMM`, a tag safe rendition of the time a run started.
const TAG_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour][minute]");

/// The current time in the local offset, or in UTC when the local offset can not be determined. The offset is
/// captured by `time_local::init` in `main`, before any thread is spawned.
pub fn now_local() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    match now.to_local() {
        Ok(local) => local,
        Err(error) => {
            debug!("unable to determine the local offset, using UTC: {error}");
            now
        }
    }
}

pub fn format_tag(value: OffsetDateTime) -> String {
    // The format only contains components every `OffsetDateTime` has.
    value
        .format(TAG_FORMAT)
        .unwrap_or_else(|error| unreachable!("formatting a timestamp tag failed: {error}"))
}

#[cfg(test)]
mod tests {
    use regex::Regex;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn formats_without_separators_in_time() {
        assert_eq!(format_tag(datetime!(2024-03-05 09:07:59 UTC)), "2024-03-05T0907");
        assert_eq!(
            format_tag(datetime!(1999-12-31 23:59 +02:00)),
            "1999-12-31T2359"
        );
    }

    #[test]
    fn current_tag_matches_pattern() {
        let pattern = Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{4}$").unwrap();
        let tag = format_tag(now_local());
        assert!(pattern.is_match(&tag), "{tag:?}");
        assert!(crate::image::is_valid_tag(&tag));
    }

    #[test]
    fn local_time_is_the_same_instant() {
        let before = OffsetDateTime::now_utc();
        let now = now_local();
        assert!(now >= before, "{now} < {before}");
        assert!(now - before < time::Duration::minutes(1));
    }
}
