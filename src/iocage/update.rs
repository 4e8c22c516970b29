//! Interpretation of `iocage update` progress output
//!
//! iocage reports update results only as human-readable text. The version is
//! taken from the line mentioning "updating to", whose last word ends in `:`
//! (e.g. `... updating to 13.0-RELEASE-p11:`).

use nom::{
    bytes::complete::{tag, take_until},
    character::complete::char,
    combinator::{all_consuming, eof},
    sequence::terminated,
    Parser,
};

/// What an update run did, as far as the output tells
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// iocage said nothing needed updating
    UpToDate,
    /// Updated to the given version
    Updated(String),
    /// Output did not match any known phrasing
    Unrecognized,
}

fn after_marker(input: &str) -> nom::IResult<&str, &str> {
    (take_until("updating to"), tag("updating to"))
        .parse(input)
        .map(|(remaining, _)| ("", remaining))
}

fn colon_terminated(input: &str) -> nom::IResult<&str, &str> {
    all_consuming(terminated(take_until(":"), (char(':'), eof))).parse(input)
}

fn version_token(line: &str) -> Option<String> {
    let (_, after) = after_marker(line).ok()?;
    let last = after.rsplit(' ').next()?;
    let (_, version) = colon_terminated(last).ok()?;
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

/// Classify the stdout of `iocage update <jail>`
pub fn parse_update_output(stdout: &str) -> UpdateOutcome {
    if stdout.contains("No updates needed") {
        return UpdateOutcome::UpToDate;
    }

    stdout
        .lines()
        .map(str::trim_end)
        .filter(|l| l.contains("updating to"))
        .find_map(version_token)
        .map(UpdateOutcome::Updated)
        .unwrap_or(UpdateOutcome::Unrecognized)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPDATED: &str = "\
Snapshotting www...
Updating www...
src component not installed, skipped
Installing updates...
The following files will be updated as part of updating to
13.0-RELEASE-p11:
/bin/freebsd-version
Installing updates... done.
www updating to 13.0-RELEASE-p11:
www has been updated successfully.
";

    #[test]
    fn test_updated_version_extracted() {
        assert_eq!(
            parse_update_output(UPDATED),
            UpdateOutcome::Updated("13.0-RELEASE-p11".to_string())
        );
    }

    #[test]
    fn test_no_updates_needed() {
        let out = "Fetching metadata signature...\nNo updates needed to update system to 13.0-RELEASE-p11.\n";
        assert_eq!(parse_update_output(out), UpdateOutcome::UpToDate);
    }

    #[test]
    fn test_unrecognized_output() {
        assert_eq!(parse_update_output("something new\n"), UpdateOutcome::Unrecognized);
    }

    #[test]
    fn test_line_without_colon_is_skipped() {
        let out = "updating to\nwww updating to 12.4-RELEASE-p3:\n";
        assert_eq!(
            parse_update_output(out),
            UpdateOutcome::Updated("12.4-RELEASE-p3".to_string())
        );
    }
}
