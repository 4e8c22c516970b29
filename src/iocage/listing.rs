//! Parsing of `iocage list -h*` output
//!
//! Listings are tab-separated with no schema version. The number of columns
//! drifts between iocage releases, so arity is checked per collection while
//! malformed rows are always rejected.

use crate::error::{Error, Result};
use crate::jail::{JailRecord, PluginRecord, Properties, ResourceKind, RunState};

/// First column value announcing non-iocage jails
const FOREIGN_JAILS_MARKER: &str = "---";

/// Columns in a jail/template row without the basejail flag
const JAIL_FIELDS: usize = 9;
/// Columns in a jail/template row with the basejail flag
const JAIL_FIELDS_BASEJAIL: usize = 10;
/// Columns in a plugin row
const PLUGIN_FIELDS: usize = 11;

fn command_for(kind: ResourceKind) -> String {
    format!("iocage {}", kind.list_args().join(" "))
}

/// Split a listing into rows of fields, enforcing the row grammar
fn rows(kind: ResourceKind, text: &str) -> Result<Vec<Vec<&str>>> {
    let mut rows = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        let jid = fields[0];

        if jid == FOREIGN_JAILS_MARKER {
            break;
        }

        if !is_jid(jid) {
            return Err(Error::protocol(
                &command_for(kind),
                line,
                "first column is not a jail id",
            ));
        }

        rows.push(fields);
    }

    Ok(rows)
}

/// A jail id column is digits, or `-` for a jail that is not running
fn is_jid(s: &str) -> bool {
    s == "-" || (!s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
}

fn run_state(kind: ResourceKind, line: &[&str], token: &str) -> Result<RunState> {
    RunState::parse(token).ok_or_else(|| {
        Error::protocol(
            &command_for(kind),
            &line.join("\t"),
            format!("unknown state '{}'", token),
        )
    })
}

/// Parse a jail or template listing; properties are left empty
pub fn parse_jails(kind: ResourceKind, text: &str) -> Result<Vec<JailRecord>> {
    let mut records = Vec::new();

    for fields in rows(kind, text)? {
        let (head, basejail) = match fields.len() {
            JAIL_FIELDS_BASEJAIL => (&fields[..JAIL_FIELDS], Some(fields[JAIL_FIELDS].to_string())),
            JAIL_FIELDS => (&fields[..], None),
            n => {
                return Err(Error::protocol(
                    &command_for(kind),
                    &fields.join("\t"),
                    format!(
                        "expected {} or {} columns, got {}",
                        JAIL_FIELDS, JAIL_FIELDS_BASEJAIL, n
                    ),
                ));
            }
        };

        let name = head[1];
        if name.is_empty() {
            continue;
        }

        records.push(JailRecord {
            jid: head[0].to_string(),
            name: name.to_string(),
            boot: head[2].to_string(),
            state: run_state(kind, &fields, head[3])?,
            jail_type: head[4].to_string(),
            release: head[5].to_string(),
            ip4: head[6].to_string(),
            ip6: head[7].to_string(),
            template: head[8].to_string(),
            basejail,
            properties: Properties::new(),
        });
    }

    Ok(records)
}

/// Parse a plugin listing
pub fn parse_plugins(text: &str) -> Result<Vec<PluginRecord>> {
    let kind = ResourceKind::Plugins;
    let mut records = Vec::new();

    for fields in rows(kind, text)? {
        if fields.len() != PLUGIN_FIELDS {
            return Err(Error::protocol(
                &command_for(kind),
                &fields.join("\t"),
                format!("expected {} columns, got {}", PLUGIN_FIELDS, fields.len()),
            ));
        }

        if fields[1].is_empty() {
            continue;
        }

        records.push(PluginRecord {
            jid: fields[0].to_string(),
            name: fields[1].to_string(),
            boot: fields[2].to_string(),
            state: run_state(kind, &fields, fields[3])?,
            plugin_type: fields[4].to_string(),
            release: fields[5].to_string(),
            ip4: fields[6].to_string(),
            ip6: fields[7].to_string(),
            template: fields[8].to_string(),
            portal: fields[9].to_string(),
            doc_url: fields[10].to_string(),
        });
    }

    Ok(records)
}

/// Parse `list -hr`: one release per line, listing order kept
pub fn parse_releases(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}
