//! Property queries (`iocage get`)

use crate::error::{Error, Result};
use crate::iocage::runner::{Runner, argv};
use crate::jail::Properties;
use nom::{
    bytes::complete::take_till,
    character::complete::char,
    combinator::rest,
    sequence::separated_pair,
    Parser,
};
use tracing::debug;

/// Name standing in for a jail that only exists in a dry-run plan
pub const PLACEHOLDER_NAME: &str = "CHECK_MODE_FAKE_UUID";

/// Marker key carried by the placeholder property map
pub const NEW_JAIL_MARKER: &str = "CHECK_NEW_JAIL";

/// Property map of a jail that does not exist yet
pub fn placeholder() -> Properties {
    let mut props = Properties::new();
    props.insert(NEW_JAIL_MARKER.to_string(), "1".to_string());
    props
}

/// Whether a property map belongs to a not-yet-created jail
pub fn is_placeholder(props: &Properties) -> bool {
    props.contains_key(NEW_JAIL_MARKER)
}

fn property_line(input: &str) -> nom::IResult<&str, (&str, &str)> {
    separated_pair(take_till(|c| c == ':'), char(':'), rest).parse(input)
}

/// Parse `get all` output into a property map
pub fn parse_properties(command: &str, text: &str) -> Result<Properties> {
    let mut props = Properties::new();
    let text = text.trim();

    if text.is_empty() {
        return Err(Error::protocol(command, text, "no properties reported"));
    }

    for line in text.lines().map(str::trim) {
        match property_line.parse(line) {
            Ok((_, (key, value))) => {
                props.insert(key.to_string(), value.to_string());
            }
            Err(_) => {
                return Err(Error::protocol(
                    command,
                    line,
                    format!("error parsing property from {:?}", props),
                ));
            }
        }
    }

    Ok(props)
}

/// Reads jail properties through iocage
pub struct PropertyStore<'a> {
    runner: &'a dyn Runner,
}

impl<'a> PropertyStore<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self { runner }
    }

    /// All properties of `name`
    pub fn get(&self, name: &str) -> Result<Properties> {
        if name.is_empty() {
            return Err(Error::Precondition(
                "property query without a jail name".to_string(),
            ));
        }
        if name == PLACEHOLDER_NAME {
            return Ok(placeholder());
        }

        let args = argv(&["get", "all", name]);
        let output = self
            .runner
            .run_checked(&format!("Properties of jail '{}' unavailable.", name), &args)?;
        let props = parse_properties(&self.runner.command_line(&args), &output.stdout)?;
        debug!(jail = name, count = props.len(), "read properties");
        Ok(props)
    }

    /// Existence check: exit 0 present, exit 1 absent, anything else fails
    pub fn exists(&self, name: &str) -> Result<bool> {
        let args = argv(&["get", "host_hostuuid", name]);
        let output = self.runner.run(&args)?;
        match output.code {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(Error::Command {
                label: format!("Existence of jail '{}' could not be determined.", name),
                command: self.runner.command_line(&args),
                code,
                stdout: output.stdout,
                stderr: output.stderr,
            }),
        }
    }
}
