//! Action planning
//!
//! For each requested state the planner decides which actions, if any, move
//! the observed facts to the desired state. Plans are pure data: nothing
//! here runs iocage. Every plan for a single named jail is replayed through
//! the lifecycle machine before it is handed to the executor.

use crate::differ::{Changeset, diff, initial_properties};
use crate::error::{Error, Result};
use crate::facts::FactSnapshot;
use crate::iocage::split_words;
use crate::jail::{DesiredProperties, JailRecord, Lifecycle, LifecycleTracker, PropertyValue, RunState};
use clap::ValueEnum;
use serde::Deserialize;
use std::fmt;
use tracing::{debug, warn};

/// Name addressing every jail at once
pub const ALL_JAILS: &str = "ALL";

/// Default user for `exec`
pub const DEFAULT_USER: &str = "root";

/// Command run by `exec` when none is given
const DEFAULT_EXEC_CMD: &str = "/usr/bin/true";

/// Command run by `pkg` when none is given
const DEFAULT_PKG_CMD: &str = "info";

/// Requested target state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Absent,
    Basejail,
    Cloned,
    Exec,
    Exists,
    #[default]
    Facts,
    Fetched,
    Pkg,
    Present,
    Restarted,
    Set,
    Started,
    Stopped,
    Template,
    Thickjail,
}

impl Verb {
    /// Every accepted state, as reported in the facts
    pub const ALL: [Verb; 15] = [
        Verb::Absent,
        Verb::Basejail,
        Verb::Cloned,
        Verb::Exec,
        Verb::Exists,
        Verb::Facts,
        Verb::Fetched,
        Verb::Pkg,
        Verb::Present,
        Verb::Restarted,
        Verb::Set,
        Verb::Started,
        Verb::Stopped,
        Verb::Template,
        Verb::Thickjail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Absent => "absent",
            Verb::Basejail => "basejail",
            Verb::Cloned => "cloned",
            Verb::Exec => "exec",
            Verb::Exists => "exists",
            Verb::Facts => "facts",
            Verb::Fetched => "fetched",
            Verb::Pkg => "pkg",
            Verb::Present => "present",
            Verb::Restarted => "restarted",
            Verb::Set => "set",
            Verb::Started => "started",
            Verb::Stopped => "stopped",
            Verb::Template => "template",
            Verb::Thickjail => "thickjail",
        }
    }

    /// States that act on a jail by name
    fn needs_name(&self) -> bool {
        matches!(
            self,
            Verb::Restarted | Verb::Exists | Verb::Set | Verb::Exec | Verb::Pkg | Verb::Absent
        )
    }

    /// States whose target must already exist
    fn needs_existing(&self) -> bool {
        matches!(self, Verb::Set | Verb::Exec | Verb::Pkg | Verb::Exists)
    }

    /// States that run something inside the jail
    fn needs_running(&self) -> bool {
        matches!(self, Verb::Exec | Verb::Pkg)
    }

    /// States that fetch or create from a release
    fn needs_release(&self) -> bool {
        matches!(
            self,
            Verb::Basejail | Verb::Thickjail | Verb::Template | Verb::Fetched | Verb::Present
        )
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything the caller declared for one run
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    pub state: Verb,
    pub name: Option<String>,
    pub properties: DesiredProperties,
    pub clone_from: Option<String>,
    pub release: Option<String>,
    pub plugin: Option<String>,
    pub components: Vec<String>,
    pub cmd: Option<String>,
    pub user: String,
    pub pkglist: Option<String>,
    pub update: bool,
    pub args: Vec<String>,
    pub dry_run: bool,
}

impl Default for DesiredState {
    fn default() -> Self {
        Self {
            state: Verb::Facts,
            name: None,
            properties: DesiredProperties::new(),
            clone_from: None,
            release: None,
            plugin: None,
            components: Vec::new(),
            cmd: None,
            user: DEFAULT_USER.to_string(),
            pkglist: None,
            update: false,
            args: Vec::new(),
            dry_run: false,
        }
    }
}

impl DesiredState {
    pub fn new(state: Verb) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    /// Whether a release must be known before planning
    pub fn needs_release(&self) -> bool {
        self.state.needs_release() || self.update
    }

    /// Fill in the release from `detect` when it is needed but unset
    pub fn with_default_release(
        mut self,
        detect: impl FnOnce() -> Result<String>,
    ) -> Result<Self> {
        let unset = self.release.as_deref().is_none_or(str::is_empty);
        if self.needs_release() && unset {
            let release = detect()?;
            debug!(release = %release, "release defaulted from host");
            self.release = Some(release);
        }
        Ok(self)
    }
}

#[cfg(test)]
impl DesiredState {
    pub fn named(state: Verb, name: &str) -> Self {
        Self {
            state,
            name: Some(name.to_string()),
            ..Default::default()
        }
    }
}

/// Which jails a start/stop/restart addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// One jail by name
    Jail(String),
    /// Every jail (`ALL`)
    All,
    /// Chosen by iocage from the extra arguments (e.g. `--rc`)
    Selected,
}

impl Target {
    fn from_name(name: &str) -> Self {
        if name == ALL_JAILS {
            Target::All
        } else {
            Target::Jail(name.to_string())
        }
    }

    /// Trailing argument naming the target, if any
    pub fn arg(&self) -> Option<&str> {
        match self {
            Target::Jail(name) => Some(name.as_str()),
            Target::All => Some(ALL_JAILS),
            Target::Selected => None,
        }
    }
}

/// Where a new jail's filesystem comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A fetched release
    Release(String),
    /// A basejail on a fetched release
    Basejail(String),
    /// A thick jail on a fetched release
    Thickjail(String),
    /// An existing template (`create -t`)
    Template(String),
    /// An existing jail (`clone`)
    Jail(String),
}

/// One step of a plan
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Informational message, nothing runs
    Note(String),
    FetchRelease {
        release: String,
        components: Vec<String>,
        update: bool,
        args: Vec<String>,
    },
    FetchPlugin {
        plugin: String,
        update: bool,
        args: Vec<String>,
    },
    Create {
        name: String,
        source: Source,
        properties: Changeset,
        pkglist: Option<String>,
        args: Vec<String>,
        template: bool,
    },
    Set {
        name: String,
        changes: Changeset,
    },
    Start {
        target: Target,
        args: Vec<String>,
    },
    Stop {
        target: Target,
        args: Vec<String>,
    },
    Restart {
        target: Target,
        args: Vec<String>,
    },
    Destroy {
        name: String,
    },
    Exec {
        name: String,
        user: String,
        cmd: String,
    },
    Pkg {
        name: String,
        cmd: String,
    },
    Update {
        name: String,
    },
}

impl Action {
    /// Arguments of the iocage invocation, or `None` for notes
    ///
    /// With `render` set, property values are quoted the way they are shown
    /// to people; the argv itself never carries quotes.
    pub fn words(&self, render: bool) -> Result<Option<Vec<String>>> {
        let props = |changes: &Changeset| {
            if render {
                changes.rendered()
            } else {
                changes.args()
            }
        };

        let words = match self {
            Action::Note(_) => return Ok(None),
            Action::FetchRelease {
                release,
                components,
                update,
                args,
            } => {
                let mut w = vec!["fetch".to_string()];
                w.extend(args.iter().cloned());
                if *update {
                    w.push("-U".to_string());
                }
                w.extend(["-r".to_string(), release.clone()]);
                for component in components.iter().filter(|c| !c.is_empty()) {
                    w.extend(["-F".to_string(), component.clone()]);
                }
                w
            }
            Action::FetchPlugin {
                plugin,
                update,
                args,
            } => {
                let mut w = vec!["fetch".to_string()];
                w.extend(args.iter().cloned());
                if *update {
                    w.push("-U".to_string());
                }
                w.extend(["-P".to_string(), plugin.clone()]);
                w
            }
            Action::Create {
                name,
                source,
                properties,
                pkglist,
                args,
                ..
            } => {
                let mut w = match source {
                    Source::Jail(_) => vec!["clone".to_string(), "-n".to_string(), name.clone()],
                    _ => vec!["create".to_string(), "-n".to_string(), name.clone()],
                };
                match source {
                    Source::Release(r) => w.extend(["-r".to_string(), r.clone()]),
                    Source::Basejail(r) => w.extend(["-r".to_string(), r.clone(), "-b".to_string()]),
                    Source::Thickjail(r) => w.extend(["-r".to_string(), r.clone(), "-T".to_string()]),
                    Source::Template(t) => w.extend(["-t".to_string(), t.clone()]),
                    Source::Jail(_) => {}
                }
                w.extend(args.iter().cloned());
                match source {
                    Source::Jail(from) => w.push(from.clone()),
                    _ => {
                        if let Some(pkglist) = pkglist {
                            w.extend(["-p".to_string(), pkglist.clone()]);
                        }
                    }
                }
                w.extend(props(properties));
                w
            }
            Action::Set { name, changes } => {
                let mut w = vec!["set".to_string()];
                w.extend(props(changes));
                w.push(name.clone());
                w
            }
            Action::Start { target, args } => lifecycle_words("start", target, args),
            Action::Stop { target, args } => lifecycle_words("stop", target, args),
            Action::Restart { target, args } => lifecycle_words("restart", target, args),
            Action::Destroy { name } => vec!["destroy".to_string(), "-f".to_string(), name.clone()],
            Action::Exec { name, user, cmd } => vec![
                "exec".to_string(),
                "-u".to_string(),
                user.clone(),
                name.clone(),
                "--".to_string(),
                "/bin/sh".to_string(),
                "-c".to_string(),
                cmd.clone(),
            ],
            Action::Pkg { name, cmd } => {
                let mut w = vec!["pkg".to_string(), name.clone()];
                w.extend(split_words(cmd)?);
                w
            }
            Action::Update { name } => vec!["update".to_string(), name.clone()],
        };

        Ok(Some(words))
    }
}

fn lifecycle_words(verb: &str, target: &Target, args: &[String]) -> Vec<String> {
    let mut w = vec![verb.to_string()];
    w.extend(args.iter().cloned());
    if let Some(name) = target.arg() {
        w.push(name.to_string());
    }
    w
}

/// Ordered actions for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub actions: Vec<Action>,
}

impl Plan {
    fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    fn note(&mut self, message: impl Into<String>) {
        self.actions.push(Action::Note(message.into()));
    }

    /// True when no step runs iocage
    pub fn is_noop(&self) -> bool {
        self.actions.iter().all(|a| matches!(a, Action::Note(_)))
    }
}

fn doesnt_exist(name: &str) -> Error {
    Error::Precondition(format!("Jail '{}' doesn't exist.", name))
}

fn require_name(desired: &DesiredState) -> Result<&str> {
    desired
        .name
        .as_deref()
        .ok_or_else(|| Error::Precondition(format!("name needed for state {}", desired.state)))
}

fn require_release(desired: &DesiredState) -> Result<&str> {
    desired
        .release
        .as_deref()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| Error::Precondition(format!("release needed for state {}", desired.state)))
}

fn require_jail<'f>(facts: &'f FactSnapshot, name: &str) -> Result<&'f JailRecord> {
    facts.find(name).ok_or_else(|| doesnt_exist(name))
}

/// Checks shared by all states before dispatch
fn check_preconditions(desired: &DesiredState, facts: &FactSnapshot) -> Result<()> {
    if desired.state.needs_name() {
        require_name(desired)?;
    }

    if desired.needs_release() {
        require_release(desired)?;
    }

    if let Some(name) = desired.name.as_deref() {
        if desired.state.needs_existing() || desired.update {
            require_jail(facts, name)?;
        }

        if desired.state.needs_running() && !require_jail(facts, name)?.is_up() {
            return Err(Error::Precondition(format!("Jail '{}' not running.", name)));
        }
    }

    Ok(())
}

/// Decide what to do for `desired` given `facts`
pub fn plan(desired: &DesiredState, facts: &FactSnapshot) -> Result<Plan> {
    check_preconditions(desired, facts)?;

    let plan = match desired.state {
        Verb::Facts => Plan::default(),
        Verb::Started => plan_run_state(desired, facts, RunState::Up)?,
        Verb::Stopped => plan_run_state(desired, facts, RunState::Down)?,
        Verb::Restarted => plan_restarted(desired, facts)?,
        Verb::Exec => plan_exec(desired)?,
        Verb::Pkg => plan_pkg(desired)?,
        Verb::Exists => plan_exists(desired)?,
        Verb::Fetched => plan_fetched(desired, facts)?,
        Verb::Set => plan_set(desired, facts)?,
        Verb::Present | Verb::Cloned | Verb::Basejail | Verb::Thickjail | Verb::Template => {
            plan_present(desired, facts)?
        }
        Verb::Absent => plan_absent(desired, facts)?,
    };

    if let Some(name) = desired.name.as_deref()
        && name != ALL_JAILS
    {
        validate(name, facts, &plan)?;
    }

    debug!(state = %desired.state, actions = plan.actions.len(), "planned");
    Ok(plan)
}

fn plan_run_state(desired: &DesiredState, facts: &FactSnapshot, wanted: RunState) -> Result<Plan> {
    let (verb, done) = match wanted {
        RunState::Up => ("start", "started"),
        RunState::Down => ("stop", "stopped"),
    };
    let action = |target| match wanted {
        RunState::Up => Action::Start {
            target,
            args: desired.args.clone(),
        },
        RunState::Down => Action::Stop {
            target,
            args: desired.args.clone(),
        },
    };

    let mut plan = Plan::default();
    match desired.name.as_deref() {
        None if desired.args.is_empty() => {
            return Err(Error::Precondition(format!(
                "Do not know what to {}: no name and no arguments.",
                verb
            )));
        }
        None => plan.push(action(Target::Selected)),
        Some(ALL_JAILS) => {
            if facts.all_jails(wanted) {
                plan.note(format!("All jails already {}.", done));
            } else {
                plan.push(action(Target::All));
            }
        }
        Some(name) => {
            if require_jail(facts, name)?.state == wanted {
                plan.note(format!("Jail '{}' already {}.", name, done));
            } else {
                plan.push(action(Target::from_name(name)));
            }
        }
    }
    Ok(plan)
}

fn plan_restarted(desired: &DesiredState, facts: &FactSnapshot) -> Result<Plan> {
    let name = require_name(desired)?;
    if name != ALL_JAILS {
        require_jail(facts, name)?;
    }

    let mut plan = Plan::default();
    plan.push(Action::Restart {
        target: Target::from_name(name),
        args: desired.args.clone(),
    });
    Ok(plan)
}

fn plan_exec(desired: &DesiredState) -> Result<Plan> {
    let mut plan = Plan::default();
    plan.push(Action::Exec {
        name: require_name(desired)?.to_string(),
        user: desired.user.clone(),
        cmd: desired.cmd.clone().unwrap_or_else(|| DEFAULT_EXEC_CMD.to_string()),
    });
    Ok(plan)
}

fn plan_pkg(desired: &DesiredState) -> Result<Plan> {
    let cmd = desired.cmd.clone().unwrap_or_else(|| DEFAULT_PKG_CMD.to_string());
    if split_words(&cmd)?.is_empty() {
        return Err(Error::Precondition("pkg needs a command".to_string()));
    }

    let mut plan = Plan::default();
    plan.push(Action::Pkg {
        name: require_name(desired)?.to_string(),
        cmd,
    });
    Ok(plan)
}

fn plan_exists(desired: &DesiredState) -> Result<Plan> {
    let mut plan = Plan::default();
    plan.note(format!("Jail '{}' exists.", require_name(desired)?));
    Ok(plan)
}

fn plan_fetched(desired: &DesiredState, facts: &FactSnapshot) -> Result<Plan> {
    let release = require_release(desired)?;
    let mut plan = Plan::default();

    if desired.update || !facts.has_release(release) {
        plan.push(Action::FetchRelease {
            release: release.to_string(),
            components: desired.components.clone(),
            update: desired.update,
            args: desired.args.clone(),
        });
    } else {
        plan.note(format!("Release {} already fetched.", release));
    }

    if let Some(plugin) = desired.plugin.as_deref() {
        if desired.update || !facts.has_plugin(plugin) {
            plan.push(Action::FetchPlugin {
                plugin: plugin.to_string(),
                update: desired.update,
                args: desired.args.clone(),
            });
        } else {
            plan.note(format!("Plugin {} already fetched.", plugin));
        }
    }

    Ok(plan)
}

/// Property changes for an existing jail, bracketed by stop/start when needed
fn property_actions(name: &str, record: &JailRecord, desired: &DesiredProperties) -> Result<Vec<Action>> {
    let changes = diff(name, &record.properties, desired)?;
    if changes.is_empty() {
        return Ok(Vec::new());
    }

    let bracket = changes.requires_restart() && record.is_up();
    let set = Action::Set {
        name: name.to_string(),
        changes,
    };

    if bracket {
        let target = Target::Jail(name.to_string());
        Ok(vec![
            Action::Stop {
                target: target.clone(),
                args: Vec::new(),
            },
            set,
            Action::Start {
                target,
                args: Vec::new(),
            },
        ])
    } else {
        Ok(vec![set])
    }
}

fn plan_set(desired: &DesiredState, facts: &FactSnapshot) -> Result<Plan> {
    let name = require_name(desired)?;
    let record = require_jail(facts, name)?;
    let mut plan = Plan::default();

    let actions = property_actions(name, record, &desired.properties)?;
    if actions.is_empty() {
        let keys: Vec<&str> = desired.properties.iter().map(|(k, _)| k.as_str()).collect();
        plan.note(format!("properties {:?} already set for jail '{}'", keys, name));
    }
    plan.actions.extend(actions);
    Ok(plan)
}

/// Pick the create source for a new jail
fn creation_source(desired: &DesiredState, facts: &FactSnapshot, plan: &mut Plan) -> Result<Option<Source>> {
    let name = require_name(desired)?;
    let release = desired.release.clone().filter(|r| !r.is_empty());

    let from_release = |wrap: fn(String) -> Source| {
        release
            .clone()
            .map(wrap)
            .ok_or_else(|| Error::Precondition(format!("release needed for state {}", desired.state)))
    };

    match desired.state {
        Verb::Basejail => return from_release(Source::Basejail).map(Some),
        Verb::Thickjail => return from_release(Source::Thickjail).map(Some),
        Verb::Template => return from_release(Source::Release).map(Some),
        _ => {}
    }

    let Some(from) = desired.clone_from.as_deref() else {
        if desired.state == Verb::Cloned {
            return Err(Error::Precondition(
                "clone_from needed for state cloned".to_string(),
            ));
        }
        return from_release(Source::Release).map(Some);
    };

    if facts.jails.contains_key(from) {
        return Ok(Some(Source::Jail(from.to_string())));
    }
    if facts.templates.contains_key(from) {
        return Ok(Some(Source::Template(from.to_string())));
    }

    if !desired.dry_run {
        return Err(Error::Precondition(format!(
            "unable to create jail '{}'\nbasejail '{}' doesn't exist.",
            name, from
        )));
    }

    warn!(jail = name, clone_from = from, "clone source does not exist");
    plan.note(format!(
        "Jail '{}' would have been cloned from (nonexisting) jail or template '{}'",
        name, from
    ));
    Ok(release.map(Source::Release))
}

/// Properties the creation states manage
///
/// Templates are always `boot=0`; basejails take no properties.
fn state_properties(desired: &DesiredState) -> DesiredProperties {
    match desired.state {
        Verb::Basejail => DesiredProperties::new(),
        Verb::Template => {
            let mut props: DesiredProperties = desired
                .properties
                .iter()
                .filter(|(k, _)| k != "template" && k != "boot")
                .cloned()
                .collect();
            props.push(("template".to_string(), PropertyValue::Bool(true)));
            props.push(("boot".to_string(), PropertyValue::Bool(false)));
            props
        }
        _ => desired.properties.clone(),
    }
}

/// Properties a new jail is created with
fn creation_properties(desired: &DesiredState, name: &str) -> Result<Changeset> {
    let mut props = initial_properties(name, &state_properties(desired))?;
    if desired.state == Verb::Template {
        props.insert("template", PropertyValue::Bool(true));
    }
    Ok(props)
}

fn plan_present(desired: &DesiredState, facts: &FactSnapshot) -> Result<Plan> {
    let name = require_name(desired)?;
    let mut plan = Plan::default();

    if desired.state != Verb::Cloned
        && let Some(release) = desired.release.as_deref().filter(|r| !r.is_empty())
        && !facts.has_release(release)
    {
        plan.push(Action::FetchRelease {
            release: release.to_string(),
            components: desired.components.clone(),
            update: desired.update,
            args: Vec::new(),
        });
    }

    match facts.find(name) {
        None => {
            if let Some(source) = creation_source(desired, facts, &mut plan)? {
                plan.push(Action::Create {
                    name: name.to_string(),
                    source,
                    properties: creation_properties(desired, name)?,
                    pkglist: desired.pkglist.clone(),
                    args: desired.args.clone(),
                    template: desired.state == Verb::Template,
                });
            }
        }
        Some(record) => {
            plan.note(format!("'{}' already exists.", name));
            plan.actions
                .extend(property_actions(name, record, &state_properties(desired))?);
        }
    }

    if desired.update {
        plan.push(Action::Update {
            name: name.to_string(),
        });
    }

    Ok(plan)
}

fn plan_absent(desired: &DesiredState, facts: &FactSnapshot) -> Result<Plan> {
    let name = require_name(desired)?;
    let mut plan = Plan::default();

    match facts.find(name) {
        Some(record) => {
            if record.is_up() {
                plan.push(Action::Stop {
                    target: Target::Jail(name.to_string()),
                    args: Vec::new(),
                });
            }
            plan.push(Action::Destroy {
                name: name.to_string(),
            });
        }
        None => plan.note(format!("Jail '{}' is already absent.", name)),
    }

    Ok(plan)
}

/// Replay the steps touching `name` through the lifecycle machine
fn validate(name: &str, facts: &FactSnapshot, plan: &Plan) -> Result<()> {
    let observed = Lifecycle::from(facts.find(name).map(|r| r.state));
    let mut tracker = LifecycleTracker::new(name, observed)?;
    let ours = |target: &Target| matches!(target, Target::Jail(n) if n == name);

    for action in &plan.actions {
        match action {
            Action::Create { name: n, .. } if n == name => tracker.create()?,
            Action::Start { target, .. } if ours(target) => tracker.start()?,
            Action::Stop { target, .. } if ours(target) => tracker.stop()?,
            Action::Restart { target, .. } if ours(target) => tracker.restart()?,
            Action::Destroy { name: n } if n == name => tracker.destroy()?,
            Action::Set { name: n, .. } if n == name => tracker.require_present("set")?,
            Action::Update { name: n } if n == name => tracker.require_present("update")?,
            Action::Exec { name: n, .. } if n == name => tracker.require_up("exec")?,
            Action::Pkg { name: n, .. } if n == name => tracker.require_up("pkg")?,
            _ => {}
        }
    }

    Ok(())
}
