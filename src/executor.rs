//! Plan execution
//!
//! Runs each planned action through iocage, or in dry-run mode describes
//! what would run. Every mutating action is followed by a fresh query of the
//! affected collection; a mismatch between what iocage reported and what it
//! now lists is fatal.

use crate::error::{Error, Result};
use crate::facts::FactSnapshot;
use crate::iocage::{CommandOutput, PropertyStore, Runner, UpdateOutcome, parse_update_output};
use crate::jail::{ResourceKind, RunState};
use crate::planner::{Action, Plan, Target};
use tracing::info;

/// Result of executing a plan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub changed: bool,
    pub messages: Vec<String>,
    /// Output of the last iocage step
    pub stdout: String,
    pub stderr: String,
    pub facts: FactSnapshot,
}

/// Messages and output accumulated while stepping through a plan
#[derive(Default)]
struct Journal {
    changed: bool,
    messages: Vec<String>,
    stdout: String,
    stderr: String,
}

impl Journal {
    fn note(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    fn change(&mut self, message: impl Into<String>) {
        self.changed = true;
        self.messages.push(message.into());
    }

    fn capture(&mut self, output: &CommandOutput) {
        self.stdout = output.stdout.clone();
        self.stderr = output.stderr.clone();
    }

    fn fail(&self, message: impl Into<String>) -> Error {
        Error::Postcondition {
            message: message.into(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }
}

/// Executes plans against a runner
pub struct Executor<'a> {
    runner: &'a dyn Runner,
    dry_run: bool,
}

impl<'a> Executor<'a> {
    pub fn new(runner: &'a dyn Runner, dry_run: bool) -> Self {
        Self { runner, dry_run }
    }

    /// Run every action in order, threading the snapshot through
    pub fn execute(&self, plan: &Plan, facts: FactSnapshot) -> Result<Outcome> {
        let mut journal = Journal::default();
        let mut facts = facts;

        for action in &plan.actions {
            facts = self.step(action, facts, &mut journal)?;
        }

        Ok(Outcome {
            changed: journal.changed,
            messages: journal.messages,
            stdout: journal.stdout,
            stderr: journal.stderr,
            facts,
        })
    }

    fn step(&self, action: &Action, facts: FactSnapshot, journal: &mut Journal) -> Result<FactSnapshot> {
        if let Action::Note(message) = action {
            journal.note(message.clone());
            return Ok(facts);
        }

        let (Some(args), Some(shown)) = (action.words(false)?, action.words(true)?) else {
            return Ok(facts);
        };
        let rendered = self.runner.command_line(&shown);

        if self.dry_run {
            info!(command = %rendered, "would run");
            match action {
                Action::Update { .. } => journal.note(intent(action, &rendered)),
                _ => journal.change(intent(action, &rendered)),
            }
            return Ok(facts);
        }

        info!(command = %rendered, "running");
        let output = self.runner.run_checked(&failure_label(action), &args)?;
        journal.capture(&output);

        self.verify(action, &rendered, &output, facts, journal)
    }

    /// Record the applied change and check that iocage agrees
    fn verify(
        &self,
        action: &Action,
        rendered: &str,
        output: &CommandOutput,
        facts: FactSnapshot,
        journal: &mut Journal,
    ) -> Result<FactSnapshot> {
        let out = &output.stdout;

        match action {
            Action::Note(_) => Ok(facts),

            Action::FetchRelease { release, update, .. } => {
                journal.change(fetched_message(*update, out));
                let facts = facts.refresh(self.runner, ResourceKind::Releases)?;
                if !facts.has_release(release) {
                    return Err(journal.fail(format!("Fetching release {} failed.", release)));
                }
                Ok(facts)
            }

            Action::FetchPlugin { plugin, update, .. } => {
                journal.change(fetched_message(*update, out));
                let facts = facts.refresh(self.runner, ResourceKind::Plugins)?;
                if !facts.has_plugin(plugin) {
                    return Err(journal.fail(format!("Fetching plugin {} failed.", plugin)));
                }
                Ok(facts)
            }

            Action::Create {
                name,
                properties,
                template,
                ..
            } => {
                if !PropertyStore::new(self.runner).exists(name)? {
                    return Err(journal.fail(format!("Jail '{}' not created ???\ncmd: {}", name, rendered)));
                }
                journal.change(format!(
                    "Jail '{}' was created with properties {:?}.\n\n{}",
                    name,
                    properties.rendered(),
                    rendered
                ));
                let kind = if *template {
                    ResourceKind::Templates
                } else {
                    ResourceKind::Jails
                };
                facts.refresh(self.runner, kind)
            }

            Action::Set { name, changes } => {
                let props = PropertyStore::new(self.runner).get(name)?;
                for (key, value) in changes.iter() {
                    let wanted = value.wire();
                    let actual = props.get(key).map(String::as_str).unwrap_or_default();
                    if actual != wanted {
                        return Err(journal.fail(format!(
                            "Property '{}' of jail '{}' is '{}' after set, expected '{}'.",
                            key, name, actual, wanted
                        )));
                    }
                }
                journal.change(format!(
                    "properties {:?} were set on jail '{}' with cmd={}.",
                    changes.keys(),
                    name,
                    rendered
                ));
                let kind = if facts.is_template(name) {
                    ResourceKind::Templates
                } else {
                    ResourceKind::Jails
                };
                facts.refresh(self.runner, kind)
            }

            Action::Start { target, .. } => {
                journal.change(format!("{} started.\n{}", subject(target), out));
                self.expect_state(target, RunState::Up, facts, journal)
            }

            Action::Stop { target, .. } => {
                journal.change(format!("{} stopped.\n{}", subject(target), out));
                self.expect_state(target, RunState::Down, facts, journal)
            }

            Action::Restart { target, .. } => {
                let facts = facts.refresh(self.runner, ResourceKind::Jails)?;
                match target {
                    Target::All => {
                        journal.change(format!("ALL jails restarted.\n{}", out));
                        if !facts.all_jails(RunState::Up) {
                            return Err(journal.fail("ALL jails are not up."));
                        }
                    }
                    Target::Jail(name) => {
                        journal.change(format!("Jail '{}' restarted.\n{}", name, out));
                        if !jail_is(&facts, name, RunState::Up) {
                            return Err(journal.fail(format!("Restarting jail '{}' failed.", name)));
                        }
                    }
                    Target::Selected => journal.change(format!("Jail(s) restarted.\n{}", out)),
                }
                Ok(facts)
            }

            Action::Destroy { name } => {
                if PropertyStore::new(self.runner).exists(name)? {
                    return Err(journal.fail(format!("Jail '{}' not destroyed ???\ncmd: {}", name, rendered)));
                }
                journal.change(format!("Jail '{}' was destroyed.", name));
                if facts.jails.contains_key(name) {
                    journal.note(format!("Jail '{}' removed from iocage_jails.", name));
                }
                if facts.templates.contains_key(name) {
                    journal.note(format!("Jail '{}' removed from iocage_templates.", name));
                }
                Ok(facts.without(name))
            }

            Action::Exec { name, cmd, .. } => {
                journal.change(format!(
                    "Command '{}' was executed in jail '{}'.\nrc: {}\nstdout:\n{}\nstderr:\n{}",
                    cmd, name, output.code, out, output.stderr
                ));
                Ok(facts)
            }

            Action::Pkg { name, cmd } => {
                journal.change(format!(
                    "pkg '{}' was executed in jail '{}'.\nstdout:\n{}\nstderr:\n{}",
                    cmd, name, out, output.stderr
                ));
                Ok(facts)
            }

            Action::Update { name } => match parse_update_output(out) {
                UpdateOutcome::Updated(version) => {
                    journal.change(format!("jail '{}' updated to {}", name, version));
                    facts.refresh(self.runner, ResourceKind::Jails)
                }
                UpdateOutcome::UpToDate => {
                    journal.note(format!("jail '{}' needs no updates", name));
                    Ok(facts)
                }
                UpdateOutcome::Unrecognized => {
                    journal.note(format!("jail '{}' update output not recognised", name));
                    Ok(facts)
                }
            },
        }
    }

    /// Re-list jails and require `target` to be in `state`
    fn expect_state(
        &self,
        target: &Target,
        state: RunState,
        facts: FactSnapshot,
        journal: &Journal,
    ) -> Result<FactSnapshot> {
        let facts = facts.refresh(self.runner, ResourceKind::Jails)?;
        match target {
            Target::All if !facts.all_jails(state) => {
                Err(journal.fail(format!("ALL jails are not {}.", state)))
            }
            Target::Jail(name) if !jail_is(&facts, name, state) => {
                Err(journal.fail(format!("Jail '{}' is not {}.", name, state)))
            }
            _ => Ok(facts),
        }
    }
}

fn jail_is(facts: &FactSnapshot, name: &str, state: RunState) -> bool {
    facts.find(name).is_some_and(|j| j.state == state)
}

/// Sentence subject for a lifecycle target
fn subject(target: &Target) -> String {
    match target {
        Target::Jail(name) => format!("Jail '{}'", name),
        Target::All => "All jails".to_string(),
        Target::Selected => "Jail(s)".to_string(),
    }
}

fn fetched_message(update: bool, out: &str) -> String {
    if update {
        format!("Successfully fetched and updated.\n{}", out)
    } else {
        format!("Successfully fetched.\n{}", out)
    }
}

/// Label of the error raised when the action's command fails
fn failure_label(action: &Action) -> String {
    match action {
        Action::Note(_) => String::new(),
        Action::FetchRelease { release, .. } => format!("Release '{}' could not be fetched.", release),
        Action::FetchPlugin { plugin, .. } => format!("Plugin '{}' could not be fetched.", plugin),
        Action::Create { name, .. } => format!("Jail '{}' could not be created.", name),
        Action::Set { name, .. } => format!("Attributes could not be set on jail '{}'.", name),
        Action::Start { .. } => "Jail(s) could not be started.".to_string(),
        Action::Stop { .. } => "Jail(s) could not be stopped.".to_string(),
        Action::Restart { .. } => "Jail(s) could not be restarted.".to_string(),
        Action::Destroy { name } => format!("Jail '{}' could not be destroyed.", name),
        Action::Exec { name, cmd, .. } => {
            format!("Command '{}' could not be executed in jail '{}'.", cmd, name)
        }
        Action::Pkg { name, cmd } => format!("pkg '{}' could not be executed in jail '{}'.", cmd, name),
        Action::Update { name } => format!("Jail '{}' not updated.", name),
    }
}

/// What a dry run reports instead of running `action`
fn intent(action: &Action, rendered: &str) -> String {
    match action {
        Action::Note(message) => message.clone(),
        Action::FetchRelease { update, .. } | Action::FetchPlugin { update, .. } => {
            if *update {
                "Would be fetched and updated.".to_string()
            } else {
                "Would be fetched.".to_string()
            }
        }
        Action::Create { name, .. } => {
            format!("Jail '{}' would be created with command:\n{}\n", name, rendered)
        }
        Action::Set { name, changes } => format!(
            "properties {:?} would have been changed for jail '{}' with command {}",
            changes.keys(),
            name,
            rendered
        ),
        Action::Start { target, .. } => format!("{} would start.", subject(target)),
        Action::Stop { target, .. } => format!("{} would stop.", subject(target)),
        Action::Restart { target, .. } => match target {
            Target::All => "ALL jails would restart.".to_string(),
            other => format!("{} would restart.", subject(other)),
        },
        Action::Destroy { name } => format!("Jail '{}' would have been destroyed.", name),
        Action::Exec { name, cmd, .. } => {
            format!("Command '{}' would have been executed in jail '{}'.", cmd, name)
        }
        Action::Pkg { name, cmd } => format!("pkg '{}' would have been executed in jail '{}'.", cmd, name),
        Action::Update { .. } => "Unable to check for updates in check_mode".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::differ::Changeset;
    use crate::facts::testing::{PROPS_UP, jail_line, standard};
    use crate::iocage::runner::fake::FakeIocage;
    use crate::jail::PropertyValue;
    use crate::planner::Source;
    use assert_matches::assert_matches;

    fn snapshot(fake: &FakeIocage) -> FactSnapshot {
        standard(fake);
        FactSnapshot::query(fake).unwrap()
    }

    fn plan_of(actions: Vec<Action>) -> Plan {
        Plan { actions }
    }

    fn start(name: &str) -> Action {
        Action::Start {
            target: Target::Jail(name.to_string()),
            args: Vec::new(),
        }
    }

    #[test]
    fn test_notes_do_not_change_anything() {
        let fake = FakeIocage::new();
        let facts = snapshot(&fake);
        let calls = fake.calls().len();

        let plan = plan_of(vec![Action::Note("Jail 'www' already started.".to_string())]);
        let outcome = Executor::new(&fake, false).execute(&plan, facts.clone()).unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.messages, vec!["Jail 'www' already started."]);
        assert_eq!(outcome.facts, facts);
        assert_eq!(fake.calls().len(), calls);
    }

    #[test]
    fn test_start_is_verified() {
        let fake = FakeIocage::new();
        let facts = snapshot(&fake);
        fake.reply("start db", "* Starting db\n").reply(
            "list -hl",
            &format!("{}{}", jail_line("1", "www", "up"), jail_line("2", "db", "up")),
        );

        let outcome = Executor::new(&fake, false)
            .execute(&plan_of(vec![start("db")]), facts)
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.messages, vec!["Jail 'db' started.\n* Starting db\n"]);
        assert_eq!(outcome.stdout, "* Starting db\n");
        assert!(outcome.facts.jails["db"].is_up());
    }

    #[test]
    fn test_start_that_does_not_stick_fails() {
        let fake = FakeIocage::new();
        let facts = snapshot(&fake);
        fake.reply_with("start db", 0, "", "warning: exec.start failed");

        let err = Executor::new(&fake, false)
            .execute(&plan_of(vec![start("db")]), facts)
            .unwrap_err();
        assert_matches!(&err, Error::Postcondition { message, .. } if message == "Jail 'db' is not up.");
        assert!(err.to_string().contains("exec.start failed"));
    }

    #[test]
    fn test_command_failure_is_fatal() {
        let fake = FakeIocage::new();
        let facts = snapshot(&fake);
        fake.reply_with("start db", 1, "", "db: no such jail");

        let err = Executor::new(&fake, false)
            .execute(&plan_of(vec![start("db")]), facts)
            .unwrap_err();
        assert_matches!(err, Error::Command { code: 1, .. });
    }

    #[test]
    fn test_dry_run_runs_nothing() {
        let fake = FakeIocage::new();
        let facts = snapshot(&fake);
        let mut changes = Changeset::new();
        changes.insert("notes", PropertyValue::Text("web server".to_string()));

        let plan = plan_of(vec![
            Action::Stop {
                target: Target::All,
                args: Vec::new(),
            },
            Action::Set {
                name: "www".to_string(),
                changes,
            },
            Action::Destroy {
                name: "db".to_string(),
            },
            Action::Update {
                name: "www".to_string(),
            },
        ]);
        let outcome = Executor::new(&fake, true).execute(&plan, facts.clone()).unwrap();

        assert!(fake.mutating_calls().is_empty());
        assert!(outcome.changed);
        assert_eq!(outcome.facts, facts);
        assert_eq!(outcome.messages[0], "All jails would stop.");
        assert_eq!(
            outcome.messages[1],
            "properties [\"notes\"] would have been changed for jail 'www' with command iocage set notes=\"web server\" www"
        );
        assert_eq!(outcome.messages[2], "Jail 'db' would have been destroyed.");
        assert_eq!(outcome.messages[3], "Unable to check for updates in check_mode");
    }

    #[test]
    fn test_set_is_read_back() {
        let fake = FakeIocage::new();
        let facts = snapshot(&fake);
        let mut changes = Changeset::new();
        changes.insert("boot", PropertyValue::Bool(false));
        fake.reply("set boot=0 www", "")
            .reply("get all www", &PROPS_UP.replace("boot:1", "boot:0"));

        let plan = plan_of(vec![Action::Set {
            name: "www".to_string(),
            changes,
        }]);
        let outcome = Executor::new(&fake, false).execute(&plan, facts).unwrap();
        assert_eq!(outcome.facts.jails["www"].properties["boot"], "0");
        assert_eq!(
            outcome.messages,
            vec!["properties [\"boot\"] were set on jail 'www' with cmd=iocage set boot=0 www."]
        );
    }

    #[test]
    fn test_set_that_does_not_stick_fails() {
        let fake = FakeIocage::new();
        let facts = snapshot(&fake);
        let mut changes = Changeset::new();
        changes.insert("boot", PropertyValue::Bool(false));
        fake.reply("set boot=0 www", "");

        let plan = plan_of(vec![Action::Set {
            name: "www".to_string(),
            changes,
        }]);
        let err = Executor::new(&fake, false).execute(&plan, facts).unwrap_err();
        assert_eq!(
            err.to_string().lines().next(),
            Some("Property 'boot' of jail 'www' is '1' after set, expected '0'.")
        );
    }

    #[test]
    fn test_destroy_still_listed_fails() {
        let fake = FakeIocage::new();
        let facts = snapshot(&fake);
        fake.reply("destroy -f db", "").reply("get host_hostuuid db", "db\n");

        let plan = plan_of(vec![Action::Destroy {
            name: "db".to_string(),
        }]);
        let err = Executor::new(&fake, false).execute(&plan, facts).unwrap_err();
        assert!(err.to_string().starts_with("Jail 'db' not destroyed ???\ncmd: iocage destroy -f db"));
    }

    #[test]
    fn test_destroy_removes_from_facts() {
        let fake = FakeIocage::new();
        let facts = snapshot(&fake);
        fake.reply("destroy -f tpl", "")
            .reply_with("get host_hostuuid tpl", 1, "", "not found");

        let plan = plan_of(vec![Action::Destroy {
            name: "tpl".to_string(),
        }]);
        let outcome = Executor::new(&fake, false).execute(&plan, facts).unwrap();
        assert!(outcome.facts.find("tpl").is_none());
        assert_eq!(
            outcome.messages,
            vec!["Jail 'tpl' was destroyed.", "Jail 'tpl' removed from iocage_templates."]
        );
    }

    #[test]
    fn test_fetch_that_does_not_land_fails() {
        let fake = FakeIocage::new();
        let facts = snapshot(&fake);
        fake.reply("fetch -r 14.1-RELEASE", "done\n");

        let plan = plan_of(vec![Action::FetchRelease {
            release: "14.1-RELEASE".to_string(),
            components: Vec::new(),
            update: false,
            args: Vec::new(),
        }]);
        let err = Executor::new(&fake, false).execute(&plan, facts).unwrap_err();
        assert_matches!(err, Error::Postcondition { message, stdout, .. } => {
            assert_eq!(message, "Fetching release 14.1-RELEASE failed.");
            assert_eq!(stdout, "done\n");
        });
    }

    #[test]
    fn test_update_outcomes() {
        let fake = FakeIocage::new();
        let facts = snapshot(&fake);
        fake.reply("update db", "Fetching metadata...\nNo updates needed to update system to 13.0-RELEASE-p11.\n")
            .reply("update db", "www updating to 13.0-RELEASE-p11:\n");

        let update = plan_of(vec![Action::Update {
            name: "db".to_string(),
        }]);
        let executor = Executor::new(&fake, false);

        let outcome = executor.execute(&update, facts.clone()).unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.messages, vec!["jail 'db' needs no updates"]);

        let outcome = executor.execute(&update, facts).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.messages, vec!["jail 'db' updated to 13.0-RELEASE-p11"]);
    }

    #[test]
    fn test_create_that_does_not_land_fails() {
        let fake = FakeIocage::new();
        let facts = snapshot(&fake);
        fake.reply("create -n foo -r 13.0-RELEASE", "foo successfully created!\n")
            .reply_with("get host_hostuuid foo", 1, "", "");

        let plan = plan_of(vec![Action::Create {
            name: "foo".to_string(),
            source: Source::Release("13.0-RELEASE".to_string()),
            properties: Changeset::new(),
            pkglist: None,
            args: Vec::new(),
            template: false,
        }]);
        let err = Executor::new(&fake, false).execute(&plan, facts).unwrap_err();
        assert_matches!(err, Error::Postcondition { message, stdout, .. } => {
            assert_eq!(message, "Jail 'foo' not created ???\ncmd: iocage create -n foo -r 13.0-RELEASE");
            assert_eq!(stdout, "foo successfully created!\n");
        });
    }

    #[test]
    fn test_plugin_fetch_that_does_not_land_fails() {
        let fake = FakeIocage::new();
        let facts = snapshot(&fake);
        fake.reply("fetch -P nextcloud", "");

        let plan = plan_of(vec![Action::FetchPlugin {
            plugin: "nextcloud".to_string(),
            update: false,
            args: Vec::new(),
        }]);
        let err = Executor::new(&fake, false).execute(&plan, facts).unwrap_err();
        assert_matches!(err, Error::Postcondition { message, .. } if message == "Fetching plugin nextcloud failed.");
    }

    #[test]
    fn test_stop_that_does_not_stick_fails() {
        let fake = FakeIocage::new();
        let facts = snapshot(&fake);
        fake.reply("stop www", "* Stopping www\n");

        let plan = plan_of(vec![Action::Stop {
            target: Target::Jail("www".to_string()),
            args: Vec::new(),
        }]);
        let err = Executor::new(&fake, false).execute(&plan, facts).unwrap_err();
        assert_matches!(err, Error::Postcondition { message, .. } if message == "Jail 'www' is not down.");
    }

    #[test]
    fn test_exec_reports_output() {
        let fake = FakeIocage::new();
        let facts = snapshot(&fake);
        fake.reply("exec -u root www -- /bin/sh -c uptime", "up 3 days\n");

        let plan = plan_of(vec![Action::Exec {
            name: "www".to_string(),
            user: "root".to_string(),
            cmd: "uptime".to_string(),
        }]);
        let outcome = Executor::new(&fake, false).execute(&plan, facts).unwrap();
        assert!(outcome.changed);
        assert_eq!(
            outcome.messages[0],
            "Command 'uptime' was executed in jail 'www'.\nrc: 0\nstdout:\nup 3 days\n\nstderr:\n"
        );
    }
}
