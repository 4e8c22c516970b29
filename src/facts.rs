//! Fact snapshot of everything iocage manages
//!
//! A snapshot is built fresh at the start of every run. After a mutating
//! action the affected collection is re-queried and a new snapshot is
//! returned; nothing is cached between runs.

use crate::error::Result;
use crate::iocage::listing::{parse_jails, parse_plugins, parse_releases};
use crate::iocage::{PropertyStore, Runner};
use crate::jail::{JailRecord, PluginRecord, ResourceKind, RunState};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Jails or templates keyed by name
pub type JailMap = BTreeMap<String, JailRecord>;

/// Observed iocage state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FactSnapshot {
    #[serde(rename = "iocage_releases")]
    pub releases: Vec<String>,
    #[serde(rename = "iocage_templates")]
    pub templates: JailMap,
    #[serde(rename = "iocage_jails")]
    pub jails: JailMap,
    #[serde(rename = "iocage_plugins")]
    pub plugins: BTreeMap<String, PluginRecord>,
}

/// Run a listing, failing on non-zero exit
fn list(runner: &dyn Runner, kind: ResourceKind) -> Result<String> {
    let args: Vec<String> = kind.list_args().iter().map(|s| s.to_string()).collect();
    let output = runner.run_checked(&format!("Listing iocage {} failed.", kind), &args)?;
    Ok(output.stdout)
}

/// Query a jail or template collection with each record's properties
pub fn query_jails(runner: &dyn Runner, kind: ResourceKind) -> Result<JailMap> {
    let store = PropertyStore::new(runner);
    let mut map = JailMap::new();

    for mut record in parse_jails(kind, &list(runner, kind)?)? {
        record.properties = store.get(&record.name)?;
        map.insert(record.name.clone(), record);
    }

    debug!(collection = %kind, count = map.len(), "queried");
    Ok(map)
}

pub fn query_plugins(runner: &dyn Runner) -> Result<BTreeMap<String, PluginRecord>> {
    let plugins = parse_plugins(&list(runner, ResourceKind::Plugins)?)?;
    debug!(collection = "plugins", count = plugins.len(), "queried");
    Ok(plugins.into_iter().map(|p| (p.name.clone(), p)).collect())
}

pub fn query_releases(runner: &dyn Runner) -> Result<Vec<String>> {
    let releases = parse_releases(&list(runner, ResourceKind::Releases)?);
    debug!(collection = "releases", count = releases.len(), "queried");
    Ok(releases)
}

/// `iocage list -h` triggers iocage's first-run activation; its result is ignored
pub fn prime(runner: &dyn Runner) {
    let args: Vec<String> = vec!["list".to_string(), "-h".to_string()];
    if let Ok(output) = runner.run(&args)
        && !output.success()
    {
        debug!(code = output.code, "init listing failed, ignored");
    }
}

impl FactSnapshot {
    /// Build a complete snapshot
    pub fn query(runner: &dyn Runner) -> Result<Self> {
        prime(runner);
        Ok(Self {
            jails: query_jails(runner, ResourceKind::Jails)?,
            plugins: query_plugins(runner)?,
            templates: query_jails(runner, ResourceKind::Templates)?,
            releases: query_releases(runner)?,
        })
    }

    /// Re-query one collection, returning the updated snapshot
    pub fn refresh(mut self, runner: &dyn Runner, kind: ResourceKind) -> Result<Self> {
        match kind {
            ResourceKind::Jails => self.jails = query_jails(runner, kind)?,
            ResourceKind::Templates => self.templates = query_jails(runner, kind)?,
            ResourceKind::Plugins => self.plugins = query_plugins(runner)?,
            ResourceKind::Releases => self.releases = query_releases(runner)?,
        }
        Ok(self)
    }

    /// Look a name up among jails and templates (templates win on a clash)
    pub fn find(&self, name: &str) -> Option<&JailRecord> {
        self.templates.get(name).or_else(|| self.jails.get(name))
    }

    /// Whether `name` is a template rather than a jail
    pub fn is_template(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn has_release(&self, release: &str) -> bool {
        self.releases.iter().any(|r| r == release)
    }

    pub fn has_plugin(&self, plugin: &str) -> bool {
        self.plugins.contains_key(plugin)
    }

    /// True when every jail reports `state` (vacuously true with no jails)
    pub fn all_jails(&self, state: RunState) -> bool {
        self.jails.values().all(|j| j.state == state)
    }

    /// Drop a destroyed name from both jail collections
    pub fn without(mut self, name: &str) -> Self {
        self.jails.remove(name);
        self.templates.remove(name);
        self
    }
}

#[cfg(test)]
pub mod testing {
    //! Canned iocage output shared by engine tests

    use crate::iocage::runner::fake::FakeIocage;

    pub const PROPS_UP: &str = "boot:1\nip4_addr:vnet0|10.1.0.5/24\nnotes:none\nhost_hostname:www\ntemplate:0\n";
    pub const PROPS_DOWN: &str = "boot:0\nip4_addr:vnet0|10.1.0.6/24\nnotes:none\nhost_hostname:db\ntemplate:0\n";
    pub const PROPS_TEMPLATE: &str = "boot:0\nip4_addr:-\nnotes:none\nhost_hostname:tpl\ntemplate:1\n";

    pub fn jail_line(jid: &str, name: &str, state: &str) -> String {
        format!("{}\t{}\toff\t{}\tjail\t13.0-RELEASE-p4\t-\t-\t-\tno\n", jid, name, state)
    }

    /// Script the listing queries of a full snapshot
    pub fn script_snapshot(fake: &FakeIocage, jails: &str, templates: &str, releases: &str) {
        fake.reply_with("list -h", 0, "", "")
            .reply("list -hl", jails)
            .reply("list -hP", "")
            .reply("list -hlt", templates)
            .reply("list -hr", releases);
    }

    /// Standard host: `www` up, `db` down, template `tpl`, one release
    pub fn standard(fake: &FakeIocage) {
        let jails = format!("{}{}", jail_line("1", "www", "up"), jail_line("-", "db", "down"));
        let templates = "-\ttpl\toff\tdown\ttemplate\t13.0-RELEASE-p4\t-\t-\t-\tno\n";
        script_snapshot(fake, &jails, templates, "13.0-RELEASE\n");
        fake.reply("get all www", PROPS_UP)
            .reply("get all db", PROPS_DOWN)
            .reply("get all tpl", PROPS_TEMPLATE);
    }
}
