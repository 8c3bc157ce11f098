//! fail2ban backend: one managed jail file per rule group.
//!
//! A group is managed only through `<jail_dir>/<name>.conf`. Groups that
//! define their own filter also own `<filter_dir>/<name>.conf`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{jail, IpsDaemon};
use crate::cmd_abstraction::{args_to_strings, run_checked, CommandExecutor};
use crate::config::DaemonConfig;
use crate::fs_abstraction::FileSystem;
use crate::policy::RuleGroup;
use crate::validation::validate_group_name;

/// Extension of files jailsync writes; fail2ban also reads `.local`
const MANAGED_EXT: &str = "conf";
const JAIL_FILE_MODE: u32 = 0o644;

pub struct Fail2banDaemon<'a> {
    jail_dir: PathBuf,
    filter_dir: PathBuf,
    /// Sections with this prefix outside their own file are not listed
    managed_prefix: Option<String>,
    client: String,
    executor: &'a dyn CommandExecutor,
    fs: &'a dyn FileSystem,
}

impl<'a> Fail2banDaemon<'a> {
    /// The filter directory defaults to `filter.d` next to `jail_dir`.
    pub fn new(
        jail_dir: impl Into<PathBuf>,
        client: impl Into<String>,
        executor: &'a dyn CommandExecutor,
        fs: &'a dyn FileSystem,
    ) -> Self {
        let jail_dir = jail_dir.into();
        Self {
            filter_dir: jail_dir.with_file_name("filter.d"),
            jail_dir,
            managed_prefix: None,
            client: client.into(),
            executor,
            fs,
        }
    }

    pub fn from_config(
        config: &DaemonConfig,
        executor: &'a dyn CommandExecutor,
        fs: &'a dyn FileSystem,
    ) -> Self {
        Self::new(config.jail_dir.clone(), config.client.clone(), executor, fs)
            .filter_dir(config.filter_dir.clone())
            .managed_prefix(config.managed_prefix.clone())
    }

    pub fn filter_dir(mut self, filter_dir: impl Into<PathBuf>) -> Self {
        self.filter_dir = filter_dir.into();
        self
    }

    pub fn managed_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.managed_prefix = Some(prefix.into());
        self
    }

    fn group_path(&self, name: &str) -> Result<PathBuf> {
        validate_group_name(name)?;
        Ok(self.jail_dir.join(format!("{}.{}", name, MANAGED_EXT)))
    }

    fn filter_path(&self, name: &str) -> Result<PathBuf> {
        validate_group_name(name)?;
        Ok(self.filter_dir.join(format!("{}.{}", name, MANAGED_EXT)))
    }

    fn is_jail_file(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("conf") | Some("local")
        )
    }

    /// Whether `path` is the file jailsync would write for `name`
    fn is_own_file(path: &Path, name: &str) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(MANAGED_EXT)
            && path.file_stem().and_then(|s| s.to_str()) == Some(name)
    }

    fn claims(&self, name: &str) -> bool {
        self.managed_prefix
            .as_deref()
            .is_some_and(|prefix| name.starts_with(prefix))
    }

    /// Managed filter for `name`, if one exists and was written by jailsync.
    fn read_managed_filter(&self, name: &str) -> Result<Option<String>> {
        let path = self.filter_path(name)?;
        if !self.fs.exists(&path) {
            return Ok(None);
        }
        let content = self
            .fs
            .read_to_string(&path)
            .with_context(|| format!("Failed to read filter file {:?}", path))?;
        Ok(content.starts_with(jail::MANAGED_HEADER).then_some(content))
    }

    fn remove_managed_filter(&self, name: &str) -> Result<()> {
        if self.read_managed_filter(name)?.is_some() {
            let path = self.filter_path(name)?;
            self.fs
                .remove_file(&path)
                .with_context(|| format!("Failed to remove filter file {:?}", path))?;
            debug!("Removed filter file {:?}", path);
        }
        Ok(())
    }
}

#[async_trait]
impl IpsDaemon for Fail2banDaemon<'_> {
    async fn list_rule_groups(&self) -> Result<Vec<RuleGroup>> {
        if !self.fs.exists(&self.jail_dir) {
            debug!("Jail directory {:?} does not exist yet", self.jail_dir);
            return Ok(Vec::new());
        }

        let files = self
            .fs
            .list_files(&self.jail_dir)
            .with_context(|| format!("Failed to list jail directory {:?}", self.jail_dir))?;

        let mut groups = Vec::new();
        for path in files.iter().filter(|p| Self::is_jail_file(p)) {
            let content = self
                .fs
                .read_to_string(path)
                .with_context(|| format!("Failed to read jail file {:?}", path))?;

            for mut group in jail::parse(&content) {
                if !Self::is_own_file(path, &group.name) {
                    if self.claims(&group.name) {
                        warn!(
                            "Ignoring [{}] in {:?}: jailsync only manages {}.{}",
                            group.name, path, group.name, MANAGED_EXT
                        );
                        continue;
                    }
                    groups.push(group);
                    continue;
                }

                if group.match_spec.filter == group.name {
                    group.match_spec.definition = self
                        .read_managed_filter(&group.name)?
                        .and_then(|content| jail::parse_filter(&content));
                }
                groups.push(group);
            }
        }

        debug!("Found {} jails in {:?}", groups.len(), self.jail_dir);
        Ok(groups)
    }

    async fn upsert_rule_group(&self, group: &RuleGroup) -> Result<()> {
        let path = self.group_path(&group.name)?;

        // Filter first: a jail naming a missing filter breaks the reload
        match &group.match_spec.definition {
            Some(def) => {
                let filter_path = self.filter_path(&group.name)?;
                self.fs
                    .create_dir_all(&self.filter_dir)
                    .with_context(|| {
                        format!("Failed to create filter directory {:?}", self.filter_dir)
                    })?;
                self.fs
                    .write_atomic(&filter_path, jail::render_filter(def).as_bytes(), JAIL_FILE_MODE)
                    .with_context(|| format!("Failed to write filter file {:?}", filter_path))?;
                debug!("Wrote filter {} to {:?}", group.name, filter_path);
            }
            None => self.remove_managed_filter(&group.name)?,
        }

        self.fs
            .create_dir_all(&self.jail_dir)
            .with_context(|| format!("Failed to create jail directory {:?}", self.jail_dir))?;
        self.fs
            .write_atomic(&path, jail::render(group).as_bytes(), JAIL_FILE_MODE)
            .with_context(|| format!("Failed to write jail file {:?}", path))?;
        debug!("Wrote jail {} to {:?}", group.name, path);
        Ok(())
    }

    async fn remove_rule_group(&self, name: &str) -> Result<()> {
        let path = self.group_path(name)?;
        if !self.fs.exists(&path) {
            anyhow::bail!(
                "Jail '{}' has no managed file at {:?}; refusing to edit other files",
                name,
                path
            );
        }
        self.fs
            .remove_file(&path)
            .with_context(|| format!("Failed to remove jail file {:?}", path))?;
        debug!("Removed jail file {:?}", path);
        self.remove_managed_filter(name)
    }

    async fn reload(&self) -> Result<()> {
        run_checked(self.executor, &self.client, &["reload"])?;
        info!("fail2ban configuration reloaded");
        Ok(())
    }

    async fn is_active(&self) -> Result<bool> {
        let output = self.executor.run(&self.client, &args_to_strings(&["ping"]))?;
        Ok(output.success() && output.stdout.contains("pong"))
    }
}
