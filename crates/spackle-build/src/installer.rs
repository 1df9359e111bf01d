// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use spackle_foundation::digest::{DEFAULT_DISPLAY_LENGTH, SpecHash};
use spackle_solve::{BuildSystem, RuleSet};
use spackle_spec::hash::DAG_HASH;
use spackle_spec::{NodeId, Spec};
use tokio::task::{self, JoinSet};

use crate::build_system::{BuildTool, ToolKind, capabilities};
use crate::builder::{BuildJob, Builder};
use crate::cache::FileCache;
use crate::database::InstallDatabase;
use crate::jobserver::Jobserver;
use crate::prefix::{FailedPrefix, PrefixTransaction};
use crate::report::{BuildReport, BuildResult, NodeReport};
use crate::state::{InstallPlan, InstallState};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./installer_test.rs"]
mod installer_test;

const CACHE_DIR: &str = ".spackle/cache";

/// The directory name of a node's install prefix.
pub fn prefix_name(spec: &Spec, id: NodeId) -> String {
    let node = spec.node(id);
    format!(
        "{}-{}-{}",
        node.display_name(),
        node.versions,
        spec.node_hash(id, &DAG_HASH)
    )
    .replace('=', "")
}

/// Installs concrete specs, building each node in dependency order.
///
/// Independent nodes build at the same time, limited by a shared
/// jobserver. A failed node only stops the nodes that depend on it.
/// Dropping the future returned by [`Installer::install`] cancels the
/// install: running build processes are killed, job tokens and locks
/// are released, and unfinished prefixes are rolled back.
pub struct Installer {
    config: spackle_config::Install,
    database: InstallDatabase,
    builder: Arc<dyn Builder>,
    rules: Option<Arc<RuleSet>>,
    tools: HashMap<ToolKind, BuildTool>,
    hash_length: usize,
}

impl Installer {
    pub fn new(config: spackle_config::Install, builder: Arc<dyn Builder>) -> Self {
        Self {
            database: InstallDatabase::from_config(&config),
            config,
            builder,
            rules: None,
            tools: HashMap::new(),
            hash_length: DEFAULT_DISPLAY_LENGTH,
        }
    }

    /// An installer using the install and hashing sections of a config.
    pub fn from_config(config: &spackle_config::Config, builder: Arc<dyn Builder>) -> Self {
        Self::new(config.install.clone(), builder).with_hash_length(config.hashing.display_length)
    }

    /// Show hashes of this length in build reports.
    pub fn with_hash_length(mut self, hash_length: usize) -> Self {
        self.hash_length = hash_length;
        self
    }

    /// Look up each package's build system in these recipes.
    ///
    /// Packages without a recipe use the generic build system.
    pub fn with_rules(mut self, rules: Arc<RuleSet>) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Use a known build tool instead of detecting it.
    pub fn with_tool(mut self, tool: BuildTool) -> Self {
        self.tools.insert(tool.kind, tool);
        self
    }

    pub fn database(&self) -> &InstallDatabase {
        &self.database
    }

    pub fn prefix_for(&self, spec: &Spec, id: NodeId) -> PathBuf {
        self.config.root.join(prefix_name(spec, id))
    }

    fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.config.lock_timeout_seconds)
    }

    fn build_system(&self, spec: &Spec, id: NodeId) -> BuildSystem {
        self.rules
            .as_ref()
            .and_then(|rules| rules.recipe(spec.node(id).display_name()))
            .map(|recipe| recipe.build_system)
            .unwrap_or_default()
    }

    async fn makeflags(
        &self,
        build_system: BuildSystem,
        jobserver: &Jobserver,
        detected: &mut HashMap<ToolKind, Option<BuildTool>>,
    ) -> String {
        let Some(kind) = capabilities(build_system).parallel_tool else {
            return "-j1".to_owned();
        };
        if let Some(tool) = self.tools.get(&kind) {
            return tool.makeflags(jobserver);
        }
        if !detected.contains_key(&kind) {
            let cache = FileCache::new(self.config.root.join(CACHE_DIR), self.lock_timeout());
            let tool = match BuildTool::detect_cached(kind, &cache).await {
                Ok(tool) => Some(tool),
                Err(err) => {
                    tracing::warn!(%kind, ?err, "could not detect build tool, building serially");
                    None
                }
            };
            detected.insert(kind, tool);
        }
        match detected.get(&kind) {
            Some(Some(tool)) => tool.makeflags(jobserver),
            _ => "-j1".to_owned(),
        }
    }

    /// Install every root of a concrete spec and all it needs.
    ///
    /// Build failures are reported per node rather than returned. An
    /// error is returned only if the install could not be attempted.
    pub async fn install(&self, spec: &Spec) -> Result<BuildReport> {
        if !spec.is_concrete() {
            return Err(spackle_spec::Error::NotConcrete {
                pkg: spec.root_node().display_name().to_owned(),
                reason: "only concrete specs can be installed".into(),
            }
            .into());
        }
        let started = Utc::now();
        let installed: HashSet<SpecHash> = self
            .database
            .all()
            .await?
            .into_iter()
            .map(|record| record.hash)
            .collect();
        let is_installed =
            |spec: &Spec, id: NodeId| installed.contains(&spec.node_hash(id, &DAG_HASH));
        let mut plan = InstallPlan::new(spec, spec.roots(), self.config.tests, is_installed);
        plan.check_skipped(spec, is_installed);
        let mut order: Vec<NodeId> = plan
            .states()
            .filter(|(_, state)| *state == InstallState::Skipped)
            .map(|(id, _)| id)
            .collect();
        order.extend(plan.serial_order()?);
        tracing::info!(
            nodes = plan.len(),
            jobs = self.config.effective_jobs(),
            "starting install of {}",
            spec.root_node().display_name()
        );

        let mut report = BuildReport::new(started);
        report.hash_length = self.hash_length;
        let mut results: HashMap<NodeId, NodeReport> = HashMap::new();
        for (id, state) in plan.states() {
            if state != InstallState::Skipped {
                continue;
            }
            let mut node = self.node_report(spec, id, BuildResult::Skipped);
            node.message = plan.note(id).map(ToOwned::to_owned);
            if spec.node(id).is_external() {
                node.prefix = spec
                    .node(id)
                    .external
                    .as_ref()
                    .and_then(|e| e.path.as_deref())
                    .map(PathBuf::from);
            } else {
                node.prefix = Some(self.prefix_for(spec, id));
                if spec.roots().contains(&id) {
                    self.database
                        .mark_explicit(&spec.node_hash(id, &DAG_HASH), true)
                        .await?;
                }
            }
            results.insert(id, node);
        }

        let jobserver = Arc::new(Jobserver::new(self.config.effective_jobs())?);
        let shared = Arc::new(spec.clone());
        let mut detected = HashMap::new();
        let mut running: JoinSet<NodeReport> = JoinSet::new();
        let mut tasks: HashMap<task::Id, NodeId> = HashMap::new();
        loop {
            for id in plan.ready() {
                plan.start(id)?;
                let build_system = self.build_system(spec, id);
                let makeflags = self.makeflags(build_system, &jobserver, &mut detected).await;
                let task = NodeTask {
                    job: BuildJob {
                        spec: Arc::clone(&shared),
                        node: id,
                        build_system,
                        prefix: self.prefix_for(spec, id),
                        stage: PathBuf::new(),
                        makeflags,
                        run_tests: self.config.tests,
                    },
                    report: self.node_report(spec, id, BuildResult::Success),
                    explicit: spec.roots().contains(&id),
                    config: self.config.clone(),
                    database: self.database.clone(),
                    builder: Arc::clone(&self.builder),
                    jobserver: Arc::clone(&jobserver),
                };
                let handle = running.spawn(task.run());
                tasks.insert(handle.id(), id);
            }
            let Some(joined) = running.join_next_with_id().await else {
                break;
            };
            let (id, node) = match joined {
                Ok((task_id, node)) => (take_task(&mut tasks, task_id)?, node),
                Err(err) => {
                    let id = take_task(&mut tasks, err.id())?;
                    let pkg = spec.node(id).display_name();
                    tracing::error!(%pkg, %err, "install task ended abnormally");
                    let mut node = self.node_report(spec, id, BuildResult::Error);
                    node.message = Some(format!("install task ended abnormally: {err}"));
                    (id, node)
                }
            };
            let blocked = plan.finish(id, node.result == BuildResult::Success)?;
            for blocked_id in blocked {
                let mut blocked_node = self.node_report(spec, blocked_id, BuildResult::Blocked);
                blocked_node.chain = plan
                    .chain(blocked_id)
                    .into_iter()
                    .map(|i| spec.node(i).display_name().to_owned())
                    .collect();
                results.insert(blocked_id, blocked_node);
            }
            results.insert(id, node);
        }
        if !plan.is_complete() {
            return Err(Error::internal("install stopped with nodes still pending"));
        }

        match Arc::try_unwrap(jobserver) {
            Ok(jobserver) => report.leaked_tokens = jobserver.finish().leaked(),
            Err(_) => tracing::warn!("jobserver still in use after install, tokens not checked"),
        }
        report.nodes = order.into_iter().filter_map(|id| results.remove(&id)).collect();
        report.finished = Utc::now();
        tracing::info!(
            installed = report.count(BuildResult::Success),
            failed = report.count(BuildResult::Failure) + report.count(BuildResult::Error),
            blocked = report.count(BuildResult::Blocked),
            "install finished"
        );
        Ok(report)
    }

    fn node_report(&self, spec: &Spec, id: NodeId, result: BuildResult) -> NodeReport {
        let node = spec.node(id);
        NodeReport::new(
            node.display_name().to_owned(),
            node.versions.to_string().trim_start_matches('=').to_owned(),
            spec.node_hash(id, &DAG_HASH),
            result,
        )
    }
}

fn take_task(tasks: &mut HashMap<task::Id, NodeId>, task_id: task::Id) -> Result<NodeId> {
    tasks
        .remove(&task_id)
        .ok_or_else(|| Error::internal(format!("unknown install task {task_id}")))
}

/// Everything one spawned install of a node owns.
struct NodeTask {
    job: BuildJob,
    report: NodeReport,
    explicit: bool,
    config: spackle_config::Install,
    database: InstallDatabase,
    builder: Arc<dyn Builder>,
    jobserver: Arc<Jobserver>,
}

impl NodeTask {
    async fn run(mut self) -> NodeReport {
        let started = Instant::now();
        self.report.started = Some(Utc::now());
        let result = self.install().await;
        self.report.elapsed_seconds = Some(started.elapsed().as_secs_f64());
        match result {
            Ok(()) => {
                tracing::info!(pkg = %self.job.name(), prefix = ?self.job.prefix, "installed");
                self.report.result = BuildResult::Success;
                self.report.prefix = Some(self.job.prefix.clone());
            }
            Err(err) => {
                self.report.result = match &err {
                    Error::Install(_) => BuildResult::Failure,
                    _ => BuildResult::Error,
                };
                tracing::error!(pkg = %self.job.name(), %err, "install failed");
                self.report.message = Some(err.to_string());
            }
        }
        self.report
    }

    async fn install(&mut self) -> Result<()> {
        let _token = self.jobserver.acquire().await?;
        tracing::info!(pkg = %self.job.name(), "installing");
        let tx = PrefixTransaction::begin(&self.job.prefix, self.config.overwrite).await?;
        let stage = tempfile::Builder::new()
            .prefix(&format!(".spackle-stage-{}-", self.job.name()))
            .tempdir_in(&self.config.root)
            .map_err(|err| Error::io("create stage directory", &self.config.root, err))?;
        self.job.stage = stage.path().to_owned();

        if let Err(err) = self.builder.build(&self.job).await {
            let failed = match (&err, self.config.keep_prefix) {
                (Error::Install(_), true) => FailedPrefix::Keep,
                _ => FailedPrefix::Remove,
            };
            match tx.rollback(failed).await {
                Ok(kept) => self.report.prefix = kept,
                Err(rollback_err) => {
                    tracing::error!(err = %rollback_err, "failed to roll back prefix");
                }
            }
            return Err(err);
        }
        tx.commit().await?;
        self.database
            .add(&self.job.spec, self.job.node, &self.job.prefix, self.explicit)
            .await?;
        Ok(())
    }
}
