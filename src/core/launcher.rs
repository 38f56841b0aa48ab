//! Dependency-aware launcher.
//!
//! Starts tagged tasks together with their transitive requirements and stops
//! them together with their running dependents. Every graph walk finishes
//! (and reports cycles) before the first task is started or stopped, so a
//! structural error never leaves the instance table half-changed.
//!
//! All operations share one mutex acquired with a bounded wait; failing to
//! get it in time fails the call with [`LauncherError::LockTimeout`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LauncherConfig;
use crate::core::capability::{is_capable, Capability};
use crate::core::error::LauncherError;
use crate::core::registry::{TaskClass, TaskRegistry};
use crate::core::task::Task;

struct Instance {
    id: Uuid,
    task: Arc<dyn Task>,
}

type Table = BTreeMap<String, Vec<Instance>>;

/// Options of one [`Launcher::start_task`] walk.
#[derive(Debug, Clone, Copy, Default)]
struct Walk {
    skip_unresolved: bool,
    deep_check: bool,
}

/// Starts and stops tagged tasks with their requirements.
pub struct Launcher {
    registry: Arc<TaskRegistry>,
    lock_timeout: Duration,
    started: Mutex<Table>,
}

impl Launcher {
    /// Launcher resolving tags through `registry`, with default settings.
    #[must_use]
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self::with_config(registry, &LauncherConfig::default())
    }

    /// Launcher with explicit settings.
    #[must_use]
    pub fn with_config(registry: Arc<TaskRegistry>, config: &LauncherConfig) -> Self {
        Self {
            registry,
            lock_timeout: config.critical_section_timeout(),
            started: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registry used for tag resolution.
    #[must_use]
    pub const fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    fn lock(&self) -> Result<MutexGuard<'_, Table>, LauncherError> {
        self.started
            .try_lock_for(self.lock_timeout)
            .ok_or(LauncherError::LockTimeout(self.lock_timeout))
    }

    /// Start `tag` after every requirement that is not running yet.
    ///
    /// The tag itself always gets a new instance. Running requirements are
    /// skipped unless `deep_check` is set, in which case their own
    /// requirements are walked too. Unknown requirement tags abort the call
    /// unless `skip_unresolved` is set. Returns the new instance id of `tag`.
    ///
    /// # Errors
    ///
    /// [`LauncherError::NoSuchTask`], [`LauncherError::RequirementsLoop`]
    /// (nothing started), [`LauncherError::LockTimeout`], or
    /// [`LauncherError::TaskStart`].
    pub fn start_task(
        &self,
        tag: &str,
        skip_unresolved: bool,
        deep_check: bool,
    ) -> Result<Uuid, LauncherError> {
        let mut started = self.lock()?;
        let walk = Walk {
            skip_unresolved,
            deep_check,
        };
        let mut plan = Vec::new();
        self.resolve(tag, &mut Vec::new(), &mut plan, &started, walk)?;
        debug!(
            tag,
            plan = ?plan.iter().map(TaskClass::tag).collect::<Vec<_>>(),
            "start plan resolved"
        );

        let mut last = None;
        for class in plan {
            let start_tag = class.tag().to_string();
            let task = class
                .create()
                .and_then(|task| task.start().map(|_| task))
                .map_err(|source| LauncherError::TaskStart {
                    tag: start_tag.clone(),
                    source,
                })?;
            let id = Uuid::new_v4();
            info!(tag = %start_tag, instance_id = %id, "task started");
            started
                .entry(start_tag)
                .or_default()
                .push(Instance { id, task });
            last = Some(id);
        }
        last.ok_or_else(|| LauncherError::NoSuchTask(tag.to_string()))
    }

    fn resolve(
        &self,
        tag: &str,
        path: &mut Vec<String>,
        plan: &mut Vec<TaskClass>,
        started: &Table,
        walk: Walk,
    ) -> Result<(), LauncherError> {
        if let Some(pos) = path.iter().position(|t| t == tag) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(tag.to_string());
            return Err(LauncherError::RequirementsLoop(cycle));
        }
        if plan.iter().any(|c| c.tag() == tag) {
            return Ok(());
        }
        let is_root = path.is_empty();
        let running = started.contains_key(tag);
        if !is_root && running && !walk.deep_check {
            return Ok(());
        }
        let class = match self.registry.get(tag) {
            Ok(class) => class,
            Err(_) if !is_root && walk.skip_unresolved => {
                warn!(tag, required_by = ?path.last(), "skipping unresolved requirement");
                return Ok(());
            }
            Err(_) => return Err(LauncherError::NoSuchTask(tag.to_string())),
        };

        path.push(tag.to_string());
        for requirement in class.requirements() {
            self.resolve(requirement, path, plan, started, walk)?;
        }
        path.pop();

        if is_root || !running {
            plan.push(class);
        }
        Ok(())
    }

    /// Stop one instance of `tag`, or all of them. `stop`/`terminate` are
    /// only invoked where the task is capable. Returns the number of
    /// instances removed. Instances are stopped in start order; when one
    /// fails, it and every instance after it stay tracked.
    ///
    /// # Errors
    ///
    /// [`LauncherError::NoSuchTask`], [`LauncherError::NoSuchInstance`],
    /// [`LauncherError::LockTimeout`] or [`LauncherError::TaskStop`].
    pub fn stop_task(
        &self,
        tag: &str,
        instance_id: Option<Uuid>,
        stop: bool,
        terminate: bool,
    ) -> Result<usize, LauncherError> {
        let mut started = self.lock()?;
        Self::stop_locked(&mut started, tag, instance_id, stop, terminate)
    }

    fn stop_locked(
        started: &mut Table,
        tag: &str,
        instance_id: Option<Uuid>,
        stop: bool,
        terminate: bool,
    ) -> Result<usize, LauncherError> {
        let instances = started
            .get_mut(tag)
            .ok_or_else(|| LauncherError::NoSuchTask(tag.to_string()))?;
        let targets: Vec<Uuid> = match instance_id {
            Some(id) if instances.iter().any(|i| i.id == id) => vec![id],
            Some(id) => {
                return Err(LauncherError::NoSuchInstance {
                    tag: tag.to_string(),
                    instance_id: id,
                })
            }
            None => instances.iter().map(|i| i.id).collect(),
        };

        // An instance leaves the table only once it actually stopped.
        let mut count = 0;
        let mut outcome = Ok(());
        for id in targets {
            let Some(pos) = instances.iter().position(|i| i.id == id) else {
                continue;
            };
            if let Err(e) = Self::stop_instance(tag, &instances[pos], stop, terminate) {
                warn!(tag, instance_id = %id, still_tracked = instances.len(), "stop failed");
                outcome = Err(e);
                break;
            }
            instances.remove(pos);
            count += 1;
        }
        if instances.is_empty() {
            started.remove(tag);
        }
        outcome.map(|()| count)
    }

    fn stop_instance(
        tag: &str,
        instance: &Instance,
        stop: bool,
        terminate: bool,
    ) -> Result<(), LauncherError> {
        let task = &*instance.task;
        let failed = |source| LauncherError::TaskStop {
            tag: tag.to_string(),
            source,
        };
        if stop && is_capable(task, Capability::Stop) {
            task.stop().map_err(failed)?;
        }
        if terminate && is_capable(task, Capability::Terminate) {
            task.terminate().map_err(failed)?;
        }
        info!(tag, instance_id = %instance.id, "task stopped");
        Ok(())
    }

    /// Stop every running task that (transitively) requires `tag`, most
    /// dependent first. `tag` itself keeps running. Returns the number of
    /// instances removed.
    ///
    /// # Errors
    ///
    /// [`LauncherError::DependenciesLoop`] (nothing stopped),
    /// [`LauncherError::LockTimeout`] or [`LauncherError::TaskStop`].
    pub fn stop_dependent_tasks(
        &self,
        tag: &str,
        stop: bool,
        terminate: bool,
    ) -> Result<usize, LauncherError> {
        let mut started = self.lock()?;
        self.stop_dependents_locked(&mut started, tag, stop, terminate)
    }

    fn stop_dependents_locked(
        &self,
        started: &mut Table,
        tag: &str,
        stop: bool,
        terminate: bool,
    ) -> Result<usize, LauncherError> {
        let order = self.dependents_order(started, tag)?;
        let mut count = 0;
        for dependent in order {
            if started.contains_key(&dependent) {
                count += Self::stop_locked(started, &dependent, None, stop, terminate)?;
            }
        }
        Ok(count)
    }

    /// Running dependents of `tag`, each before anything it requires.
    fn dependents_order(&self, started: &Table, tag: &str) -> Result<Vec<String>, LauncherError> {
        let edges: BTreeMap<&str, Vec<&str>> = started
            .keys()
            .map(|running| {
                let requirements = self
                    .registry
                    .get(running)
                    .map(|class| class.requirements().to_vec())
                    .unwrap_or_default();
                let running_requirements = started
                    .keys()
                    .filter(|k| requirements.iter().any(|r| r == *k))
                    .map(String::as_str)
                    .collect();
                (running.as_str(), running_requirements)
            })
            .collect();

        let mut remaining: BTreeSet<&str> = edges
            .keys()
            .copied()
            .filter(|candidate| *candidate != tag && reaches(&edges, candidate, tag))
            .collect();

        let mut order = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let ready: Vec<&str> = remaining
                .iter()
                .copied()
                .filter(|candidate| {
                    !remaining.iter().any(|other| {
                        other != candidate && edges[other].contains(candidate)
                    })
                })
                .collect();
            if ready.is_empty() {
                return Err(LauncherError::DependenciesLoop(
                    remaining.iter().map(|t| (*t).to_string()).collect(),
                ));
            }
            for t in ready {
                remaining.remove(t);
                order.push(t.to_string());
            }
        }
        Ok(order)
    }

    /// Stop everything, dependents before their requirements. Returns the
    /// number of instances removed.
    ///
    /// # Errors
    ///
    /// As [`Self::stop_dependent_tasks`] and [`Self::stop_task`].
    pub fn all_stop(&self) -> Result<usize, LauncherError> {
        let mut started = self.lock()?;
        let mut count = 0;
        while let Some(tag) = started.keys().next().cloned() {
            count += self.stop_dependents_locked(&mut started, &tag, true, false)?;
            if started.contains_key(&tag) {
                count += Self::stop_locked(&mut started, &tag, None, true, false)?;
            }
        }
        info!(count, "all tasks stopped");
        Ok(count)
    }

    /// Direct requirements of a registered tag.
    ///
    /// # Errors
    ///
    /// [`LauncherError::NoSuchTask`].
    pub fn requirements(&self, tag: &str) -> Result<BTreeSet<String>, LauncherError> {
        self.registry
            .get(tag)
            .map(|class| class.requirements().iter().cloned().collect())
            .map_err(|_| LauncherError::NoSuchTask(tag.to_string()))
    }

    /// True if at least one instance of `tag` runs.
    #[must_use]
    pub fn is_started(&self, tag: &str) -> bool {
        self.started.lock().contains_key(tag)
    }

    /// Running tags, sorted.
    #[must_use]
    pub fn started_tasks(&self) -> Vec<String> {
        self.started.lock().keys().cloned().collect()
    }

    /// Every running `(tag, instance id)` pair.
    #[must_use]
    pub fn instances(&self) -> Vec<(String, Uuid)> {
        self.started
            .lock()
            .iter()
            .flat_map(|(tag, instances)| instances.iter().map(move |i| (tag.clone(), i.id)))
            .collect()
    }

    /// The running task behind an instance id.
    #[must_use]
    pub fn instance(&self, tag: &str, instance_id: Uuid) -> Option<Arc<dyn Task>> {
        self.started
            .lock()
            .get(tag)?
            .iter()
            .find(|i| i.id == instance_id)
            .map(|i| Arc::clone(&i.task))
    }

    /// Number of running instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.started.lock().values().map(Vec::len).sum()
    }

    /// True if nothing runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.started.lock().is_empty()
    }
}

fn reaches(edges: &BTreeMap<&str, Vec<&str>>, from: &str, target: &str) -> bool {
    let mut stack = vec![from];
    let mut seen = BTreeSet::new();
    while let Some(node) = stack.pop() {
        if !seen.insert(node) {
            continue;
        }
        for next in edges.get(node).into_iter().flatten() {
            if *next == target {
                return true;
            }
            stack.push(next);
        }
    }
    false
}

impl fmt::Debug for Launcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Launcher")
            .field("lock_timeout", &self.lock_timeout)
            .field("started", &self.started_tasks())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges<'a>(pairs: &[(&'a str, &[&'a str])]) -> BTreeMap<&'a str, Vec<&'a str>> {
        pairs.iter().map(|(k, v)| (*k, v.to_vec())).collect()
    }

    #[test]
    fn test_reaches_follows_transitive_edges() {
        let graph = edges(&[("a", &["b"][..]), ("b", &["c"][..]), ("c", &[][..])]);
        assert!(reaches(&graph, "a", "c"));
        assert!(!reaches(&graph, "c", "a"));
    }

    #[test]
    fn test_reaches_terminates_on_cycles() {
        let graph = edges(&[("a", &["b"][..]), ("b", &["a"][..]), ("c", &[][..])]);
        assert!(!reaches(&graph, "a", "c"));
        assert!(reaches(&graph, "a", "a"));
    }
}
