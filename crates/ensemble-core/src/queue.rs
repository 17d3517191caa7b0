//! Task queue - dependency-aware admission and parallelism control.
//!
//! Admission is a pure function over the task list and the live executing
//! set, evaluated by the orchestrator whenever the set of completed tasks
//! changes, a task finishes, or `resume` is called.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::WorkflowError;
use crate::types::{Task, TaskId, TaskStatus};

/// Validate a task graph at team construction time.
///
/// Rejects unknown dependency references, duplicate task ids and cyclic
/// dependency graphs with a `Configuration` error.
pub fn validate_dependencies(tasks: &[Task]) -> Result<(), WorkflowError> {
    let mut ids = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if !ids.insert(task.id.as_str()) {
            return Err(WorkflowError::Configuration(format!(
                "duplicate task id '{}'",
                task.id
            )));
        }
    }

    for task in tasks {
        for dep in &task.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(WorkflowError::Configuration(format!(
                    "task '{}' depends on unknown task '{}'",
                    task.id, dep
                )));
            }
            if dep == &task.id {
                return Err(WorkflowError::Configuration(format!(
                    "task '{}' depends on itself",
                    task.id
                )));
            }
        }
    }

    detect_cycle(tasks)
}

/// Kahn's algorithm over the dependency graph.
fn detect_cycle(tasks: &[Task]) -> Result<(), WorkflowError> {
    let mut in_degree: HashMap<&str, usize> = tasks
        .iter()
        .map(|t| (t.id.as_str(), t.dependencies.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in tasks {
        for dep in &task.dependencies {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(task.id.as_str());
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0usize;

    while let Some(id) = ready.pop() {
        visited += 1;
        for &dependent in dependents.get(id).into_iter().flatten() {
            let degree = in_degree
                .get_mut(dependent)
                .ok_or_else(|| WorkflowError::Configuration("inconsistent task graph".into()))?;
            *degree -= 1;
            if *degree == 0 {
                ready.push(dependent);
            }
        }
    }

    if visited != tasks.len() {
        let cyclic: Vec<&str> = tasks
            .iter()
            .filter(|t| in_degree.get(t.id.as_str()).copied().unwrap_or(0) > 0)
            .map(|t| t.id.as_str())
            .collect();
        return Err(WorkflowError::Configuration(format!(
            "cyclic task dependencies involving: {}",
            cyclic.join(", ")
        )));
    }
    Ok(())
}

/// Compute the next batch of admissible tasks.
///
/// Candidates are `Todo` tasks whose dependencies are all `Done`, in
/// declaration order. With nothing executing, the first candidate is
/// admitted; if it opts into parallel execution, so does every other
/// parallel candidate. With work in flight, only parallel candidates are
/// admitted; a sequential candidate never joins running work.
pub fn next_batch(tasks: &[Task], executing: &BTreeSet<TaskId>) -> Vec<TaskId> {
    let done: HashSet<&str> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Done)
        .map(|t| t.id.as_str())
        .collect();

    let candidates: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Todo)
        .filter(|t| t.dependencies.iter().all(|d| done.contains(d.as_str())))
        .collect();

    if candidates.is_empty() {
        return Vec::new();
    }

    if executing.is_empty() {
        let first = candidates[0];
        if !first.allow_parallel_execution {
            return vec![first.id.clone()];
        }
        return candidates
            .iter()
            .filter(|t| t.allow_parallel_execution)
            .map(|t| t.id.clone())
            .collect();
    }

    candidates
        .iter()
        .filter(|t| t.allow_parallel_execution && !executing.contains(&t.id))
        .map(|t| t.id.clone())
        .collect()
}
