//! Dependency graph over [`ServiceDefinition::depends_on`].
//!
//! Ordering is deterministic: among services whose dependencies are all
//! placed, the one declared first goes next (Kahn's algorithm with a
//! declaration-order priority queue). The same order drives `apply`; its
//! reverse drives teardown.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::StackError;
use crate::types::{ServiceDefinition, ServiceName, StackManifest};

#[derive(Debug, Clone, Default)]
pub struct DeploymentGraph {
    services: Vec<ServiceDefinition>,
    index: HashMap<ServiceName, usize>,
}

impl DeploymentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one service. Every `depends_on` entry must name a service added earlier.
    pub fn add(&mut self, service: ServiceDefinition) -> Result<(), StackError> {
        if self.index.contains_key(&service.name) {
            return Err(StackError::DuplicateService(service.name));
        }
        if let Some(missing) = service
            .depends_on
            .iter()
            .find(|dep| !self.index.contains_key(*dep))
        {
            return Err(StackError::UnknownDependency {
                service: service.name.clone(),
                dependency: missing.clone(),
            });
        }
        self.push(service);
        Ok(())
    }

    /// Build from simultaneously-declared services: dependencies may point
    /// anywhere in the batch. Cycles are *not* rejected here; see
    /// [`DeploymentGraph::topological_order`].
    pub fn from_services(
        services: impl IntoIterator<Item = ServiceDefinition>,
    ) -> Result<Self, StackError> {
        let mut graph = Self::new();
        for service in services {
            if graph.index.contains_key(&service.name) {
                return Err(StackError::DuplicateService(service.name));
            }
            graph.push(service);
        }
        for service in &graph.services {
            if let Some(missing) = service
                .depends_on
                .iter()
                .find(|dep| !graph.index.contains_key(*dep))
            {
                return Err(StackError::UnknownDependency {
                    service: service.name.clone(),
                    dependency: missing.clone(),
                });
            }
        }
        Ok(graph)
    }

    /// Build the graph for a manifest, rejecting cycles at load time.
    pub fn from_manifest(manifest: &StackManifest) -> Result<Self, StackError> {
        let graph = Self::from_services(manifest.services.iter().cloned())?;
        graph.topological_order()?;
        Ok(graph)
    }

    fn push(&mut self, service: ServiceDefinition) {
        self.index.insert(service.name.clone(), self.services.len());
        self.services.push(service);
    }

    /// Services in declaration order.
    pub fn services(&self) -> &[ServiceDefinition] {
        &self.services
    }

    pub fn get(&self, name: &ServiceName) -> Option<&ServiceDefinition> {
        self.index.get(name).map(|&i| &self.services[i])
    }

    pub fn contains(&self, name: &ServiceName) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Deterministic start order, or `StackError::Cycle`.
    pub fn topological_order(&self) -> Result<Vec<&ServiceDefinition>, StackError> {
        let n = self.services.len();
        let deps: Vec<HashSet<usize>> = self
            .services
            .iter()
            .map(|s| s.depends_on.iter().filter_map(|d| self.index.get(d).copied()).collect())
            .collect();

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, set) in deps.iter().enumerate() {
            for &d in set {
                dependents[d].push(i);
            }
        }

        let mut remaining: Vec<usize> = deps.iter().map(HashSet::len).collect();
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &dependent in &dependents[next] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < n {
            let placed: HashSet<usize> = order.iter().copied().collect();
            return Err(StackError::Cycle {
                services: self.find_cycle(&deps, &placed),
            });
        }

        Ok(order.into_iter().map(|i| &self.services[i]).collect())
    }

    /// Reverse of [`DeploymentGraph::topological_order`]: dependents first.
    pub fn teardown_order(&self) -> Result<Vec<&ServiceDefinition>, StackError> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }

    /// Transitive dependents of `name`, in start order.
    pub fn dependents_of(&self, name: &ServiceName) -> Result<Vec<ServiceName>, StackError> {
        if !self.contains(name) {
            return Err(StackError::UnknownService(name.clone()));
        }
        let mut affected: HashSet<&ServiceName> = HashSet::from([name]);
        let mut result = Vec::new();
        for service in self.topological_order()? {
            if service.depends_on.iter().any(|d| affected.contains(d)) {
                affected.insert(&service.name);
                result.push(service.name.clone());
            }
        }
        Ok(result)
    }

    /// Walk unplaced nodes along dependency edges until one repeats.
    fn find_cycle(&self, deps: &[HashSet<usize>], placed: &HashSet<usize>) -> Vec<ServiceName> {
        let Some(start) = (0..self.services.len()).find(|i| !placed.contains(i)) else {
            return vec![];
        };
        let mut path = vec![start];
        let mut current = start;
        loop {
            // Every unplaced node still waits on at least one unplaced dependency.
            let mut candidates: Vec<usize> = deps[current]
                .iter()
                .copied()
                .filter(|d| !placed.contains(d))
                .collect();
            candidates.sort_unstable();
            let Some(&next) = candidates.first() else {
                break;
            };
            if let Some(pos) = path.iter().position(|&p| p == next) {
                return path[pos..]
                    .iter()
                    .map(|&i| self.services[i].name.clone())
                    .collect();
            }
            path.push(next);
            current = next;
        }
        path.into_iter()
            .map(|i| self.services[i].name.clone())
            .collect()
    }
}
