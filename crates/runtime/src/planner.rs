//! Per-call loop selection.

use crate::control::ControlState;
use loopforge_kernels::elementwise::{DynLoopKernel, LoopVariant};
use loopforge_kernels::registry::LoopEntry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Loops over at most this many elements always run on the calling
    /// thread.
    pub parallel_threshold: usize,
    /// Smallest partition worth handing to a worker.
    pub min_partition_elements: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: 65_536,
            min_partition_elements: 4_096,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionRoute {
    Direct,
    Parallel { partitions: usize },
}

impl ExecutionRoute {
    pub fn partitions(&self) -> usize {
        match self {
            ExecutionRoute::Direct => 1,
            ExecutionRoute::Parallel { partitions } => *partitions,
        }
    }
}

pub struct LoopPlan {
    pub kernel: DynLoopKernel,
    pub variant: LoopVariant,
    pub route: ExecutionRoute,
}

#[derive(Debug, Clone, Default)]
pub struct LoopPlanner {
    config: PlannerConfig,
}

impl LoopPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> PlannerConfig {
        self.config
    }

    /// Picks the implementation and route for one call. The host loop runs
    /// directly whenever the master or atop flag is off; otherwise the
    /// optimized loop is preferred and large threadable calls are split
    /// across the workers.
    pub fn plan(&self, entry: &LoopEntry, state: &ControlState, elements: usize) -> LoopPlan {
        if !state.master_enabled || !state.atop_enabled {
            return LoopPlan {
                kernel: Arc::clone(&entry.original),
                variant: LoopVariant::Original,
                route: ExecutionRoute::Direct,
            };
        }
        let kernel = entry
            .optimized
            .as_ref()
            .map_or_else(|| Arc::clone(&entry.original), Arc::clone);
        let variant = kernel.variant();
        let route = if entry.threadable {
            self.route(state, elements)
        } else {
            ExecutionRoute::Direct
        };
        LoopPlan {
            kernel,
            variant,
            route,
        }
    }

    /// Route for `elements` of independent work under `state`.
    pub fn route(&self, state: &ControlState, elements: usize) -> ExecutionRoute {
        if !state.master_enabled
            || !state.thread_enabled
            || state.worker_count <= 1
            || elements <= self.config.parallel_threshold
        {
            return ExecutionRoute::Direct;
        }
        let by_size = elements.div_ceil(self.config.min_partition_elements.max(1));
        let partitions = state.worker_count.min(by_size);
        if partitions > 1 {
            ExecutionRoute::Parallel { partitions }
        } else {
            ExecutionRoute::Direct
        }
    }
}
