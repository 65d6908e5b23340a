//! Runtime-mutable control state.
//!
//! The state is one immutable [`ControlState`] value behind an [`ArcSwap`];
//! writers publish a whole new value and readers take a snapshot, so a
//! dispatch never observes a half-applied update.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlState {
    pub master_enabled: bool,
    pub atop_enabled: bool,
    pub thread_enabled: bool,
    pub ledger_enabled: bool,
    pub recycler_enabled: bool,
    pub worker_count: usize,
}

impl Default for ControlState {
    /// Everything off with a single worker: the state before initialization.
    fn default() -> Self {
        Self {
            master_enabled: false,
            atop_enabled: false,
            thread_enabled: false,
            ledger_enabled: false,
            recycler_enabled: false,
            worker_count: 1,
        }
    }
}

impl ControlState {
    /// State installed by initialization: optimized and threaded loops on,
    /// instrumentation and recycling off.
    pub fn initialized(worker_count: usize) -> Self {
        Self {
            master_enabled: true,
            atop_enabled: true,
            thread_enabled: true,
            ledger_enabled: false,
            recycler_enabled: false,
            worker_count: worker_count.max(1),
        }
    }

    pub fn flag(&self, toggle: Toggle) -> bool {
        match toggle {
            Toggle::Master => self.master_enabled,
            Toggle::Atop => self.atop_enabled,
            Toggle::Thread => self.thread_enabled,
            Toggle::Ledger => self.ledger_enabled,
            Toggle::Recycler => self.recycler_enabled,
        }
    }

    pub fn with_flag(mut self, toggle: Toggle, value: bool) -> Self {
        match toggle {
            Toggle::Master => self.master_enabled = value,
            Toggle::Atop => self.atop_enabled = value,
            Toggle::Thread => self.thread_enabled = value,
            Toggle::Ledger => self.ledger_enabled = value,
            Toggle::Recycler => self.recycler_enabled = value,
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Toggle {
    Master,
    Atop,
    Thread,
    Ledger,
    Recycler,
}

impl Toggle {
    pub const ALL: [Toggle; 5] = [
        Toggle::Master,
        Toggle::Atop,
        Toggle::Thread,
        Toggle::Ledger,
        Toggle::Recycler,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Toggle::Master => "master",
            Toggle::Atop => "atop",
            Toggle::Thread => "thread",
            Toggle::Ledger => "ledger",
            Toggle::Recycler => "recycler",
        }
    }
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct ControlPanel {
    state: ArcSwap<ControlState>,
}

impl ControlPanel {
    pub fn new(initial: ControlState) -> Self {
        Self {
            state: ArcSwap::from_pointee(initial),
        }
    }

    pub fn snapshot(&self) -> ControlState {
        **self.state.load()
    }

    /// Sets a flag and returns its previous value.
    pub fn set(&self, toggle: Toggle, value: bool) -> bool {
        let previous = self
            .state
            .rcu(|current| Arc::new(current.with_flag(toggle, value)));
        let was = previous.flag(toggle);
        if was != value {
            debug!(toggle = toggle.name(), enabled = value, "control flag changed");
        }
        was
    }

    pub fn enable(&self, toggle: Toggle) -> bool {
        self.set(toggle, true)
    }

    pub fn disable(&self, toggle: Toggle) -> bool {
        self.set(toggle, false)
    }

    pub fn is_enabled(&self, toggle: Toggle) -> bool {
        self.state.load().flag(toggle)
    }

    pub fn worker_count(&self) -> usize {
        self.state.load().worker_count
    }

    /// Sets the worker count, clamping requests below one, and returns the
    /// previous count.
    pub fn set_workers(&self, requested: i64) -> usize {
        let workers = if requested < 1 {
            warn!(requested, "worker count below 1, clamping to 1");
            1
        } else {
            usize::try_from(requested).unwrap_or(usize::MAX)
        };
        let previous = self.state.rcu(|current| {
            Arc::new(ControlState {
                worker_count: workers,
                ..**current
            })
        });
        debug!(workers, previous = previous.worker_count, "worker count changed");
        previous.worker_count
    }

    /// Publishes a whole new state and returns the previous one.
    pub fn replace(&self, mut state: ControlState) -> ControlState {
        state.worker_count = state.worker_count.max(1);
        *self.state.swap(Arc::new(state))
    }
}

impl Default for ControlPanel {
    fn default() -> Self {
        Self::new(ControlState::default())
    }
}

impl fmt::Debug for ControlPanel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ControlPanel").field(&self.snapshot()).finish()
    }
}
