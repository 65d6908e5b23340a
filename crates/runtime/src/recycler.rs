//! Reusable scratch and output buffers.
//!
//! Buffers are pooled per size class: element type plus a power-of-two
//! element capacity. A checked-out buffer is owned by its
//! [`RecycledBuffer`] handle and goes back to its class when the handle is
//! dropped; it is not zeroed on the way back.

use crate::control::{ControlPanel, Toggle};
use loopforge_kernels::config::DataType;
use loopforge_kernels::error::{LoopError, Result};
use loopforge_kernels::operand::{Element, Operand, OperandBuf, OperandMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecyclerConfig {
    /// Smallest class size; smaller requests are rounded up to it.
    pub min_class_bytes: usize,
    /// Upper bound on bytes held idle in the pool.
    pub max_pooled_bytes: usize,
    pub max_buffers_per_class: usize,
    /// Idle buffers older than this are freed, either by an explicit
    /// compaction or on the next acquire or release.
    pub max_idle_ms: u64,
}

impl RecyclerConfig {
    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }
}

impl Default for RecyclerConfig {
    fn default() -> Self {
        Self {
            min_class_bytes: 256,
            max_pooled_bytes: 256 * 1024 * 1024,
            max_buffers_per_class: 16,
            max_idle_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SizeClass {
    pub dtype: DataType,
    pub capacity: usize,
}

impl SizeClass {
    pub fn for_request(dtype: DataType, len: usize, min_class_bytes: usize) -> Self {
        let element = dtype.element_size_bytes();
        let minimum = (min_class_bytes / element).max(1);
        let capacity = len.max(minimum).checked_next_power_of_two().unwrap_or(len);
        Self { dtype, capacity }
    }

    pub fn size_bytes(&self) -> usize {
        self.capacity.saturating_mul(self.dtype.element_size_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeClassInfo {
    pub dtype: DataType,
    pub capacity: usize,
    pub size_bytes: usize,
    pub pooled: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecyclerInfo {
    pub enabled: bool,
    pub pooled_buffers: usize,
    pub pooled_bytes: usize,
    pub checked_out: usize,
    pub hits: u64,
    pub misses: u64,
    pub releases: u64,
    pub frees: u64,
    pub compactions: u64,
    pub classes: Vec<SizeClassInfo>,
}

struct IdleBuffer {
    buf: OperandBuf,
    returned_at: Instant,
}

struct RecyclerState {
    classes: HashMap<SizeClass, Vec<IdleBuffer>>,
    /// Recycler flag as last observed from the control panel.
    pooling: bool,
    last_compaction: Instant,
    pooled_bytes: usize,
    checked_out: usize,
    hits: u64,
    misses: u64,
    releases: u64,
    frees: u64,
    compactions: u64,
}

impl RecyclerState {
    fn new() -> Self {
        Self {
            classes: HashMap::new(),
            pooling: false,
            last_compaction: Instant::now(),
            pooled_bytes: 0,
            checked_out: 0,
            hits: 0,
            misses: 0,
            releases: 0,
            frees: 0,
            compactions: 0,
        }
    }

    fn pooled_buffers(&self) -> usize {
        self.classes.values().map(Vec::len).sum()
    }

    fn drop_idle(&mut self, class: SizeClass, count: usize) -> usize {
        let Some(idle) = self.classes.get_mut(&class) else {
            return 0;
        };
        let count = count.min(idle.len());
        // Oldest buffers sit at the front.
        idle.drain(..count);
        if idle.is_empty() {
            self.classes.remove(&class);
        }
        let bytes = class.size_bytes() * count;
        self.pooled_bytes = self.pooled_bytes.saturating_sub(bytes);
        self.frees += count as u64;
        count
    }

    fn purge(&mut self) -> usize {
        let classes: Vec<SizeClass> = self.classes.keys().copied().collect();
        classes
            .into_iter()
            .map(|class| self.drop_idle(class, usize::MAX))
            .sum()
    }

    /// Records the current flag; idle buffers are freed when pooling has
    /// been switched off since the last observation.
    fn observe(&mut self, pooling: bool) {
        if self.pooling && !pooling {
            let freed = self.purge();
            debug!(freed, "recycler disabled, idle buffers freed");
        }
        self.pooling = pooling;
    }

    fn oldest_idle(&self) -> Option<Instant> {
        self.classes
            .values()
            .filter_map(|idle| idle.first().map(|buffer| buffer.returned_at))
            .min()
    }

    /// Frees expired and over-cap buffers, oldest first.
    fn compact(&mut self, config: &RecyclerConfig, now: Instant) -> usize {
        let max_idle = config.max_idle();
        let mut freed = 0;

        let mut classes: Vec<SizeClass> = self.classes.keys().copied().collect();
        classes.sort();
        for class in &classes {
            let Some(idle) = self.classes.get(class) else {
                continue;
            };
            let expired = idle
                .iter()
                .take_while(|buffer| now.saturating_duration_since(buffer.returned_at) > max_idle)
                .count();
            let over_cap = idle.len().saturating_sub(expired + config.max_buffers_per_class);
            freed += self.drop_idle(*class, expired + over_cap);
        }

        // Largest classes go first when the byte cap is exceeded.
        classes.sort_by_key(|class| std::cmp::Reverse(class.size_bytes()));
        for class in &classes {
            while self.pooled_bytes > config.max_pooled_bytes {
                if self.drop_idle(*class, 1) == 0 {
                    break;
                }
                freed += 1;
            }
        }

        self.compactions += 1;
        self.last_compaction = now;
        freed
    }

    /// Compacts when the oldest idle buffer has outlived the idle limit,
    /// scanning at most once per idle period.
    fn expire(&mut self, config: &RecyclerConfig, now: Instant) {
        let max_idle = config.max_idle();
        if now.saturating_duration_since(self.last_compaction) < max_idle {
            return;
        }
        let expired = self
            .oldest_idle()
            .is_some_and(|oldest| now.saturating_duration_since(oldest) > max_idle);
        if expired {
            let freed = self.compact(config, now);
            debug!(freed, pooled_bytes = self.pooled_bytes, "expired buffers freed");
        } else {
            self.last_compaction = now;
        }
    }
}

struct RecyclerInner {
    config: RecyclerConfig,
    control: Arc<ControlPanel>,
    state: Mutex<RecyclerState>,
}

impl RecyclerInner {
    fn pooling(&self) -> bool {
        self.control.is_enabled(Toggle::Recycler)
    }

    fn check_in(&self, class: SizeClass, buf: OperandBuf) {
        let pooling = self.pooling();
        let now = Instant::now();
        let mut state = self.state.lock();
        state.observe(pooling);
        state.checked_out = state.checked_out.saturating_sub(1);
        state.releases += 1;

        let bytes = class.size_bytes();
        let class_len = state.classes.get(&class).map_or(0, Vec::len);
        let keep = pooling
            && class_len < self.config.max_buffers_per_class
            && state.pooled_bytes + bytes <= self.config.max_pooled_bytes;
        if !keep {
            state.frees += 1;
            trace!(dtype = %class.dtype, capacity = class.capacity, "buffer freed on release");
        } else {
            state.pooled_bytes += bytes;
            state.classes.entry(class).or_default().push(IdleBuffer { buf, returned_at: now });
        }
        state.expire(&self.config, now);
    }
}

/// Pool of reusable buffers. Cloning yields another handle to the same pool.
///
/// Pooling follows the recycler flag of the shared [`ControlPanel`]; the
/// recycler keeps no flag of its own.
#[derive(Clone)]
pub struct Recycler {
    inner: Arc<RecyclerInner>,
}

impl Recycler {
    pub fn new(config: RecyclerConfig, control: Arc<ControlPanel>) -> Self {
        Self {
            inner: Arc::new(RecyclerInner {
                config,
                control,
                state: Mutex::new(RecyclerState::new()),
            }),
        }
    }

    pub fn config(&self) -> RecyclerConfig {
        self.inner.config
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.pooling()
    }

    /// Applies the current recycler flag: idle buffers are freed if pooling
    /// was switched off. Returns the number of pooled buffers left.
    pub fn refresh(&self) -> usize {
        let pooling = self.inner.pooling();
        let mut state = self.inner.state.lock();
        state.observe(pooling);
        state.pooled_buffers()
    }

    /// Checks out a buffer holding at least `len` elements of `dtype`,
    /// following the control panel's recycler flag.
    pub fn acquire(&self, dtype: DataType, len: usize) -> Result<RecycledBuffer> {
        self.acquire_with(self.inner.pooling(), dtype, len)
    }

    /// As [`acquire`](Self::acquire), with the flag taken from a control
    /// snapshot the caller already holds. Without pooling the buffer is
    /// freshly allocated and freed again on release.
    pub fn acquire_with(&self, pooling: bool, dtype: DataType, len: usize) -> Result<RecycledBuffer> {
        let class = SizeClass::for_request(dtype, len, self.inner.config.min_class_bytes);
        let now = Instant::now();

        let pooled = {
            let mut state = self.inner.state.lock();
            state.observe(pooling);
            if !pooling {
                drop(state);
                return RecycledBuffer::fresh(dtype, len);
            }
            state.expire(&self.inner.config, now);
            let reused = state.classes.get_mut(&class).and_then(Vec::pop);
            if let Some(idle) = &reused {
                state.pooled_bytes = state.pooled_bytes.saturating_sub(class.size_bytes());
                state.hits += 1;
                if state.classes.get(&class).is_some_and(Vec::is_empty) {
                    state.classes.remove(&class);
                }
                trace!(dtype = %dtype, capacity = idle.buf.len(), "recycled buffer reused");
            } else {
                state.misses += 1;
            }
            state.checked_out += 1;
            reused
        };

        let buf = match pooled {
            Some(idle) => idle.buf,
            None => match OperandBuf::try_zeros(dtype, class.capacity) {
                Ok(buf) => buf,
                Err(err) => {
                    let mut state = self.inner.state.lock();
                    state.checked_out = state.checked_out.saturating_sub(1);
                    return Err(LoopError::ResourceExhaustion(format!(
                        "recycler could not allocate {} bytes: {err}",
                        class.size_bytes()
                    )));
                }
            },
        };

        Ok(RecycledBuffer {
            buf,
            len,
            class,
            home: Arc::downgrade(&self.inner),
        })
    }

    /// Frees idle buffers older than the idle limit, then trims classes and
    /// the pool to their caps, oldest first. Returns the number freed.
    pub fn compact(&self) -> usize {
        let mut state = self.inner.state.lock();
        let freed = state.compact(&self.inner.config, Instant::now());
        debug!(freed, pooled_bytes = state.pooled_bytes, "recycler compacted");
        freed
    }

    /// Frees every idle buffer.
    pub fn purge(&self) -> usize {
        let freed = self.inner.state.lock().purge();
        debug!(freed, "recycler purged");
        freed
    }

    pub fn info(&self) -> RecyclerInfo {
        let pooling = self.inner.pooling();
        let mut state = self.inner.state.lock();
        state.observe(pooling);
        let mut classes: Vec<SizeClassInfo> = state
            .classes
            .iter()
            .map(|(class, idle)| SizeClassInfo {
                dtype: class.dtype,
                capacity: class.capacity,
                size_bytes: class.size_bytes(),
                pooled: idle.len(),
            })
            .collect();
        classes.sort_by_key(|info| (info.dtype, info.capacity));
        RecyclerInfo {
            enabled: pooling,
            pooled_buffers: state.pooled_buffers(),
            pooled_bytes: state.pooled_bytes,
            checked_out: state.checked_out,
            hits: state.hits,
            misses: state.misses,
            releases: state.releases,
            frees: state.frees,
            compactions: state.compactions,
            classes,
        }
    }
}

/// Exclusive handle to a buffer of `len` elements.
pub struct RecycledBuffer {
    buf: OperandBuf,
    len: usize,
    class: SizeClass,
    home: Weak<RecyclerInner>,
}

impl RecycledBuffer {
    /// A buffer outside any pool, freed on drop.
    pub fn fresh(dtype: DataType, len: usize) -> Result<Self> {
        let buf = OperandBuf::try_zeros(dtype, len).map_err(|err| {
            LoopError::ResourceExhaustion(format!(
                "could not allocate {} bytes: {err}",
                len.saturating_mul(dtype.element_size_bytes())
            ))
        })?;
        Ok(Self::unpooled(buf))
    }

    pub fn unpooled(buf: OperandBuf) -> Self {
        let class = SizeClass {
            dtype: buf.dtype(),
            capacity: buf.len(),
        };
        Self {
            len: buf.len(),
            buf,
            class,
            home: Weak::new(),
        }
    }

    pub fn dtype(&self) -> DataType {
        self.class.dtype
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes of backing storage, which may exceed `len` elements.
    pub fn size_bytes(&self) -> usize {
        self.class.size_bytes()
    }

    pub fn is_pooled(&self) -> bool {
        self.home.strong_count() > 0
    }

    pub fn as_operand(&self) -> Operand<'_> {
        self.buf.as_operand().slice(0..self.len)
    }

    pub fn as_operand_mut(&mut self) -> OperandMut<'_> {
        self.buf.as_operand_mut().split_at(self.len).0
    }

    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::from_operand(self.as_operand())
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> Option<&mut [T]> {
        T::from_operand_mut(self.as_operand_mut())
    }

    /// Copies the live elements into an owned buffer.
    pub fn to_buf(&self) -> OperandBuf {
        self.as_operand().to_buf()
    }

    /// Detaches the storage from the pool, truncated to `len` elements.
    pub fn into_buf(mut self) -> OperandBuf {
        let mut buf = std::mem::take(&mut self.buf);
        buf.truncate(self.len);
        if let Some(inner) = std::mem::take(&mut self.home).upgrade() {
            let mut state = inner.state.lock();
            state.checked_out = state.checked_out.saturating_sub(1);
        }
        buf
    }
}

impl Drop for RecycledBuffer {
    fn drop(&mut self) {
        if let Some(inner) = self.home.upgrade() {
            inner.check_in(self.class, std::mem::take(&mut self.buf));
        }
    }
}

impl std::fmt::Debug for RecycledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecycledBuffer")
            .field("dtype", &self.class.dtype)
            .field("len", &self.len)
            .field("capacity", &self.class.capacity)
            .field("pooled", &self.is_pooled())
            .finish()
    }
}
