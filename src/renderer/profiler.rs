//! GPU timestamp profiling over a three-slot query ring.
//!
//! Each frame slot owns a disjoint query plus an ordered timeline of named
//! timestamp events whose backing queries are created lazily on first use.
//! Results are polled, never awaited: a slot is processed once its disjoint
//! query resolves (typically two frames behind), and a disjoint window
//! discards that slot's deltas without touching other slots.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::gpu::RenderDevice;
use crate::handles::QueryId;

const FRAME_SLOTS: usize = 3;
const FRAME_BEGIN_EVENT: &str = "<frame.begin>";
const FRAME_END_EVENT: &str = "<frame.end>";

#[derive(Clone, Copy, Debug)]
pub struct GpuTimingSummary<'a> {
    pub name: &'a str,
    pub last_ms: f32,
    pub average_ms: f32,
    pub max_ms: f32,
    pub samples: u64,
}

/// Rolling per-event history: a fixed ring of recent samples plus a cached
/// running average refreshed on an interval so displayed numbers hold still.
pub(crate) struct EventHistory {
    samples: Vec<f32>,
    cursor: usize,
    last_ms: f32,
    max_ms: f32,
    total_samples: u64,
    average_ms: f32,
    last_refresh: Instant,
    capacity: usize,
}

impl EventHistory {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity.max(1)),
            cursor: 0,
            last_ms: 0.0,
            max_ms: 0.0,
            total_samples: 0,
            average_ms: 0.0,
            last_refresh: Instant::now(),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn push(&mut self, sample_ms: f32) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample_ms);
        } else {
            self.samples[self.cursor] = sample_ms;
        }
        self.cursor = (self.cursor + 1) % self.capacity;
        self.last_ms = sample_ms;
        self.max_ms = self.max_ms.max(sample_ms);
        self.total_samples += 1;
    }

    pub(crate) fn rolling_average(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }

    fn maybe_refresh(&mut self, interval: Duration) {
        if self.last_refresh.elapsed() >= interval {
            self.average_ms = self.rolling_average();
            self.last_refresh = Instant::now();
        }
    }
}

struct TimelineEvent {
    name: String,
    query: QueryId,
    stamped: bool,
}

struct FrameSlot {
    disjoint: QueryId,
    events: Vec<TimelineEvent>,
    event_lookup: HashMap<String, usize>,
    open: bool,
}

impl FrameSlot {
    fn new() -> Self {
        Self { disjoint: QueryId::INVALID, events: Vec::new(), event_lookup: HashMap::new(), open: false }
    }
}

pub struct GpuProfiler {
    slots: Vec<FrameSlot>,
    cursor: usize,
    pending: VecDeque<usize>,
    histories: HashMap<String, EventHistory>,
    history_len: usize,
    refresh_interval: Duration,
}

impl GpuProfiler {
    pub fn new(history_len: usize, refresh_interval: Duration) -> Self {
        Self {
            slots: (0..FRAME_SLOTS).map(|_| FrameSlot::new()).collect(),
            cursor: 0,
            pending: VecDeque::new(),
            histories: HashMap::new(),
            history_len: history_len.max(1),
            refresh_interval,
        }
    }

    pub fn begin_frame(&mut self, device: &mut dyn RenderDevice) {
        // Reusing a slot whose results never resolved drops that frame's data.
        let cursor = self.cursor;
        self.pending.retain(|slot| *slot != cursor);
        let slot = &mut self.slots[self.cursor];
        if !slot.disjoint.is_valid() {
            slot.disjoint = device.create_disjoint_query();
        }
        for event in &mut slot.events {
            event.stamped = false;
        }
        slot.open = true;
        device.begin_disjoint_query(slot.disjoint);
        self.stamp(device, FRAME_BEGIN_EVENT);
    }

    /// Records a named timestamp into the current slot's timeline, creating
    /// the backing query on the event's first use.
    pub fn time_stamp(&mut self, device: &mut dyn RenderDevice, name: &str) {
        if self.slots[self.cursor].open {
            self.stamp(device, name);
        }
    }

    fn stamp(&mut self, device: &mut dyn RenderDevice, name: &str) {
        let slot = &mut self.slots[self.cursor];
        let index = match slot.event_lookup.get(name) {
            Some(&index) => index,
            None => {
                let query = device.create_timestamp_query();
                slot.events.push(TimelineEvent { name: name.to_string(), query, stamped: false });
                let index = slot.events.len() - 1;
                slot.event_lookup.insert(name.to_string(), index);
                index
            }
        };
        let event = &mut slot.events[index];
        event.stamped = true;
        device.write_timestamp(event.query);
    }

    pub fn end_frame(&mut self, device: &mut dyn RenderDevice) {
        if !self.slots[self.cursor].open {
            return;
        }
        self.stamp(device, FRAME_END_EVENT);
        let slot = &mut self.slots[self.cursor];
        device.end_disjoint_query(slot.disjoint);
        slot.open = false;
        self.pending.push_back(self.cursor);
        self.cursor = (self.cursor + 1) % self.slots.len();
    }

    /// Polls pending slots oldest-first, computing per-event deltas between
    /// consecutive stamped timestamps in timeline order. Stops at the first
    /// slot whose results are not ready yet.
    pub fn update_event_data(&mut self, device: &mut dyn RenderDevice) {
        while let Some(&slot_index) = self.pending.front() {
            let slot = &self.slots[slot_index];
            let Some(disjoint) = device.disjoint_result(slot.disjoint) else {
                break;
            };
            self.pending.pop_front();
            if disjoint.disjoint || disjoint.frequency == 0 {
                log::debug!("gpu timing window disjoint, dropping one frame of samples");
                continue;
            }
            let to_ms = 1000.0 / disjoint.frequency as f64;
            let mut previous: Option<u64> = None;
            for event in &slot.events {
                if !event.stamped {
                    continue;
                }
                let Some(ticks) = device.timestamp_result(event.query) else {
                    previous = None;
                    continue;
                };
                if let Some(prev_ticks) = previous {
                    if event.name != FRAME_BEGIN_EVENT && event.name != FRAME_END_EVENT {
                        let delta_ms = (ticks.saturating_sub(prev_ticks)) as f64 * to_ms;
                        self.histories
                            .entry(event.name.clone())
                            .or_insert_with(|| EventHistory::new(self.history_len))
                            .push(delta_ms as f32);
                    }
                }
                previous = Some(ticks);
            }
        }
        for history in self.histories.values_mut() {
            history.maybe_refresh(self.refresh_interval);
        }
    }

    pub fn summaries(&self) -> Vec<GpuTimingSummary<'_>> {
        let mut out: Vec<GpuTimingSummary<'_>> = self
            .histories
            .iter()
            .map(|(name, history)| GpuTimingSummary {
                name,
                last_ms: history.last_ms,
                average_ms: history.average_ms,
                max_ms: history.max_ms,
                samples: history.total_samples,
            })
            .collect();
        out.sort_by(|a, b| b.last_ms.partial_cmp(&a.last_ms).unwrap_or(std::cmp::Ordering::Equal));
        out
    }
}
