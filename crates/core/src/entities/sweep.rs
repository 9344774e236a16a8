//! Marker-based entity removal
//!
//! A pass runs in two phases. The traversal only collects: every entity
//! whose name contains a marker (ASCII case-insensitive) goes on a death
//! row. Once the traversal has returned, each death-row entry is checked
//! again and, if its memory is still readable, removed immediately.
//!
//! The check and the removal are not atomic; an entry freed by the game in
//! between is still a use-after-free. The check only makes it unlikely.

use crate::config::SweepConfig;

use super::{EntityDestroyer, EntityHandle, EntityList, PointerValidator, VisitedEntity};

/// Counts ticks and fires once every `interval`
///
/// With an interval of 60 the timer fires on ticks 60, 120, 180 and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepTimer {
    interval: u32,
    counter: u32,
}

impl SweepTimer {
    /// Interval 0 is treated as 1 (every tick)
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            counter: 0,
        }
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Advance one tick, returning true if the sweep is due
    pub fn tick(&mut self) -> bool {
        self.counter += 1;
        if self.counter >= self.interval {
            self.counter = 0;
            true
        } else {
            false
        }
    }
}

/// Outcome of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entities put on the death row
    pub collected: usize,
    /// Removal requests issued
    pub removed: usize,
    /// Death-row entries dropped because their memory was no longer valid
    pub skipped: usize,
}

/// Removes every live entity whose name matches a marker
pub struct EntitySweep {
    markers: Vec<Vec<u8>>,
    timer: SweepTimer,
    instance_size: usize,
    list: Box<dyn EntityList>,
    destroyer: Box<dyn EntityDestroyer>,
    validator: Box<dyn PointerValidator>,
    total_removed: u64,
}

impl EntitySweep {
    pub fn new(
        config: &SweepConfig,
        instance_size: usize,
        list: Box<dyn EntityList>,
        destroyer: Box<dyn EntityDestroyer>,
        validator: Box<dyn PointerValidator>,
    ) -> Self {
        let markers = config
            .markers
            .iter()
            .map(|marker| marker.trim().to_ascii_lowercase().into_bytes())
            .filter(|marker| !marker.is_empty())
            .collect();

        Self {
            markers,
            timer: SweepTimer::new(config.interval_ticks),
            instance_size,
            list,
            destroyer,
            validator,
            total_removed: 0,
        }
    }

    pub fn interval(&self) -> u32 {
        self.timer.interval()
    }

    /// Removal requests issued since creation
    pub fn total_removed(&self) -> u64 {
        self.total_removed
    }

    /// Advance one game tick, running a pass when the timer fires
    pub fn tick(&mut self) -> Option<SweepReport> {
        self.timer.tick().then(|| self.run())
    }

    /// Run one collect-then-destroy pass now
    pub fn run(&mut self) -> SweepReport {
        let death_row = self.collect();
        let mut report = SweepReport {
            collected: death_row.len(),
            ..SweepReport::default()
        };

        for (handle, name) in death_row {
            if !self.validator.is_valid(handle, self.instance_size) {
                tracing::debug!("Skipping {} ({}): no longer readable", name, handle);
                report.skipped += 1;
                continue;
            }

            tracing::info!("!!! Deleting Enemy: {}", name);
            self.destroyer.destroy(handle, 0, false);
            report.removed += 1;
        }

        self.total_removed += report.removed as u64;
        report
    }

    /// First phase: traverse and stage, never mutate
    fn collect(&self) -> Vec<(EntityHandle, String)> {
        let mut death_row = Vec::new();

        self.list.for_each(&mut |entity: VisitedEntity<'_>| {
            let (Some(handle), Some(name)) = (entity.handle, entity.name) else {
                return;
            };
            if self.matches(name) {
                death_row.push((handle, String::from_utf8_lossy(name).into_owned()));
            }
        });

        death_row
    }

    fn matches(&self, name: &[u8]) -> bool {
        self.markers
            .iter()
            .any(|marker| contains_ignore_ascii_case(name, marker))
    }
}

/// ASCII case-insensitive substring test; `needle` must be lowercase
fn contains_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.len() > haystack.len() {
        return false;
    }
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}
