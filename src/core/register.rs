use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};

use crate::core::generator::Generator;
use crate::core::types::{DeclaredType, RegisterValue};

/// One configured address in an [`crate::core::types::AddressSpace`].
///
/// Lifetime per `spec.md` §3 invariant 6: created by
/// [`crate::core::ingest::ConfigIngest`], mutated in place by
/// [`Generator::tick`] during reads, destroyed by replacement or
/// [`crate::core::store::RegisterStore::reset_to_original`].
#[derive(Debug, Clone)]
pub struct RegisterEntry {
    pub address: u16,
    pub declared_type: DeclaredType,
    pub generator: Generator,
    pub interval: Duration,
    pub description: Option<String>,
    last_refresh: Instant,
    current_value: RegisterValue,
}

impl RegisterEntry {
    /// Installs immediately invoke the producer once so `current_value` is
    /// defined before the entry can be read (`spec.md` §4.4 `Install`).
    pub fn new(
        address: u16,
        declared_type: DeclaredType,
        mut generator: Generator,
        interval: Duration,
        description: Option<String>,
        now: Instant,
        wall_now: SystemTime,
    ) -> RegisterEntry {
        let current_value = generator.tick(wall_now, &declared_type);
        RegisterEntry {
            address,
            declared_type,
            generator,
            interval,
            description,
            last_refresh: now,
            current_value,
        }
    }

    pub fn current_value(&self) -> &RegisterValue {
        &self.current_value
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        now.duration_since(self.last_refresh) >= self.interval
    }

    /// Refresh-if-due (`spec.md` §3 invariant 5, §4.3 refresh policy).
    /// `now` is the monotonic clock driving the interval comparison;
    /// `wall_now` is what wall-clock-valued generators read from (§4.3a).
    pub fn refresh_if_due(&mut self, now: Instant, wall_now: SystemTime) -> &RegisterValue {
        if self.is_stale(now) {
            self.current_value = self.generator.tick(wall_now, &self.declared_type);
            self.last_refresh = now;
        }
        &self.current_value
    }

    /// Used by `reset_to_original`: restores configuration but re-seeds
    /// `current_value` by invoking the producer again, discarding any
    /// runtime counter state the snapshot itself did not carry forward.
    pub fn reseed(&mut self, now: Instant, wall_now: SystemTime) {
        self.current_value = self.generator.tick(wall_now, &self.declared_type);
        self.last_refresh = now;
    }
}

/// How a [`BitEntry`]'s value changes over time — the two kinds `spec.md`
/// §3 names for bit overlays (a narrower set than the full [`Generator`]
/// catalog, matching the Python GUI's bit-config dialog).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub enum BitChangeType {
    Periodic,
    Random,
}

/// A miniature [`RegisterEntry`] overlaid onto one bit of a base register.
#[derive(Debug, Clone)]
pub struct BitEntry {
    pub bit_index: u8,
    pub change_type: BitChangeType,
    pub interval: Duration,
    pub description: Option<String>,
    generator: Generator,
    last_refresh: Instant,
    current_value: bool,
}

impl BitEntry {
    pub fn new(
        bit_index: u8,
        change_type: BitChangeType,
        interval: Duration,
        description: Option<String>,
        now: Instant,
        wall_now: SystemTime,
    ) -> BitEntry {
        let generator = match change_type {
            BitChangeType::Periodic => Generator::PeriodicBool {
                period: interval.as_secs_f64().max(f64::MIN_POSITIVE),
            },
            BitChangeType::Random => Generator::RandomBool,
        };
        let mut generator = generator;
        let current_value = matches!(
            generator.tick(wall_now, &DeclaredType::Bool),
            RegisterValue::Bool(true)
        );
        BitEntry {
            bit_index,
            change_type,
            interval,
            description,
            generator,
            last_refresh: now,
            current_value,
        }
    }

    pub fn current_value(&self) -> bool {
        self.current_value
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        now.duration_since(self.last_refresh) >= self.interval
    }

    pub fn refresh_if_due(&mut self, now: Instant, wall_now: SystemTime) -> bool {
        if self.is_stale(now) {
            self.current_value = matches!(
                self.generator.tick(wall_now, &DeclaredType::Bool),
                RegisterValue::Bool(true)
            );
            self.last_refresh = now;
        }
        self.current_value
    }

    /// See [`RegisterEntry::reseed`].
    pub fn reseed(&mut self, now: Instant, wall_now: SystemTime) {
        self.current_value = matches!(
            self.generator.tick(wall_now, &DeclaredType::Bool),
            RegisterValue::Bool(true)
        );
        self.last_refresh = now;
    }
}

/// Per-bit producers overlaid onto one base address of a
/// `HoldingRegisters`/`InputRegisters` entry (`spec.md` §3's BitOverlay).
#[derive(Debug, Clone, Default)]
pub struct BitOverlay {
    pub bits: HashMap<u8, BitEntry>,
}

impl BitOverlay {
    pub fn new() -> BitOverlay {
        BitOverlay {
            bits: HashMap::new(),
        }
    }
}
