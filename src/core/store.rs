use std::collections::HashMap;
use std::time::{Instant, SystemTime};

use tokio::sync::RwLock;

use crate::core::packer::TypePacker;
use crate::core::register::{BitOverlay, RegisterEntry};
use crate::core::types::AddressSpace;

const MAX_BIT_QUANTITY: u16 = 2000;
const MAX_WORD_QUANTITY: u16 = 125;

type EntryMap = HashMap<u16, RegisterEntry>;
type OverlayMap = HashMap<u16, BitOverlay>;

#[derive(Default)]
struct Snapshot {
    coils: EntryMap,
    discrete_inputs: EntryMap,
    holding_registers: EntryMap,
    input_registers: EntryMap,
    holding_overlays: OverlayMap,
    input_overlays: OverlayMap,
}

/// Owns the four Modbus address spaces and their bit overlays, and performs
/// lazy refresh-if-due evaluation and read-response assembly.
///
/// Concurrency model (`spec.md` §5): one `RwLock` per address space plus one
/// per overlay-eligible space. A read takes the write guard for its whole
/// assembly pass, so refresh-if-due is atomic with respect to other readers
/// of the same window without a separate per-entry mutex.
pub struct RegisterStore {
    coils: RwLock<EntryMap>,
    discrete_inputs: RwLock<EntryMap>,
    holding_registers: RwLock<EntryMap>,
    input_registers: RwLock<EntryMap>,
    holding_overlays: RwLock<OverlayMap>,
    input_overlays: RwLock<OverlayMap>,
    snapshot: RwLock<Option<Snapshot>>,
}

impl RegisterStore {
    pub fn new() -> RegisterStore {
        RegisterStore {
            coils: RwLock::new(HashMap::new()),
            discrete_inputs: RwLock::new(HashMap::new()),
            holding_registers: RwLock::new(HashMap::new()),
            input_registers: RwLock::new(HashMap::new()),
            holding_overlays: RwLock::new(HashMap::new()),
            input_overlays: RwLock::new(HashMap::new()),
            snapshot: RwLock::new(None),
        }
    }

    fn entries(&self, space: AddressSpace) -> &RwLock<EntryMap> {
        match space {
            AddressSpace::Coils => &self.coils,
            AddressSpace::DiscreteInputs => &self.discrete_inputs,
            AddressSpace::HoldingRegisters => &self.holding_registers,
            AddressSpace::InputRegisters => &self.input_registers,
        }
    }

    fn overlays(&self, space: AddressSpace) -> Option<&RwLock<OverlayMap>> {
        match space {
            AddressSpace::HoldingRegisters => Some(&self.holding_overlays),
            AddressSpace::InputRegisters => Some(&self.input_overlays),
            _ => None,
        }
    }

    /// Idempotent replace (`spec.md` §3 invariant 1, §4.4 `Install`).
    pub async fn install(&self, space: AddressSpace, entry: RegisterEntry) {
        self.entries(space)
            .write()
            .await
            .insert(entry.address, entry);
    }

    /// Replaces any existing overlay at `base_address` (`spec.md` §4.4
    /// `InstallBitOverlay`). `space` must support overlays — the caller
    /// (`ConfigIngest`) validates this before calling.
    pub async fn install_bit_overlay(&self, space: AddressSpace, base_address: u16, overlay: BitOverlay) {
        if let Some(lock) = self.overlays(space) {
            lock.write().await.insert(base_address, overlay);
        }
    }

    async fn read_bits(&self, space: AddressSpace, start: u16, count: u16) -> Vec<bool> {
        let count = count.min(MAX_BIT_QUANTITY);
        let now = Instant::now();
        let wall_now = SystemTime::now();

        let mut map = self.entries(space).write().await;
        let mut out = Vec::with_capacity(count as usize);
        for i in 0..count {
            let addr = start.wrapping_add(i);
            match map.get_mut(&addr) {
                Some(entry) => {
                    let value = entry.refresh_if_due(now, wall_now);
                    out.push(value.as_f64() != 0.0);
                }
                None => out.push(false),
            }
        }
        out
    }

    /// `spec.md` §4.4 `ReadCoils`.
    pub async fn read_coils(&self, start: u16, count: u16) -> Vec<bool> {
        self.read_bits(AddressSpace::Coils, start, count).await
    }

    /// `spec.md` §4.4 `ReadDiscreteInputs`.
    pub async fn read_discrete_inputs(&self, start: u16, count: u16) -> Vec<bool> {
        self.read_bits(AddressSpace::DiscreteInputs, start, count).await
    }

    async fn read_words(&self, space: AddressSpace, start: u16, count: u16) -> Vec<u16> {
        let count = count.min(MAX_WORD_QUANTITY);
        let now = Instant::now();
        let wall_now = SystemTime::now();

        let window_start = start as u32;
        let window_end = window_start + count as u32;

        let mut out = vec![0u16; count as usize];

        {
            let mut map = self.entries(space).write().await;

            // Overlapping entries must resolve with defined last-writer
            // semantics (`spec.md` §3 invariant 4), so visit them in a
            // deterministic order rather than `HashMap`'s hash order —
            // ascending address, matching the insertion-ordered config dict
            // the grounding original iterates.
            let mut addresses: Vec<u16> = map.keys().copied().collect();
            addresses.sort_unstable();

            for address in addresses {
                let entry = map.get_mut(&address).expect("address came from this map's keys");
                let width = TypePacker::width(&entry.declared_type) as u32;
                let entry_start = entry.address as u32;
                let entry_end = entry_start + width;

                if entry_start >= window_end || entry_end <= window_start {
                    continue;
                }

                let value = entry.refresh_if_due(now, wall_now).clone();
                let packed = TypePacker::pack(&value, &entry.declared_type);

                // Leading words are skipped when the entry starts before the window.
                let skip = window_start.saturating_sub(entry_start) as usize;
                let dest_start = entry_start.saturating_sub(window_start) as usize;
                let available = packed.len().saturating_sub(skip);
                let room = out.len().saturating_sub(dest_start);
                let take = available.min(room);

                out[dest_start..dest_start + take].copy_from_slice(&packed[skip..skip + take]);
            }
        }

        if let Some(lock) = self.overlays(space) {
            let mut overlays = lock.write().await;
            for i in 0..count {
                let addr = start.wrapping_add(i);
                if let Some(overlay) = overlays.get_mut(&addr) {
                    let idx = i as usize;
                    let mut word = out[idx];
                    for bit in overlay.bits.values_mut() {
                        let value = bit.refresh_if_due(now, wall_now);
                        if value {
                            word |= 1 << bit.bit_index;
                        } else {
                            word &= !(1 << bit.bit_index);
                        }
                    }
                    out[idx] = word;
                }
            }
        }

        out
    }

    /// `spec.md` §4.4 `ReadHolding`.
    pub async fn read_holding(&self, start: u16, count: u16) -> Vec<u16> {
        self.read_words(AddressSpace::HoldingRegisters, start, count).await
    }

    /// `spec.md` §4.4 `ReadInput`.
    pub async fn read_input(&self, start: u16, count: u16) -> Vec<u16> {
        self.read_words(AddressSpace::InputRegisters, start, count).await
    }

    /// Deep-copies all configured entries and overlays. Called once at
    /// `Server::start`.
    pub async fn snapshot_original(&self) {
        let snapshot = Snapshot {
            coils: self.coils.read().await.clone(),
            discrete_inputs: self.discrete_inputs.read().await.clone(),
            holding_registers: self.holding_registers.read().await.clone(),
            input_registers: self.input_registers.read().await.clone(),
            holding_overlays: self.holding_overlays.read().await.clone(),
            input_overlays: self.input_overlays.read().await.clone(),
        };
        *self.snapshot.write().await = Some(snapshot);
    }

    /// Restores `value`, `interval`, range/step and producer identity from
    /// the last [`Self::snapshot_original`] call, discarding runtime counter
    /// state by re-invoking each producer to reseed its cached value
    /// (`spec.md` §4.4 `ResetToOriginal`). A no-op if no snapshot was taken.
    pub async fn reset_to_original(&self) {
        let guard = self.snapshot.read().await;
        let Some(snapshot) = guard.as_ref() else {
            return;
        };

        let now = Instant::now();
        let wall_now = SystemTime::now();

        let mut coils = snapshot.coils.clone();
        let mut discrete_inputs = snapshot.discrete_inputs.clone();
        let mut holding_registers = snapshot.holding_registers.clone();
        let mut input_registers = snapshot.input_registers.clone();
        let mut holding_overlays = snapshot.holding_overlays.clone();
        let mut input_overlays = snapshot.input_overlays.clone();
        drop(guard);

        for entry in coils.values_mut() {
            entry.reseed(now, wall_now);
        }
        for entry in discrete_inputs.values_mut() {
            entry.reseed(now, wall_now);
        }
        for entry in holding_registers.values_mut() {
            entry.reseed(now, wall_now);
        }
        for entry in input_registers.values_mut() {
            entry.reseed(now, wall_now);
        }
        for overlay in holding_overlays.values_mut() {
            for bit in overlay.bits.values_mut() {
                bit.reseed(now, wall_now);
            }
        }
        for overlay in input_overlays.values_mut() {
            for bit in overlay.bits.values_mut() {
                bit.reseed(now, wall_now);
            }
        }

        *self.coils.write().await = coils;
        *self.discrete_inputs.write().await = discrete_inputs;
        *self.holding_registers.write().await = holding_registers;
        *self.input_registers.write().await = input_registers;
        *self.holding_overlays.write().await = holding_overlays;
        *self.input_overlays.write().await = input_overlays;
    }
}

impl Default for RegisterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::generator::Generator;
    use crate::core::register::{BitChangeType, BitEntry};
    use crate::core::types::{DeclaredType, RegisterValue};
    use byteorder::ByteOrder;
    use std::time::Duration;

    fn entry(address: u16, declared: DeclaredType, generator: Generator) -> RegisterEntry {
        RegisterEntry::new(
            address,
            declared,
            generator,
            Duration::from_secs(3600),
            None,
            Instant::now(),
            SystemTime::now(),
        )
    }

    #[tokio::test]
    async fn s1_read_holding_single_int16() {
        let store = RegisterStore::new();
        store
            .install(
                AddressSpace::HoldingRegisters,
                entry(0, DeclaredType::Int16, Generator::Constant(RegisterValue::Int16(1000))),
            )
            .await;

        let words = store.read_holding(0, 1).await;
        assert_eq!(words, vec![1000]);
    }

    #[tokio::test]
    async fn s2_read_holding_float32_spanning_two_registers() {
        let store = RegisterStore::new();
        store
            .install(
                AddressSpace::HoldingRegisters,
                entry(
                    10,
                    DeclaredType::Float32,
                    Generator::Constant(RegisterValue::Float32(3.14159)),
                ),
            )
            .await;

        let words = store.read_holding(10, 2).await;
        assert_eq!(words.len(), 2);
        let mut bytes = [0u8; 4];
        byteorder::BigEndian::write_u16(&mut bytes[0..2], words[0]);
        byteorder::BigEndian::write_u16(&mut bytes[2..4], words[1]);
        assert_eq!(f32::from_be_bytes(bytes), 3.14159f32);
    }

    #[tokio::test]
    async fn s3_read_coils_packing() {
        let store = RegisterStore::new();
        for (addr, value) in [true, false, true, false, false, false, false, true]
            .into_iter()
            .enumerate()
        {
            store
                .install(
                    AddressSpace::Coils,
                    entry(addr as u16, DeclaredType::Bool, Generator::Constant(RegisterValue::Bool(value))),
                )
                .await;
        }

        let bits = store.read_coils(0, 8).await;
        assert_eq!(
            bits,
            vec![true, false, true, false, false, false, false, true]
        );
    }

    #[tokio::test]
    async fn s6_bit_overlay_composition() {
        let store = RegisterStore::new();
        store
            .install(
                AddressSpace::HoldingRegisters,
                entry(100, DeclaredType::Int16, Generator::Constant(RegisterValue::Int16(0))),
            )
            .await;

        let mut overlay = BitOverlay::new();
        for bit in [0u8, 7, 15] {
            overlay.bits.insert(
                bit,
                BitEntry::new(
                    bit,
                    BitChangeType::Periodic,
                    Duration::from_secs(3600),
                    None,
                    Instant::now(),
                    SystemTime::now(),
                ),
            );
            // Force every overlaid bit high regardless of phase timing.
            overlay.bits.get_mut(&bit).unwrap().refresh_if_due(
                Instant::now() + Duration::from_secs(7200),
                SystemTime::now(),
            );
        }
        store
            .install_bit_overlay(AddressSpace::HoldingRegisters, 100, overlay)
            .await;

        let words = store.read_holding(100, 1).await;
        assert_eq!(words.len(), 1);
        // bits 0, 7 and 15 may be set or cleared depending on periodic phase;
        // assert only the bits outside the overlay remain zero.
        let mask = (1u16 << 0) | (1u16 << 7) | (1u16 << 15);
        assert_eq!(words[0] & !mask, 0);
    }

    #[tokio::test]
    async fn p3_read_coverage_independent_of_configuration() {
        let store = RegisterStore::new();
        let words = store.read_holding(50, 10).await;
        assert_eq!(words.len(), 10);
    }

    #[tokio::test]
    async fn p4_quantity_clamp() {
        let store = RegisterStore::new();
        let bits = store.read_coils(0, 5000).await;
        assert_eq!(bits.len(), MAX_BIT_QUANTITY as usize);

        let words = store.read_holding(0, 500).await;
        assert_eq!(words.len(), MAX_WORD_QUANTITY as usize);
    }

    #[tokio::test]
    async fn overlapping_entries_resolve_by_ascending_address() {
        // A 2-register entry at address 0 and a 1-register entry at address 1
        // overlap at word index 1. `spec.md` §3 invariant 4 only promises a
        // *defined* last-writer outcome, not which one wins; this store picks
        // ascending install-address order, so the higher-address entry (1)
        // overwrites the low word of the lower-address entry (0).
        let store = RegisterStore::new();
        store
            .install(
                AddressSpace::HoldingRegisters,
                entry(0, DeclaredType::Int32, Generator::Constant(RegisterValue::Int32(0x11112222))),
            )
            .await;
        store
            .install(
                AddressSpace::HoldingRegisters,
                entry(1, DeclaredType::Int16, Generator::Constant(RegisterValue::Int16(0x7777))),
            )
            .await;

        let words = store.read_holding(0, 2).await;
        assert_eq!(words[0], 0x1111);
        assert_eq!(words[1], 0x7777);

        // Reinstalling the entries in the opposite order (so a HashMap's
        // insertion/hash order would differ) must not change the outcome:
        // the result depends only on address, never on install order.
        let store2 = RegisterStore::new();
        store2
            .install(
                AddressSpace::HoldingRegisters,
                entry(1, DeclaredType::Int16, Generator::Constant(RegisterValue::Int16(0x7777))),
            )
            .await;
        store2
            .install(
                AddressSpace::HoldingRegisters,
                entry(0, DeclaredType::Int32, Generator::Constant(RegisterValue::Int32(0x11112222))),
            )
            .await;
        let words2 = store2.read_holding(0, 2).await;
        assert_eq!(words2, words);
    }

    #[tokio::test]
    async fn p9_reset_idempotence() {
        let store = RegisterStore::new();
        store
            .install(
                AddressSpace::HoldingRegisters,
                entry(0, DeclaredType::Int16, Generator::Constant(RegisterValue::Int16(7))),
            )
            .await;
        store.snapshot_original().await;

        store
            .install(
                AddressSpace::HoldingRegisters,
                entry(0, DeclaredType::Int16, Generator::Constant(RegisterValue::Int16(99))),
            )
            .await;
        store.reset_to_original().await;
        let after_first_reset = store.read_holding(0, 1).await;

        store.reset_to_original().await;
        let after_second_reset = store.read_holding(0, 1).await;

        assert_eq!(after_first_reset, vec![7]);
        assert_eq!(after_second_reset, vec![7]);
    }
}
