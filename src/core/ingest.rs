use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use log::info;

use crate::core::error::IngestError;
use crate::core::generator::Generator;
use crate::core::register::{BitChangeType, BitEntry, BitOverlay, RegisterEntry};
use crate::core::store::RegisterStore;
use crate::core::types::{AddressSpace, DeclaredType};

/// The sole external mutation path onto a [`RegisterStore`] (`spec.md` §4.6).
/// Every method validates synchronously and returns before ever touching a
/// connection in flight; a running server never observes a half-applied
/// configuration.
pub struct ConfigIngest {
    store: Arc<RegisterStore>,
}

impl ConfigIngest {
    pub fn new(store: Arc<RegisterStore>) -> ConfigIngest {
        ConfigIngest { store }
    }

    pub fn store(&self) -> Arc<RegisterStore> {
        self.store.clone()
    }

    fn validate_interval(interval: Duration) -> Result<(), IngestError> {
        if interval.as_secs_f64() <= 0.0 {
            return Err(IngestError::NonPositiveInterval(interval.as_secs_f64()));
        }
        Ok(())
    }

    fn validate_random_list(generator: &Generator) -> Result<(), IngestError> {
        if let Generator::RandomList { values } = generator {
            if values.len() < 3 {
                return Err(IngestError::ListTooShort { len: values.len() });
            }
        }
        Ok(())
    }

    /// Installs a register entry. Rejects a non-positive `interval` and a
    /// `random_list` generator with fewer than three candidate values
    /// (`spec.md` §4.6).
    pub async fn install(
        &self,
        space: AddressSpace,
        address: u16,
        declared_type: DeclaredType,
        generator: Generator,
        interval: Duration,
        description: Option<String>,
    ) -> Result<(), IngestError> {
        Self::validate_interval(interval)?;
        Self::validate_random_list(&generator)?;

        let entry = RegisterEntry::new(
            address,
            declared_type,
            generator,
            interval,
            description,
            Instant::now(),
            SystemTime::now(),
        );
        info!("installing entry at {:?}:{}", space, address);
        self.store.install(space, entry).await;
        Ok(())
    }

    /// Installs a bit overlay onto `base_address`. Rejects spaces that
    /// cannot carry an overlay and any bit index outside `0..=15`.
    pub async fn install_bit_overlay(
        &self,
        space: AddressSpace,
        base_address: u16,
        bits: Vec<(u8, BitChangeType, Duration, Option<String>)>,
    ) -> Result<(), IngestError> {
        if !space.supports_bit_overlay() {
            return Err(IngestError::UnsupportedSpace {
                operation: "install_bit_overlay",
            });
        }
        for (bit_index, _, interval, _) in &bits {
            if *bit_index > 15 {
                return Err(IngestError::BitIndexOutOfRange(*bit_index));
            }
            Self::validate_interval(*interval)?;
        }

        let now = Instant::now();
        let wall_now = SystemTime::now();
        let mut overlay = BitOverlay::new();
        for (bit_index, change_type, interval, description) in bits {
            overlay.bits.insert(
                bit_index,
                BitEntry::new(bit_index, change_type, interval, description, now, wall_now),
            );
        }

        info!("installing bit overlay at {:?}:{}", space, base_address);
        self.store
            .install_bit_overlay(space, base_address, overlay)
            .await;
        Ok(())
    }

    /// Reinstalls the builtin sample configuration. A no-op placeholder left
    /// for parity with `spec.md` §4.6's `Reset` operation name; the actual
    /// register reset to last-snapshot state is
    /// [`RegisterStore::reset_to_original`], invoked directly by
    /// [`crate::core::server::Server`] on shutdown.
    pub async fn reset(&self) {
        self.store.reset_to_original().await;
    }

    /// Snapshots the store's current configuration so a later [`Self::reset`]
    /// can restore it. Called once by `Server::start`.
    pub async fn snapshot(&self) {
        self.store.snapshot_original().await;
    }

    pub async fn start(&self) {
        self.snapshot().await;
    }

    pub async fn stop(&self) {
        self.reset().await;
    }
}
