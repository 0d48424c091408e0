//! Reader-side surfaces: binary table layouts, Prometheus metrics and the
//! periodic table reader.

pub mod layout;
pub mod metrics;
pub mod reader;

use crate::table::key::PairContext;
use crate::table::record::Tally;
use crate::table::{AccumTable, PairingTable, Record, TableKey};

use self::layout::{Layout, TableDump};

/// Size of a table, without reading its entries.
pub trait Occupancy: Send + Sync {
    fn name(&self) -> &'static str;
    fn len(&self) -> usize;
    fn capacity(&self) -> usize;
}

/// Type-erased read access to an accumulation table.
pub trait TableView: Occupancy {
    /// Per-key tallies, keyed by the key's display form.
    fn tallies(&self) -> Vec<(String, u64)>;

    /// Per-key tallies, resetting every entry read.
    fn drain_tallies(&self) -> Vec<(String, u64)>;

    fn dump(&self) -> TableDump;
}

impl<K: TableKey, R: Record> Occupancy for AccumTable<K, R> {
    fn name(&self) -> &'static str {
        AccumTable::name(self)
    }

    fn len(&self) -> usize {
        AccumTable::len(self)
    }

    fn capacity(&self) -> usize {
        AccumTable::capacity(self)
    }
}

impl<K, R> TableView for AccumTable<K, R>
where
    K: TableKey + Layout,
    R: Record,
    R::Snapshot: Tally + Layout,
{
    fn tallies(&self) -> Vec<(String, u64)> {
        self.snapshot()
            .into_iter()
            .map(|(key, snap)| (key.to_string(), snap.tally()))
            .collect()
    }

    fn drain_tallies(&self) -> Vec<(String, u64)> {
        self.drain()
            .into_iter()
            .map(|(key, snap)| (key.to_string(), snap.tally()))
            .collect()
    }

    fn dump(&self) -> TableDump {
        AccumTable::dump(self)
    }
}

impl<K: TableKey, C: PairContext> Occupancy for PairingTable<K, C> {
    fn name(&self) -> &'static str {
        PairingTable::name(self)
    }

    fn len(&self) -> usize {
        PairingTable::len(self)
    }

    fn capacity(&self) -> usize {
        PairingTable::capacity(self)
    }
}
