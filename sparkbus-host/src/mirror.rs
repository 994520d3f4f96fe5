//! The live mirror of the observed Sparkplug topology.
//!
//! Groups, nodes, devices and metrics are assembled from observed BIRTH
//! messages and updated by DATA messages. A node exists in the mirror only
//! between an NBIRTH and the matching NDEATH. Any message that cannot be
//! applied consistently is a protocol gap: the caller requests a rebirth
//! and the node is held stale until the fresh NBIRTH arrives.

use std::collections::HashMap;

use log::debug;
use sparkbus_types::payload::{self, DataType, MetaData};
use sparkbus_types::{MetricId, MetricValue};

use crate::events::{DBirth, DData, DDeath, NBirth, NData, NDeath, NodeIdentifier};
use crate::metrics::{MetricBirthDetails, MetricDetails};

/// Why a message could not be applied to the mirror.
#[derive(Debug, Clone, PartialEq)]
pub enum GapReason {
    UnknownNode,
    UnknownDevice,
    UnknownMetric,
    SequenceGap { expected: u8, got: u8 },
    StaleState,
    OutOfSyncBdSeq,
}

/// A protocol gap: the mirror and the namespace have desynchronised for
/// one node, and only a rebirth can resynchronise them.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolGap {
    pub id: NodeIdentifier,
    pub reason: GapReason,
}

/// One metric of a node or device view.
///
/// `datatype`, `alias`, `properties` and `metadata` are birth-time
/// annotations: a plain-scalar DATA update changes the value and timestamp
/// but leaves them intact.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricView {
    pub name: String,
    pub alias: Option<u64>,
    pub datatype: Option<DataType>,
    pub value: Option<MetricValue>,
    pub timestamp: u64,
    pub properties: Option<payload::PropertySet>,
    pub metadata: Option<MetaData>,
    pub is_historical: bool,
    pub is_transient: bool,
}

impl MetricView {
    fn from_birth(birth: MetricBirthDetails, details: MetricDetails) -> Self {
        Self {
            name: birth.name,
            alias: birth.alias,
            datatype: Some(birth.datatype),
            value: details.value,
            timestamp: details.timestamp,
            properties: details.properties,
            metadata: details.metadata,
            is_historical: details.is_historical,
            is_transient: details.is_transient,
        }
    }

    fn from_data(name: String, details: MetricDetails) -> Self {
        Self {
            name,
            alias: None,
            datatype: None,
            value: details.value,
            timestamp: details.timestamp,
            properties: details.properties,
            metadata: details.metadata,
            is_historical: details.is_historical,
            is_transient: details.is_transient,
        }
    }

    fn apply_update(&mut self, details: MetricDetails) {
        self.value = details.value;
        self.timestamp = details.timestamp;
        self.is_historical = details.is_historical;
        self.is_transient = details.is_transient;
        if details.properties.is_some() {
            self.properties = details.properties;
        }
        if details.metadata.is_some() {
            self.metadata = details.metadata;
        }
    }
}

#[derive(Debug, Default)]
struct MetricTable {
    metrics: HashMap<String, MetricView>,
    aliases: HashMap<u64, String>,
}

impl MetricTable {
    fn from_birth(details: &[(MetricBirthDetails, MetricDetails)]) -> Self {
        let mut table = MetricTable::default();
        for (birth, metric_details) in details {
            if let Some(alias) = birth.alias {
                table.aliases.insert(alias, birth.name.clone());
            }
            table.metrics.insert(
                birth.name.clone(),
                MetricView::from_birth(birth.clone(), metric_details.clone()),
            );
        }
        table
    }

    fn resolve(&self, id: &MetricId) -> Result<String, GapReason> {
        match id {
            MetricId::Name(name) => Ok(name.clone()),
            MetricId::Alias(alias) => self
                .aliases
                .get(alias)
                .cloned()
                .ok_or(GapReason::UnknownMetric),
        }
    }

    /// Merge a DATA update. Unknown names are accepted as new entries;
    /// unknown aliases are a gap since only a birth can bind them.
    fn apply_data(&mut self, updates: &[(MetricId, MetricDetails)]) -> Result<(), GapReason> {
        // Resolve everything first so an update is applied atomically or
        // not at all.
        let mut resolved = Vec::with_capacity(updates.len());
        for (id, details) in updates {
            resolved.push((self.resolve(id)?, details));
        }
        for (name, details) in resolved {
            match self.metrics.get_mut(&name) {
                Some(view) => view.apply_update(details.clone()),
                None => {
                    self.metrics
                        .insert(name.clone(), MetricView::from_data(name, details.clone()));
                }
            }
        }
        Ok(())
    }
}

/// A device of a mirrored node.
#[derive(Debug)]
pub struct DeviceView {
    pub id: String,
    table: MetricTable,
}

impl DeviceView {
    pub fn metrics(&self) -> &HashMap<String, MetricView> {
        &self.table.metrics
    }

    pub fn metric(&self, name: &str) -> Option<&MetricView> {
        self.table.metrics.get(name)
    }
}

/// A mirrored edge node: exists only between an observed NBIRTH and the
/// matching NDEATH.
#[derive(Debug)]
pub struct NodeView {
    pub id: String,
    table: MetricTable,
    devices: HashMap<String, DeviceView>,
    bdseq: u64,
    birth_timestamp: u64,
    next_seq: u8,
    stale: bool,
}

impl NodeView {
    fn from_birth(id: String, birth: &NBirth) -> Self {
        Self {
            id,
            table: MetricTable::from_birth(&birth.metrics),
            devices: HashMap::new(),
            bdseq: birth.bdseq,
            birth_timestamp: birth.timestamp,
            // An NBIRTH consumes seq 0.
            next_seq: 1,
            stale: false,
        }
    }

    pub fn metrics(&self) -> &HashMap<String, MetricView> {
        &self.table.metrics
    }

    pub fn metric(&self, name: &str) -> Option<&MetricView> {
        self.table.metrics.get(name)
    }

    pub fn devices(&self) -> &HashMap<String, DeviceView> {
        &self.devices
    }

    pub fn device(&self, id: &str) -> Option<&DeviceView> {
        self.devices.get(id)
    }

    pub fn bdseq(&self) -> u64 {
        self.bdseq
    }

    pub fn birth_timestamp(&self) -> u64 {
        self.birth_timestamp
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    fn check_seq(&mut self, seq: u64) -> Result<(), GapReason> {
        let got = seq as u8;
        let expected = self.next_seq;
        if got != expected {
            return Err(GapReason::SequenceGap { expected, got });
        }
        self.next_seq = expected.wrapping_add(1);
        Ok(())
    }

    fn guard(&mut self, seq: u64) -> Result<(), GapReason> {
        if self.stale {
            return Err(GapReason::StaleState);
        }
        self.check_seq(seq)
    }
}

/// A group of mirrored nodes.
#[derive(Debug)]
pub struct GroupView {
    pub id: String,
    nodes: HashMap<String, NodeView>,
}

impl GroupView {
    pub fn nodes(&self) -> &HashMap<String, NodeView> {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&NodeView> {
        self.nodes.get(id)
    }
}

/// Flattened, export-friendly projections of the mirror.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatDevice {
    pub id: String,
    pub name: String,
    pub metrics: Vec<MetricView>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatNode {
    pub id: String,
    pub name: String,
    pub metrics: Vec<MetricView>,
    pub devices: Vec<FlatDevice>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatGroup {
    pub id: String,
    pub name: String,
    pub nodes: Vec<FlatNode>,
}

/// The groups -> nodes -> devices -> metrics mirror.
#[derive(Debug, Default)]
pub struct TopologyMirror {
    groups: HashMap<String, GroupView>,
}

impl TopologyMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups(&self) -> &HashMap<String, GroupView> {
        &self.groups
    }

    pub fn group(&self, id: &str) -> Option<&GroupView> {
        self.groups.get(id)
    }

    pub fn node(&self, group: &str, node: &str) -> Option<&NodeView> {
        self.groups.get(group)?.nodes.get(node)
    }

    pub fn device(&self, group: &str, node: &str, device: &str) -> Option<&DeviceView> {
        self.node(group, node)?.devices.get(device)
    }

    fn node_mut(&mut self, id: &NodeIdentifier) -> Result<&mut NodeView, GapReason> {
        self.groups
            .get_mut(&id.group)
            .and_then(|g| g.nodes.get_mut(&id.node))
            .ok_or(GapReason::UnknownNode)
    }

    fn gap(&mut self, id: &NodeIdentifier, reason: GapReason) -> ProtocolGap {
        // Once out of sync, the recorded state cannot be trusted until the
        // next birth.
        if let Ok(node) = self.node_mut(id) {
            node.stale = true;
        }
        debug!("Protocol gap for ({}/{}): {reason:?}", id.group, id.node);
        ProtocolGap {
            id: id.clone(),
            reason,
        }
    }

    /// NBIRTH: replace the node view wholesale.
    pub fn apply_nbirth(&mut self, id: &NodeIdentifier, birth: &NBirth) {
        let group = self
            .groups
            .entry(id.group.clone())
            .or_insert_with(|| GroupView {
                id: id.group.clone(),
                nodes: HashMap::new(),
            });
        group
            .nodes
            .insert(id.node.clone(), NodeView::from_birth(id.node.clone(), birth));
    }

    /// NDEATH: drop the node and everything under it. A death for a session
    /// other than the mirrored one means the mirror was out of sync.
    pub fn apply_ndeath(&mut self, id: &NodeIdentifier, death: &NDeath) -> Result<(), ProtocolGap> {
        let removed = match self.groups.get_mut(&id.group) {
            Some(group) => group.nodes.remove(&id.node),
            None => None,
        };
        if self
            .groups
            .get(&id.group)
            .is_some_and(|group| group.nodes.is_empty())
        {
            self.groups.remove(&id.group);
        }
        match removed {
            Some(node) if node.bdseq != death.bdseq => {
                Err(self.gap(id, GapReason::OutOfSyncBdSeq))
            }
            _ => Ok(()),
        }
    }

    /// DBIRTH: attach or replace a device under its node.
    pub fn apply_dbirth(
        &mut self,
        id: &NodeIdentifier,
        device: &str,
        birth: &DBirth,
    ) -> Result<(), ProtocolGap> {
        let result = self.node_mut(id).and_then(|node| {
            node.guard(birth.seq)?;
            node.devices.insert(
                device.to_string(),
                DeviceView {
                    id: device.to_string(),
                    table: MetricTable::from_birth(&birth.metrics),
                },
            );
            Ok(())
        });
        result.map_err(|reason| self.gap(id, reason))
    }

    /// DDEATH: drop the device.
    pub fn apply_ddeath(
        &mut self,
        id: &NodeIdentifier,
        device: &str,
        death: &DDeath,
    ) -> Result<(), ProtocolGap> {
        let result = self.node_mut(id).and_then(|node| {
            node.guard(death.seq)?;
            match node.devices.remove(device) {
                Some(_) => Ok(()),
                None => Err(GapReason::UnknownDevice),
            }
        });
        result.map_err(|reason| self.gap(id, reason))
    }

    /// NDATA: merge metric updates into the node view.
    pub fn apply_ndata(&mut self, id: &NodeIdentifier, data: &NData) -> Result<(), ProtocolGap> {
        let result = self.node_mut(id).and_then(|node| {
            node.guard(data.seq)?;
            node.table.apply_data(&data.metrics)
        });
        result.map_err(|reason| self.gap(id, reason))
    }

    /// DDATA: merge metric updates into the device view.
    pub fn apply_ddata(
        &mut self,
        id: &NodeIdentifier,
        device: &str,
        data: &DData,
    ) -> Result<(), ProtocolGap> {
        let result = self.node_mut(id).and_then(|node| {
            node.guard(data.seq)?;
            let device = node
                .devices
                .get_mut(device)
                .ok_or(GapReason::UnknownDevice)?;
            device.table.apply_data(&data.metrics)
        });
        result.map_err(|reason| self.gap(id, reason))
    }

    /// Hold every node stale, e.g. when the host loses its connection and
    /// can no longer observe the namespace.
    pub fn mark_all_stale(&mut self) {
        for group in self.groups.values_mut() {
            for node in group.nodes.values_mut() {
                node.stale = true;
            }
        }
    }

    /// Read-only projection into arrays for downstream consumers. Mapping
    /// keys become the `id`/`name` fields; metrics are sorted by name.
    pub fn flatten(&self) -> Vec<FlatGroup> {
        fn sorted_metrics(table: &MetricTable) -> Vec<MetricView> {
            let mut metrics: Vec<MetricView> = table.metrics.values().cloned().collect();
            metrics.sort_by(|a, b| a.name.cmp(&b.name));
            metrics
        }

        let mut groups: Vec<FlatGroup> = self
            .groups
            .values()
            .map(|group| {
                let mut nodes: Vec<FlatNode> = group
                    .nodes
                    .values()
                    .map(|node| {
                        let mut devices: Vec<FlatDevice> = node
                            .devices
                            .values()
                            .map(|device| FlatDevice {
                                id: device.id.clone(),
                                name: device.id.clone(),
                                metrics: sorted_metrics(&device.table),
                            })
                            .collect();
                        devices.sort_by(|a, b| a.id.cmp(&b.id));
                        FlatNode {
                            id: node.id.clone(),
                            name: node.id.clone(),
                            metrics: sorted_metrics(&node.table),
                            devices,
                        }
                    })
                    .collect();
                nodes.sort_by(|a, b| a.id.cmp(&b.id));
                FlatGroup {
                    id: group.id.clone(),
                    name: group.id.clone(),
                    nodes,
                }
            })
            .collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        groups
    }
}
