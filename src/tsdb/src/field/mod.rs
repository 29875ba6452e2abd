//! A record is encoded by a tree of field codecs that mirrors its fields. Leaves encode
//! scalar values, struct nodes recurse into their members. Leaves that encode deltas keep
//! their previous value in a `StateStore` under their state name; two leaves with the same
//! state name form a single delta chain.

pub mod composite;
pub mod incremental;
pub mod layout;
pub mod record;
pub mod scalar;
pub mod state;

use std::fmt::Debug;

use dyn_clone::DynClone;

use crate::codec::{CodecReader, CodecWriter};
use crate::field::layout::FieldLayout;
use crate::field::state::StateStore;

pub use composite::StructField;
pub use incremental::IncrementalField;
pub use scalar::{ScalarField, ScalarValue};

/// FieldKind identifies a node type in the persisted layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Raw = 0,
    Delta = 1,
    Incremental = 2,
    Struct = 3,
}

impl TryFrom<u8> for FieldKind {
    type Error = anyhow::Error;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Raw),
            1 => Ok(Self::Delta),
            2 => Ok(Self::Incremental),
            3 => Ok(Self::Struct),
            _ => Err(anyhow!("unknown field kind: {}", v)),
        }
    }
}

/// DeltaType selects how the difference to the previous value is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaType {
    /// signed zig zag varint, values may move in both directions
    Any = 0,
    /// unsigned varint, values may never decrease
    Positive = 1,
}

impl TryFrom<u8> for DeltaType {
    type Error = anyhow::Error;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Any),
            1 => Ok(Self::Positive),
            _ => Err(anyhow!("unknown delta type: {}", v)),
        }
    }
}

/// FieldNode is the type independent part of a field codec: naming, sizing, layout and
/// configuration.
pub trait FieldNode: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> FieldKind;

    /// max_encoded_size is an upper bound of the bytes one value may take.
    fn max_encoded_size(&self) -> usize;

    /// validate fails if the configuration can not encode values of the field type.
    fn validate(&self) -> anyhow::Result<()>;

    /// layout describes the node for the file header.
    fn layout(&self) -> FieldLayout;

    /// restore applies the parameters of a persisted layout, failing when its shape does
    /// not match this node.
    fn restore(&mut self, layout: &FieldLayout) -> anyhow::Result<()>;

    fn set_multiplier(&mut self, _multiplier: i64) -> anyhow::Result<()> {
        Err(anyhow!("field {} does not support a multiplier", self.name()))
    }

    fn set_delta_type(&mut self, _delta_type: DeltaType) -> anyhow::Result<()> {
        Err(anyhow!("field {} does not support a delta type", self.name()))
    }

    fn set_state_name(&mut self, _state_name: &str) -> anyhow::Result<()> {
        Err(anyhow!("field {} does not keep delta state", self.name()))
    }

    /// prefix_state_names moves the delta chains of this node under `prefix`, so a nested
    /// record does not share state with same-named fields of its parent.
    fn prefix_state_names(&mut self, _prefix: &str) {}

    /// member_mut finds a nested node by its dot separated path, e.g. `quote.bid`.
    fn member_mut(&mut self, _path: &str) -> Option<&mut dyn FieldNode> {
        None
    }
}

/// Field encodes and decodes values of type `V`.
pub trait Field<V>: FieldNode + DynClone {
    fn serialize(
        &self,
        value: &V,
        w: &mut CodecWriter,
        state: &mut StateStore,
    ) -> anyhow::Result<()>;

    fn deserialize(&self, r: &mut CodecReader, state: &mut StateStore) -> anyhow::Result<V>;
}

dyn_clone::clone_trait_object!(<V> Field<V>);

/// DefaultField picks the codec a field of this type gets unless configured otherwise.
pub trait DefaultField: Sized + 'static {
    fn default_field(name: &str) -> Box<dyn Field<Self>>;
}

/// RecordFields builds the default field tree of a record type.
pub trait RecordFields: Sized + 'static {
    fn record_fields() -> StructField<Self>;
}
