use std::marker::PhantomData;

use crate::codec::{CodecReader, CodecWriter};
use crate::error::SeriesError;
use crate::field::layout::FieldLayout;
use crate::field::scalar::{ScalarKind, ScalarValue};
use crate::field::state::StateStore;
use crate::field::{Field, FieldKind, FieldNode};

const INCREMENTAL_FIELD_VERSION: u32 = 1;

/// IncrementalField stores counters that grow by exactly one per record. Only the first
/// value of a pass is written, every following value is implied and takes no bytes.
#[derive(Debug, Clone)]
pub struct IncrementalField<V> {
    name: String,
    state_name: String,
    version: u32,
    _p: PhantomData<V>,
}

impl<V: ScalarValue> IncrementalField<V> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state_name: name.to_string(),
            version: INCREMENTAL_FIELD_VERSION,
            _p: PhantomData,
        }
    }

    pub fn with_state_name(mut self, state_name: &str) -> Self {
        self.state_name = state_name.to_string();
        self
    }
}

impl<V: ScalarValue> FieldNode for IncrementalField<V> {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn kind(&self) -> FieldKind {
        FieldKind::Incremental
    }

    fn max_encoded_size(&self) -> usize {
        crate::codec::MAX_BYTES_FOR_8
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() || self.state_name.is_empty() {
            return Err(SeriesError::serializer(
                V::TYPE_NAME,
                "incremental field needs a name and a state name",
            )
            .into());
        }
        match V::KIND {
            ScalarKind::Signed | ScalarKind::Unsigned => Ok(()),
            _ => Err(SeriesError::serializer(
                &self.name,
                format!("incremental fields must be integers, not {}", V::TYPE_NAME),
            )
            .into()),
        }
    }

    fn layout(&self) -> FieldLayout {
        let mut layout =
            FieldLayout::new(FieldKind::Incremental, &self.name, V::TYPE_NAME, self.version);
        layout.state_name = self.state_name.clone();
        layout
    }

    fn restore(&mut self, layout: &FieldLayout) -> anyhow::Result<()> {
        if layout.kind != FieldKind::Incremental
            || layout.name != self.name
            || layout.type_name != V::TYPE_NAME
        {
            return Err(anyhow!(
                "incremental field {}:{} does not match stored {:?} field {}:{}",
                self.name,
                V::TYPE_NAME,
                layout.kind,
                layout.name,
                layout.type_name
            ));
        }
        if layout.version > INCREMENTAL_FIELD_VERSION {
            return Err(anyhow!(
                "field {} has unsupported version {}",
                self.name,
                layout.version
            ));
        }

        self.version = layout.version;
        self.state_name = layout.state_name.clone();
        Ok(())
    }

    fn prefix_state_names(&mut self, prefix: &str) {
        self.state_name = format!("{}.{}", prefix, self.state_name);
    }

    fn set_state_name(&mut self, state_name: &str) -> anyhow::Result<()> {
        self.state_name = state_name.to_string();
        self.validate()
    }
}

impl<V: ScalarValue> Field<V> for IncrementalField<V> {
    fn serialize(
        &self,
        value: &V,
        w: &mut CodecWriter,
        state: &mut StateStore,
    ) -> anyhow::Result<()> {
        let raw = value.to_raw(1).ok_or_else(|| {
            SeriesError::serializer(&self.name, format!("{:?} is not an integer", value))
        })?;

        match state.prev(&self.state_name) {
            None => w.write_var_i64(raw),
            Some(prev) => {
                if prev.wrapping_add(1) != raw {
                    return Err(SeriesError::NotSequential {
                        field: self.name.clone(),
                        prev: Box::new(V::from_raw(prev, 1)),
                        value: Box::new(*value),
                    }
                    .into());
                }
            }
        }
        state.set(&self.state_name, raw);

        Ok(())
    }

    fn deserialize(&self, r: &mut CodecReader, state: &mut StateStore) -> anyhow::Result<V> {
        let raw = match state.prev(&self.state_name) {
            None => r.read_var_i64()?,
            Some(prev) => prev.wrapping_add(1),
        };
        state.set(&self.state_name, raw);

        Ok(V::from_raw(raw, 1))
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::{CodecReader, CodecWriter};
    use crate::error::{ErrorKind, SeriesError};
    use crate::field::incremental::IncrementalField;
    use crate::field::state::StateStore;
    use crate::field::{Field, FieldNode};

    #[test]
    fn test_sequence() {
        let field = IncrementalField::<u32>::new("seq");
        field.validate().unwrap();

        let mut buf = vec![];
        let mut state = StateStore::new();
        {
            let mut w = CodecWriter::new(&mut buf);
            for v in 7..12_u32 {
                field.serialize(&v, &mut w, &mut state).unwrap();
            }
        }
        // only the first value takes space
        assert_eq!(buf, vec![14]);

        let mut state = StateStore::new();
        let mut r = CodecReader::new(&buf);
        let values = (0..5)
            .map(|_| field.deserialize(&mut r, &mut state).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(values, vec![7, 8, 9, 10, 11]);
    }

    #[test]
    fn test_not_sequential() {
        let field = IncrementalField::<i64>::new("seq");

        let mut buf = vec![];
        let mut state = StateStore::new();
        let mut w = CodecWriter::new(&mut buf);
        field.serialize(&1, &mut w, &mut state).unwrap();
        field.serialize(&2, &mut w, &mut state).unwrap();

        let err = field.serialize(&4, &mut w, &mut state).unwrap_err();
        assert_eq!(SeriesError::kind_of(&err), Some(ErrorKind::Ordering));
        assert!(err.to_string().contains("2 followed by 4"), "{}", err);
    }

    #[test]
    fn test_float_rejected() {
        let field = IncrementalField::<f64>::new("seq");
        let err = field.validate().unwrap_err();
        assert_eq!(SeriesError::kind_of(&err), Some(ErrorKind::Configuration));
    }
}
