//! ScalarField encodes a primitive either raw, with its fixed-size bytes, or as a delta
//! chain. A delta chain writes the first value of a pass in full and afterwards only the
//! difference to the previous value. Floats join a delta chain after being scaled by an
//! integer multiplier, which suits fixed-decimal values such as prices.

use std::marker::PhantomData;

use ordered_float::OrderedFloat;

use crate::codec::raw::RawStruct;
use crate::codec::{CodecReader, CodecWriter, MAX_BYTES_FOR_8};
use crate::error::SeriesError;
use crate::field::layout::FieldLayout;
use crate::field::state::StateStore;
use crate::field::{DefaultField, DeltaType, Field, FieldKind, FieldNode};

/// SCALAR_FIELD_VERSION is the newest layout version of scalar fields.
const SCALAR_FIELD_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Signed,
    Unsigned,
    Float,
    Bool,
}

/// ScalarValue maps a primitive onto the i64 domain used by delta chains.
pub trait ScalarValue: RawStruct + PartialEq + Send + Sync {
    const TYPE_NAME: &'static str;
    const KIND: ScalarKind;

    /// to_raw converts the value, scaled by `multiplier`, to an integer. None is returned
    /// when the conversion would lose information.
    fn to_raw(self, multiplier: i64) -> Option<i64>;

    fn from_raw(raw: i64, multiplier: i64) -> Self;
}

macro_rules! impl_scalar_int {
    ($type:ty, $kind:expr) => {
        impl ScalarValue for $type {
            const TYPE_NAME: &'static str = stringify!($type);
            const KIND: ScalarKind = $kind;

            #[inline]
            fn to_raw(self, _multiplier: i64) -> Option<i64> {
                Some(self as i64)
            }

            #[inline]
            fn from_raw(raw: i64, _multiplier: i64) -> Self {
                raw as $type
            }
        }

        impl DefaultField for $type {
            fn default_field(name: &str) -> Box<dyn Field<Self>> {
                Box::new(ScalarField::<$type>::delta(name))
            }
        }
    };
}
impl_scalar_int!(i8, ScalarKind::Signed);
impl_scalar_int!(i16, ScalarKind::Signed);
impl_scalar_int!(i32, ScalarKind::Signed);
impl_scalar_int!(i64, ScalarKind::Signed);
impl_scalar_int!(u8, ScalarKind::Unsigned);
impl_scalar_int!(u16, ScalarKind::Unsigned);
impl_scalar_int!(u32, ScalarKind::Unsigned);
impl_scalar_int!(u64, ScalarKind::Unsigned);

/// largest magnitude a scaled float may have to still fit an i64
const MAX_SCALED: f64 = 9.2e18;

macro_rules! impl_scalar_float {
    ($type:ty, $name:expr, $to:expr, $from:expr) => {
        impl ScalarValue for $type {
            const TYPE_NAME: &'static str = $name;
            const KIND: ScalarKind = ScalarKind::Float;

            fn to_raw(self, multiplier: i64) -> Option<i64> {
                let v: f64 = $to(self);
                let scaled = v * multiplier as f64;
                if !scaled.is_finite() || scaled.abs() >= MAX_SCALED {
                    return None;
                }

                let raw = scaled.round() as i64;
                // only fixed-decimal values survive the trip through the multiplier, -0.0
                // does not as it comes back as 0.0
                let back: f64 = $to(Self::from_raw(raw, multiplier));
                if back.to_bits() != v.to_bits() {
                    return None;
                }
                Some(raw)
            }

            fn from_raw(raw: i64, multiplier: i64) -> Self {
                $from(raw as f64 / multiplier as f64)
            }
        }

        impl DefaultField for $type {
            fn default_field(name: &str) -> Box<dyn Field<Self>> {
                Box::new(ScalarField::<$type>::raw(name))
            }
        }
    };
}
impl_scalar_float!(f64, "f64", |v: f64| v, |v: f64| v);
impl_scalar_float!(f32, "f32", |v: f32| v as f64, |v: f64| v as f32);
impl_scalar_float!(
    OrderedFloat<f64>,
    "f64",
    |v: OrderedFloat<f64>| v.0,
    |v: f64| OrderedFloat(v)
);

impl ScalarValue for bool {
    const TYPE_NAME: &'static str = "bool";
    const KIND: ScalarKind = ScalarKind::Bool;

    fn to_raw(self, _multiplier: i64) -> Option<i64> {
        Some(self as i64)
    }

    fn from_raw(raw: i64, _multiplier: i64) -> Self {
        raw != 0
    }
}

impl DefaultField for bool {
    fn default_field(name: &str) -> Box<dyn Field<Self>> {
        Box::new(ScalarField::<bool>::raw(name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarMode {
    Raw,
    Delta,
}

/// ScalarField is the leaf codec of primitive record fields.
#[derive(Debug, Clone)]
pub struct ScalarField<V> {
    name: String,
    state_name: String,
    version: u32,
    mode: ScalarMode,
    multiplier: i64,
    delta_type: DeltaType,
    _p: PhantomData<V>,
}

impl<V: ScalarValue> ScalarField<V> {
    /// raw returns a field that stores the fixed-size bytes of every value.
    pub fn raw(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state_name: name.to_string(),
            version: SCALAR_FIELD_VERSION,
            mode: ScalarMode::Raw,
            multiplier: 1,
            delta_type: DeltaType::Any,
            _p: PhantomData,
        }
    }

    /// delta returns a field that stores the difference to the previous value.
    pub fn delta(name: &str) -> Self {
        let mut field = Self::raw(name);
        field.mode = ScalarMode::Delta;
        field
    }

    pub fn with_multiplier(mut self, multiplier: i64) -> Self {
        self.mode = ScalarMode::Delta;
        self.multiplier = multiplier;
        self
    }

    pub fn with_delta_type(mut self, delta_type: DeltaType) -> Self {
        self.mode = ScalarMode::Delta;
        self.delta_type = delta_type;
        self
    }

    /// with_state_name couples this field with every other field using the same state name.
    pub fn with_state_name(mut self, state_name: &str) -> Self {
        self.state_name = state_name.to_string();
        self
    }

    pub fn multiplier(&self) -> i64 {
        self.multiplier
    }

    pub fn delta_type(&self) -> DeltaType {
        self.delta_type
    }

    pub fn state_name(&self) -> &str {
        self.state_name.as_str()
    }

    fn to_raw(&self, value: V) -> anyhow::Result<i64> {
        value.to_raw(self.multiplier).ok_or_else(|| {
            SeriesError::serializer(
                &self.name,
                format!(
                    "value {:?} can not be represented with multiplier {}",
                    value, self.multiplier
                ),
            )
            .into()
        })
    }

    /// update replaces the configuration only if `next` is valid.
    fn update(&mut self, next: Self) -> anyhow::Result<()> {
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// is_forward reports whether `raw` does not go below `prev`.
    fn is_forward(prev: i64, raw: i64) -> bool {
        match V::KIND {
            ScalarKind::Unsigned => raw as u64 >= prev as u64,
            _ => raw >= prev,
        }
    }
}

impl<V: ScalarValue> FieldNode for ScalarField<V> {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn kind(&self) -> FieldKind {
        match self.mode {
            ScalarMode::Raw => FieldKind::Raw,
            ScalarMode::Delta => FieldKind::Delta,
        }
    }

    fn max_encoded_size(&self) -> usize {
        match self.mode {
            ScalarMode::Raw => V::SIZE,
            ScalarMode::Delta => MAX_BYTES_FOR_8,
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            return Err(SeriesError::serializer(V::TYPE_NAME, "field name is empty").into());
        }
        if self.mode == ScalarMode::Raw {
            return Ok(());
        }

        if self.state_name.is_empty() {
            return Err(SeriesError::serializer(&self.name, "state name is empty").into());
        }
        if self.multiplier < 1 {
            return Err(SeriesError::serializer(
                &self.name,
                format!("multiplier must be positive, got {}", self.multiplier),
            )
            .into());
        }
        if self.multiplier != 1 && V::KIND != ScalarKind::Float {
            return Err(SeriesError::serializer(
                &self.name,
                format!("multiplier is only supported by floats, not {}", V::TYPE_NAME),
            )
            .into());
        }
        Ok(())
    }

    fn layout(&self) -> FieldLayout {
        let mut layout = FieldLayout::new(self.kind(), &self.name, V::TYPE_NAME, self.version);
        layout.state_name = self.state_name.clone();
        layout.multiplier = self.multiplier;
        layout.delta_type = self.delta_type;
        layout
    }

    fn restore(&mut self, layout: &FieldLayout) -> anyhow::Result<()> {
        if layout.name != self.name || layout.type_name != V::TYPE_NAME {
            return Err(anyhow!(
                "field {}:{} does not match stored field {}:{}",
                self.name,
                V::TYPE_NAME,
                layout.name,
                layout.type_name
            ));
        }
        if layout.version > SCALAR_FIELD_VERSION {
            return Err(anyhow!(
                "field {} has unsupported version {}",
                self.name,
                layout.version
            ));
        }

        self.mode = match layout.kind {
            FieldKind::Raw => ScalarMode::Raw,
            FieldKind::Delta => ScalarMode::Delta,
            kind => {
                return Err(anyhow!(
                    "field {} was stored as {:?}, not as a scalar",
                    self.name,
                    kind
                ))
            }
        };
        self.version = layout.version;
        self.state_name = layout.state_name.clone();
        self.multiplier = layout.multiplier;
        self.delta_type = layout.delta_type;
        Ok(())
    }

    fn prefix_state_names(&mut self, prefix: &str) {
        self.state_name = format!("{}.{}", prefix, self.state_name);
    }

    fn set_multiplier(&mut self, multiplier: i64) -> anyhow::Result<()> {
        self.update(self.clone().with_multiplier(multiplier))
    }

    fn set_delta_type(&mut self, delta_type: DeltaType) -> anyhow::Result<()> {
        self.update(self.clone().with_delta_type(delta_type))
    }

    fn set_state_name(&mut self, state_name: &str) -> anyhow::Result<()> {
        self.update(self.clone().with_state_name(state_name))
    }
}

impl<V: ScalarValue> Field<V> for ScalarField<V> {
    fn serialize(
        &self,
        value: &V,
        w: &mut CodecWriter,
        state: &mut StateStore,
    ) -> anyhow::Result<()> {
        if self.mode == ScalarMode::Raw {
            let mut b = [0_u8; 8];
            value.put(&mut b[..V::SIZE]);
            w.write_bytes(&b[..V::SIZE]);
            return Ok(());
        }

        let raw = self.to_raw(*value)?;
        match state.prev(&self.state_name) {
            None => w.write_var_i64(raw),
            Some(prev) => match self.delta_type {
                DeltaType::Any => w.write_var_i64(raw.wrapping_sub(prev)),
                DeltaType::Positive => {
                    if !Self::is_forward(prev, raw) {
                        return Err(SeriesError::NegativeDelta {
                            field: self.name.clone(),
                            prev: Box::new(V::from_raw(prev, self.multiplier)),
                            value: Box::new(*value),
                        }
                        .into());
                    }
                    w.write_var_u64(raw.wrapping_sub(prev) as u64)
                }
            },
        }
        state.set(&self.state_name, raw);

        Ok(())
    }

    fn deserialize(&self, r: &mut CodecReader, state: &mut StateStore) -> anyhow::Result<V> {
        if self.mode == ScalarMode::Raw {
            let b = r.read_bytes(V::SIZE)?;
            return Ok(V::get(b));
        }

        let raw = match state.prev(&self.state_name) {
            None => r.read_var_i64()?,
            Some(prev) => match self.delta_type {
                DeltaType::Any => prev.wrapping_add(r.read_var_i64()?),
                DeltaType::Positive => prev.wrapping_add(r.read_var_u64()? as i64),
            },
        };
        state.set(&self.state_name, raw);

        Ok(V::from_raw(raw, self.multiplier))
    }
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;

    use crate::codec::{CodecReader, CodecWriter};
    use crate::error::{ErrorKind, SeriesError};
    use crate::field::scalar::ScalarField;
    use crate::field::state::StateStore;
    use crate::field::{DeltaType, Field, FieldKind, FieldNode};

    fn encode<V>(field: &dyn Field<V>, values: &[V]) -> anyhow::Result<Vec<u8>> {
        let mut buf = vec![];
        let mut state = StateStore::new();
        let mut w = CodecWriter::new(&mut buf);
        for v in values {
            field.serialize(v, &mut w, &mut state)?;
        }
        Ok(buf)
    }

    fn decode<V>(field: &dyn Field<V>, b: &[u8], n: usize) -> anyhow::Result<Vec<V>> {
        let mut state = StateStore::new();
        let mut r = CodecReader::new(b);
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(field.deserialize(&mut r, &mut state)?);
        }
        assert!(r.is_empty(), "{} bytes left", r.remaining());
        Ok(values)
    }

    #[test]
    fn test_delta_bytes() {
        let field = ScalarField::<i64>::delta("time");
        let b = encode(&field, &[1000, 1001, 999]).unwrap();
        // full value, +1, -2
        assert_eq!(b, vec![0xD0, 0x0F, 0x02, 0x03]);
        assert_eq!(decode(&field, &b, 3).unwrap(), vec![1000, 1001, 999]);
    }

    #[test]
    fn test_positive_delta_rejects_decrease() {
        let field = ScalarField::<u64>::delta("seq").with_delta_type(DeltaType::Positive);
        let b = encode(&field, &[5, 5, u64::MAX]).unwrap();
        assert_eq!(decode(&field, &b, 3).unwrap(), vec![5, 5, u64::MAX]);

        let err = encode(&field, &[10, 9]).unwrap_err();
        assert_eq!(SeriesError::kind_of(&err), Some(ErrorKind::Ordering));
    }

    #[test]
    fn test_scaled_float() {
        let field = ScalarField::<f64>::raw("price").with_multiplier(100);
        assert_eq!(field.kind(), FieldKind::Delta);

        let values = [10.25, 10.26, 10.01, -3.5];
        let b = encode(&field, &values).unwrap();
        assert_eq!(decode(&field, &b, values.len()).unwrap(), values.to_vec());

        let err = encode(&field, &[10.255]).unwrap_err();
        assert_eq!(SeriesError::kind_of(&err), Some(ErrorKind::Configuration));
    }

    #[test]
    fn test_scaled_float_sign() {
        let field = ScalarField::<f64>::raw("price").with_multiplier(100);
        let values = [0.0, -0.01, 0.0];
        let b = encode(&field, &values).unwrap();
        let out = decode(&field, &b, values.len()).unwrap();
        assert!(out.iter().zip(values.iter()).all(|(a, b)| a.to_bits() == b.to_bits()));

        let err = encode(&field, &[1.5, -0.0]).unwrap_err();
        assert_eq!(SeriesError::kind_of(&err), Some(ErrorKind::Configuration));

        let field = ScalarField::<f32>::delta("volume");
        assert!(encode(&field, &[-0.0_f32]).is_err());
        assert!(encode(&field, &[0.0_f32, 3.0]).is_ok());
    }

    #[test]
    fn test_raw_float() {
        let field = ScalarField::<f32>::raw("volume");
        assert_eq!(field.max_encoded_size(), 4);

        let values = [1.5_f32, f32::MAX, -0.0];
        let b = encode(&field, &values).unwrap();
        assert_eq!(b.len(), 12);
        assert_eq!(decode(&field, &b, 3).unwrap(), values.to_vec());
    }

    #[test]
    fn test_validate() {
        assert!(ScalarField::<i64>::delta("a").validate().is_ok());
        assert!(ScalarField::<i64>::delta("a")
            .with_multiplier(10)
            .validate()
            .is_err());
        assert!(ScalarField::<f64>::delta("a")
            .with_multiplier(0)
            .validate()
            .is_err());
        assert!(ScalarField::<f64>::delta("").validate().is_err());

        let mut field = ScalarField::<i32>::delta("a");
        let err = field.set_multiplier(100).unwrap_err();
        assert_eq!(SeriesError::kind_of(&err), Some(ErrorKind::Configuration));
    }

    #[test]
    fn test_restore() {
        let stored = ScalarField::<f64>::raw("price")
            .with_multiplier(1000)
            .with_state_name("px")
            .layout();

        let mut field = ScalarField::<f64>::raw("price");
        field.restore(&stored).unwrap();
        assert_eq!(field.kind(), FieldKind::Delta);
        assert_eq!(field.multiplier(), 1000);
        assert_eq!(field.state_name(), "px");

        let mut other = ScalarField::<i64>::raw("price");
        assert!(other.restore(&stored).is_err());
    }

    #[test]
    fn test_delta_quick() {
        fn prop(values: Vec<i64>) -> bool {
            let field = ScalarField::<i64>::delta("v");
            let b = encode(&field, &values).unwrap();
            decode(&field, &b, values.len()).unwrap() == values
        }
        quickcheck(prop as fn(Vec<i64>) -> bool);
    }

    #[test]
    fn test_positive_delta_quick() {
        fn prop(mut values: Vec<i64>) -> bool {
            values.sort();
            values.dedup();
            let field = ScalarField::<i64>::delta("v").with_delta_type(DeltaType::Positive);
            let b = encode(&field, &values).unwrap();
            decode(&field, &b, values.len()).unwrap() == values
        }
        quickcheck(prop as fn(Vec<i64>) -> bool);
    }
}
