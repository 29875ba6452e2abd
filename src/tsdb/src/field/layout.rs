use crate::codec::{CodecReader, CodecWriter};
use crate::field::{DeltaType, FieldKind};

/// FieldLayout is the persisted description of a field tree.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    pub kind: FieldKind,
    pub name: String,
    pub state_name: String,
    pub type_name: String,
    pub version: u32,
    pub multiplier: i64,
    pub delta_type: DeltaType,
    pub children: Vec<FieldLayout>,
}

impl FieldLayout {
    pub fn new(kind: FieldKind, name: &str, type_name: &str, version: u32) -> Self {
        Self {
            kind,
            name: name.to_string(),
            state_name: name.to_string(),
            type_name: type_name.to_string(),
            version,
            multiplier: 1,
            delta_type: DeltaType::Any,
            children: vec![],
        }
    }

    pub fn write_to(&self, w: &mut CodecWriter) {
        w.write_u8(self.kind as u8);
        w.write_str(self.name.as_str());
        w.write_str(self.state_name.as_str());
        w.write_str(self.type_name.as_str());
        w.write_var_u64(self.version as u64);

        match self.kind {
            FieldKind::Delta => {
                w.write_var_i64(self.multiplier);
                w.write_u8(self.delta_type as u8);
            }
            FieldKind::Struct => {
                w.write_var_u64(self.children.len() as u64);
                for child in &self.children {
                    child.write_to(w);
                }
            }
            FieldKind::Raw | FieldKind::Incremental => {}
        }
    }

    pub fn read_from(r: &mut CodecReader) -> anyhow::Result<Self> {
        let kind = FieldKind::try_from(r.read_u8()?)?;
        let name = r.read_str()?.to_string();
        let state_name = r.read_str()?.to_string();
        let type_name = r.read_str()?.to_string();
        let version = u32::try_from(r.read_var_u64()?).map_err(|e| anyhow!(e))?;

        let mut layout = Self {
            kind,
            name,
            state_name,
            type_name,
            version,
            multiplier: 1,
            delta_type: DeltaType::Any,
            children: vec![],
        };

        match kind {
            FieldKind::Delta => {
                layout.multiplier = r.read_var_i64()?;
                layout.delta_type = DeltaType::try_from(r.read_u8()?)?;
            }
            FieldKind::Struct => {
                let n = r.read_var_u64()?;
                if n as usize > r.remaining() {
                    return Err(anyhow!("invalid child count {} of field {}", n, layout.name));
                }
                for _ in 0..n {
                    layout.children.push(Self::read_from(r)?);
                }
            }
            FieldKind::Raw | FieldKind::Incremental => {}
        }

        Ok(layout)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![];
        self.write_to(&mut CodecWriter::new(&mut buf));
        buf
    }

    pub fn from_bytes(b: &[u8]) -> anyhow::Result<Self> {
        let mut r = CodecReader::new(b);
        let layout = Self::read_from(&mut r)?;
        if !r.is_empty() {
            return Err(anyhow!("{} trailing bytes after field layout", r.remaining()));
        }
        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use crate::field::layout::FieldLayout;
    use crate::field::{DeltaType, FieldKind};

    #[test]
    fn test_layout_bytes() {
        let mut root = FieldLayout::new(FieldKind::Struct, "Tick", "Tick", 1);
        let mut value = FieldLayout::new(FieldKind::Delta, "value", "f64", 1);
        value.multiplier = 100;
        value.delta_type = DeltaType::Positive;
        value.state_name = "px".to_string();
        root.children.push(value);
        root.children
            .push(FieldLayout::new(FieldKind::Incremental, "seq", "u32", 1));

        let b = root.to_bytes();
        assert_eq!(FieldLayout::from_bytes(&b).unwrap(), root);

        let mut extra = b.clone();
        extra.push(0);
        assert!(FieldLayout::from_bytes(&extra).is_err());
        assert!(FieldLayout::from_bytes(&b[..b.len() - 1]).is_err());
    }
}
