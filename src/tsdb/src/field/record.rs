/// fixed_record implements `RawStruct`, `RecordFields` and `DefaultField` for a struct
/// whose fields are all `RawStruct` types, nested records included. The struct must
/// derive `Debug`, `Default`, `Clone` and `Copy`.
///
/// ```ignore
/// fixed_record!(Tick { time: i64, price: f64, volume: u32 }, index = time: i64);
/// ```
///
/// The optional `index = field: type` also implements `SeriesRecord`, keying the series
/// by that field.
#[macro_export]
macro_rules! fixed_record {
    ($name:ident { $($field:ident : $ty:ty),+ $(,)? }) => {
        impl $crate::codec::raw::RawStruct for $name {
            const SIZE: usize = 0 $(+ <$ty as $crate::codec::raw::RawStruct>::SIZE)+;

            #[allow(unused_assignments)]
            fn put(&self, dst: &mut [u8]) {
                let mut offset = 0;
                $(
                    let size = <$ty as $crate::codec::raw::RawStruct>::SIZE;
                    $crate::codec::raw::RawStruct::put(&self.$field, &mut dst[offset..offset + size]);
                    offset += size;
                )+
            }

            #[allow(unused_assignments)]
            fn get(src: &[u8]) -> Self {
                let mut item = <Self as Default>::default();
                let mut offset = 0;
                $(
                    let size = <$ty as $crate::codec::raw::RawStruct>::SIZE;
                    item.$field = <$ty as $crate::codec::raw::RawStruct>::get(&src[offset..offset + size]);
                    offset += size;
                )+
                item
            }

            fn signature(sig: &mut $crate::codec::raw::TypeSignature) {
                sig.begin_struct(stringify!($name));
                $(
                    sig.field(stringify!($field));
                    <$ty as $crate::codec::raw::RawStruct>::signature(sig);
                )+
                sig.end_struct();
            }
        }

        impl $crate::field::RecordFields for $name {
            fn record_fields() -> $crate::field::StructField<Self> {
                $crate::field::StructField::<$name>::new(stringify!($name), stringify!($name))
                    $(
                        .member::<$ty>(
                            stringify!($field),
                            |item: &$name| item.$field,
                            |item: &mut $name, v: $ty| item.$field = v,
                        )
                    )+
            }
        }

        impl $crate::field::DefaultField for $name {
            fn default_field(name: &str) -> Box<dyn $crate::field::Field<Self>> {
                Box::new(<$name as $crate::field::RecordFields>::record_fields().renamed(name))
            }
        }
    };

    ($name:ident { $($field:ident : $ty:ty),+ $(,)? }, index = $index:ident : $index_ty:ty) => {
        $crate::fixed_record!($name { $($field : $ty),+ });

        impl $crate::series::SeriesRecord for $name {
            type Index = $index_ty;
            const INDEX_FIELD: &'static str = stringify!($index);

            fn index(&self) -> Self::Index {
                self.$index
            }
        }
    };
}
