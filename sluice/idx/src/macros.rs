#[macro_export]
/// Implements [`IndexRef`](crate::IndexRef) for a newtype wrapping an
/// unsigned integer. The backing type defaults to [`u32`]; a different one can
/// be given as the second argument.
macro_rules! impl_index {
    ($struct_name: ident) => {
        $crate::impl_index!($struct_name, u32);
    };

    ($struct_name: ident, $backing_ty: ty) => {
        impl $crate::IndexRef for $struct_name {
            fn index(&self) -> usize {
                self.0 as usize
            }

            fn new(input: usize) -> Self {
                Self(input as $backing_ty)
            }
        }

        impl From<$backing_ty> for $struct_name {
            fn from(input: $backing_ty) -> Self {
                $struct_name(input)
            }
        }

        impl From<usize> for $struct_name {
            fn from(input: usize) -> Self {
                $crate::IndexRef::new(input)
            }
        }

        impl std::fmt::Display for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

#[macro_export]
/// Implements [`IndexRef`](crate::IndexRef) for a newtype that reserves the
/// value zero. The wrapped integer is one larger than the index, so the first
/// pushed element has the raw value `1`. Used where zero carries a meaning of
/// its own on the wire, e.g. "no task pending".
macro_rules! impl_index_nonzero {
    ($struct_name: ident, NonZeroU16) => {
        $crate::impl_index_nonzero!($struct_name, std::num::NonZeroU16, u16);
    };

    ($struct_name: ident, $non_zero_type:ty, $normal_type:ty) => {
        impl $crate::IndexRef for $struct_name {
            fn index(&self) -> usize {
                self.0.get() as usize - 1
            }

            fn new(input: usize) -> Self {
                match <$non_zero_type>::new((input + 1) as $normal_type) {
                    Some(raw) => Self(raw),
                    None => panic!(
                        "index {input} overflows {}",
                        stringify!($normal_type)
                    ),
                }
            }
        }

        impl From<$non_zero_type> for $struct_name {
            fn from(input: $non_zero_type) -> Self {
                $struct_name(input)
            }
        }

        impl From<usize> for $struct_name {
            fn from(input: usize) -> Self {
                $crate::IndexRef::new(input)
            }
        }

        impl std::fmt::Display for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}
