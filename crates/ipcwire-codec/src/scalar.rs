//! Fixed-width values: numbers, `bool`, `()`, and declared enumerations.
//!
//! Numbers travel as their native-endian bytes. Both ends share a machine,
//! so no byte-order conversion happens.

use ipcwire_transport::Transport;

use crate::decoder::{Decode, Decoder};
use crate::encoder::{Encode, Encoder};
use crate::error::{DecodeError, DecodeResult, EncodeResult};

macro_rules! impl_arithmetic {
    ($($ty:ty),+ $(,)?) => {$(
        impl Decode for $ty {
            fn decode<R: Transport + ?Sized>(decoder: &mut Decoder<'_, R>) -> DecodeResult<Self> {
                let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                decoder.decode_into(&mut bytes)?;
                Ok(<$ty>::from_ne_bytes(bytes))
            }
        }

        impl Encode for $ty {
            fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
                encoder.append(&self.to_ne_bytes());
                Ok(())
            }
        }
    )+};
}

impl_arithmetic!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

/// One byte, `0` or `1`. Anything else is malformed: there is no other
/// `bool` to build.
impl Decode for bool {
    fn decode<R: Transport + ?Sized>(decoder: &mut Decoder<'_, R>) -> DecodeResult<Self> {
        match decoder.decode::<u8>()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError::malformed(
                "bool",
                format!("byte {other:#04x} is neither 0 nor 1"),
            )),
        }
    }
}

impl Encode for bool {
    fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
        encoder.encode(&u8::from(*self))
    }
}

impl Decode for () {
    fn decode<R: Transport + ?Sized>(_decoder: &mut Decoder<'_, R>) -> DecodeResult<Self> {
        Ok(())
    }
}

impl Encode for () {
    fn encode(&self, _encoder: &mut Encoder<'_>) -> EncodeResult<()> {
        Ok(())
    }
}

/// Declare a field-less enum that travels as its `repr` integer.
///
/// Decoding validates the integer against the declared enumerators; an
/// unknown value is [`DecodeError::InvalidEnumValue`].
///
/// ```
/// ipcwire_codec::ipc_enum! {
///     #[derive(Debug, Clone, Copy, PartialEq, Eq)]
///     pub enum Cursor: u8 {
///         Arrow = 0,
///         Hand = 1,
///         Busy = 7,
///     }
/// }
///
/// let message = ipcwire_codec::encode_message(&Cursor::Busy).unwrap();
/// let mut transport = message.into_transport();
/// let cursor: Cursor = ipcwire_codec::decode(&mut transport).unwrap();
/// assert_eq!(cursor, Cursor::Busy);
/// ```
#[macro_export]
macro_rules! ipc_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ident {
            $($(#[$variant_meta:meta])* $variant:ident = $value:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr($repr)]
        $vis enum $name {
            $($(#[$variant_meta])* $variant = $value),+
        }

        impl $name {
            /// The declared integer value.
            pub fn to_repr(&self) -> $repr {
                match self {
                    $($name::$variant => $name::$variant as $repr),+
                }
            }

            /// The enumerator declared with `value`, if any.
            pub fn from_repr(value: $repr) -> ::core::option::Option<Self> {
                $(
                    if value == $name::$variant as $repr {
                        return ::core::option::Option::Some($name::$variant);
                    }
                )+
                ::core::option::Option::None
            }
        }

        impl $crate::Decode for $name {
            fn decode<R: $crate::Transport + ?Sized>(
                decoder: &mut $crate::Decoder<'_, R>,
            ) -> $crate::DecodeResult<Self> {
                let value: $repr = decoder.decode()?;
                Self::from_repr(value).ok_or_else(|| $crate::DecodeError::InvalidEnumValue {
                    type_name: ::core::stringify!($name),
                    value: value.to_string(),
                })
            }
        }

        impl $crate::Encode for $name {
            fn encode(&self, encoder: &mut $crate::Encoder<'_>) -> $crate::EncodeResult<()> {
                encoder.encode(&self.to_repr())
            }
        }
    };
}
