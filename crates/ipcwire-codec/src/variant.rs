//! Tagged unions.
//!
//! A union travels as its alternative's position, in the declared unsigned
//! index type, followed by that alternative's payload. The position is
//! validated before any payload byte is read.

/// Declare an enum whose variants each carry one payload, and implement
/// [`Decode`](crate::Decode) and [`Encode`](crate::Encode) for it.
///
/// The index type must be an unsigned integer no wider than `u64`.
/// Variant positions follow declaration order, starting at zero. Decoding a
/// position with no alternative fails with
/// [`DecodeError::MalformedDiscriminant`](crate::DecodeError::MalformedDiscriminant).
///
/// ```
/// ipcwire_codec::ipc_variant! {
///     #[derive(Debug, PartialEq)]
///     pub enum Reply: u8 {
///         Accepted(u64),
///         Rejected(String),
///     }
/// }
///
/// assert_eq!(Reply::ALTERNATIVES, 2);
/// let reply = Reply::Rejected("busy".into());
/// assert_eq!(reply.index(), 1);
///
/// let mut transport = ipcwire_codec::encode_message(&reply).unwrap().into_transport();
/// let decoded: Reply = ipcwire_codec::decode(&mut transport).unwrap();
/// assert_eq!(decoded, reply);
/// ```
#[macro_export]
macro_rules! ipc_variant {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $index:ident {
            $($(#[$variant_meta:meta])* $variant:ident($payload:ty)),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $($(#[$variant_meta])* $variant($payload)),+
        }

        impl $name {
            /// Number of alternatives.
            pub const ALTERNATIVES: usize = {
                #[allow(dead_code, non_camel_case_types)]
                #[repr(usize)]
                enum Position {
                    $($variant,)+
                    __Count,
                }
                Position::__Count as usize
            };

            /// Position of the active alternative.
            pub fn index(&self) -> usize {
                #[allow(dead_code, non_camel_case_types)]
                #[repr(usize)]
                enum Position {
                    $($variant,)+
                }
                match self {
                    $($name::$variant(_) => Position::$variant as usize,)+
                }
            }
        }

        impl $crate::Decode for $name {
            fn decode<R: $crate::Transport + ?Sized>(
                decoder: &mut $crate::Decoder<'_, R>,
            ) -> $crate::DecodeResult<Self> {
                #[allow(dead_code, non_camel_case_types)]
                #[repr(u64)]
                enum Position {
                    $($variant,)+
                }
                let raw: $index = decoder.decode()?;
                let index = raw as u64;
                $(
                    if index == Position::$variant as u64 {
                        return decoder.decode::<$payload>().map($name::$variant);
                    }
                )+
                ::core::result::Result::Err($crate::DecodeError::MalformedDiscriminant {
                    type_name: ::core::stringify!($name),
                    index,
                    alternatives: Self::ALTERNATIVES,
                })
            }
        }

        impl $crate::Encode for $name {
            fn encode(&self, encoder: &mut $crate::Encoder<'_>) -> $crate::EncodeResult<()> {
                let index = self.index();
                let raw: $index = ::core::convert::TryFrom::try_from(index).map_err(|_| {
                    $crate::EncodeError::DiscriminantOverflow {
                        type_name: ::core::stringify!($name),
                        index,
                    }
                })?;
                encoder.encode(&raw)?;
                match self {
                    $($name::$variant(value) => encoder.encode(value),)+
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use ipcwire_transport::MemoryTransport;

    use crate::decoder::decode;
    use crate::encoder::encode_message;
    use crate::error::DecodeError;

    crate::ipc_variant! {
        #[derive(Debug, Clone, PartialEq)]
        enum Shape: u8 {
            Point(()),
            Circle(f64),
            Label(String),
        }
    }

    crate::ipc_variant! {
        #[derive(Debug, PartialEq)]
        enum Wide: u32 {
            Only(u16),
        }
    }

    #[test]
    fn generated_metadata() {
        assert_eq!(Shape::ALTERNATIVES, 3);
        assert_eq!(Shape::Point(()).index(), 0);
        assert_eq!(Shape::Label(String::new()).index(), 2);
    }

    #[test]
    fn decodes_selected_alternative() {
        let mut wire = vec![1u8];
        wire.extend_from_slice(&2.5f64.to_ne_bytes());
        let mut transport = MemoryTransport::new(wire);

        assert_eq!(decode::<Shape, _>(&mut transport).unwrap(), Shape::Circle(2.5));
        assert_eq!(transport.remaining(), 0);
    }

    #[test]
    fn discriminant_equal_to_count_is_rejected() {
        let mut transport = MemoryTransport::new(vec![3u8, 0, 0, 0, 0]);
        let err = decode::<Shape, _>(&mut transport).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MalformedDiscriminant {
                type_name: "Shape",
                index: 3,
                alternatives: 3
            }
        ));
        // no payload byte was read
        assert_eq!(transport.remaining(), 4);
    }

    #[test]
    fn discriminant_uses_declared_width() {
        let mut wire = 0u32.to_ne_bytes().to_vec();
        wire.extend_from_slice(&7u16.to_ne_bytes());
        let mut transport = MemoryTransport::new(wire);
        assert_eq!(decode::<Wide, _>(&mut transport).unwrap(), Wide::Only(7));

        let mut transport = MemoryTransport::new(u32::MAX.to_ne_bytes().to_vec());
        let err = decode::<Wide, _>(&mut transport).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MalformedDiscriminant {
                index: 0xFFFF_FFFF,
                alternatives: 1,
                ..
            }
        ));
    }

    #[test]
    fn unions_nest_in_containers() {
        let shapes = vec![
            Some(Shape::Label("door".into())),
            None,
            Some(Shape::Point(())),
        ];
        let mut transport = encode_message(&shapes).unwrap().into_transport();
        let decoded: Vec<Option<Shape>> = decode(&mut transport).unwrap();
        assert_eq!(decoded, shapes);
    }
}
