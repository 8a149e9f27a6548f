//! Generic shapes: sequences, maps, optionals, and tuples.
//!
//! Each impl decodes its element types back through [`Decoder::decode`], so
//! any nesting of supported types works without further code.

use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

use ipcwire_transport::Transport;

use crate::decoder::{Decode, Decoder};
use crate::encoder::{Encode, Encoder};
use crate::error::{DecodeError, DecodeResult, EncodeResult};

impl<T: Decode> Decode for Vec<T> {
    fn decode<R: Transport + ?Sized>(decoder: &mut Decoder<'_, R>) -> DecodeResult<Self> {
        let length = decoder.decode_size::<T>()?;
        let mut items = Vec::new();
        items
            .try_reserve_exact(length)
            .map_err(|_| DecodeError::OutOfMemory { length })?;
        for _ in 0..length {
            items.push(decoder.decode()?);
        }
        Ok(items)
    }
}

impl<T: Encode> Encode for [T] {
    fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
        encoder.encode_size(self.len())?;
        self.iter().try_for_each(|item| encoder.encode(item))
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
        self.as_slice().encode(encoder)
    }
}

/// Pairs are inserted in wire order, so a repeated key keeps the value of
/// its last occurrence.
impl<K, V, S> Decode for HashMap<K, V, S>
where
    K: Decode + Eq + Hash,
    V: Decode,
    S: BuildHasher + Default,
{
    fn decode<R: Transport + ?Sized>(decoder: &mut Decoder<'_, R>) -> DecodeResult<Self> {
        let length = decoder.decode_size::<(K, V)>()?;
        let mut map = HashMap::with_hasher(S::default());
        map.try_reserve(length)
            .map_err(|_| DecodeError::OutOfMemory { length })?;
        for _ in 0..length {
            let key = decoder.decode()?;
            let value = decoder.decode()?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<K: Encode, V: Encode, S> Encode for HashMap<K, V, S> {
    fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
        encoder.encode_size(self.len())?;
        for (key, value) in self {
            encoder.encode(key)?;
            encoder.encode(value)?;
        }
        Ok(())
    }
}

impl<K: Decode + Ord, V: Decode> Decode for BTreeMap<K, V> {
    fn decode<R: Transport + ?Sized>(decoder: &mut Decoder<'_, R>) -> DecodeResult<Self> {
        let length = decoder.decode_size::<(K, V)>()?;
        let mut map = BTreeMap::new();
        for _ in 0..length {
            let key = decoder.decode()?;
            let value = decoder.decode()?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<K: Encode, V: Encode> Encode for BTreeMap<K, V> {
    fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
        encoder.encode_size(self.len())?;
        for (key, value) in self {
            encoder.encode(key)?;
            encoder.encode(value)?;
        }
        Ok(())
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode<R: Transport + ?Sized>(decoder: &mut Decoder<'_, R>) -> DecodeResult<Self> {
        if decoder.decode::<bool>()? {
            decoder.decode().map(Some)
        } else {
            Ok(None)
        }
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
        encoder.encode(&self.is_some())?;
        match self {
            Some(value) => encoder.encode(value),
            None => Ok(()),
        }
    }
}

macro_rules! impl_tuple {
    ($($name:ident),+) => {
        impl<$($name: Decode),+> Decode for ($($name,)+) {
            fn decode<R: Transport + ?Sized>(decoder: &mut Decoder<'_, R>) -> DecodeResult<Self> {
                Ok(($(decoder.decode::<$name>()?,)+))
            }
        }

        impl<$($name: Encode),+> Encode for ($($name,)+) {
            #[allow(non_snake_case)]
            fn encode(&self, encoder: &mut Encoder<'_>) -> EncodeResult<()> {
                let ($($name,)+) = self;
                $(encoder.encode($name)?;)+
                Ok(())
            }
        }
    };
}

impl_tuple!(A);
impl_tuple!(A, B);
impl_tuple!(A, B, C);
impl_tuple!(A, B, C, D);
impl_tuple!(A, B, C, D, E);
impl_tuple!(A, B, C, D, E, F);
