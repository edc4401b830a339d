//! Compact serialisable sets of integer IDs.
//!
//! Static edge-group membership can reach tens of thousands of endpoint IDs;
//! a roaring bitmap keeps those sets small in memory and on disk. The JSON
//! wire format is a quoted base64 blob (or `null` when the set was never
//! populated) and must stay stable: stored records depend on it.

use std::fmt;
use std::marker::PhantomData;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use roaring::RoaringBitmap;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// A set of `u32`-convertible IDs backed by a roaring bitmap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roar<T> {
    bitmap: Option<RoaringBitmap>,
    _marker: PhantomData<T>,
}

impl<T: Into<u32> + From<u32> + Copy> Roar<T> {
    pub fn new() -> Self {
        Self {
            bitmap: None,
            _marker: PhantomData,
        }
    }

    pub fn add(&mut self, value: T) {
        self.bitmap
            .get_or_insert_with(RoaringBitmap::new)
            .insert(value.into());
    }

    pub fn remove(&mut self, value: T) {
        if let Some(bitmap) = &mut self.bitmap {
            bitmap.remove(value.into());
        }
    }

    pub fn contains(&self, value: T) -> bool {
        self.bitmap
            .as_ref()
            .is_some_and(|bitmap| bitmap.contains(value.into()))
    }

    pub fn len(&self) -> usize {
        self.bitmap
            .as_ref()
            .map_or(0, |bitmap| bitmap.len() as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Union with another set, in place.
    pub fn union(&mut self, other: &Roar<T>) {
        let Some(theirs) = &other.bitmap else {
            return;
        };
        match &mut self.bitmap {
            Some(ours) => *ours |= theirs,
            None => self.bitmap = Some(theirs.clone()),
        }
    }

    /// Intersection with another set, in place.
    pub fn intersection(&mut self, other: &Roar<T>) {
        match (&mut self.bitmap, &other.bitmap) {
            (Some(ours), Some(theirs)) => *ours &= theirs,
            (Some(ours), None) => ours.clear(),
            (None, _) => {}
        }
    }

    /// Sorted, de-duplicated contents.
    pub fn to_vec(&self) -> Vec<T> {
        match &self.bitmap {
            Some(bitmap) => bitmap.iter().map(T::from).collect(),
            None => Vec::new(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.bitmap.iter().flat_map(|bitmap| bitmap.iter().map(T::from))
    }

    pub fn from_slice(values: &[T]) -> Self {
        let mut roar = Self::new();
        for value in values {
            roar.add(*value);
        }
        roar
    }
}

impl<T> Serialize for Roar<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &self.bitmap {
            None => serializer.serialize_none(),
            Some(bitmap) => {
                let mut bytes = Vec::with_capacity(bitmap.serialized_size());
                bitmap
                    .serialize_into(&mut bytes)
                    .map_err(serde::ser::Error::custom)?;
                serializer.serialize_str(&BASE64.encode(bytes))
            }
        }
    }
}

impl<'de, T> Deserialize<'de> for Roar<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RoarVisitor<T>(PhantomData<T>);

        impl<'de, T> Visitor<'de> for RoarVisitor<T> {
            type Value = Roar<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("null or a base64-encoded roaring bitmap")
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(Roar {
                    bitmap: None,
                    _marker: PhantomData,
                })
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                self.visit_none()
            }

            fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
            where
                D: Deserializer<'de>,
            {
                deserializer.deserialize_str(self)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                let bytes = BASE64.decode(value).map_err(de::Error::custom)?;
                let bitmap =
                    RoaringBitmap::deserialize_from(&bytes[..]).map_err(de::Error::custom)?;
                Ok(Roar {
                    bitmap: Some(bitmap),
                    _marker: PhantomData,
                })
            }
        }

        deserializer.deserialize_option(RoarVisitor(PhantomData))
    }
}
