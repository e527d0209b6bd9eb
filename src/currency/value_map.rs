use super::CurrencyId;
use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use crate::Amount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// Ordered mapping currency id -> signed satoshi amount.
///
/// Iteration is always in canonical (sorted id) order. A canonical map has no
/// zero entries; arithmetic may produce zeros, so callers canonicalize before
/// comparing or signing. Arithmetic is componentwise and saturating at the
/// i64 range; the engine's conservation checks reject any state a saturated
/// sum could produce.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueMap(pub BTreeMap<CurrencyId, Amount>);

impl ValueMap {
    pub fn new() -> Self {
        ValueMap(BTreeMap::new())
    }

    /// Build from parallel id/amount vectors, summing duplicate ids.
    pub fn from_vectors(currencies: &[CurrencyId], amounts: &[Amount]) -> Self {
        let mut map = ValueMap::new();
        for (id, amount) in currencies.iter().zip(amounts) {
            map.add_value(*id, *amount);
        }
        map
    }

    pub fn value_of(&self, id: &CurrencyId) -> Amount {
        self.0.get(id).copied().unwrap_or(0)
    }

    pub fn add_value(&mut self, id: CurrencyId, value: Amount) -> &mut Self {
        let entry = self.0.entry(id).or_insert(0);
        *entry = entry.saturating_add(value);
        self
    }

    pub fn set_value(&mut self, id: CurrencyId, value: Amount) -> &mut Self {
        self.0.insert(id, value);
        self
    }

    pub fn remove(&mut self, id: &CurrencyId) -> Amount {
        self.0.remove(id).unwrap_or(0)
    }

    /// Drop zero entries. Idempotent.
    pub fn canonical(&self) -> ValueMap {
        ValueMap(
            self.0
                .iter()
                .filter(|(_, v)| **v != 0)
                .map(|(k, v)| (*k, *v))
                .collect(),
        )
    }

    pub fn is_canonical(&self) -> bool {
        self.0.values().all(|v| *v != 0)
    }

    pub fn has_negative(&self) -> bool {
        self.0.values().any(|v| *v < 0)
    }

    pub fn has_positive(&self) -> bool {
        self.0.values().any(|v| *v > 0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CurrencyId, &Amount)> {
        self.0.iter()
    }

    pub fn first(&self) -> Option<(&CurrencyId, &Amount)> {
        self.0.iter().next()
    }

    /// Dense vector against an ordered currency list, zero-padded for missing
    /// ids. Entries outside the list are ignored.
    pub fn as_vector(&self, currencies: &[CurrencyId]) -> Vec<Amount> {
        currencies.iter().map(|id| self.value_of(id)).collect()
    }
}

impl Add for ValueMap {
    type Output = ValueMap;
    fn add(mut self, other: ValueMap) -> ValueMap {
        self += other;
        self
    }
}

impl AddAssign for ValueMap {
    fn add_assign(&mut self, other: ValueMap) {
        for (id, value) in other.0 {
            self.add_value(id, value);
        }
    }
}

impl Sub for ValueMap {
    type Output = ValueMap;
    fn sub(mut self, other: ValueMap) -> ValueMap {
        self -= other;
        self
    }
}

impl<'a> Sub<&'a ValueMap> for ValueMap {
    type Output = ValueMap;
    fn sub(mut self, other: &'a ValueMap) -> ValueMap {
        for (id, value) in &other.0 {
            self.add_value(*id, value.saturating_neg());
        }
        self
    }
}

impl SubAssign for ValueMap {
    fn sub_assign(&mut self, other: ValueMap) {
        for (id, value) in other.0 {
            self.add_value(id, value.saturating_neg());
        }
    }
}

impl Neg for ValueMap {
    type Output = ValueMap;
    fn neg(self) -> ValueMap {
        ValueMap(
            self.0
                .into_iter()
                .map(|(k, v)| (k, v.saturating_neg()))
                .collect(),
        )
    }
}

impl Mul<Amount> for ValueMap {
    type Output = ValueMap;
    fn mul(self, rhs: Amount) -> ValueMap {
        ValueMap(
            self.0
                .into_iter()
                .map(|(k, v)| (k, v.saturating_mul(rhs)))
                .collect(),
        )
    }
}

impl Div<Amount> for ValueMap {
    type Output = ValueMap;
    fn div(self, rhs: Amount) -> ValueMap {
        ValueMap(self.0.into_iter().map(|(k, v)| (k, v / rhs)).collect())
    }
}

impl Serializer for ValueMap {
    fn write(&self, writer: &mut Writer) {
        writer.write_compact_size(self.0.len() as u64);
        for (id, value) in &self.0 {
            id.write(writer);
            value.write(writer);
        }
    }

    // Signed-message encoders require canonical maps: sorted, unique ids and
    // no zero entries. Anything else is rejected.
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let len = reader.read_length()?;
        let mut map = BTreeMap::new();
        let mut last: Option<CurrencyId> = None;
        for _ in 0..len {
            let id = CurrencyId::read(reader)?;
            let value = i64::read(reader)?;
            if value == 0 {
                return Err(ReaderError::InvalidValue);
            }
            if let Some(prev) = last {
                if id <= prev {
                    return Err(ReaderError::InvalidValue);
                }
            }
            last = Some(id);
            map.insert(id, value);
        }
        Ok(ValueMap(map))
    }

    fn size(&self) -> usize {
        let mut bytes = Vec::new();
        let mut writer = Writer::new(&mut bytes);
        writer.write_compact_size(self.0.len() as u64);
        bytes.len() + self.0.len() * (20 + 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> CurrencyId {
        CurrencyId::new([byte; 20])
    }

    #[test]
    fn componentwise_arithmetic() {
        let mut a = ValueMap::new();
        a.add_value(id(1), 100).add_value(id(2), 50);
        let mut b = ValueMap::new();
        b.add_value(id(2), 25).add_value(id(3), -10);

        let sum = a.clone() + b.clone();
        assert_eq!(sum.value_of(&id(1)), 100);
        assert_eq!(sum.value_of(&id(2)), 75);
        assert_eq!(sum.value_of(&id(3)), -10);

        let diff = a - b;
        assert_eq!(diff.value_of(&id(2)), 25);
        assert_eq!(diff.value_of(&id(3)), 10);
        assert!(!diff.has_negative());
    }

    #[test]
    fn canonical_drops_zeros_and_is_idempotent() {
        let mut map = ValueMap::new();
        map.add_value(id(1), 5).add_value(id(2), 0);
        let canonical = map.canonical();
        assert_eq!(canonical.len(), 1);
        assert_eq!(canonical.canonical(), canonical);
    }

    #[test]
    fn vectorization_pads_missing() {
        let mut map = ValueMap::new();
        map.add_value(id(3), 7);
        let vec = map.as_vector(&[id(1), id(3), id(5)]);
        assert_eq!(vec, vec![0, 7, 0]);
    }

    #[test]
    fn wire_rejects_zero_entries() {
        let mut map = ValueMap::new();
        map.add_value(id(1), 5).add_value(id(2), 0);
        let bytes = map.to_bytes();
        assert!(ValueMap::from_bytes(&bytes).is_err());
        assert!(ValueMap::from_bytes(&map.canonical().to_bytes()).is_ok());
    }

    #[test]
    fn wire_rejects_unsorted() {
        let mut bytes = Vec::new();
        let mut writer = Writer::new(&mut bytes);
        writer.write_compact_size(2);
        id(2).write(&mut writer);
        5i64.write(&mut writer);
        id(1).write(&mut writer);
        5i64.write(&mut writer);
        assert!(ValueMap::from_bytes(&bytes).is_err());
    }

    #[test]
    fn scale_and_divide() {
        let mut map = ValueMap::new();
        map.add_value(id(1), 11);
        assert_eq!((map.clone() * 2).value_of(&id(1)), 22);
        assert_eq!((map / 2).value_of(&id(1)), 5);
    }
}
