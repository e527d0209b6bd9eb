use super::CurrencyId;
use crate::config::{COIN_VALUE, MAX_RESERVE_CURRENCIES};
use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use crate::Amount;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read-only description of a currency as registered on chain.
///
/// For a fractional currency, `currencies` lists the backing reserves and
/// `weights` their ratios in satoshi fraction of 100%; both vectors are
/// parallel. Pre-allocations are paid in declaration order on the
/// launch-confirmed clear; an all-zero recipient id routes the allocation to
/// the exporter of the clearing export.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CurrencyDefinition {
    pub name: String,
    pub id: CurrencyId,
    /// System (chain) that hosts this currency
    pub system_id: CurrencyId,
    /// For external bridges, the currency the gateway is mapped through
    pub gateway_id: Option<CurrencyId>,
    /// System the currency launched from
    pub launch_system_id: CurrencyId,
    pub fractional: bool,
    pub token: bool,
    pub pbaas_chain: bool,
    /// Basket that serves as the fee converter of a PBaaS chain or gateway
    pub gateway_converter: bool,
    /// Centrally controlled currencies may mint on their own import
    pub mintable: bool,
    pub currencies: Vec<CurrencyId>,
    pub weights: Vec<Amount>,
    pub pre_allocation: IndexMap<CurrencyId, Amount>,
    /// Issuance granted to the gateway converter on a PBaaS launch
    pub gateway_converter_issuance: Amount,
    /// Fraction of every pre-conversion diverted to the carve-out pool
    pub total_carve_out: Amount,
    pub currency_registration_fee: Amount,
}

impl CurrencyDefinition {
    pub fn is_gateway(&self) -> bool {
        self.gateway_id.is_some()
    }

    /// The id imports from this system arrive under: the mapped gateway
    /// currency for gateways, otherwise the system itself.
    pub fn native_system_id(&self) -> CurrencyId {
        self.gateway_id.unwrap_or(self.system_id)
    }

    /// Reserve id -> index into the parallel weight/reserve vectors
    pub fn currency_index_map(&self) -> BTreeMap<CurrencyId, usize> {
        self.currencies
            .iter()
            .enumerate()
            .map(|(idx, id)| (*id, idx))
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        if self.fractional {
            let count = self.currencies.len();
            if count == 0 || count > MAX_RESERVE_CURRENCIES || self.weights.len() != count {
                return false;
            }
            let total: Amount = self.weights.iter().sum();
            if total > COIN_VALUE || self.weights.iter().any(|w| *w <= 0) {
                return false;
            }
        }
        !self.id.is_zero()
    }
}

/// Resolves currency ids to definitions. The registry owns its caching
/// discipline and must be safe to share across validation threads; the
/// engine only reads through it and fails an import when a required
/// definition is missing.
pub trait CurrencyRegistry {
    fn currency(&self, id: &CurrencyId) -> Option<CurrencyDefinition>;
}

impl CurrencyRegistry for BTreeMap<CurrencyId, CurrencyDefinition> {
    fn currency(&self, id: &CurrencyId) -> Option<CurrencyDefinition> {
        self.get(id).cloned()
    }
}

impl Serializer for CurrencyDefinition {
    fn write(&self, writer: &mut Writer) {
        self.name.write(writer);
        self.id.write(writer);
        self.system_id.write(writer);
        self.gateway_id.write(writer);
        self.launch_system_id.write(writer);
        self.fractional.write(writer);
        self.token.write(writer);
        self.pbaas_chain.write(writer);
        self.gateway_converter.write(writer);
        self.mintable.write(writer);
        self.currencies.write(writer);
        self.weights.write(writer);
        writer.write_compact_size(self.pre_allocation.len() as u64);
        for (id, amount) in &self.pre_allocation {
            id.write(writer);
            amount.write(writer);
        }
        self.gateway_converter_issuance.write(writer);
        self.total_carve_out.write(writer);
        self.currency_registration_fee.write(writer);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let name = String::read(reader)?;
        let id = CurrencyId::read(reader)?;
        let system_id = CurrencyId::read(reader)?;
        let gateway_id = Option::read(reader)?;
        let launch_system_id = CurrencyId::read(reader)?;
        let fractional = bool::read(reader)?;
        let token = bool::read(reader)?;
        let pbaas_chain = bool::read(reader)?;
        let gateway_converter = bool::read(reader)?;
        let mintable = bool::read(reader)?;
        let currencies = Vec::read(reader)?;
        let weights = Vec::read(reader)?;
        let prealloc_len = reader.read_length()?;
        let mut pre_allocation = IndexMap::new();
        for _ in 0..prealloc_len {
            let id = CurrencyId::read(reader)?;
            let amount = i64::read(reader)?;
            if pre_allocation.insert(id, amount).is_some() {
                return Err(ReaderError::InvalidValue);
            }
        }
        Ok(CurrencyDefinition {
            name,
            id,
            system_id,
            gateway_id,
            launch_system_id,
            fractional,
            token,
            pbaas_chain,
            gateway_converter,
            mintable,
            currencies,
            weights,
            pre_allocation,
            gateway_converter_issuance: i64::read(reader)?,
            total_carve_out: i64::read(reader)?,
            currency_registration_fee: i64::read(reader)?,
        })
    }

    fn size(&self) -> usize {
        self.to_bytes().len()
    }
}
