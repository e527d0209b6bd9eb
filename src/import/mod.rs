//! Import settlement: applying a batch of reserve transfers to a reverted
//! currency state.
//!
//! The processor walks the batch once, accounting fees and principal per
//! transfer, then settles the block in a fixed order: carve-outs, burn
//! absorption, batched clearing, the per-reserve ledger update, launch-phase
//! price reconstruction, emission, and the final conservation check. Any
//! failure aborts the import; outputs and accumulators of a failed import
//! are undefined and must be discarded.

mod descriptor;

pub use descriptor::{ReserveInOuts, TransactionDescriptor};

use crate::config::{COIN_VALUE, MAX_EXPORT_TRANSFERS, MIN_CONVERSION_FEE};
use crate::currency::{
    BlockCurrencyState, CurrencyDefinition, CurrencyId, CurrencyRegistry, CurrencyState, ValueMap,
};
use crate::error::ImportError;
use crate::math;
use crate::transfer::{
    conversion_fee, conversion_fee_no_min, ReserveTransfer, TokenOutput, TransferDestination,
    TxOutput,
};
use crate::Amount;
use indexmap::IndexMap;

/// Portion of the block's fees owed to the export that carried the batch,
/// scaling from 50% up to 75% with the number of transfers.
pub fn calculate_export_fee(fee: Amount, num_transfers: u32) -> Amount {
    let count = (num_transfers as usize).clamp(1, MAX_EXPORT_TRANSFERS) as Amount;
    let max = MAX_EXPORT_TRANSFERS as Amount;
    let ratio = 50_000_000 + (25_000_000 / max) * (count - 1);
    math::mul_div(fee, ratio, COIN_VALUE).unwrap_or(fee)
}

/// The exporter keeps a tenth of the export fee, floored at the minimum
/// conversion fee but never more than the fee itself.
pub fn export_reward(export_fee: Amount) -> Amount {
    let reward = export_fee / 10;
    if reward < MIN_CONVERSION_FEE {
        export_fee.min(MIN_CONVERSION_FEE)
    } else {
        reward
    }
}

/// Who receives fee payouts when they cannot stay in the basket. Replaces
/// the node-local globals of older designs with an explicit input so the
/// engine stays a pure function.
#[derive(Clone, Debug, Default)]
pub struct FeeRecipientPolicy {
    /// Explicitly configured miner payout address
    pub miner_address: Option<TransferDestination>,
    pub notary_id: Option<CurrencyId>,
    pub default_id: Option<CurrencyId>,
    pub node_id: Option<CurrencyId>,
    pub notary_pubkey: Option<[u8; 33]>,
}

impl FeeRecipientPolicy {
    /// First configured recipient wins; the import currency's own identity
    /// is the terminal fallback.
    pub fn resolve(&self, import_currency_id: CurrencyId) -> TransferDestination {
        if let Some(dest) = &self.miner_address {
            return dest.clone();
        }
        if let Some(id) = self.notary_id.or(self.default_id).or(self.node_id) {
            return TransferDestination::identity(id);
        }
        if let Some(key) = self.notary_pubkey {
            return TransferDestination {
                kind: crate::transfer::DestinationKind::PublicKey(key),
                gateway_id: None,
                fees: 0,
            };
        }
        TransferDestination::identity(import_currency_id)
    }
}

/// Everything the processor reads from outside the batch
pub struct ImportEnv<'a> {
    pub registry: &'a dyn CurrencyRegistry,
    /// 160-bit id of the host chain
    pub chain_id: CurrencyId,
    pub fee_recipient: FeeRecipientPolicy,
}

/// Validity gate for the import's provenance, decided by the surrounding
/// transaction layer and checked before processing. A definition import
/// whose export transaction resolves bypasses the export-output chain
/// checks entirely; every other import requires the full chain.
#[derive(Clone, Copy, Debug)]
pub struct ImportGate {
    pub export_resolvable: bool,
    pub is_definition_import: bool,
    pub export_outputs_valid: bool,
}

impl ImportGate {
    pub fn validate(&self) -> bool {
        (self.export_resolvable && self.is_definition_import) || self.export_outputs_valid
    }
}

/// Settlement of one import batch
#[derive(Clone, Debug)]
pub struct ImportResult {
    pub outputs: Vec<TxOutput>,
    /// Currency conjured by this import (minted, or controlled by the
    /// remote source system)
    pub imported_currency: ValueMap,
    /// Currency drawn from the local cross-chain reserve deposit pool
    pub gateway_deposits_in: ValueMap,
    /// What the import transaction consumes
    pub spent_currency_out: ValueMap,
    pub new_state: BlockCurrencyState,
}

fn amount(value: Option<Amount>) -> Result<Amount, ImportError> {
    value.ok_or(ImportError::Overflow)
}

impl TransactionDescriptor {
    /// Apply `transfers` to the reverted `import_state`, producing outputs,
    /// cross-chain accounting, the next currency state, and this
    /// transaction ledger. Fees are assumed to be denominated in currencies
    /// of the source system.
    pub fn add_import_outputs(
        &mut self,
        source_system: &CurrencyDefinition,
        dest_system: &CurrencyDefinition,
        import_def: &CurrencyDefinition,
        import_state: &BlockCurrencyState,
        transfers: &[ReserveTransfer],
        env: &ImportEnv,
    ) -> Result<ImportResult, ImportError> {
        if !import_state.is_valid() || !import_def.is_valid() {
            return Err(ImportError::InvalidInput("invalid import state or currency"));
        }

        let mut new_state = import_state.clone();
        new_state.clear_for_next_block();

        let is_fractional = import_def.fractional;
        let currency_index_map = import_def.currency_index_map();
        let system_source_id = source_system.id;
        let system_dest_id = dest_system.id;
        let import_currency_id = import_def.id;
        let num_currencies = import_def.currencies.len();
        let system_dest_idx = currency_index_map.get(&system_dest_id).copied();

        // imports must come from a system-level currency
        if source_system.native_system_id() != system_source_id {
            return Err(ImportError::InvalidInput(
                "source system is not a gateway, PBaaS chain, or system currency",
            ));
        }
        let is_cross_system = system_source_id != system_dest_id;

        // n-way conversion matrix: [source reserve][destination reserve]
        let mut cross_conversions = vec![vec![0 as Amount; num_currencies]; num_currencies];

        let mut reserve_converted = ValueMap::new();
        let mut fractional_converted = ValueMap::new();
        let mut pre_converted_output = ValueMap::new();
        let mut pre_converted_reserves = ValueMap::new();
        let mut pre_alloc_total: Amount = 0;

        // burned supply lowers the price without touching reserves
        let mut burned_change_price: Amount = 0;

        let mut transfer_fees = ValueMap::new();
        let mut converted_fees = ValueMap::new();
        let mut liquidity_fees = ValueMap::new();

        let mut carve_out: Option<Amount> = None;
        let mut total_carve_outs = ValueMap::new();
        let mut total_minted: Amount = 0;

        let mut outputs: Vec<TxOutput> = Vec::new();
        let mut imported_currency = ValueMap::new();
        let mut gateway_deposits_in = ValueMap::new();
        let mut spent_currency_out = ValueMap::new();

        self.native_in = 0;
        self.num_transfers = 0;
        for in_outs in self.currencies.values_mut() {
            in_outs.reserve_in = 0;
            in_outs.reserve_out = 0;
        }
        self.flags |= Self::IS_IMPORT;

        for i in 0..=transfers.len() {
            let mut cur_transfer = if i == transfers.len() {
                // the primary fee output closes the batch
                ReserveTransfer::new(
                    ReserveTransfer::VALID | ReserveTransfer::FEE_OUTPUT,
                    env.chain_id,
                    0,
                    env.chain_id,
                    0,
                    env.chain_id,
                    env.fee_recipient.resolve(import_currency_id),
                )
            } else if import_state.is_refunding() {
                transfers[i].refund_transfer()
            } else {
                transfers[i].clone()
            };

            let to_source = cur_transfer.is_import_to_source();
            let first_is_import = import_currency_id == cur_transfer.first_currency();
            if (!first_is_import && to_source) || (first_is_import && !to_source) {
                return Err(ImportError::PolicyViolation(
                    "import-to-source flag does not match the transfer's source currency",
                ));
            }

            let currency_dest = if import_currency_id == cur_transfer.dest_currency_id {
                import_def.clone()
            } else {
                env.registry
                    .currency(&cur_transfer.dest_currency_id)
                    .ok_or(ImportError::MissingCurrency(cur_transfer.dest_currency_id))?
            };

            if i != transfers.len() && !cur_transfer.is_valid() {
                return Err(ImportError::InvalidInput("invalid reserve transfer on export"));
            }

            let mut new_out: Option<TxOutput> = None;

            if i == transfers.len() {
                if import_state.is_launch_clear() {
                    // half the launch cost is charged here; the other half
                    // was paid at definition
                    let registration_fee = source_system.currency_registration_fee;
                    transfer_fees.add_value(import_def.launch_system_id, registration_fee);
                    if import_def.launch_system_id != system_dest_id {
                        imported_currency.add_value(import_def.launch_system_id, registration_fee);
                        self.add_reserve_input(import_def.launch_system_id, registration_fee);
                    } else {
                        self.native_in += registration_fee;
                    }

                    if import_state.is_launch_confirmed() {
                        // all pre-launch exports are in: release pre-allocations
                        for (alloc_id, alloc_amount) in &import_def.pre_allocation {
                            let alloc_amount = *alloc_amount;
                            self.add_native_out_converted(import_currency_id, alloc_amount);
                            if import_currency_id != system_dest_id {
                                self.add_reserve_out_converted(import_currency_id, alloc_amount);
                            }
                            pre_alloc_total += alloc_amount;

                            // an all-zero recipient pays the final exporter
                            let destination = if alloc_id.is_zero() {
                                cur_transfer.destination.clone()
                            } else {
                                TransferDestination::identity(*alloc_id)
                            };
                            if import_currency_id == system_dest_id {
                                self.native_out += alloc_amount;
                                outputs.push(TxOutput::Payment {
                                    destination,
                                    amount: alloc_amount,
                                });
                            } else {
                                self.add_reserve_output(import_currency_id, alloc_amount);
                                outputs.push(TxOutput::Token {
                                    destination,
                                    token: TokenOutput::new(import_currency_id, alloc_amount),
                                    native_amount: 0,
                                });
                            }
                        }
                        if import_def.pbaas_chain && import_def.gateway_converter_issuance != 0 {
                            pre_alloc_total += import_def.gateway_converter_issuance;
                            self.add_native_out_converted(
                                import_currency_id,
                                import_def.gateway_converter_issuance,
                            );
                            self.native_out += import_def.gateway_converter_issuance;
                        } else if import_def.gateway_converter
                            && import_def.system_id == system_dest_id
                        {
                            // the converter's pre-launch system reserves join
                            // the clearing as pre-converted deposits
                            if let Some(idx) = system_dest_idx {
                                let deposit = import_state.reserves[idx];
                                if deposit != 0 {
                                    reserve_converted.set_value(system_dest_id, deposit);
                                    pre_converted_reserves.set_value(system_dest_id, deposit);
                                }
                            }
                        }
                    }
                }

                // convert the batch's fees to the destination system currency
                let mut total_native_fee: Amount = 0;
                if import_state.is_launch_confirmed()
                    && is_fractional
                    && system_dest_idx.map_or(false, |idx| import_state.reserves[idx] != 0)
                {
                    let dest_idx = system_dest_idx.expect("checked above");

                    // half of all fees stay in the basket as liquidity
                    liquidity_fees = transfer_fees.clone() / 2;
                    transfer_fees -= liquidity_fees.clone();

                    let mut fee_conversions: IndexMap<CurrencyId, (Amount, CurrencyId, Amount)> =
                        IndexMap::new();
                    for (fee_id, fee_amount) in transfer_fees.iter() {
                        let fee_id = *fee_id;
                        let fee_amount = *fee_amount;
                        if fee_id != import_currency_id && fee_id != system_dest_id {
                            let idx = *currency_index_map
                                .get(&fee_id)
                                .ok_or(ImportError::InvalidInput("invalid fee currency"))?;
                            reserve_converted.add_value(fee_id, fee_amount);
                            cross_conversions[idx][dest_idx] += fee_amount;
                            let price = if import_state.is_launch_complete() {
                                import_state.conversion_price[idx]
                            } else {
                                import_state.via_conversion_price[idx]
                            };
                            let mut fee_value =
                                amount(CurrencyState::reserve_to_native_raw(fee_amount, price))?;
                            if system_dest_id == import_currency_id {
                                self.add_native_out_converted(fee_id, fee_value);
                                total_native_fee += fee_value;
                            } else {
                                // basket is not the native currency: one more
                                // conversion through the via price
                                fee_value = amount(CurrencyState::native_to_reserve_raw(
                                    fee_value,
                                    import_state.via_conversion_price[dest_idx],
                                ))?;
                                total_native_fee += fee_value;
                                self.native_in += fee_value;
                                self.add_reserve_out_converted(system_dest_id, fee_value);
                            }
                            fee_conversions.insert(fee_id, (fee_amount, system_dest_id, fee_value));
                        } else if fee_id == system_dest_id {
                            total_native_fee += fee_amount;
                        } else {
                            // fees already denominated in the basket convert
                            // in the first, non-via stage
                            let dest_price = import_state.conversion_price[dest_idx];
                            fractional_converted.add_value(system_dest_id, fee_amount);
                            self.add_native_out_converted(fee_id, -fee_amount);
                            let converted = amount(CurrencyState::native_to_reserve_raw(
                                fee_amount, dest_price,
                            ))?;
                            total_native_fee += converted;
                            self.native_in += converted;
                            self.add_reserve_out_converted(system_dest_id, converted);
                            fee_conversions.insert(fee_id, (fee_amount, system_dest_id, converted));
                        }
                    }
                    converted_fees = transfer_fees.clone();
                    for (from_id, (from_amount, to_id, to_amount)) in &fee_conversions {
                        converted_fees.add_value(*from_id, -from_amount);
                        converted_fees.add_value(*to_id, *to_amount);
                    }
                    converted_fees = converted_fees.canonical();
                } else {
                    // no conversion path: reserve-denominated fees stay
                    // recorded on the currency, native fees pay out directly
                    for (fee_id, fee_amount) in transfer_fees.iter() {
                        if *fee_id != system_dest_id && *fee_amount != 0 {
                            if let Some(idx) = currency_index_map.get(fee_id) {
                                new_state.fees[*idx] += fee_amount;
                            }
                            self.add_reserve_output(*fee_id, *fee_amount);
                        } else if *fee_amount != 0 {
                            total_native_fee += fee_amount;
                        }
                    }
                    converted_fees = transfer_fees.clone();
                }

                // exporter reward comes off the top of the export fee; the
                // remainder accrues to the export fee pool
                let export_fee = calculate_export_fee(total_native_fee, self.num_transfers);
                let exporter_reward = export_reward(export_fee);
                self.native_out += total_native_fee;
                new_state.native_fees += total_native_fee;
                if !cur_transfer.destination.is_valid() || exporter_reward == 0 {
                    break;
                }
                // the reward leaves the fee pool and pays the exporter
                // directly; only the remainder accrues to the export pool
                self.native_out -= exporter_reward;
                cur_transfer = ReserveTransfer::new(
                    ReserveTransfer::VALID | ReserveTransfer::FEE_OUTPUT,
                    system_dest_id,
                    exporter_reward,
                    system_dest_id,
                    0,
                    system_dest_id,
                    cur_transfer.destination,
                );
            } else {
                self.num_transfers += 1;

                let mut explicit_fees = cur_transfer.fees;
                transfer_fees.add_value(cur_transfer.fee_currency_id, explicit_fees);

                // fees reserved for further routing convert to the next
                // system's native currency before this leg completes
                if cur_transfer.destination.has_gateway_leg() && cur_transfer.destination.fees != 0
                {
                    explicit_fees += cur_transfer.destination.fees;

                    let gateway_id = cur_transfer
                        .destination
                        .gateway_id
                        .expect("gateway leg checked");
                    let next_dest = env
                        .registry
                        .currency(&gateway_id)
                        .ok_or(ImportError::MissingCurrency(gateway_id))?;
                    let next_dest_sys = next_dest.native_system_id();
                    if cur_transfer.fee_currency_id != next_dest_sys {
                        let fee_idx = currency_index_map.get(&cur_transfer.fee_currency_id);
                        let next_idx = currency_index_map.get(&next_dest_sys);
                        let (fee_idx, next_idx) = match (is_fractional, fee_idx, next_idx) {
                            (true, Some(f), Some(n)) => (*f, *n),
                            _ => {
                                return Err(ImportError::PolicyViolation(
                                    "next leg fee currency unavailable for conversion",
                                ))
                            }
                        };

                        // every pass-through conversion pays a doubled,
                        // no-minimum reserve-to-reserve fee
                        let pass_through_fee =
                            conversion_fee_no_min(cur_transfer.destination.fees) << 1;
                        cur_transfer.destination.fees -= pass_through_fee;
                        self.add_reserve_conversion_fees(
                            cur_transfer.fee_currency_id,
                            pass_through_fee,
                        );
                        transfer_fees.add_value(cur_transfer.fee_currency_id, pass_through_fee);

                        reserve_converted
                            .add_value(cur_transfer.fee_currency_id, cur_transfer.destination.fees);
                        cross_conversions[fee_idx][next_idx] += cur_transfer.destination.fees;
                        let fee_value = amount(CurrencyState::reserve_to_native_raw(
                            cur_transfer.destination.fees,
                            import_state.conversion_price[fee_idx],
                        ))?;
                        let reserve_from_frac = amount(CurrencyState::native_to_reserve_raw(
                            fee_value,
                            import_state.via_conversion_price[next_idx],
                        ))?;
                        cur_transfer.destination.fees = reserve_from_frac;
                        self.add_reserve_input(next_dest_sys, reserve_from_frac);
                        self.add_reserve_output(next_dest_sys, reserve_from_frac);
                        self.add_reserve_out_converted(next_dest_sys, reserve_from_frac);
                    }
                }

                if cur_transfer.fee_currency_id == system_dest_id {
                    self.native_in += explicit_fees;
                } else {
                    self.add_reserve_input(cur_transfer.fee_currency_id, explicit_fees);
                }

                if is_cross_system {
                    let input_id = cur_transfer.first_currency();
                    let input_value = cur_transfer.first_value();
                    let mut total_currency_input = input_value;

                    // source system currency is minted on the way in; the
                    // destination system's own currency must already sit in
                    // the deposit pool
                    if cur_transfer.fee_currency_id == system_source_id {
                        if !currency_index_map.contains_key(&system_source_id) {
                            return Err(ImportError::PolicyViolation(
                                "transfer fees invalid for receiving system",
                            ));
                        }
                        imported_currency.add_value(system_source_id, explicit_fees);
                    } else if cur_transfer.fee_currency_id == system_dest_id {
                        gateway_deposits_in.add_value(system_dest_id, explicit_fees);
                    } else if cur_transfer.fee_currency_id == input_id
                        && is_fractional
                        && currency_index_map.contains_key(&cur_transfer.fee_currency_id)
                        && import_state.is_launch_confirmed()
                    {
                        total_currency_input += explicit_fees;
                    } else {
                        return Err(ImportError::PolicyViolation("pass-through fees invalid"));
                    }

                    let input_def = env
                        .registry
                        .currency(&input_id)
                        .ok_or(ImportError::MissingCurrency(input_id))?;
                    if cur_transfer.is_mint() {
                        return Err(ImportError::PolicyViolation(
                            "mint is not valid across systems",
                        ));
                    }

                    if total_currency_input != 0 {
                        if input_def.system_id == system_source_id
                            || (input_def.is_gateway()
                                && input_def.gateway_id == Some(system_source_id))
                        {
                            imported_currency.add_value(input_id, total_currency_input);
                        } else {
                            gateway_deposits_in.add_value(input_id, total_currency_input);
                        }
                        if input_value != 0 {
                            if input_id == system_dest_id {
                                self.native_in += input_value;
                            } else {
                                self.add_reserve_input(input_id, input_value);
                            }
                        }
                    }
                } else {
                    // same system: the declared fee must clear the base
                    // transfer fee after conversion through the basket
                    let mut fee_equivalent = cur_transfer.fees;
                    if cur_transfer.fee_currency_id != system_dest_id {
                        let fee_idx = currency_index_map.get(&cur_transfer.fee_currency_id);
                        let (fee_idx, valid) = match fee_idx {
                            Some(idx) if currency_dest.fractional => (*idx, true),
                            _ => (0, false),
                        };
                        if !valid {
                            return Err(ImportError::InvalidInput(
                                "invalid fee currency for transfer",
                            ));
                        }
                        fee_equivalent = amount(CurrencyState::reserve_to_native_raw(
                            fee_equivalent,
                            import_state.conversion_price[fee_idx],
                        ))?;
                        if let Some(dest_idx) = system_dest_idx {
                            fee_equivalent = amount(CurrencyState::native_to_reserve_raw(
                                cur_transfer.fees,
                                import_state.via_conversion_price[dest_idx],
                            ))?;
                        }
                    }

                    let required = cur_transfer.calculate_transfer_fee();
                    if fee_equivalent < required {
                        return Err(ImportError::FeeUnderpayment {
                            need: required,
                            have: fee_equivalent,
                        });
                    }

                    if cur_transfer.first_currency() == system_dest_id && !cur_transfer.is_mint() {
                        self.native_in += cur_transfer.first_value();
                    } else if cur_transfer.is_mint() {
                        self.add_reserve_input(
                            cur_transfer.dest_currency_id,
                            cur_transfer.first_value(),
                        );
                    } else {
                        self.add_reserve_input(
                            cur_transfer.first_currency(),
                            cur_transfer.first_value(),
                        );
                    }
                }
            }

            if cur_transfer.is_pre_conversion() {
                if import_def.launch_system_id != system_source_id {
                    return Err(ImportError::PolicyViolation(
                        "pre-conversion must come from the launch system",
                    ));
                }
                if import_state.is_launch_complete() {
                    return Err(ImportError::PolicyViolation(
                        "pre-conversion is not valid after launch",
                    ));
                }
                if !is_fractional
                    && cur_transfer.first_currency() != import_def.launch_system_id
                {
                    return Err(ImportError::PolicyViolation(
                        "pre-conversion source must be launch native or destination fractional",
                    ));
                }
                let cur_idx = *currency_index_map
                    .get(&cur_transfer.first_currency())
                    .ok_or(ImportError::InvalidInput("invalid currency for conversion"))?;

                let mut value_out = cur_transfer.first_value();
                let pre_conversion_fee =
                    conversion_fee(cur_transfer.first_value()).min(cur_transfer.first_value());
                value_out -= pre_conversion_fee;

                self.add_reserve_conversion_fees(cur_transfer.first_currency(), pre_conversion_fee);
                transfer_fees.add_value(cur_transfer.first_currency(), pre_conversion_fee);

                // launch-phase schedule prices the pre-conversion
                let converted = CurrencyState::reserve_to_native_raw(
                    value_out,
                    import_state.conversion_price[cur_idx],
                )
                .unwrap_or(0);

                let total_carve_out = *carve_out.get_or_insert(import_def.total_carve_out);

                if converted != 0 {
                    reserve_converted.add_value(cur_transfer.first_currency(), value_out);
                    pre_converted_reserves.add_value(cur_transfer.first_currency(), value_out);

                    if total_carve_out > 0 && total_carve_out < COIN_VALUE {
                        let kept = amount(CurrencyState::native_to_reserve_raw(
                            value_out,
                            COIN_VALUE - total_carve_out,
                        ))?;
                        total_carve_outs
                            .add_value(cur_transfer.first_currency(), value_out - kept);
                        value_out = kept;
                    }

                    if cur_transfer.first_currency() != system_dest_id {
                        // fractional keeps everything but fees and carve-outs
                        // in the reserve deposit; token launches pay the
                        // currency identity directly
                        if !is_fractional {
                            self.add_reserve_output(cur_transfer.first_currency(), value_out);
                            outputs.push(TxOutput::Token {
                                destination: TransferDestination::identity(import_currency_id),
                                token: TokenOutput::new(
                                    cur_transfer.first_currency(),
                                    value_out,
                                ),
                                native_amount: 0,
                            });
                        }
                    } else if !is_fractional {
                        self.native_out += value_out;
                        outputs.push(TxOutput::Payment {
                            destination: TransferDestination::identity(import_currency_id),
                            amount: value_out,
                        });
                    }

                    pre_converted_output.add_value(cur_transfer.first_currency(), converted);
                    self.add_native_out_converted(cur_transfer.first_currency(), converted);
                    self.add_native_out_converted(cur_transfer.dest_currency_id, converted);
                    if cur_transfer.dest_currency_id == system_dest_id {
                        self.native_out += converted;
                        if !import_state.is_launch_confirmed() {
                            self.native_in += converted;
                        }
                        new_out = Some(
                            cur_transfer
                                .to_output(ValueMap::new(), converted)
                                .ok_or(ImportError::UnsupportedDestination)?,
                        );
                    } else {
                        self.add_reserve_out_converted(cur_transfer.dest_currency_id, converted);
                        self.add_reserve_output(cur_transfer.dest_currency_id, converted);
                        if !import_state.is_launch_confirmed() {
                            self.add_reserve_input(cur_transfer.dest_currency_id, converted);
                        }
                        let mut values = ValueMap::new();
                        values.set_value(cur_transfer.dest_currency_id, converted);
                        new_out = Some(
                            cur_transfer
                                .to_output(values, 0)
                                .ok_or(ImportError::UnsupportedDestination)?,
                        );
                    }
                }
            } else if cur_transfer.is_conversion() {
                if cur_transfer.first_currency() == cur_transfer.dest_currency_id {
                    return Err(ImportError::PolicyViolation(
                        "conversion does not specify two currencies",
                    ));
                }

                // destination fractional of the source mints; source
                // fractional of the destination burns
                let to_fractional = import_currency_id == cur_transfer.dest_currency_id
                    && currency_dest.fractional
                    && currency_index_map.contains_key(&cur_transfer.first_currency());

                let source_currency = env
                    .registry
                    .currency(&cur_transfer.first_currency())
                    .ok_or(ImportError::MissingCurrency(cur_transfer.first_currency()))?;

                if !(to_fractional
                    || (import_currency_id == cur_transfer.first_currency()
                        && source_currency.fractional
                        && currency_index_map.contains_key(&cur_transfer.dest_currency_id)))
                {
                    return Err(ImportError::PolicyViolation(
                        "conversion must be between a fractional currency and one of its reserves",
                    ));
                }

                if cur_transfer.is_reserve_to_reserve()
                    && (!to_fractional
                        || cur_transfer.second_reserve_id.map_or(true, |second| {
                            second == cur_transfer.first_currency()
                                || !currency_index_map.contains_key(&second)
                        }))
                {
                    return Err(ImportError::PolicyViolation(
                        "invalid reserve to reserve conversion",
                    ));
                }

                let reserve_id = if to_fractional {
                    cur_transfer.first_currency()
                } else {
                    cur_transfer.dest_currency_id
                };
                let reserve_idx = currency_index_map[&reserve_id];

                let mut value_out = cur_transfer.first_value();
                if !cur_transfer.is_fee_output() {
                    let mut one_conversion_fee = conversion_fee(cur_transfer.first_value());
                    if cur_transfer.is_reserve_to_reserve() {
                        one_conversion_fee <<= 1;
                    }
                    one_conversion_fee = one_conversion_fee.min(cur_transfer.first_value());
                    value_out -= one_conversion_fee;
                    self.add_reserve_conversion_fees(
                        cur_transfer.first_currency(),
                        one_conversion_fee,
                    );
                    transfer_fees.add_value(cur_transfer.first_currency(), one_conversion_fee);
                }

                // the final amount is re-quantized after the batch clears;
                // this estimate settles the output at current prices
                let mut converted = if to_fractional {
                    reserve_converted.add_value(cur_transfer.first_currency(), value_out);
                    amount(CurrencyState::reserve_to_native_raw(
                        value_out,
                        import_state.conversion_price[reserve_idx],
                    ))?
                } else {
                    fractional_converted.add_value(cur_transfer.dest_currency_id, value_out);
                    amount(CurrencyState::native_to_reserve_raw(
                        value_out,
                        import_state.conversion_price[reserve_idx],
                    ))?
                };

                if converted != 0 {
                    let output_currency_id = if cur_transfer.is_reserve_to_reserve() {
                        // second hop out of the basket settles at the via
                        // price; the doubled fee already accounts for both
                        let second = cur_transfer.second_reserve_id.expect("validated above");
                        let out_idx = currency_index_map[&second];
                        converted = amount(CurrencyState::native_to_reserve_raw(
                            converted,
                            import_state.via_conversion_price[out_idx],
                        ))?;
                        cross_conversions[reserve_idx][out_idx] += value_out;
                        second
                    } else {
                        cur_transfer.dest_currency_id
                    };

                    if to_fractional && !cur_transfer.is_reserve_to_reserve() {
                        self.add_native_out_converted(cur_transfer.first_currency(), converted);
                        self.add_native_out_converted(cur_transfer.dest_currency_id, converted);
                        if cur_transfer.dest_currency_id == system_dest_id {
                            self.native_out += converted;
                            self.native_in += converted;
                        } else {
                            self.add_reserve_out_converted(
                                cur_transfer.dest_currency_id,
                                converted,
                            );
                            self.add_reserve_input(cur_transfer.dest_currency_id, converted);
                            self.add_reserve_output(cur_transfer.dest_currency_id, converted);
                        }
                    } else {
                        self.add_reserve_out_converted(output_currency_id, converted);
                        if output_currency_id == system_dest_id {
                            self.native_out += converted;
                        } else {
                            self.add_reserve_output(output_currency_id, converted);
                        }
                        // fractional input burns; reserve-to-reserve input
                        // was never added and leaves its fee in the basket
                        if !cur_transfer.is_reserve_to_reserve() {
                            self.add_native_out_converted(
                                cur_transfer.first_currency(),
                                -value_out,
                            );
                        }
                    }

                    let settled = if output_currency_id == system_dest_id {
                        cur_transfer.to_output(ValueMap::new(), converted)
                    } else {
                        let mut values = ValueMap::new();
                        values.set_value(output_currency_id, converted);
                        cur_transfer.to_output(values, 0)
                    };
                    new_out = Some(settled.ok_or(ImportError::UnsupportedDestination)?);
                }
            } else if cur_transfer.is_burn() {
                // burns apply only to the import currency itself
                if cur_transfer.first_currency() != import_currency_id
                    || !(is_fractional || import_def.token)
                {
                    return Err(ImportError::PolicyViolation(
                        "burn requires the import currency to be fractional or a token",
                    ));
                }
                if cur_transfer.is_burn_change_weight() {
                    return Err(ImportError::PolicyViolation(
                        "burning to change weight is not supported",
                    ));
                }
                self.add_native_out_converted(
                    cur_transfer.first_currency(),
                    -cur_transfer.first_value(),
                );
                burned_change_price += cur_transfer.first_value();
            } else if system_dest_id == cur_transfer.dest_currency_id {
                self.native_out += cur_transfer.first_value();
                new_out = Some(
                    cur_transfer
                        .to_output(ValueMap::new(), cur_transfer.first_value())
                        .ok_or(ImportError::UnsupportedDestination)?,
                );
            } else {
                if cur_transfer.is_mint() && cur_transfer.dest_currency_id == import_currency_id {
                    if !import_def.mintable {
                        return Err(ImportError::PolicyViolation(
                            "import currency does not permit minting",
                        ));
                    }
                    // minting is emitted in the new currency state
                    total_minted += cur_transfer.first_value();
                    self.add_native_out_converted(
                        cur_transfer.dest_currency_id,
                        cur_transfer.first_value(),
                    );
                    if cur_transfer.dest_currency_id != system_dest_id {
                        self.add_reserve_out_converted(
                            cur_transfer.dest_currency_id,
                            cur_transfer.first_value(),
                        );
                    }
                }
                self.add_reserve_output(
                    cur_transfer.dest_currency_id,
                    cur_transfer.first_value(),
                );
                let mut values = ValueMap::new();
                values.set_value(cur_transfer.dest_currency_id, cur_transfer.first_value());
                new_out = Some(
                    cur_transfer
                        .to_output(values, 0)
                        .ok_or(ImportError::UnsupportedDestination)?,
                );
            }

            if let Some(out) = new_out {
                outputs.push(out);
            }
        }

        // carve-out payouts, addressed to the import currency identity
        total_carve_outs = total_carve_outs.canonical();
        for (carve_id, carve_amount) in total_carve_outs.iter() {
            if *carve_id == system_dest_id {
                self.native_out += carve_amount;
                outputs.push(TxOutput::Payment {
                    destination: TransferDestination::identity(import_currency_id),
                    amount: *carve_amount,
                });
            } else {
                self.add_reserve_output(*carve_id, *carve_amount);
                outputs.push(TxOutput::Token {
                    destination: TransferDestination::identity(import_currency_id),
                    token: TokenOutput::new(*carve_id, *carve_amount),
                    native_amount: 0,
                });
            }
        }

        // liquidity fees denominated in the import currency burn with the
        // rest of the burned supply
        burned_change_price += liquidity_fees.remove(&import_currency_id);
        if burned_change_price > 0 {
            if burned_change_price > new_state.supply {
                return Err(ImportError::InvalidInput("invalid burn amount"));
            }
            new_state.supply -= burned_change_price;
        }

        let adjusted_reserve_converted = reserve_converted.clone() - &pre_converted_reserves;

        if is_fractional
            && new_state.is_launch_confirmed()
            && (!adjusted_reserve_converted.canonical().is_empty()
                || !fractional_converted.canonical().is_empty())
        {
            let mut cleared_state = CurrencyState::default();
            let new_prices = import_state.state.convert_amounts(
                &adjusted_reserve_converted.as_vector(&import_state.currencies),
                &fractional_converted.as_vector(&import_state.currencies),
                &mut cleared_state,
                Some(cross_conversions.as_slice()),
                Some(&mut new_state.via_conversion_price),
            );
            if !cleared_state.is_valid() {
                log::warn!(
                    "import: currency conversion failed for {}",
                    import_def.name
                );
                return Err(ImportError::ConversionFailed);
            }
            if !new_state.is_launch_complete() {
                // dynamic prices go to via; the committed schedule stays at
                // the launch pricing until the launch-complete marker
                for (i, price) in new_prices.iter().enumerate() {
                    if Some(i) != system_dest_idx {
                        new_state.via_conversion_price[i] = *price;
                    }
                }
            } else {
                new_state.conversion_price = new_prices;
            }
        }

        let liquidity_vec = liquidity_fees.as_vector(&new_state.currencies);
        if new_state.is_launch_confirmed() {
            let res_converted = adjusted_reserve_converted.as_vector(&new_state.currencies);
            let res_out_converted = self
                .reserve_out_converted_map(&import_currency_id)
                .as_vector(&new_state.currencies);
            let frac_converted = fractional_converted.as_vector(&new_state.currencies);
            let frac_out_converted = (self.native_out_converted_map() - &pre_converted_output)
                .as_vector(&new_state.currencies);
            for i in 0..new_state.currencies.len() {
                new_state.reserve_in[i] = res_converted[i] + liquidity_vec[i];
                new_state.reserve_out[i] = res_out_converted[i];
                if is_fractional {
                    new_state.state.reserves[i] +=
                        (res_converted[i] - res_out_converted[i]) + liquidity_vec[i];
                }
                new_state.native_in[i] = frac_converted[i];
                new_state.state.supply += frac_out_converted[i] - frac_converted[i];
            }
        } else {
            let res_converted = pre_converted_reserves.as_vector(&new_state.currencies);
            let res_out_converted = self
                .reserve_out_converted_map(&import_currency_id)
                .as_vector(&new_state.currencies);
            let frac_converted = fractional_converted.as_vector(&new_state.currencies);
            let frac_out_converted = pre_converted_output.as_vector(&new_state.currencies);
            for i in 0..new_state.currencies.len() {
                new_state.reserve_in[i] = res_converted[i];
                if is_fractional {
                    new_state.state.reserves[i] += res_converted[i] - res_out_converted[i];
                } else {
                    new_state.state.supply += frac_out_converted[i] - frac_converted[i];
                }
            }
        }

        // before launch completes, the committed price schedule is rebuilt
        // from reverted reserves so the launch pricing stays constant
        if is_fractional && !new_state.is_launch_complete() {
            if new_state.is_launch_confirmed() {
                if new_state.is_launch_clear() {
                    let mut temp_state = new_state.state.clone();
                    // fees have not entered the basket yet at launch clear
                    for (fee_id, fee_amount) in transfer_fees.iter() {
                        if *fee_id != import_def.system_id {
                            if let Some(idx) = currency_index_map.get(fee_id) {
                                temp_state.reserves[*idx] -= fee_amount;
                            }
                        }
                    }
                    if let Some(idx) = currency_index_map.get(&import_def.system_id) {
                        temp_state.reserves[*idx] += new_state.native_fees
                            - transfer_fees.value_of(&import_def.system_id);
                    }

                    if import_def.launch_system_id == import_def.system_id {
                        new_state.conversion_price = temp_state.prices_in_reserve();
                    } else if let Some(sys_idx) = system_dest_idx {
                        let system_price = temp_state.price_in_reserve(sys_idx);
                        let launch_prices =
                            launch_prices_without_system(&mut temp_state, sys_idx);
                        let mut prices = launch_prices;
                        prices.insert(sys_idx, system_price);
                        new_state.conversion_price = prices;
                    }
                } else {
                    new_state.conversion_price = import_state.conversion_price.clone();
                }
            } else if import_state.is_prelaunch() && !import_state.is_refunding() {
                new_state.via_conversion_price = new_state.prices_in_reserve();
                let mut temp_state = new_state.state.clone();
                if import_def.launch_system_id == import_def.system_id {
                    new_state.conversion_price = temp_state.prices_in_reserve();
                } else if let Some(sys_idx) = system_dest_idx {
                    let system_price = new_state.via_conversion_price[sys_idx];
                    let launch_prices = launch_prices_without_system(&mut temp_state, sys_idx);
                    let mut prices = launch_prices;
                    prices.insert(sys_idx, system_price);
                    new_state.conversion_price = prices;
                }
            }
        }

        new_state.pre_converted_out = 0;
        for (_, value) in pre_converted_output.iter() {
            new_state.pre_converted_out += value;
        }

        if total_minted != 0 || pre_alloc_total != 0 {
            new_state
                .state
                .update_with_emission(total_minted + pre_alloc_total);
        }

        if let Some(in_outs) = self.currencies.get(&system_dest_id) {
            new_state.native_conversion_fees = in_outs.reserve_conversion_fees;
        }
        new_state.conversion_fees = self
            .reserve_conversion_fees_map()
            .as_vector(&new_state.currencies);
        new_state.fees = converted_fees.as_vector(&new_state.currencies);

        // conservation: everything spent must be covered by inputs
        let mut reserve_inputs = ValueMap::new();
        let mut system_out_converted: Amount = 0;
        for (id, in_outs) in &self.currencies {
            if *id == import_currency_id {
                new_state.native_out = in_outs.native_out_converted;
                if *id == system_dest_id {
                    system_out_converted += in_outs.native_out_converted;
                }
            } else {
                reserve_inputs.add_value(import_currency_id, in_outs.native_out_converted);
                if *id == system_dest_id {
                    system_out_converted += in_outs.reserve_out_converted;
                }
                if in_outs.reserve_in != 0 || in_outs.reserve_out_converted != 0 {
                    reserve_inputs
                        .set_value(*id, in_outs.reserve_in + in_outs.reserve_out_converted);
                }
                if in_outs.reserve_out != 0 {
                    spent_currency_out.set_value(*id, in_outs.reserve_out);
                }
            }
        }
        if system_out_converted != 0 {
            // store of the system currency output that was converted
            self.currencies
                .entry(import_currency_id)
                .or_default()
                .reserve_out_converted = system_out_converted;
        }
        if self.native_in != 0 || system_out_converted != 0 {
            reserve_inputs.set_value(
                import_def.system_id,
                self.native_in.max(system_out_converted),
            );
        }
        if self.native_out != 0 {
            spent_currency_out.add_value(import_def.system_id, self.native_out);
        }

        if (reserve_inputs.clone() - &spent_currency_out).has_negative() {
            log::warn!(
                "import: too much fee taken, inputs {:?} vs outputs {:?}",
                reserve_inputs,
                spent_currency_out
            );
            return Err(ImportError::ConservationViolation);
        }

        Ok(ImportResult {
            outputs,
            imported_currency,
            gateway_deposits_in,
            spent_currency_out,
            new_state,
        })
    }
}

/// Remove the destination-system reserve and fold its weight into the
/// remaining reserves (even split, leftover satoshis to the first entries),
/// then price the launch basket. The caller re-inserts the system price.
fn launch_prices_without_system(state: &mut CurrencyState, sys_idx: usize) -> Vec<Amount> {
    state.currencies.remove(sys_idx);
    state.reserves.remove(sys_idx);
    let sys_weight = state.weights.remove(sys_idx);
    let remaining = state.weights.len() as Amount;
    let one_extra = sys_weight / remaining;
    let mut weight_remainder = sys_weight % remaining;
    for weight in state.weights.iter_mut() {
        *weight += one_extra;
        if weight_remainder > 0 {
            *weight += 1;
            weight_remainder -= 1;
        }
    }
    state.prices_in_reserve()
}
