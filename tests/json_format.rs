//! JSON views of the consensus types. The wire format in `serializer` is
//! what consensus signs; these serde forms are what RPC and tooling read,
//! so ids must render as hex strings and round-trip losslessly.

use fractal_core::currency::{BlockCurrencyState, CurrencyId, CurrencyState, ValueMap};
use fractal_core::transfer::{DestinationKind, ReserveTransfer, TransferDestination, TxOutput};

fn id(byte: u8) -> CurrencyId {
    CurrencyId::new([byte; 20])
}

#[test]
fn value_map_is_a_hex_keyed_object() {
    let mut map = ValueMap::new();
    map.add_value(id(2), 300).add_value(id(1), -5);

    let json = serde_json::to_value(&map).unwrap();
    let object = json.as_object().unwrap();
    assert_eq!(object.len(), 2);
    assert_eq!(object[&id(2).to_hex()], 300);
    assert_eq!(object[&id(1).to_hex()], -5);

    let decoded: ValueMap = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, map);
}

#[test]
fn currency_state_round_trip() {
    let state = CurrencyState::new(
        id(10),
        vec![id(1), id(2)],
        vec![50_000_000, 50_000_000],
        vec![10_000_000_000, 10_000_000_000],
        20_000_000_000,
        CurrencyState::FLAG_FRACTIONAL | CurrencyState::FLAG_LAUNCH_COMPLETE,
    );
    let json = serde_json::to_string(&state).unwrap();
    assert!(json.contains(&id(10).to_hex()));
    let decoded: CurrencyState = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, state);
}

#[test]
fn block_state_round_trip() {
    let state = CurrencyState::new(
        id(10),
        vec![id(1), id(2)],
        vec![50_000_000, 50_000_000],
        vec![500, 600],
        1_000,
        CurrencyState::FLAG_FRACTIONAL,
    );
    let mut block_state = BlockCurrencyState::new(state);
    block_state.conversion_price = vec![100_000_000, 99_000_000];
    block_state.native_fees = 42;

    let json = serde_json::to_string(&block_state).unwrap();
    let decoded: BlockCurrencyState = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, block_state);
}

#[test]
fn reserve_transfer_round_trip_with_nested_leg() {
    let inner = ReserveTransfer::new(
        ReserveTransfer::VALID,
        id(2),
        700,
        id(1),
        20_000,
        id(2),
        TransferDestination::identity(id(77)),
    );
    let mut transfer = ReserveTransfer::new(
        ReserveTransfer::VALID | ReserveTransfer::CONVERT | ReserveTransfer::RESERVE_TO_RESERVE,
        id(2),
        300,
        id(1),
        20_000,
        id(10),
        TransferDestination {
            kind: DestinationKind::Nested(Box::new(inner)),
            gateway_id: Some(id(30)),
            fees: 15_000,
        },
    );
    transfer.second_reserve_id = Some(id(1));

    let json = serde_json::to_string(&transfer).unwrap();
    let decoded: ReserveTransfer = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, transfer);
}

#[test]
fn public_key_destination_renders_as_hex() {
    let destination = TransferDestination {
        kind: DestinationKind::PublicKey([0xAB; 33]),
        gateway_id: None,
        fees: 0,
    };
    let json = serde_json::to_string(&destination).unwrap();
    assert!(json.contains(&"ab".repeat(33)));
    let decoded: TransferDestination = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, destination);
}

#[test]
fn tx_output_uses_snake_case_tags() {
    let output = TxOutput::Payment {
        destination: TransferDestination::identity(id(77)),
        amount: 500,
    };
    let json = serde_json::to_value(&output).unwrap();
    assert!(json.get("payment").is_some());
    let decoded: TxOutput = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, output);
}
