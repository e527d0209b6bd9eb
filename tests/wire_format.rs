//! Golden wire-format vectors. These encodings are consensus: a change to
//! any of them is a hard fork, so the hex below is pinned byte for byte.

use fractal_core::currency::{CurrencyId, CurrencyState, ValueMap};
use fractal_core::serializer::Serializer;
use fractal_core::transfer::{ReserveTransfer, TransferDestination};

fn id(byte: u8) -> CurrencyId {
    CurrencyId::new([byte; 20])
}

#[test]
fn value_map_vector() {
    let mut map = ValueMap::new();
    map.add_value(id(2), 300);
    assert_eq!(
        map.to_hex(),
        "0102020202020202020202020202020202020202022c01000000000000"
    );
    assert_eq!(ValueMap::from_hex(&map.to_hex()).unwrap(), map);
}

#[test]
fn reserve_transfer_vector() {
    let transfer = ReserveTransfer::new(
        ReserveTransfer::VALID | ReserveTransfer::CONVERT,
        id(2),
        300,
        id(1),
        20_000,
        id(10),
        TransferDestination::identity(id(77)),
    );
    let expected = concat!(
        "030000000101010101010101010101010101010101010101204e000000000000",
        "0102020202020202020202020202020202020202022c010000000000000a0a0a",
        "0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a00014d4d4d4d4d4d4d4d4d4d4d4d4d",
        "4d4d4d4d4d4d4d000000000000000000"
    );
    assert_eq!(transfer.to_hex(), expected);
    assert_eq!(transfer.size(), 112);
    assert_eq!(ReserveTransfer::from_hex(expected).unwrap(), transfer);
}

#[test]
fn currency_state_vector() {
    let state = CurrencyState::new(
        id(10),
        vec![id(1), id(2)],
        vec![50_000_000, 50_000_000],
        vec![10_000_000_000, 10_000_000_000],
        20_000_000_000,
        CurrencyState::FLAG_FRACTIONAL | CurrencyState::FLAG_LAUNCH_COMPLETE,
    );
    let expected = concat!(
        "0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a4300020101010101010101010101",
        "0101010101010101010202020202020202020202020202020202020202028",
        "0f0fa020000000080f0fa02000000000200e40b540200000000e40b5402000000",
        "00c817a804000000000000000000000000c817a804000000"
    );
    assert_eq!(state.to_hex(), expected);
    assert_eq!(CurrencyState::from_hex(expected).unwrap(), state);
}
