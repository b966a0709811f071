use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use stockledger::transaction::{CreateItem, DeleteItem, MoveStock, StockChange};
use stockledger::{
    Actor, ApplyContext, InventoryReducer, InventoryState, Reducer, State, StateHasher,
    Transaction, ValidationError,
};

const SKUS: [&str; 3] = ["SKU-A", "SKU-B", "SKU-C"];
const LOCATIONS: [&str; 3] = ["Warehouse", "Distribution Center", "Retailer"];

#[derive(Debug, Clone)]
enum Op {
    Create(usize, u64, usize),
    In(usize, usize, u64),
    Out(usize, usize, u64),
    Move(usize, usize, usize, u64),
    Delete(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3usize, 0..30u64, 0..3usize).prop_map(|(s, q, l)| Op::Create(s, q, l)),
        (0..3usize, 0..3usize, 0..30u64).prop_map(|(s, l, q)| Op::In(s, l, q)),
        (0..3usize, 0..3usize, 0..30u64).prop_map(|(s, l, q)| Op::Out(s, l, q)),
        (0..3usize, 0..3usize, 0..3usize, 0..30u64).prop_map(|(s, f, t, q)| Op::Move(s, f, t, q)),
        (0..3usize).prop_map(Op::Delete),
    ]
}

fn to_transaction(op: &Op) -> Transaction {
    let actor = Actor::new("tester", "E-1", "Inventory Manager");
    match *op {
        Op::Create(s, quantity, l) => Transaction::CreateItem(CreateItem {
            sku: SKUS[s].to_string(),
            product_name: format!("Product {}", s),
            price: Decimal::new(199, 2),
            category: "General".to_string(),
            quantity,
            to_location: LOCATIONS[l].to_string(),
            actor,
        }),
        Op::In(s, l, quantity) => Transaction::StockIn(StockChange {
            sku: SKUS[s].to_string(),
            quantity,
            location: LOCATIONS[l].to_string(),
            actor,
        }),
        Op::Out(s, l, quantity) => Transaction::StockOut(StockChange {
            sku: SKUS[s].to_string(),
            quantity,
            location: LOCATIONS[l].to_string(),
            actor,
        }),
        Op::Move(s, f, t, quantity) => Transaction::Move(MoveStock {
            sku: SKUS[s].to_string(),
            quantity,
            from_location: LOCATIONS[f].to_string(),
            to_location: LOCATIONS[t].to_string(),
            actor,
        }),
        Op::Delete(s) => Transaction::DeleteItem(DeleteItem {
            sku: SKUS[s].to_string(),
            actor,
        }),
    }
}

fn context(index: u64) -> ApplyContext {
    ApplyContext::new(index, Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap())
}

/// Fold the accepted prefix of `ops`, returning the final state and how many were accepted
fn fold(ops: &[Op]) -> (InventoryState, u64) {
    let reducer = InventoryReducer::new();
    let mut state = InventoryState::new();
    let mut index = 1;
    for op in ops {
        if reducer
            .apply_in_place(&mut state, &to_transaction(op), &context(index))
            .is_ok()
        {
            index += 1;
        }
    }
    (state, index - 1)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A refused transaction leaves the state exactly as it was
    #[test]
    fn property_refusal_has_no_side_effects(ops in prop::collection::vec(arb_op(), 1..40)) {
        let reducer = InventoryReducer::new();
        let mut state = InventoryState::new();
        for (i, op) in ops.iter().enumerate() {
            let before = state.clone();
            let result = reducer.apply_in_place(&mut state, &to_transaction(op), &context(i as u64 + 1));
            if result.is_err() {
                prop_assert_eq!(&state, &before);
            }
        }
    }

    /// Stock per SKU always equals accepted credits minus accepted debits, and never goes negative
    #[test]
    fn property_stock_matches_accepted_movements(ops in prop::collection::vec(arb_op(), 1..60)) {
        let reducer = InventoryReducer::new();
        let mut state = InventoryState::new();
        let mut expected: BTreeMap<&str, i128> = BTreeMap::new();

        for (i, op) in ops.iter().enumerate() {
            if reducer.apply_in_place(&mut state, &to_transaction(op), &context(i as u64 + 1)).is_err() {
                continue;
            }
            match *op {
                Op::Create(s, q, _) => { expected.insert(SKUS[s], q as i128); }
                Op::In(s, _, q) => *expected.entry(SKUS[s]).or_default() += q as i128,
                Op::Out(s, _, q) => *expected.entry(SKUS[s]).or_default() -= q as i128,
                Op::Move(..) | Op::Delete(_) => {}
            }
        }

        for (sku, units) in expected {
            prop_assert!(units >= 0);
            prop_assert_eq!(state.total_stock(sku) as i128, units);
        }
        prop_assert!(state.validate().is_ok());
    }

    /// MOVE never changes a SKU's total stock
    #[test]
    fn property_move_conserves_stock(
        quantity in 1..50u64,
        moved in 1..50u64,
        from in 0..3usize,
        to in 0..3usize,
    ) {
        let reducer = InventoryReducer::new();
        let start = reducer
            .apply(&InventoryState::new(), &to_transaction(&Op::Create(0, quantity, from)), &context(1))
            .unwrap();

        match reducer.apply(&start, &to_transaction(&Op::Move(0, from, to, moved)), &context(2)) {
            Ok(next) => {
                prop_assert_eq!(next.total_stock(SKUS[0]), quantity);
                prop_assert_eq!(next.product(SKUS[0]).unwrap().quantity_at(LOCATIONS[to]), moved);
            }
            Err(ValidationError::SameLocation { .. }) => prop_assert_eq!(from, to),
            Err(ValidationError::InsufficientStock { .. }) => prop_assert!(moved > quantity),
            Err(other) => prop_assert!(false, "unexpected refusal: {:?}", other),
        }
    }

    /// The same sequence always folds to the same state and state hash
    #[test]
    fn property_fold_is_deterministic(ops in prop::collection::vec(arb_op(), 0..60)) {
        let (a, accepted_a) = fold(&ops);
        let (b, accepted_b) = fold(&ops);
        prop_assert_eq!(accepted_a, accepted_b);
        prop_assert_eq!(StateHasher::new().hash(&a).unwrap(), StateHasher::new().hash(&b).unwrap());
        prop_assert_eq!(a, b);
    }
}

#[test]
fn test_delete_lifecycle() {
    let reducer = InventoryReducer::new();
    let state = reducer
        .apply(&InventoryState::new(), &to_transaction(&Op::Create(0, 3, 0)), &context(1))
        .unwrap();

    let err = reducer
        .apply(&state, &to_transaction(&Op::Delete(0)), &context(2))
        .unwrap_err();
    assert_eq!(
        err,
        ValidationError::StockRemaining {
            sku: "SKU-A".to_string(),
            remaining: 3
        }
    );

    let state = reducer
        .apply(&state, &to_transaction(&Op::Out(0, 0, 3)), &context(2))
        .unwrap();
    let state = reducer
        .apply(&state, &to_transaction(&Op::Delete(0)), &context(3))
        .unwrap();
    assert!(state.product("SKU-A").unwrap().is_deleted);

    let err = reducer
        .apply(&state, &to_transaction(&Op::In(0, 0, 1)), &context(4))
        .unwrap_err();
    assert!(matches!(err, ValidationError::ProductDeleted { .. }));

    // A new CREATE_ITEM starts the SKU over
    let state = reducer
        .apply(&state, &to_transaction(&Op::Create(0, 2, 1)), &context(4))
        .unwrap();
    let product = state.product("SKU-A").unwrap();
    assert!(!product.is_deleted);
    assert_eq!(product.quantity_at(LOCATIONS[1]), 2);
}
