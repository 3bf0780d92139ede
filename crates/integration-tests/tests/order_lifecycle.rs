//! Order creation, status flow, and payment over in-memory storage.

use maplecart_commerce::error::ErrorKind;
use maplecart_commerce::services::{CreateOrderRequest, NewOrderAddress, NewOrderLine, OrderError};
use maplecart_core::{
    AddressKind, ItemId, ItemVariantId, Money, OrderItemStatus, OrderStatus, PaymentMethodId,
    UserId,
};
use rust_decimal_macros::dec;

use maplecart_integration_tests::order_fixture;

fn ontario_address(kind: AddressKind) -> NewOrderAddress {
    NewOrderAddress {
        kind,
        recipient: "Samuel Chen".to_owned(),
        line1: "500 Bank Street".to_owned(),
        line2: Some("Unit 3".to_owned()),
        city: "Ottawa".to_owned(),
        province_code: Some("ON".to_owned()),
        postal_code: "K1S 3T4".to_owned(),
        country_code: "CA".to_owned(),
        phone: Some("+1 613 555 0142".to_owned()),
    }
}

fn request(lines: Vec<NewOrderLine>) -> CreateOrderRequest {
    CreateOrderRequest {
        lines,
        addresses: vec![
            ontario_address(AddressKind::Shipping),
            ontario_address(AddressKind::Billing),
        ],
        payment_method_id: Some(PaymentMethodId::new(11)),
        payment_provider: Some("stripe".to_owned()),
        notes: Some("leave at the door".to_owned()),
    }
}

fn line(item: i32, variant: i32, quantity: u32) -> NewOrderLine {
    NewOrderLine {
        item_id: ItemId::new(item),
        variant_id: ItemVariantId::new(variant),
        quantity,
    }
}

#[tokio::test]
async fn create_order_reconciles_totals_and_snapshots() {
    let orders = order_fixture();
    let user = UserId::new(1);

    // 2 x 10.00 + 1 x 25.00 = 45.00; Ontario HST 13% = 5.85; shipping 5.00.
    let order = orders
        .create_order(user, request(vec![line(1, 1, 2), line(2, 2, 1)]))
        .await
        .expect("create should succeed");

    assert_eq!(order.subtotal, Money::new(dec!(45.00)));
    assert_eq!(order.tax_total, Money::new(dec!(5.85)));
    assert_eq!(order.shipping_total, Money::new(dec!(5.00)));
    assert_eq!(order.grand_total, Money::new(dec!(55.85)));
    assert!(order.totals_reconcile());

    // Snapshots carry both languages and the price at order time.
    let syrup = order.items.first().expect("first line");
    assert_eq!(syrup.name_en, "Maple syrup");
    assert_eq!(syrup.name_fr, "Sirop d'érable");
    assert_eq!(syrup.unit_price, Money::new(dec!(10.00)));
    assert_eq!(syrup.total_price, Money::new(dec!(20.00)));

    assert_eq!(order.addresses.len(), 2);
    assert!(order.address(AddressKind::Shipping).is_some());
    assert!(order.address(AddressKind::Billing).is_some());

    let payment = order.payment.as_ref().expect("payment record");
    assert_eq!(payment.amount, order.grand_total);
    assert!(payment.paid_at.is_none());
}

#[tokio::test]
async fn stock_violation_names_the_offending_line() {
    let orders = order_fixture();

    // Variant (3, 3) has stock 2.
    let err = orders
        .create_order(UserId::new(1), request(vec![line(1, 1, 1), line(3, 3, 3)]))
        .await
        .expect_err("over-ordering must fail");

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().starts_with("line 1:"));
}

#[tokio::test]
async fn destination_without_rate_gets_zero_tax() {
    let orders = order_fixture();
    let mut req = request(vec![line(1, 1, 1)]);
    for address in &mut req.addresses {
        address.country_code = "FR".to_owned();
        address.province_code = None;
    }

    let order = orders
        .create_order(UserId::new(1), req)
        .await
        .expect("create should succeed");

    assert_eq!(order.tax_total, Money::ZERO);
    assert_eq!(order.grand_total, Money::new(dec!(15.00)));
}

#[tokio::test]
async fn order_numbers_are_monotonic_and_survive_cancellation() {
    let orders = order_fixture();
    let user = UserId::new(1);

    let first = orders
        .create_order(user, request(vec![line(1, 1, 1)]))
        .await
        .expect("create");
    orders.cancel_order(user, first.id).await.expect("cancel");

    // The cancelled order's number is never reused.
    let second = orders
        .create_order(user, request(vec![line(1, 1, 1)]))
        .await
        .expect("create");
    assert!(second.order_number > first.order_number);

    let by_number = orders
        .get_order_by_number(user, first.order_number)
        .await
        .expect("cancelled orders stay on record");
    assert_eq!(by_number.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn item_status_walks_the_allowed_table_only() {
    let orders = order_fixture();
    let user = UserId::new(1);
    let order = orders
        .create_order(user, request(vec![line(1, 1, 1)]))
        .await
        .expect("create");
    let item_id = order.items.first().expect("line").id;

    let err = orders
        .update_order_item_status(user, order.id, item_id, OrderItemStatus::Delivered, None)
        .await
        .expect_err("pending cannot deliver directly");
    assert_eq!(err.kind(), ErrorKind::Conflict);

    for target in [
        OrderItemStatus::Processing,
        OrderItemStatus::Shipped,
        OrderItemStatus::Delivered,
    ] {
        orders
            .update_order_item_status(user, order.id, item_id, target, None)
            .await
            .expect("allowed transition");
    }

    let delivered = orders.get_order(user, order.id).await.expect("get");
    assert!(delivered.item(item_id).expect("line").delivered_at.is_some());
}

#[tokio::test]
async fn hold_and_release_round_trip() {
    let orders = order_fixture();
    let user = UserId::new(1);
    let order = orders
        .create_order(user, request(vec![line(1, 1, 1)]))
        .await
        .expect("create");
    let item_id = order.items.first().expect("line").id;

    let err = orders
        .update_order_item_status(user, order.id, item_id, OrderItemStatus::OnHold, None)
        .await
        .expect_err("a hold needs a reason");
    assert_eq!(err.kind(), ErrorKind::Validation);

    let held = orders
        .update_order_item_status(
            user,
            order.id,
            item_id,
            OrderItemStatus::OnHold,
            Some("address check"),
        )
        .await
        .expect("hold");
    assert_eq!(
        held.item(item_id).expect("line").on_hold_reason.as_deref(),
        Some("address check")
    );

    let released = orders
        .update_order_item_status(user, order.id, item_id, OrderItemStatus::Processing, None)
        .await
        .expect("release");
    assert!(released.item(item_id).expect("line").on_hold_reason.is_none());
}

#[tokio::test]
async fn bulk_update_reports_per_item_outcomes() {
    let orders = order_fixture();
    let user = UserId::new(1);
    let order = orders
        .create_order(user, request(vec![line(1, 1, 1), line(2, 2, 1)]))
        .await
        .expect("create");
    let ids: Vec<_> = order.items.iter().map(|i| i.id).collect();

    // Deliver nothing: Pending -> Delivered is invalid for every item, yet
    // the call itself succeeds with per-item failures.
    let results = orders
        .update_order_items_status(user, order.id, &ids, OrderItemStatus::Delivered, None)
        .await
        .expect("bulk call itself succeeds");
    assert!(results.iter().all(|r| r.outcome.is_err()));

    // Mixed outcome: processing works for both, then shipping only the first
    // after the second is cancelled.
    orders
        .update_order_items_status(user, order.id, &ids, OrderItemStatus::Processing, None)
        .await
        .expect("bulk");
    orders
        .update_order_item_status(
            user,
            order.id,
            *ids.get(1).expect("second"),
            OrderItemStatus::Cancelled,
            None,
        )
        .await
        .expect("cancel one");

    let results = orders
        .update_order_items_status(user, order.id, &ids, OrderItemStatus::Shipped, None)
        .await
        .expect("bulk");
    assert!(results.first().expect("first").outcome.is_ok());
    assert!(matches!(
        results.get(1).expect("second").outcome,
        Err(OrderError::Transition(_))
    ));
}

#[tokio::test]
async fn ownership_is_scoped_on_reads_and_writes() {
    let orders = order_fixture();
    let owner = UserId::new(1);
    let stranger = UserId::new(2);
    let order = orders
        .create_order(owner, request(vec![line(1, 1, 1)]))
        .await
        .expect("create");

    // Reads: the stranger learns nothing, not even that the order exists.
    let err = orders.get_order(stranger, order.id).await.expect_err("scoped");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // Writes fail closed before any mutation.
    let err = orders
        .cancel_order(stranger, order.id)
        .await
        .expect_err("scoped");
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let unchanged = orders.get_order(owner, order.id).await.expect("still there");
    assert_eq!(unchanged.status, OrderStatus::AwaitingPayment);
}

#[tokio::test]
async fn payment_settles_once_and_moves_the_order_to_paid() {
    let orders = order_fixture();
    let user = UserId::new(1);
    let order = orders
        .create_order(user, request(vec![line(1, 1, 2), line(2, 2, 1)]))
        .await
        .expect("create");

    let paid = orders
        .record_payment(user, order.id, Some("ch_1GqIC8".to_owned()))
        .await
        .expect("payment");
    assert_eq!(paid.status, OrderStatus::Paid);
    let payment = paid.payment.as_ref().expect("payment");
    assert_eq!(payment.amount, paid.grand_total);
    assert!(payment.paid_at.is_some());

    let err = orders
        .record_payment(user, order.id, Some("ch_again".to_owned()))
        .await
        .expect_err("paid_at transitions exactly once");
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn order_and_item_status_do_not_cascade() {
    let orders = order_fixture();
    let user = UserId::new(1);
    let order = orders
        .create_order(user, request(vec![line(1, 1, 1)]))
        .await
        .expect("create");
    let item_id = order.items.first().expect("line").id;

    // Order-level status moves; the item stays Pending.
    orders
        .update_order_status(user, order.id, OrderStatus::Fulfilled)
        .await
        .expect("status update");
    let refreshed = orders.get_order(user, order.id).await.expect("get");
    assert_eq!(refreshed.status, OrderStatus::Fulfilled);
    assert_eq!(
        refreshed.item(item_id).expect("line").status,
        OrderItemStatus::Pending
    );

    // And cancelling the order leaves item statuses alone too.
    orders.cancel_order(user, order.id).await.expect("cancel");
    let cancelled = orders.get_order(user, order.id).await.expect("get");
    assert_eq!(
        cancelled.item(item_id).expect("line").status,
        OrderItemStatus::Pending
    );
}
