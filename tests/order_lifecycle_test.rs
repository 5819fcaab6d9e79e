mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use bazaar_api::{
    entities::{OrderStatus, PaymentStatus},
    errors::ServiceError,
};
use uuid::Uuid;

#[tokio::test]
async fn pending_order_can_be_cancelled_by_its_owner() {
    let app = TestApp::new().await;
    let owner = TestApp::session("cancel");
    let built = app.checkout(&owner, dec!(10.00), 1).await;

    let cancelled = app
        .state
        .services
        .order_status
        .cancel(&owner, built.order.id)
        .await
        .unwrap();

    assert_eq!(cancelled.order_status().unwrap(), OrderStatus::Cancelled);
    assert_eq!(cancelled.version, built.order.version + 1);

    // Payment stays pending; nothing was charged
    let details = app
        .state
        .services
        .orders
        .get_order(&owner, built.order.id)
        .await
        .unwrap();
    assert_eq!(
        details.payment.unwrap().payment_status().unwrap(),
        PaymentStatus::Pending
    );
}

#[tokio::test]
async fn cancel_is_hidden_from_other_owners() {
    let app = TestApp::new().await;
    let owner = TestApp::session("mine");
    let built = app.checkout(&owner, dec!(10.00), 1).await;

    let result = app
        .state
        .services
        .order_status
        .cancel(&TestApp::session("theirs"), built.order.id)
        .await;

    assert_matches!(result, Err(ServiceError::NotFound(_)));
    assert_eq!(
        app.state
            .services
            .order_status
            .get_status(built.order.id)
            .await
            .unwrap(),
        OrderStatus::Pending
    );
}

#[tokio::test]
async fn paid_order_cannot_be_cancelled() {
    let app = TestApp::new().await;
    let owner = TestApp::session("paid");
    let built = app.checkout(&owner, dec!(10.00), 1).await;
    app.gateway.approve(built.order.total_amount, Some(built.order.id));
    app.state
        .services
        .reconciliation
        .reconcile(&built.payment.payment_reference, Some(&owner))
        .await
        .unwrap();

    let result = app
        .state
        .services
        .order_status
        .cancel(&owner, built.order.id)
        .await;

    assert_matches!(
        result,
        Err(ServiceError::InvalidTransition { from, to }) if from == "processing" && to == "cancelled"
    );
    assert_eq!(
        app.state
            .services
            .order_status
            .get_status(built.order.id)
            .await
            .unwrap(),
        OrderStatus::Processing
    );
}

#[tokio::test]
async fn fulfilment_walks_forward_only() {
    let app = TestApp::new().await;
    let owner = TestApp::user();
    let built = app.checkout(&owner, dec!(20.00), 1).await;
    let status = &app.state.services.order_status;

    // Cannot ship before payment
    assert_matches!(
        status.mark_shipped(built.order.id).await,
        Err(ServiceError::InvalidTransition { .. })
    );

    app.gateway.approve(built.order.total_amount, Some(built.order.id));
    app.state
        .services
        .reconciliation
        .reconcile(&built.payment.payment_reference, None)
        .await
        .unwrap();

    let shipped = status.mark_shipped(built.order.id).await.unwrap();
    assert_eq!(shipped.order_status().unwrap(), OrderStatus::Shipped);

    let delivered = status.mark_delivered(built.order.id).await.unwrap();
    assert_eq!(delivered.order_status().unwrap(), OrderStatus::Delivered);

    assert_matches!(
        status.mark_shipped(built.order.id).await,
        Err(ServiceError::InvalidTransition { .. })
    );
    assert_eq!(delivered.version, built.order.version + 3);
}

#[tokio::test]
async fn refund_marks_completed_payment_refunded() {
    let app = TestApp::new().await;
    let owner = TestApp::session("refund");
    let built = app.checkout(&owner, dec!(10.00), 1).await;
    app.gateway.approve(built.order.total_amount, Some(built.order.id));
    app.state
        .services
        .reconciliation
        .reconcile(&built.payment.payment_reference, Some(&owner))
        .await
        .unwrap();

    let refunded = app
        .state
        .services
        .order_status
        .refund(built.order.id)
        .await
        .unwrap();
    assert_eq!(refunded.order_status().unwrap(), OrderStatus::Refunded);

    let details = app
        .state
        .services
        .orders
        .get_order(&owner, built.order.id)
        .await
        .unwrap();
    assert_eq!(
        details.payment.unwrap().payment_status().unwrap(),
        PaymentStatus::Refunded
    );

    // Refunded is terminal
    assert_matches!(
        app.state.services.order_status.refund(built.order.id).await,
        Err(ServiceError::InvalidTransition { .. })
    );
}

#[tokio::test]
async fn cancelled_order_is_not_reconciled() {
    let app = TestApp::new().await;
    let owner = TestApp::session("late-payment");
    let built = app.checkout(&owner, dec!(10.00), 1).await;
    app.state
        .services
        .order_status
        .cancel(&owner, built.order.id)
        .await
        .unwrap();
    app.gateway.approve(built.order.total_amount, Some(built.order.id));

    let result = app
        .state
        .services
        .reconciliation
        .reconcile(&built.payment.payment_reference, None)
        .await;

    assert_matches!(result, Err(ServiceError::InvalidTransition { .. }));
    let details = app
        .state
        .services
        .orders
        .get_order(&owner, built.order.id)
        .await
        .unwrap();
    assert_eq!(details.order.order_status().unwrap(), OrderStatus::Cancelled);
    assert_eq!(
        details.payment.unwrap().payment_status().unwrap(),
        PaymentStatus::Pending
    );
}

#[tokio::test]
async fn listing_is_paginated_per_owner() {
    let app = TestApp::new().await;
    let owner = TestApp::session("lister");
    for _ in 0..3 {
        app.checkout(&owner, dec!(1.00), 1).await;
    }
    app.checkout(&TestApp::session("someone-else"), dec!(1.00), 1)
        .await;

    let orders = &app.state.services.orders;
    let first_page = orders.list_orders(&owner, 1, 2).await.unwrap();
    assert_eq!(first_page.total, 3);
    assert_eq!(first_page.orders.len(), 2);
    let second_page = orders.list_orders(&owner, 2, 2).await.unwrap();
    assert_eq!(second_page.orders.len(), 1);

    assert_matches!(
        orders.get_order(&owner, Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );
}
