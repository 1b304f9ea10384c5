use quarry_core::common::PkValue;
use quarry_test_utils::{memory_repos, sample_account, sample_order};

#[tokio::test]
async fn deleting_account_cascades_to_its_orders() {
    let (accounts, orders) = memory_repos();

    let account = sample_account("acme");
    let account_id = account.id;
    accounts.create(account, None).await.unwrap();

    let order_a = sample_order(account_id, 1_000);
    let order_b = sample_order(account_id, 2_000);
    let order_a_id = order_a.id;
    let order_b_id = order_b.id;
    orders.create(order_a, None).await.unwrap();
    orders.create(order_b, None).await.unwrap();

    accounts.delete(&PkValue::Uuid(account_id), None).await.unwrap();

    assert!(orders.read(&PkValue::Uuid(order_a_id)).await.unwrap().is_none());
    assert!(orders.read(&PkValue::Uuid(order_b_id)).await.unwrap().is_none());
}

#[tokio::test]
async fn deleting_account_leaves_unrelated_orders_untouched() {
    let (accounts, orders) = memory_repos();

    let account_a = sample_account("acme");
    let account_b = sample_account("globex");
    let account_a_id = account_a.id;
    let account_b_id = account_b.id;
    accounts.create(account_a, None).await.unwrap();
    accounts.create(account_b, None).await.unwrap();

    let order_for_b = sample_order(account_b_id, 500);
    let order_for_b_id = order_for_b.id;
    orders.create(order_for_b, None).await.unwrap();

    accounts.delete(&PkValue::Uuid(account_a_id), None).await.unwrap();

    assert!(orders.read(&PkValue::Uuid(order_for_b_id)).await.unwrap().is_some());
}
