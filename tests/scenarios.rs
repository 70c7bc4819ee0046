//! Black-box scenario tests driving the public C1/C3/C6 API directly
//! (§8 "Concrete scenarios"), the way `ShiLu1211-texas-engine` and
//! `Pratiikpy-Linera-Poker` split unit coverage from scenario coverage
//! in the example pack. These exercise `Table` end to end without a
//! websocket, since `join_table`/`player_ready`/`leave`/`disconnect`/
//! `reconnect` are all plain async methods on the public API.

use std::sync::Arc;

use reem_table_server::ledger::Ledger;
use reem_table_server::matchmaker::MatchmakerTarget;
use reem_table_server::session::protocol::Outbound;
use reem_table_server::session::table::{JoinOutcome, Table};
use reem_table_server::store::{InMemoryStore, Store, UserRecord};
use uuid::Uuid;

fn fake_sink() -> tokio::sync::mpsc::UnboundedSender<Outbound> {
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel::<Outbound>();
    tx
}

fn funded_store(usernames: &[&str], chips: i64) -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    for name in usernames {
        store.upsert_user(UserRecord {
            user_id: name.to_string(),
            username: name.to_string(),
            chip_balance: chips,
            hands_played: 0,
            hands_won: 0,
        });
    }
    store
}

/// §8 scenario 4: a table with `[alice, bob, bot]` mid-hand; `carol`
/// joins and gets a promised seat (a `Transition`) instead of displacing
/// anyone immediately. Bob then leaves, collapsing the hand to a single
/// human (alice) and ending it with `ForfeitWin`; settlement resolves
/// the pending transition by handing the bot's seat to carol.
#[tokio::test]
async fn mid_hand_transition_resolves_at_hand_end() {
    let store = funded_store(&["alice", "bob", "carol"], 1_000);
    let table = Table::new("t-transition".to_string(), 10, Ledger::new(), store);

    let a_conn = Uuid::new_v4();
    let b_conn = Uuid::new_v4();
    table.join_table("alice", a_conn).await.unwrap();
    table.join_table("bob", b_conn).await.unwrap();
    table.add_bot();
    assert_eq!(table.bot_count(), 1);

    table.player_ready("alice").await.unwrap();
    table.player_ready("bob").await.unwrap();

    // Countdown (3s) + deal; poll instead of a single fixed sleep so the
    // test isn't flaky under slow CI schedulers.
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if table.hand_in_progress() {
            break;
        }
    }
    assert!(table.hand_in_progress(), "hand should have started after the ready countdown");

    // Carol arrives mid-hand into a table that already carries a bot:
    // she is promised a seat via a Transition, not seated directly.
    let c_conn = Uuid::new_v4();
    let outcome = table.join_table("carol", c_conn).await.unwrap();
    assert!(matches!(outcome, JoinOutcome::TransitionPending));
    assert!(table.has_pending_transition());

    // Bob leaves mid-hand; one human (alice) remains, so the hand ends
    // with ForfeitWin and settlement resolves the pending transition.
    table.leave("bob").await.unwrap();

    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        if !table.has_pending_transition() {
            break;
        }
    }
    assert!(!table.has_pending_transition(), "transition must resolve once the hand ends");

    let summary = table.table_summary().await;
    let usernames: Vec<_> = summary.seats.iter().filter_map(|s| s.username.clone()).collect();
    assert!(usernames.contains(&"carol".to_string()), "carol should now hold the vacated bot seat");
}

/// §8 scenario 5: a disconnect followed by a reconnect within the grace
/// period restores the seat and the new connection id, with no seat
/// loss.
#[tokio::test]
async fn reconnect_within_grace_period_restores_the_seat() {
    let store = funded_store(&["alice", "bob"], 1_000);
    let table = Table::new("t-reconnect".to_string(), 5, Ledger::new(), store);

    let old_conn = Uuid::new_v4();
    table.join_table("alice", old_conn).await.unwrap();
    table.join_table("bob", Uuid::new_v4()).await.unwrap();

    table.register_connection(old_conn, fake_sink());
    table.disconnect(old_conn).await;

    let summary = table.table_summary().await;
    let alice_status = summary
        .seats
        .iter()
        .find(|s| s.username.as_deref() == Some("alice"))
        .map(|s| s.status.clone());
    assert_eq!(alice_status.as_deref(), Some("disconnected"));

    let new_conn = Uuid::new_v4();
    table.register_connection(new_conn, fake_sink());
    table.reconnect("alice", new_conn).await.unwrap();

    let summary = table.table_summary().await;
    let alice_status = summary
        .seats
        .iter()
        .find(|s| s.username.as_deref() == Some("alice"))
        .map(|s| s.status.clone());
    assert_eq!(alice_status.as_deref(), Some("active"), "reconnect must restore the seat to active");
}

/// §4.6 "Mid-hand leave": when only one human remains in a hand of two
/// or more seats, the hand ends in `ForfeitWin` for whoever stays,
/// rather than being abandoned outright.
#[tokio::test]
async fn mid_hand_leave_down_to_one_human_forfeits_to_the_remaining_seat() {
    let store = funded_store(&["alice", "bob"], 1_000);
    let table = Table::new("t-forfeit".to_string(), 10, Ledger::new(), store);

    table.join_table("alice", Uuid::new_v4()).await.unwrap();
    table.join_table("bob", Uuid::new_v4()).await.unwrap();
    table.player_ready("alice").await.unwrap();
    table.player_ready("bob").await.unwrap();

    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if table.hand_in_progress() {
            break;
        }
    }
    assert!(table.hand_in_progress());

    table.leave("bob").await.unwrap();

    // settle_hand runs synchronously inside leave() for the forfeit
    // path, so the table should already be back to waiting with bob's
    // seat freed.
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        if !table.hand_in_progress() {
            break;
        }
    }
    assert!(!table.hand_in_progress(), "forfeited hand must settle and clear");
    assert_eq!(table.human_count(), 1);
}
