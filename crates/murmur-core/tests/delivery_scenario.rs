use std::sync::Arc;
use std::time::Duration;

use murmur_core::{
    Config, KeypairIdentity, MemoryBlobStore, ScriptedActivity, ScriptedOracle, Session,
};
use murmur_db::{Database, KvStore, MemoryStore};
use murmur_types::DeliveryStatus;

fn identity(seed: u8) -> Arc<KeypairIdentity> {
    Arc::new(KeypairIdentity::from_seed([seed; 32]).unwrap())
}

async fn open_session(kv: Arc<dyn KvStore>, who: Arc<KeypairIdentity>) -> Session {
    Session::open(Config::default(), kv, who, Arc::new(MemoryBlobStore::new()))
        .await
        .unwrap()
}

#[tokio::test]
async fn alice_sends_bob_hi() {
    let kv = Arc::new(MemoryStore::new());
    let (alice, bob) = (identity(1), identity(2));
    let session = open_session(kv, alice).await;
    let oracle = Arc::new(ScriptedOracle::new());

    let sent = session.compose(bob.address().as_str(), "hi", None).await.unwrap();
    assert_eq!(sent.status, DeliveryStatus::Sent);
    assert_eq!(session.peers().await[0].interaction_count, 1);

    oracle.set(bob.address(), ScriptedActivity::Active);
    session.reconcile_now(oracle.clone()).await.unwrap();
    let status = session.message(&sent.id).await.unwrap().status;
    assert!(matches!(status, DeliveryStatus::Delivered { ref evidence } if evidence.active));

    oracle.set(bob.address(), ScriptedActivity::Inactive);
    session.reconcile_now(oracle).await.unwrap();
    let status = session.message(&sent.id).await.unwrap().status;
    assert_eq!(status.name(), "delivered");
}

#[tokio::test]
async fn one_outage_out_of_three() {
    let kv = Arc::new(MemoryStore::new());
    let session = open_session(kv.clone(), identity(1)).await;
    let oracle = Arc::new(ScriptedOracle::new());

    let recipients = [identity(2), identity(3), identity(4)];
    let mut ids = Vec::new();
    for to in &recipients {
        let sent = session.compose(to.address().as_str(), "ping", None).await.unwrap();
        ids.push(sent.id);
        oracle.set(to.address(), ScriptedActivity::Active);
    }
    oracle.set(recipients[2].address(), ScriptedActivity::Unavailable);

    let report = session.reconcile_now(oracle).await.unwrap();
    assert_eq!((report.delivered, report.inconclusive), (2, 1));
    assert!(report.persisted);

    let statuses: Vec<&str> = {
        let mut out = Vec::new();
        for id in &ids {
            out.push(session.message(id).await.unwrap().status.name());
        }
        out
    };
    assert_eq!(statuses, vec!["delivered", "delivered", "sent"]);

    // Persisted state matches memory.
    session.close().await;
    let reopened = open_session(kv, identity(1)).await;
    assert_eq!(reopened.message(&ids[2]).await.unwrap().status.name(), "sent");
    assert_eq!(reopened.message(&ids[0]).await.unwrap().status.name(), "delivered");
}

#[tokio::test]
async fn peer_list_never_exceeds_cap() {
    let kv = Arc::new(MemoryStore::new());
    let session = open_session(kv, identity(1)).await;

    let recipients: Vec<_> = (10..65).map(identity).collect();
    for to in &recipients {
        session.compose(to.address().as_str(), "hello", None).await.unwrap();
    }

    let peers = session.peers().await;
    assert_eq!(peers.len(), 50);
    assert_eq!(&peers[0].address, recipients[54].address());
    for evicted in &recipients[..5] {
        assert!(peers.iter().all(|p| &p.address != evicted.address()));
    }
}

#[tokio::test]
async fn alias_wins_over_username() {
    let kv = Arc::new(MemoryStore::new());
    let session = open_session(kv, identity(1)).await;
    let bob = identity(2);

    session.compose(bob.address().as_str(), "hi", None).await.unwrap();
    session.record_username(bob.address(), "bob.sol").await.unwrap();
    session.save_profile("Alice").unwrap();
    session.set_alias(bob.address().as_str(), "Bobby").await.unwrap();

    let peer = session.peers().await.remove(0);
    assert_eq!(peer.username.as_deref(), Some("bob.sol"));
    assert_eq!(session.display_label(&peer).await, "Bobby");
}

#[tokio::test(start_paused = true)]
async fn results_arriving_after_close_are_discarded() {
    let kv = Arc::new(MemoryStore::new());
    let session = open_session(kv.clone(), identity(1)).await;
    let bob = identity(2);
    let sent = session.compose(bob.address().as_str(), "hi", None).await.unwrap();

    let oracle = Arc::new(ScriptedOracle::new());
    oracle.set(bob.address(), ScriptedActivity::Active);
    oracle.set_delay(Duration::from_secs(5));

    let ticking = session.clone();
    let tick = tokio::spawn(async move { ticking.reconcile_now(oracle).await });
    tokio::time::sleep(Duration::from_secs(1)).await;
    session.close().await;

    let report = tick.await.unwrap().unwrap();
    assert!(report.discarded);
    assert_eq!(session.message(&sent.id).await.unwrap().status.name(), "sent");

    let reopened = open_session(kv, identity(1)).await;
    assert_eq!(reopened.message(&sent.id).await.unwrap().status.name(), "sent");
}

#[tokio::test(start_paused = true)]
async fn compose_during_tick_is_not_lost() {
    let kv = Arc::new(MemoryStore::new());
    let session = open_session(kv.clone(), identity(1)).await;
    let bob = identity(2);
    let first = session.compose(bob.address().as_str(), "one", None).await.unwrap();

    let oracle = Arc::new(ScriptedOracle::new());
    oracle.set(bob.address(), ScriptedActivity::Active);
    oracle.set_delay(Duration::from_secs(5));

    let ticking = session.clone();
    let tick = tokio::spawn(async move { ticking.reconcile_now(oracle).await });
    tokio::time::sleep(Duration::from_secs(1)).await;
    let second = session.compose(bob.address().as_str(), "two", None).await.unwrap();

    let report = tick.await.unwrap().unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(session.message(&first.id).await.unwrap().status.name(), "delivered");
    assert_eq!(session.message(&second.id).await.unwrap().status.name(), "sent");

    let reopened = open_session(kv, identity(1)).await;
    assert_eq!(reopened.messages().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn background_reconciler_delivers_on_schedule() {
    let kv = Arc::new(MemoryStore::new());
    let session = open_session(kv, identity(1)).await;
    let bob = identity(2);
    let sent = session.compose(bob.address().as_str(), "hi", None).await.unwrap();

    let oracle = Arc::new(ScriptedOracle::new());
    oracle.set(bob.address(), ScriptedActivity::Active);
    session.start_reconciler(oracle.clone()).await.unwrap();

    let interval = session.config().reconcile_interval;
    tokio::time::sleep(interval - Duration::from_secs(1)).await;
    assert_eq!(session.message(&sent.id).await.unwrap().status.name(), "sent");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(session.message(&sent.id).await.unwrap().status.name(), "delivered");

    session.close().await;
    assert!(!session.reconciler_running().await);
}

#[tokio::test]
async fn sqlite_backed_session_survives_restart() {
    let db: Arc<dyn KvStore> = Arc::new(Database::open_in_memory().unwrap());
    let bob = identity(2);

    let session = open_session(db.clone(), identity(1)).await;
    let sent = session.compose(bob.address().as_str(), "kept", None).await.unwrap();
    session.save_profile("Alice").unwrap();
    session.close().await;

    let reopened = open_session(db, identity(1)).await;
    assert_eq!(reopened.messages().await, vec![sent]);
    assert_eq!(reopened.peers().await.len(), 1);
    assert_eq!(reopened.profile().map(|p| p.display_name), Some("Alice".into()));
}
