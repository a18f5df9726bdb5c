use std::sync::Arc;

use chrono::Utc;
use murmur_crypto::{BoxPublicKey, BoxSecret, SIGNING_CHALLENGE};
use murmur_db::KvStore;
use murmur_types::{
    Address, AttachmentRef, DeliveryStatus, Message, Peer, Profile, SessionEvent, new_message_id,
};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blobs::BlobStore;
use crate::config::Config;
use crate::error::{MurmurError, Result};
use crate::identity::IdentityProvider;
use crate::messages::MessageStore;
use crate::oracle::ActivityOracle;
use crate::peers::PeerRegistry;
use crate::profile::ProfileStore;
use crate::reconciler::{DeliveryReconciler, ReconcilerHandle, TickReport};

const EVENT_CAPACITY: usize = 1024;

/// File to send alongside a message body.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Everything owned on behalf of one connected identity.
///
/// Cheap to clone; all clones share the same state. Closing the session
/// (identity disconnected) cancels reconciliation and discards any of its
/// results still in flight.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    local: Address,
    config: Config,
    identity: Arc<dyn IdentityProvider>,
    blobs: Arc<dyn BlobStore>,
    messages: Arc<Mutex<MessageStore>>,
    peers: Mutex<PeerRegistry>,
    profile: Arc<ProfileStore>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    reconciler: Mutex<Option<ReconcilerHandle>>,
}

impl Session {
    /// Load state for the identity the provider currently reports.
    pub async fn open(
        config: Config,
        kv: Arc<dyn KvStore>,
        identity: Arc<dyn IdentityProvider>,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Self> {
        let local = identity
            .current_public_address()
            .ok_or_else(|| MurmurError::Identity("no wallet connected".into()))?;

        let messages = MessageStore::open(kv.clone())?;
        let profile = Arc::new(ProfileStore::open(kv.clone())?);
        let peers = PeerRegistry::open(kv, profile.clone(), config.peer_cap)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            "Session opened for {} ({} messages, {} peers)",
            local,
            messages.for_identity(&local).len(),
            peers.len()
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                local,
                config,
                identity,
                blobs,
                messages: Arc::new(Mutex::new(messages)),
                peers: Mutex::new(peers),
                profile,
                events,
                cancel: CancellationToken::new(),
                reconciler: Mutex::new(None),
            }),
        })
    }

    pub fn local_address(&self) -> &Address {
        &self.inner.local
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Encrypt and record a message to `recipient`.
    ///
    /// The message and the peer touch are kept in memory even when writing
    /// them out fails; the persistence error is still returned.
    pub async fn compose(
        &self,
        recipient: &str,
        body: &str,
        attachment: Option<Attachment>,
    ) -> Result<Message> {
        self.ensure_open()?;

        let recipient = Address::parse(recipient)?;
        let recipient_key = BoxPublicKey::from_ed25519(recipient.as_bytes())?;

        let attachment = match attachment {
            Some(file) => Some(self.inner.blobs.put(&file.name, &file.bytes).await?),
            None => None,
        };

        let auth_secret = self.inner.identity.sign_challenge(SIGNING_CHALLENGE).await?;
        let sealed = murmur_crypto::encrypt(body.as_bytes(), &auth_secret, &recipient_key)?;

        let message = Message {
            id: new_message_id(),
            sender: self.inner.local.clone(),
            recipient: recipient.clone(),
            sender_display_name: self.inner.profile.current().map(|p| p.display_name),
            body: body.to_string(),
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce.to_vec(),
            sender_key: sealed.sender_key.to_base58(),
            created_at: Utc::now(),
            attachment,
            status: DeliveryStatus::Sent,
        };

        // Checked under the log lock so a close that started while this
        // compose was waiting cannot be followed by a write.
        let mut messages = self.inner.messages.lock().await;
        self.ensure_open()?;
        let appended = messages.append(message.clone());
        let touched = self.inner.peers.lock().await.touch(&recipient);
        drop(messages);

        self.emit(SessionEvent::MessageAppended {
            message: message.clone(),
        });
        self.emit(SessionEvent::PeersChanged);
        debug!("Composed {} to {}", message.id, recipient.short());

        appended?;
        touched?;
        Ok(message)
    }

    /// Plaintext of `message`. Own messages come from the retained body;
    /// inbound ones are opened with `secret`.
    pub fn read_body(&self, message: &Message, secret: &BoxSecret) -> Result<String> {
        if message.is_from(&self.inner.local) {
            return Ok(message.body.clone());
        }

        let sender_key = BoxPublicKey::from_base58(&message.sender_key)
            .map_err(|_| MurmurError::AuthenticationFailure)?;
        let plaintext =
            murmur_crypto::open(&message.ciphertext, &message.nonce, &sender_key, secret)?;
        String::from_utf8(plaintext).map_err(|_| MurmurError::AuthenticationFailure)
    }

    pub async fn fetch_attachment(&self, attachment: &AttachmentRef) -> Result<Vec<u8>> {
        self.inner.blobs.get(&attachment.reference).await
    }

    /// Messages this identity sent or received, in insertion order.
    pub async fn messages(&self) -> Vec<Message> {
        self.inner.messages.lock().await.for_identity(&self.inner.local)
    }

    pub async fn message(&self, id: &str) -> Option<Message> {
        self.inner.messages.lock().await.get(id).cloned()
    }

    pub async fn peers(&self) -> Vec<Peer> {
        self.inner.peers.lock().await.list()
    }

    pub async fn search_peers(&self, query: &str) -> Vec<Peer> {
        self.inner.peers.lock().await.search(query)
    }

    pub async fn display_label(&self, peer: &Peer) -> String {
        self.inner.peers.lock().await.resolve_display_label(peer)
    }

    /// Record a username learned from a peer's published profile.
    pub async fn record_username(&self, address: &Address, username: &str) -> Result<()> {
        if self.inner.peers.lock().await.record_username(address, username)? {
            self.emit(SessionEvent::PeersChanged);
        }
        Ok(())
    }

    pub fn profile(&self) -> Option<Profile> {
        self.inner.profile.current()
    }

    /// Save the local profile under this session's identity.
    pub fn save_profile(&self, display_name: &str) -> Result<Profile> {
        self.ensure_open()?;
        let saved = self
            .inner
            .profile
            .save(Profile::new(self.inner.local.clone(), display_name.trim()));

        // The in-memory profile changed even if the write failed.
        self.emit(SessionEvent::ProfileChanged {
            identity: self.inner.local.clone(),
        });
        saved
    }

    pub async fn set_alias(&self, address: &str, alias: &str) -> Result<()> {
        self.ensure_open()?;
        let address = Address::parse(address)?;
        self.inner.peers.lock().await.set_alias(&address, alias)?;
        self.emit(SessionEvent::PeersChanged);
        Ok(())
    }

    /// Start (or restart) periodic reconciliation against `oracle`.
    pub async fn start_reconciler(&self, oracle: Arc<dyn ActivityOracle>) -> Result<()> {
        self.ensure_open()?;

        let mut slot = self.inner.reconciler.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }

        let reconciler = Arc::new(self.reconciler_for(oracle));
        *slot = Some(ReconcilerHandle::spawn(
            reconciler,
            self.inner.config.reconcile_interval,
        ));
        Ok(())
    }

    pub async fn stop_reconciler(&self) {
        if let Some(handle) = self.inner.reconciler.lock().await.take() {
            handle.stop().await;
        }
    }

    pub async fn reconciler_running(&self) -> bool {
        self.inner
            .reconciler
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| h.is_running())
    }

    /// Run a single reconciliation pass right now.
    pub async fn reconcile_now(&self, oracle: Arc<dyn ActivityOracle>) -> Result<TickReport> {
        self.ensure_open()?;
        Ok(self.reconciler_for(oracle).tick().await)
    }

    /// Tear the session down. Idempotent.
    pub async fn close(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.cancel.cancel();
        self.stop_reconciler().await;

        let mut messages = self.inner.messages.lock().await;
        if messages.is_dirty() {
            if let Err(e) = messages.persist() {
                warn!("Unsaved messages lost on close: {}", e);
            }
        }
        drop(messages);

        self.emit(SessionEvent::Closed);
        info!("Session closed for {}", self.inner.local);
    }

    fn reconciler_for(&self, oracle: Arc<dyn ActivityOracle>) -> DeliveryReconciler {
        DeliveryReconciler::new(
            self.inner.local.clone(),
            self.inner.messages.clone(),
            oracle,
            self.inner.events.clone(),
            self.inner.cancel.child_token(),
        )
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(MurmurError::SessionClosed);
        }
        Ok(())
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use murmur_db::{KvStore, MemoryStore};

    use super::*;
    use crate::blobs::MemoryBlobStore;
    use crate::identity::{KeypairIdentity, WatchOnlyIdentity};
    use crate::oracle::{ScriptedActivity, ScriptedOracle};

    struct Fixture {
        kv: Arc<MemoryStore>,
        alice: Arc<KeypairIdentity>,
        bob: Arc<KeypairIdentity>,
        session: Session,
    }

    async fn fixture() -> Fixture {
        let kv = Arc::new(MemoryStore::new());
        let alice = Arc::new(KeypairIdentity::from_seed([1; 32]).unwrap());
        let bob = Arc::new(KeypairIdentity::from_seed([2; 32]).unwrap());
        let session = Session::open(
            Config::default(),
            kv.clone(),
            alice.clone(),
            Arc::new(MemoryBlobStore::new()),
        )
        .await
        .unwrap();
        Fixture {
            kv,
            alice,
            bob,
            session,
        }
    }

    #[tokio::test]
    async fn compose_appends_touches_and_emits() {
        let f = fixture().await;
        let mut events = f.session.subscribe();

        let sent = f
            .session
            .compose(f.bob.address().as_str(), "hi", None)
            .await
            .unwrap();

        assert_eq!(sent.status, DeliveryStatus::Sent);
        assert_eq!(sent.sender, *f.alice.address());
        assert_eq!(f.session.messages().await, vec![sent.clone()]);

        let peers = f.session.peers().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].interaction_count, 1);

        assert!(matches!(events.try_recv(), Ok(SessionEvent::MessageAppended { .. })));
        assert!(matches!(events.try_recv(), Ok(SessionEvent::PeersChanged)));
    }

    #[tokio::test]
    async fn recipient_can_read_and_tamper_is_detected() {
        let f = fixture().await;
        let sent = f
            .session
            .compose(f.bob.address().as_str(), "secret plans", None)
            .await
            .unwrap();

        let bob_session = Session::open(
            Config::default(),
            f.kv.clone(),
            f.bob.clone(),
            Arc::new(MemoryBlobStore::new()),
        )
        .await
        .unwrap();
        let mut inbound = bob_session.message(&sent.id).await.unwrap();
        inbound.body.clear();

        let body = bob_session.read_body(&inbound, &f.bob.box_secret()).unwrap();
        assert_eq!(body, "secret plans");

        inbound.ciphertext[40] ^= 1;
        assert!(matches!(
            bob_session.read_body(&inbound, &f.bob.box_secret()),
            Err(MurmurError::AuthenticationFailure)
        ));
    }

    #[tokio::test]
    async fn own_messages_read_from_retained_body() {
        let f = fixture().await;
        let sent = f
            .session
            .compose(f.bob.address().as_str(), "note to bob", None)
            .await
            .unwrap();
        let body = f.session.read_body(&sent, &f.alice.box_secret()).unwrap();
        assert_eq!(body, "note to bob");
    }

    #[tokio::test]
    async fn invalid_recipient_is_rejected_before_anything_happens() {
        let f = fixture().await;
        let err = f.session.compose("not a wallet", "hi", None).await.unwrap_err();
        assert!(matches!(err, MurmurError::InvalidAddress(_)));
        assert!(err.is_user_facing());
        assert!(f.session.messages().await.is_empty());
        assert!(f.session.peers().await.is_empty());
    }

    #[tokio::test]
    async fn low_order_recipient_is_an_invalid_address() {
        let f = fixture().await;
        let err = f
            .session
            .compose("4uQeVj5tqViQh7yWWGStvkEG1Zmhx6uasJtWCJziofM", "hi", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MurmurError::InvalidAddress(_)));
        assert!(err.is_user_facing());
        assert!(f.session.messages().await.is_empty());
    }

    #[tokio::test]
    async fn compose_waiting_on_the_log_loses_to_close() {
        let f = fixture().await;
        let log = f.session.inner.messages.lock().await;

        let composing = f.session.clone();
        let bob = f.bob.address().as_str().to_string();
        let compose = tokio::spawn(async move { composing.compose(&bob, "late", None).await });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let closing = f.session.clone();
        let close = tokio::spawn(async move { closing.close().await });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(f.session.is_closed());
        drop(log);

        let err = compose.await.unwrap().unwrap_err();
        assert!(matches!(err, MurmurError::SessionClosed));
        close.await.unwrap();

        assert!(f.session.messages().await.is_empty());
        assert!(f.session.peers().await.is_empty());
        assert!(f.kv.get(murmur_db::keys::MESSAGES).unwrap().is_none());
    }

    #[tokio::test]
    async fn attachment_is_uploaded_and_referenced() {
        let f = fixture().await;
        let sent = f
            .session
            .compose(
                f.bob.address().as_str(),
                "see file",
                Some(Attachment {
                    name: "notes.txt".into(),
                    bytes: b"file body".to_vec(),
                }),
            )
            .await
            .unwrap();

        let attachment = sent.attachment.unwrap();
        assert_eq!(attachment.name, "notes.txt");
        assert_eq!(
            f.session.fetch_attachment(&attachment).await.unwrap(),
            b"file body"
        );
    }

    #[tokio::test]
    async fn sender_display_name_comes_from_profile() {
        let f = fixture().await;
        f.session.save_profile("Alice").unwrap();
        let sent = f
            .session
            .compose(f.bob.address().as_str(), "hi", None)
            .await
            .unwrap();
        assert_eq!(sent.sender_display_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn set_alias_needs_profile_then_shows_in_peers() {
        let f = fixture().await;
        let bob = f.bob.address().as_str().to_string();
        f.session.compose(&bob, "hi", None).await.unwrap();

        let err = f.session.set_alias(&bob, "Bobby").await.unwrap_err();
        assert!(matches!(err, MurmurError::ProfileNotFound));

        f.session.save_profile("Alice").unwrap();
        f.session.set_alias(&bob, "Bobby").await.unwrap();
        let peer = f.session.peers().await.remove(0);
        assert_eq!(f.session.display_label(&peer).await, "Bobby");
    }

    #[tokio::test]
    async fn watch_only_session_cannot_compose() {
        let kv = Arc::new(MemoryStore::new());
        let me = KeypairIdentity::from_seed([1; 32]).unwrap().address().clone();
        let bob = KeypairIdentity::from_seed([2; 32]).unwrap().address().clone();
        let session = Session::open(
            Config::default(),
            kv,
            Arc::new(WatchOnlyIdentity::new(me)),
            Arc::new(MemoryBlobStore::new()),
        )
        .await
        .unwrap();

        let err = session.compose(bob.as_str(), "hi", None).await.unwrap_err();
        assert!(matches!(err, MurmurError::Identity(_)));
        assert!(session.messages().await.is_empty());
    }

    #[tokio::test]
    async fn reconcile_now_delivers() {
        let f = fixture().await;
        let sent = f
            .session
            .compose(f.bob.address().as_str(), "hi", None)
            .await
            .unwrap();

        let oracle = Arc::new(ScriptedOracle::new());
        oracle.set(f.bob.address(), ScriptedActivity::Active);
        let report = f.session.reconcile_now(oracle).await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(
            f.session.message(&sent.id).await.unwrap().status.name(),
            "delivered"
        );
    }

    #[tokio::test]
    async fn closed_session_refuses_work() {
        let f = fixture().await;
        let mut events = f.session.subscribe();
        f.session.close().await;
        f.session.close().await;

        assert!(f.session.is_closed());
        assert!(matches!(events.try_recv(), Ok(SessionEvent::Closed)));
        assert!(events.try_recv().is_err());

        let err = f
            .session
            .compose(f.bob.address().as_str(), "hi", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MurmurError::SessionClosed));
        assert!(
            f.session
                .start_reconciler(Arc::new(ScriptedOracle::new()))
                .await
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_reconciler_replaces_the_old_one() {
        let f = fixture().await;
        let first = Arc::new(ScriptedOracle::new());
        let second = Arc::new(ScriptedOracle::new());
        f.session
            .compose(f.bob.address().as_str(), "hi", None)
            .await
            .unwrap();

        f.session.start_reconciler(first.clone()).await.unwrap();
        f.session.start_reconciler(second.clone()).await.unwrap();
        assert!(f.session.reconciler_running().await);

        tokio::time::sleep(f.session.config().reconcile_interval * 2).await;
        assert_eq!(first.calls(), 0);
        assert!(second.calls() >= 1);

        f.session.stop_reconciler().await;
        assert!(!f.session.reconciler_running().await);
    }
}
