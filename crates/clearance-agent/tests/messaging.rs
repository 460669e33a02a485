//! End-to-end messaging between agents over an in-memory mediator.
//!
//! Every agent runs its inbound router, as a deployed agent would: the
//! handshake only ever sees presentations the router has stored.

use std::sync::Arc;
use std::time::Duration;

use clearance_agent::exchange::{
    ChatContent, HandshakeError, InboundChat, LedgerError, MemoryNetwork, MemoryTransport,
    RouterConfig, Transport,
};
use clearance_agent::store::{CredentialStore, MemoryStore};
use clearance_agent::{Agent, AgentConfig, AgentError};
use clearance_core::{
    now_millis, ClearanceLevel, CredentialHolder, MessageKind, StoredCredential,
};
use clearance_testkit::{
    credential_attachment, presentation_response, received, TestIssuer, TestParty,
};
use tokio::sync::{mpsc, watch};

type TestAgent = Agent<MemoryStore, MemoryTransport>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();
}

struct Peer {
    party: TestParty,
    agent: Arc<TestAgent>,
    store: Arc<MemoryStore>,
    chats: mpsc::Receiver<InboundChat>,
}

struct World {
    network: Arc<MemoryNetwork>,
    issuer: TestIssuer,
    shutdown: watch::Sender<bool>,
}

impl World {
    fn new() -> Self {
        init_tracing();
        let (shutdown, _) = watch::channel(false);
        Self {
            network: MemoryNetwork::new(),
            issuer: TestIssuer::new("did:web:issuer.test"),
            shutdown,
        }
    }

    /// An agent named `name`, holding a credential at `level` if given.
    async fn peer(&self, name: &str, level: Option<ClearanceLevel>, config: AgentConfig) -> Peer {
        self.peer_from(TestParty::new(name), level, config).await
    }

    async fn peer_from(
        &self,
        party: TestParty,
        level: Option<ClearanceLevel>,
        config: AgentConfig,
    ) -> Peer {
        let transport = self
            .network
            .create_transport(party.connection_did.clone())
            .await;
        let store = Arc::new(MemoryStore::new());
        let agent = Arc::new(Agent::new(
            Arc::clone(&store),
            Arc::new(transport),
            self.issuer.policy(),
            party.secret.clone(),
            config,
        ));

        if let Some(level) = level {
            agent
                .import_credential(self.issuer.issue(&party.subject(level)))
                .await
                .unwrap();
        }

        let (tx, chats) = mpsc::channel(16);
        agent.spawn_router(self.shutdown.subscribe(), Some(tx));

        Peer {
            party,
            agent,
            store,
            chats,
        }
    }

    async fn connect(&self, a: &Peer, b: &Peer) {
        a.agent
            .connect(b.party.did.clone(), b.party.connection_did.clone())
            .await
            .unwrap();
        b.agent
            .connect(a.party.did.clone(), a.party.connection_did.clone())
            .await
            .unwrap();
    }

    async fn kinds_sent_by(&self, peer: &Peer) -> Vec<MessageKind> {
        self.network
            .sent_by(&peer.party.connection_did)
            .await
            .into_iter()
            .map(|m| m.kind)
            .collect()
    }
}

fn short_handshake(secs: u64) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.handshake.timeout = Duration::from_secs(secs);
    config
}

async fn next_chat(peer: &mut Peer) -> InboundChat {
    tokio::time::timeout(Duration::from_secs(60), peer.chats.recv())
        .await
        .expect("chat arrives")
        .expect("router running")
}

#[tokio::test(start_paused = true)]
async fn test_encrypted_round_trip() {
    let world = World::new();
    let alice = world
        .peer("alice", Some(ClearanceLevel::TopSecret), AgentConfig::default())
        .await;
    let mut bob = world
        .peer("bob", Some(ClearanceLevel::Secret), AgentConfig::default())
        .await;
    world.connect(&alice, &bob).await;

    let receipt = alice
        .agent
        .send("the eagle has landed", &bob.party.did, ClearanceLevel::Secret)
        .await
        .unwrap();
    assert!(receipt.encrypted);
    assert_eq!(receipt.connection_did, bob.party.connection_did);

    let chat = next_chat(&mut bob).await;
    assert_eq!(chat.message_id, receipt.message_id);
    assert_eq!(
        chat.content,
        ChatContent::Decrypted {
            text: "the eagle has landed".into(),
            level: ClearanceLevel::Secret,
        }
    );

    let sent = world.network.sent_by(&alice.party.connection_did).await;
    let chat_body = &sent.last().unwrap().body;
    assert!(!chat_body.to_string().contains("eagle"));
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout_sends_nothing() {
    let world = World::new();
    let alice = world
        .peer("alice", Some(ClearanceLevel::Confidential), short_handshake(10))
        .await;
    let bob = world.peer("bob", None, AgentConfig::default()).await;
    world.connect(&alice, &bob).await;

    let result = alice
        .agent
        .send("status report", &bob.party.did, ClearanceLevel::Confidential)
        .await;
    assert!(matches!(
        result,
        Err(AgentError::Handshake(HandshakeError::Timeout { .. }))
    ));

    assert_eq!(
        world.kinds_sent_by(&alice).await,
        vec![MessageKind::PresentationRequest]
    );
    assert!(!alice.agent.handshake().is_in_progress(&bob.party.connection_did));
}

#[tokio::test(start_paused = true)]
async fn test_unclassified_skips_handshake() {
    let world = World::new();
    let alice = world.peer("alice", None, AgentConfig::default()).await;
    let mut bob = world.peer("bob", None, AgentConfig::default()).await;
    world.connect(&alice, &bob).await;

    let receipt = alice
        .agent
        .send("lunch?", &bob.party.did, ClearanceLevel::Unclassified)
        .await
        .unwrap();
    assert!(!receipt.encrypted);
    assert_eq!(world.kinds_sent_by(&alice).await, vec![MessageKind::Chat]);

    let chat = next_chat(&mut bob).await;
    assert_eq!(chat.content, ChatContent::Plain("lunch?".into()));
}

#[tokio::test(start_paused = true)]
async fn test_sender_clearance_checked_before_network() {
    let world = World::new();
    let alice = world
        .peer("alice", Some(ClearanceLevel::Confidential), AgentConfig::default())
        .await;
    let bob = world
        .peer("bob", Some(ClearanceLevel::TopSecret), AgentConfig::default())
        .await;
    world.connect(&alice, &bob).await;

    let result = alice
        .agent
        .send("above my pay grade", &bob.party.did, ClearanceLevel::TopSecret)
        .await;
    assert!(matches!(
        result,
        Err(AgentError::InsufficientSenderClearance {
            held: ClearanceLevel::Confidential,
            required: ClearanceLevel::TopSecret,
        })
    ));
    assert!(world.kinds_sent_by(&alice).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_recipient_clearance_too_low() {
    let world = World::new();
    let alice = world
        .peer("alice", Some(ClearanceLevel::Secret), AgentConfig::default())
        .await;
    let bob = world
        .peer("bob", Some(ClearanceLevel::Internal), AgentConfig::default())
        .await;
    world.connect(&alice, &bob).await;

    let result = alice
        .agent
        .send("not for bob", &bob.party.did, ClearanceLevel::Secret)
        .await;
    assert!(matches!(
        result,
        Err(AgentError::InsufficientRecipientClearance {
            held: ClearanceLevel::Internal,
            ..
        })
    ));
    assert!(!world.kinds_sent_by(&alice).await.contains(&MessageKind::Chat));
}

#[tokio::test(start_paused = true)]
async fn test_no_connection() {
    let world = World::new();
    let alice = world
        .peer("alice", Some(ClearanceLevel::Secret), AgentConfig::default())
        .await;
    let stranger = TestParty::new("stranger");

    let result = alice
        .agent
        .send("hello?", &stranger.did, ClearanceLevel::Unclassified)
        .await;
    assert!(matches!(result, Err(AgentError::NoConnection(_))));
    assert!(world.kinds_sent_by(&alice).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rotated_key_never_used_from_cache() {
    let world = World::new();
    let alice = world
        .peer("alice", Some(ClearanceLevel::Secret), AgentConfig::default())
        .await;

    // Alice cached Bob's credential for a key Bob has since replaced.
    let mut bob_party = TestParty::new("bob");
    let stale = world
        .issuer
        .issue(&bob_party.subject(ClearanceLevel::Secret));
    let old_secret = bob_party.rotate_key();
    alice
        .store
        .put_credential(&StoredCredential::new(
            CredentialHolder::Peer(bob_party.connection_did.clone()),
            stale,
            0,
        ))
        .await
        .unwrap();

    let mut bob = world
        .peer_from(bob_party, Some(ClearanceLevel::Secret), AgentConfig::default())
        .await;
    world.connect(&alice, &bob).await;

    alice
        .agent
        .send("new key please", &bob.party.did, ClearanceLevel::Secret)
        .await
        .unwrap();

    let chat = next_chat(&mut bob).await;
    assert!(matches!(chat.content, ChatContent::Decrypted { .. }));

    let cached = alice
        .store
        .list_credentials(&CredentialHolder::Peer(bob.party.connection_did.clone()))
        .await
        .unwrap();
    assert_eq!(cached.len(), 1);
    let credential = alice.agent.validator().accept(&cached[0].raw).unwrap();
    assert_eq!(credential.encryption_public_key, bob.party.public_key());
    assert_ne!(credential.encryption_public_key, old_secret.public_key());
}

#[tokio::test(start_paused = true)]
async fn test_cached_reuse_takes_newest_credential() {
    let world = World::new();
    let mut config = AgentConfig::default();
    config.reuse_cached_peer_credentials = true;
    let alice = world
        .peer("alice", Some(ClearanceLevel::Secret), config)
        .await;

    let mut bob_party = TestParty::new("bob");
    let stale = world
        .issuer
        .issue(&bob_party.subject(ClearanceLevel::Secret));
    bob_party.rotate_key();
    alice
        .store
        .put_credential(&StoredCredential::new(
            CredentialHolder::Peer(bob_party.connection_did.clone()),
            stale,
            0,
        ))
        .await
        .unwrap();

    let mut bob = world
        .peer_from(bob_party, Some(ClearanceLevel::Secret), AgentConfig::default())
        .await;
    world.connect(&alice, &bob).await;

    // Bob presents his current credential unprompted.
    let fresh = world
        .issuer
        .issue(&bob.party.subject(ClearanceLevel::Secret));
    let bob_transport = world
        .network
        .create_transport(clearance_core::ConnectionDid::new("did:peer:bob-sender"))
        .await;
    let presentation = presentation_response(
        &bob.party.connection_did,
        &alice.party.connection_did,
        &fresh,
        now_millis(),
    );
    bob_transport.send(&presentation).await.unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;

    alice
        .agent
        .send("cached but current", &bob.party.did, ClearanceLevel::Secret)
        .await
        .unwrap();
    assert!(!world
        .kinds_sent_by(&alice)
        .await
        .contains(&MessageKind::PresentationRequest));

    let chat = next_chat(&mut bob).await;
    assert_eq!(
        chat.content,
        ChatContent::Decrypted {
            text: "cached but current".into(),
            level: ClearanceLevel::Secret,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_third_party_in_thread_presentation_not_trusted() {
    let world = World::new();
    let alice = world
        .peer("alice", Some(ClearanceLevel::Secret), short_handshake(10))
        .await;

    // Bob is connected but never answers.
    let bob = TestParty::new("bob");
    let bob_inbox = world
        .network
        .create_transport(bob.connection_did.clone())
        .await;
    alice
        .agent
        .connect(bob.did.clone(), bob.connection_did.clone())
        .await
        .unwrap();

    let sender = Arc::clone(&alice.agent);
    let bob_did = bob.did.clone();
    let sending = tokio::spawn(async move {
        sender
            .send("for bob only", &bob_did, ClearanceLevel::Secret)
            .await
    });

    let request = loop {
        if let Some(msg) = bob_inbox.poll().await.unwrap().into_iter().next() {
            break msg;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };
    assert_eq!(request.kind, MessageKind::PresentationRequest);

    let carol = TestParty::new("carol");
    let carol_transport = world
        .network
        .create_transport(carol.connection_did.clone())
        .await;
    let answer = presentation_response(
        &carol.connection_did,
        &alice.party.connection_did,
        &world.issuer.issue(&carol.subject(ClearanceLevel::TopSecret)),
        now_millis(),
    )
    .in_thread(request.id);
    carol_transport.send(&answer).await.unwrap();

    assert!(matches!(
        sending.await.unwrap(),
        Err(AgentError::Handshake(HandshakeError::Timeout { .. }))
    ));
    assert_eq!(
        world.kinds_sent_by(&alice).await,
        vec![MessageKind::PresentationRequest]
    );
    assert!(carol_transport.poll().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_issued_credential_for_foreign_key_ignored() {
    let world = World::new();
    let alice = world
        .peer("alice", Some(ClearanceLevel::Secret), AgentConfig::default())
        .await;
    let mut bob = world
        .peer("bob", Some(ClearanceLevel::Secret), AgentConfig::default())
        .await;
    world.connect(&alice, &bob).await;

    let mallory = TestParty::new("mallory");
    let issuer_transport = world
        .network
        .create_transport(clearance_core::ConnectionDid::new("did:peer:issuer"))
        .await;
    let issue = received(
        MessageKind::CredentialIssue,
        issuer_transport.local_did(),
        &alice.party.connection_did,
        serde_json::json!({}),
        now_millis(),
    )
    .with_attachment(credential_attachment(
        &world.issuer.issue(&mallory.subject(ClearanceLevel::TopSecret)),
    ));
    issuer_transport.send(&issue).await.unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;

    let own = alice.agent.own_credential().await.unwrap().unwrap();
    assert_eq!(own.clearance_level, ClearanceLevel::Secret);

    alice
        .agent
        .send("still mine", &bob.party.did, ClearanceLevel::Confidential)
        .await
        .unwrap();
    assert!(matches!(
        next_chat(&mut bob).await.content,
        ChatContent::Decrypted { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_delivery_dispatched_once() {
    let world = World::new();
    let alice = world.peer("alice", None, AgentConfig::default()).await;
    let mut bob = world.peer("bob", None, AgentConfig::default()).await;
    world.connect(&alice, &bob).await;

    let mediator = world
        .network
        .create_transport(clearance_core::ConnectionDid::new("did:peer:mediator"))
        .await;
    let message = clearance_core::Message::outbound(
        MessageKind::Chat,
        alice.party.connection_did.clone(),
        bob.party.connection_did.clone(),
        serde_json::json!({"content": "twice", "timestamp": 0}),
    );
    mediator.send(&message).await.unwrap();
    mediator.send(&message).await.unwrap();

    let chat = next_chat(&mut bob).await;
    assert_eq!(chat.content, ChatContent::Plain("twice".into()));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(bob.chats.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_manual_approval_completes_handshake() {
    let world = World::new();
    let alice = world
        .peer("alice", Some(ClearanceLevel::Secret), AgentConfig::default())
        .await;
    let manual = AgentConfig {
        router: RouterConfig {
            auto_respond: false,
            ..RouterConfig::default()
        },
        ..AgentConfig::default()
    };
    let mut bob = world
        .peer("bob", Some(ClearanceLevel::Secret), manual)
        .await;
    world.connect(&alice, &bob).await;

    let sender = Arc::clone(&alice.agent);
    let bob_did = bob.party.did.clone();
    let sending = tokio::spawn(async move {
        sender
            .send("approved", &bob_did, ClearanceLevel::Secret)
            .await
    });

    let request = loop {
        let pending = bob.agent.pending_presentation_requests().await.unwrap();
        if let Some(request) = pending.into_iter().next() {
            break request;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    };
    assert_eq!(request.peer, alice.party.connection_did);

    bob.agent
        .approve_presentation_request(&request.id, None)
        .await
        .unwrap();
    assert!(bob.agent.pending_presentation_requests().await.unwrap().is_empty());

    let receipt = sending.await.unwrap().unwrap();
    assert!(receipt.encrypted);
    assert!(matches!(
        next_chat(&mut bob).await.content,
        ChatContent::Decrypted { .. }
    ));

    assert!(matches!(
        bob.agent.decline_presentation_request(&request.id).await,
        Err(AgentError::Ledger(LedgerError::InvalidTransition { .. }))
    ));
}

#[tokio::test]
async fn test_sqlite_backed_agent_sends_plaintext() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let network = MemoryNetwork::new();
    let alice = TestParty::new("alice");
    let bob = TestParty::new("bob");
    let issuer = TestIssuer::new("did:web:issuer.test");

    let transport = network.create_transport(alice.connection_did.clone()).await;
    let bob_transport = network.create_transport(bob.connection_did.clone()).await;
    let store = clearance_agent::store::SqliteStore::open(dir.path().join("alice.db"))?;
    let agent = Agent::new(
        Arc::new(store),
        Arc::new(transport),
        issuer.policy(),
        alice.secret.clone(),
        AgentConfig::default(),
    );

    agent
        .connect(bob.did.clone(), bob.connection_did.clone())
        .await?;
    let receipt = agent
        .send("over sqlite", &bob.did, ClearanceLevel::Unclassified)
        .await?;

    let delivered = bob_transport.poll().await?;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id, receipt.message_id);
    Ok(())
}
