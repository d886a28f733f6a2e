//! Handshake scenarios between peers sharing one board
//!
//! Each test drives two or three `Messenger` accounts through announcement
//! discovery and checks what each side ends up believing about the session.

mod common;

use std::sync::Arc;

use common::{connect, connected_pair, wait_for_event, Peer};
use whisperboard_core::{
    AnnouncementOutcome, Board, ChatError, CoreConfig, DefaultSessionCrypto, DiscussionId, DiscussionStatus, MemoryBoard,
    PeerSessionStatus, SessionCrypto, SyncEvent,
};

#[tokio::test]
async fn test_announcement_establishes_both_sides() {
    let board = Arc::new(MemoryBoard::new());
    let alice = Peer::new(&board).await;
    let bob = Peer::new(&board).await;

    alice.session.add_contact(bob.public(), Some("bob".into())).unwrap();
    let discussion = alice.session.initialize_discussion(&bob.id()).await.unwrap();
    assert_eq!(discussion.status, DiscussionStatus::Pending);
    assert_eq!(alice.status_with(&bob), PeerSessionStatus::AnnouncementSent);
    assert_eq!(bob.status_with(&alice), PeerSessionStatus::NoSession);

    let report = bob.sync().await;
    assert_eq!(report.handshakes_completed, 1);
    assert!(report.failures.is_empty());
    assert_eq!(bob.status_with(&alice), PeerSessionStatus::Established);

    // Bob learned Alice from the announcement alone
    let contacts = bob.session.list_contacts().unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].user_id, alice.id());
    assert_eq!(contacts[0].public_identity, Some(alice.public()));
    assert!(contacts[0].name.is_none());

    let report = alice.sync().await;
    assert_eq!(report.handshakes_completed, 1);
    assert_eq!(alice.status_with(&bob), PeerSessionStatus::Established);

    let discussions = alice.session.get_discussions_for_contact(&alice.id(), &bob.id()).unwrap();
    assert_eq!(discussions.len(), 1);
    assert_eq!(discussions[0].status, DiscussionStatus::Active);
}

#[tokio::test]
async fn test_simultaneous_initiation_converges() {
    let board = Arc::new(MemoryBoard::new());
    let alice = Peer::new(&board).await;
    let bob = Peer::new(&board).await;

    alice.session.add_contact(bob.public(), None).unwrap();
    bob.session.add_contact(alice.public(), None).unwrap();
    alice.session.initialize_discussion(&bob.id()).await.unwrap();
    bob.session.initialize_discussion(&alice.id()).await.unwrap();

    alice.sync().await;
    bob.sync().await;

    assert_eq!(alice.status_with(&bob), PeerSessionStatus::Established);
    assert_eq!(bob.status_with(&alice), PeerSessionStatus::Established);
    assert_eq!(alice.session.list_discussions().unwrap().len(), 1);
    assert_eq!(bob.session.list_discussions().unwrap().len(), 1);

    alice.session.send_message(&bob.id(), "ping").await.unwrap();
    bob.session.send_message(&alice.id(), "pong").await.unwrap();
    assert_eq!(bob.sync().await.new_messages, 1);
    assert_eq!(alice.sync().await.new_messages, 1);
}

#[tokio::test]
async fn test_initialize_twice_reuses_discussion() {
    let board = Arc::new(MemoryBoard::new());
    let alice = Peer::new(&board).await;
    let bob = Peer::new(&board).await;
    alice.session.add_contact(bob.public(), None).unwrap();

    let first = alice.session.initialize_discussion(&bob.id()).await.unwrap();
    let published = board.publish_calls();
    let second = alice.session.initialize_discussion(&bob.id()).await.unwrap();

    assert_eq!(first.outgoing, second.outgoing);
    assert_eq!(board.publish_calls(), published);
}

#[tokio::test]
async fn test_reprocessing_announcements_is_noop() {
    let (_board, alice, bob) = connected_pair().await;
    let before = bob.session.list_discussions().unwrap();

    let report = bob.sync().await;
    assert_eq!(report.handshakes_completed, 0);
    assert!(!report.made_progress());
    assert_eq!(bob.session.list_discussions().unwrap(), before);
    assert_eq!(bob.status_with(&alice), PeerSessionStatus::Established);
}

#[tokio::test]
async fn test_invalid_announcement_dropped_quietly() {
    let board = Arc::new(MemoryBoard::new());
    let bob = Peer::new(&board).await;

    let discovery = DefaultSessionCrypto::new().discovery_seeker(&bob.public());
    board.publish(&discovery, b"not an announcement").await.unwrap();
    board.publish(&discovery, &[0u8; 200]).await.unwrap();

    let report = bob.sync().await;
    assert_eq!(report.handshakes_completed, 0);
    assert!(report.failures.is_empty());
    assert!(!report.is_aborted());
    assert!(bob.session.list_contacts().unwrap().is_empty());
    assert!(bob.session.list_discussions().unwrap().is_empty());

    // Still quiet the next time around
    let report = bob.sync().await;
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_announcement_for_someone_else_is_rejected() {
    let board = Arc::new(MemoryBoard::new());
    let alice = Peer::new(&board).await;
    let bob = Peer::new(&board).await;
    let carol = Peer::new(&board).await;

    // Alice's announcement to Carol, copied under Bob's discovery seeker
    alice.session.add_contact(carol.public(), None).unwrap();
    let discussion = alice.session.initialize_discussion(&carol.id()).await.unwrap();
    let payload = discussion.outgoing.unwrap().payload;
    let bob_discovery = DefaultSessionCrypto::new().discovery_seeker(&bob.public());
    board.publish(&bob_discovery, &payload).await.unwrap();

    let report = bob.sync().await;
    assert_eq!(report.handshakes_completed, 0);
    assert_eq!(bob.status_with(&alice), PeerSessionStatus::NoSession);

    // Carol still gets it
    carol.sync().await;
    assert_eq!(carol.status_with(&alice), PeerSessionStatus::Established);
}

#[tokio::test]
async fn test_initiate_requires_key_material() {
    let board = Arc::new(MemoryBoard::new());
    let alice = Peer::new(&board).await;
    let bob = Peer::new(&board).await;

    alice.session.add_contact_id(bob.id(), Some("bob".into())).unwrap();
    let err = alice.session.initialize_discussion(&bob.id()).await.unwrap_err();
    assert!(matches!(err, ChatError::MissingPeerKeyMaterial(_)));
    assert_eq!(alice.status_with(&bob), PeerSessionStatus::NoSession);

    // The key arrives later with Bob's own announcement
    bob.session.add_contact(alice.public(), None).unwrap();
    bob.session.initialize_discussion(&alice.id()).await.unwrap();
    alice.sync().await;
    let contact = alice
        .session
        .list_contacts()
        .unwrap()
        .into_iter()
        .find(|c| c.user_id == bob.id())
        .unwrap();
    assert_eq!(contact.public_identity, Some(bob.public()));
    assert_eq!(contact.name.as_deref(), Some("bob"));
    assert_eq!(alice.status_with(&bob), PeerSessionStatus::Established);
}

#[tokio::test]
async fn test_announcement_waits_in_outbox_while_offline() {
    let board = Arc::new(MemoryBoard::new());
    let alice = Peer::new(&board).await;
    let bob = Peer::new(&board).await;
    alice.session.add_contact(bob.public(), None).unwrap();

    board.set_online(false);
    let err = alice.session.initialize_discussion(&bob.id()).await.unwrap_err();
    assert!(matches!(err, ChatError::BoardUnavailable(_)));
    let discussion = alice.session.list_discussions().unwrap().remove(0);
    assert!(!discussion.outgoing.as_ref().unwrap().published);

    board.set_online(true);
    let report = alice.sync().await;
    assert_eq!(report.announcements_published, 1);

    bob.sync().await;
    alice.sync().await;
    assert_eq!(alice.status_with(&bob), PeerSessionStatus::Established);
}

#[tokio::test]
async fn test_reset_closes_and_blocks_sending() {
    let (_board, alice, bob) = connected_pair().await;

    let closed = alice.session.reset_discussion(&bob.id()).await.unwrap();
    assert_eq!(closed.status, DiscussionStatus::Closed);
    assert_eq!(alice.status_with(&bob), PeerSessionStatus::Closed);

    assert!(alice.session.send_message(&bob.id(), "hello?").await.is_err());

    // Bob's messages are not read while closed
    bob.session.send_message(&alice.id(), "anyone there").await.unwrap();
    assert_eq!(alice.sync().await.new_messages, 0);
    assert!(alice.session.active_seekers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_restart_after_reset_reestablishes() {
    let (_board, alice, bob) = connected_pair().await;
    alice.session.send_message(&bob.id(), "before").await.unwrap();
    bob.sync().await;

    alice.session.reset_discussion(&bob.id()).await.unwrap();
    let restarted = alice.session.initialize_discussion(&bob.id()).await.unwrap();
    assert_eq!(restarted.status, DiscussionStatus::Pending);
    assert_eq!(restarted.ratchet.send_index, 0);

    // Bob sees a newer announcement from an open discussion
    let mut events = bob.session.subscribe();
    bob.sync().await;
    let event = wait_for_event(&mut events, |e| matches!(e, SyncEvent::SessionChanged { .. })).await;
    assert!(matches!(
        event,
        SyncEvent::SessionChanged {
            outcome: AnnouncementOutcome::Superseded { .. },
            ..
        }
    ));

    alice.sync().await;
    assert_eq!(alice.status_with(&bob), PeerSessionStatus::Established);

    alice.session.send_message(&bob.id(), "after").await.unwrap();
    assert_eq!(bob.sync().await.new_messages, 1);
    let id = DiscussionId::new(&bob.id(), &alice.id());
    let contents: Vec<String> = bob
        .session
        .list_messages(&id)
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents.len(), 2);
    assert!(contents.contains(&"before".to_string()));
    assert!(contents.contains(&"after".to_string()));
}

#[tokio::test]
async fn test_peer_reaches_restarted_side() {
    let (_board, alice, bob) = connected_pair().await;
    let earlier = CoreConfig::for_tests().seeker_window as usize + 1;
    for n in 0..earlier {
        bob.session.send_message(&alice.id(), &format!("early {n}")).await.unwrap();
    }
    assert_eq!(alice.sync().await.new_messages, earlier);

    alice.session.reset_discussion(&bob.id()).await.unwrap();
    alice.session.initialize_discussion(&bob.id()).await.unwrap();
    bob.sync().await;
    assert_eq!(bob.status_with(&alice), PeerSessionStatus::Established);

    // Bob keeps his direction, so his next index lies past alice's fresh window
    bob.session.send_message(&alice.id(), "after").await.unwrap();
    let report = alice.sync().await;
    assert_eq!(report.new_messages, 1);
    assert_eq!(alice.status_with(&bob), PeerSessionStatus::Established);

    let id = DiscussionId::new(&alice.id(), &bob.id());
    let contents: Vec<String> = alice
        .session
        .list_messages(&id)
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents.len(), earlier + 1);
    assert!(contents.contains(&"after".to_string()));

    assert_eq!(alice.sync().await.new_messages, 0);
}

#[tokio::test]
async fn test_closed_discussion_reopened_by_newer_announcement() {
    let (_board, alice, bob) = connected_pair().await;

    bob.session.reset_discussion(&alice.id()).await.unwrap();
    alice.session.reset_discussion(&bob.id()).await.unwrap();
    alice.session.initialize_discussion(&bob.id()).await.unwrap();

    let mut events = bob.session.subscribe();
    bob.sync().await;
    let event = wait_for_event(&mut events, |e| matches!(e, SyncEvent::SessionChanged { .. })).await;
    assert!(matches!(
        event,
        SyncEvent::SessionChanged {
            outcome: AnnouncementOutcome::Reopened { .. },
            ..
        }
    ));
    assert_eq!(bob.status_with(&alice), PeerSessionStatus::Established);

    alice.sync().await;
    bob.session.send_message(&alice.id(), "welcome back").await.unwrap();
    assert_eq!(alice.sync().await.new_messages, 1);
}

#[tokio::test]
async fn test_three_peers_keep_sessions_apart() {
    let board = Arc::new(MemoryBoard::new());
    let alice = Peer::new(&board).await;
    let bob = Peer::new(&board).await;
    let carol = Peer::new(&board).await;
    connect(&alice, &bob).await;
    connect(&carol, &alice).await;

    alice.session.send_message(&bob.id(), "for bob").await.unwrap();
    alice.session.send_message(&carol.id(), "for carol").await.unwrap();

    assert_eq!(bob.sync().await.new_messages, 1);
    assert_eq!(carol.sync().await.new_messages, 1);
    assert_eq!(bob.status_with(&carol), PeerSessionStatus::NoSession);
}
