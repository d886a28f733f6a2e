//! Key custody through the account API: unlock, re-wrapping and recovery

use std::sync::Arc;

use tempfile::TempDir;
use whisperboard_core::{
    CeremonyOutcome, ChatError, CoreConfig, Credential, MemoryBoard, Messenger, SoftwareAuthenticator, Storage,
    WrappingMethod,
};

const PASSWORD: &str = "long enough passphrase";

fn messenger(dir: &TempDir) -> Messenger {
    let storage = Storage::new(dir.path().join("whisperboard.redb")).unwrap();
    Messenger::new(storage, Arc::new(MemoryBoard::new()), CoreConfig::for_tests()).unwrap()
}

#[tokio::test]
async fn test_wrong_password_rejected() {
    let dir = TempDir::new().unwrap();
    let messenger = messenger(&dir);
    let record = messenger.create_account(&Credential::password(PASSWORD)).await.unwrap();

    let err = messenger
        .login(&record.user_id, &Credential::password("guess"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ChatError::AuthenticationFailed));
    assert_eq!(messenger.custody().load_record(&record.user_id).unwrap(), record);
}

#[tokio::test]
async fn test_accounts_listed() {
    let dir = TempDir::new().unwrap();
    let messenger = messenger(&dir);
    assert!(messenger.list_accounts().unwrap().is_empty());

    let first = messenger.create_account(&Credential::password(PASSWORD)).await.unwrap();
    let second = messenger.create_account(&Credential::password("other")).await.unwrap();
    assert_ne!(first.user_id, second.user_id);

    let mut listed: Vec<_> = messenger
        .list_accounts()
        .unwrap()
        .into_iter()
        .map(|r| r.user_id)
        .collect();
    listed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    let mut expected = vec![first.user_id, second.user_id];
    expected.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    assert_eq!(listed, expected);
}

#[tokio::test]
async fn test_switch_to_platform_credential() {
    let dir = TempDir::new().unwrap();
    let auth = Arc::new(SoftwareAuthenticator::new());
    let messenger = messenger(&dir).with_platform_authenticator(auth.clone());
    let password = Credential::password(PASSWORD);
    let platform = Credential::platform(auth.clone());

    let record = messenger.create_account(&password).await.unwrap();
    let session = messenger.login(&record.user_id, &password).await.unwrap();
    let key_before = session.show_private_key(Some(PASSWORD)).await.unwrap();

    let switched = session.switch_wrapping_method(&password, &platform).await.unwrap();
    assert_eq!(switched.wrapped.method(), WrappingMethod::PlatformCredential);
    assert_eq!(session.wrapping_method().unwrap(), WrappingMethod::PlatformCredential);

    // The ceremony replaces the password
    let key_after = session.show_private_key(None).await.unwrap();
    assert_eq!(*key_before, *key_after);
    session.logout().await;

    assert!(matches!(
        messenger.login(&record.user_id, &password).await.err(),
        Some(ChatError::AuthenticationFailed)
    ));
    let session = messenger.login(&record.user_id, &platform).await.unwrap();
    assert_eq!(session.user_id(), &record.user_id);
    session.logout().await;
}

#[tokio::test]
async fn test_rejected_ceremony_keeps_record() {
    let dir = TempDir::new().unwrap();
    let auth = Arc::new(SoftwareAuthenticator::new());
    let messenger = messenger(&dir);
    let password = Credential::password(PASSWORD);

    let record = messenger.create_account(&password).await.unwrap();
    let session = messenger.login(&record.user_id, &password).await.unwrap();

    auth.queue_outcome(CeremonyOutcome::Reject);
    let err = session
        .switch_wrapping_method(&password, &Credential::platform(auth.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::AuthenticationFailed));
    assert_eq!(messenger.custody().load_record(&record.user_id).unwrap(), record);
    assert_eq!(session.wrapping_method().unwrap(), WrappingMethod::Password);
    session.logout().await;
}

#[tokio::test]
async fn test_platform_without_authenticator_cannot_reveal() {
    let dir = TempDir::new().unwrap();
    let auth = Arc::new(SoftwareAuthenticator::new());
    let messenger = messenger(&dir);
    let password = Credential::password(PASSWORD);

    let record = messenger.create_account(&password).await.unwrap();
    let session = messenger.login(&record.user_id, &password).await.unwrap();
    session
        .switch_wrapping_method(&password, &Credential::platform(auth))
        .await
        .unwrap();

    assert!(matches!(
        session.show_mnemonic_backup(None).await,
        Err(ChatError::AuthenticationFailed)
    ));
    session.logout().await;
}

#[tokio::test]
async fn test_mnemonic_requires_password() {
    let dir = TempDir::new().unwrap();
    let messenger = messenger(&dir);
    let password = Credential::password(PASSWORD);
    let record = messenger.create_account(&password).await.unwrap();
    let session = messenger.login(&record.user_id, &password).await.unwrap();

    assert!(matches!(
        session.show_mnemonic_backup(None).await,
        Err(ChatError::AuthenticationFailed)
    ));
    assert!(matches!(
        session.show_mnemonic_backup(Some("nope")).await,
        Err(ChatError::AuthenticationFailed)
    ));

    let phrase = session.show_mnemonic_backup(Some(PASSWORD)).await.unwrap();
    assert_eq!(phrase.split_whitespace().count(), 24);
    session.logout().await;
}

#[tokio::test]
async fn test_restore_from_mnemonic() {
    let source_dir = TempDir::new().unwrap();
    let source = messenger(&source_dir);
    let password = Credential::password(PASSWORD);
    let record = source.create_account(&password).await.unwrap();
    let session = source.login(&record.user_id, &password).await.unwrap();
    let phrase = session.show_mnemonic_backup(Some(PASSWORD)).await.unwrap();
    session.logout().await;

    let target_dir = TempDir::new().unwrap();
    let target = messenger(&target_dir);
    let shouted = phrase.to_uppercase();
    let restored = target
        .restore_account(&shouted, &Credential::password("new password"))
        .await
        .unwrap();
    assert_eq!(restored.user_id, record.user_id);
    assert_eq!(restored.public_identity, record.public_identity);

    // Same phrase into the same store is refused
    assert!(target
        .restore_account(&phrase, &Credential::password("again"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_restore_from_private_key() {
    let source_dir = TempDir::new().unwrap();
    let source = messenger(&source_dir);
    let password = Credential::password(PASSWORD);
    let record = source.create_account(&password).await.unwrap();
    let session = source.login(&record.user_id, &password).await.unwrap();
    let key = session.show_private_key(Some(PASSWORD)).await.unwrap();
    session.logout().await;

    let target_dir = TempDir::new().unwrap();
    let target = messenger(&target_dir);
    let restored = target
        .restore_account_from_private_key(&key, &password)
        .await
        .unwrap();
    assert_eq!(restored.user_id, record.user_id);

    let err = target
        .restore_account_from_private_key("not-base58-0OIl", &password)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Identity(_)));
}

#[tokio::test]
async fn test_invalid_phrase_rejected() {
    let dir = TempDir::new().unwrap();
    let messenger = messenger(&dir);
    let err = messenger
        .restore_account("abandon abandon abandon", &Credential::password(PASSWORD))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Identity(_)));
    assert!(messenger.list_accounts().unwrap().is_empty());
}
