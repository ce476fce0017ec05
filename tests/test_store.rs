use kiln::config::UserConfig;
use kiln::store::{CredentialStore, MemoryStore};

fn seeded() -> MemoryStore {
    MemoryStore::from_users(&[UserConfig {
        username: "root".into(),
        password: "root".into(),
    }])
}

#[test]
fn test_store_login_checks_password() {
    let store = seeded();
    assert!(store.verify("root", "root", true));
    assert!(!store.verify("root", "wrong", true));
    assert!(!store.verify("ghost", "root", true));
}

#[test]
fn test_store_register_only_free_names() {
    let store = seeded();
    assert!(store.verify("alice", "pw", false));
    assert_eq!(store.len(), 2);
    assert!(!store.verify("alice", "other", false));
    assert!(!store.verify("root", "x", false));
    assert!(store.verify("alice", "pw", true));
}

#[test]
fn test_store_empty_fields_fail() {
    let store = MemoryStore::new();
    assert!(store.is_empty());
    assert!(!store.verify("", "pw", false));
    assert!(!store.verify("bob", "", false));
    assert!(store.is_empty());
}
