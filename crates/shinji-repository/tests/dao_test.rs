//! DAO behaviour against the in-memory backend.

mod common;

use common::{holder, profile, Account, AccountCreate, AccountHolder, AccountUpdate, Profile};
use serde_json::{json, Value};
use shinji_config::DaoConfig;
use shinji_core::encoding::MaybeSet;
use shinji_core::{PageRequest, ShinjiError};
use shinji_repository::{CrudDao, DaoBase, Filters, MemoryStore, Model, Ordering, Session};
use uuid::Uuid;

type AccountDao = DaoBase<Account, AccountCreate, AccountUpdate>;
type AccountMapDao = DaoBase<Account, Value, Value>;
type HolderDao = DaoBase<AccountHolder, Value, Value>;
type ProfileDao = DaoBase<Profile, Value, Value>;

async fn seed_accounts(store: &MemoryStore, names: &[(&str, i64)]) -> Vec<Account> {
    let db = store.session();
    let dao = AccountDao::new();
    let mut created = Vec::new();
    for (name, balance) in names {
        created.push(
            dao.create(&db, &AccountCreate::new(name, *balance), true)
                .await
                .expect("Failed to create account"),
        );
    }
    created
}

fn names(accounts: &[Account]) -> Vec<&str> {
    accounts.iter().map(|a| a.name.as_str()).collect()
}

// =============================================================================
// create / get
// =============================================================================

#[tokio::test]
async fn test_create_then_get() {
    let store = MemoryStore::new();
    let db = store.session();
    let dao = AccountDao::new();

    let created = dao
        .create(&db, &AccountCreate::new("A", 0), true)
        .await
        .expect("Failed to create account");
    assert_eq!(created.id.get_version_num(), 7);
    assert_eq!(created.name, "A");
    assert_eq!(created.balance, 0);

    let found = dao
        .get(&db, created.id)
        .await
        .expect("Query failed")
        .expect("Account not found");
    assert_eq!(found, created);
}

#[tokio::test]
async fn test_get_missing_is_none() {
    let store = MemoryStore::new();
    let db = store.session();

    let result = AccountDao::new().get(&db, Uuid::new_v4()).await.expect("Query failed");
    assert!(result.is_none());
}

#[tokio::test]
async fn test_create_keeps_supplied_id() {
    let store = MemoryStore::new();
    let db = store.session();
    let id = Uuid::new_v4();

    let created = AccountMapDao::new()
        .create(&db, &json!({"id": id.to_string(), "name": "A", "balance": 1}), true)
        .await
        .expect("Failed to create account");
    assert_eq!(created.id, id);
}

#[tokio::test]
async fn test_create_with_non_canonical_id_is_found_again() {
    let store = MemoryStore::new();
    let db = store.session();
    let dao = AccountMapDao::new();
    let id = Uuid::new_v4();

    let created = dao
        .create(&db, &json!({"id": id.to_string().to_uppercase(), "name": "A", "balance": 1}), true)
        .await
        .expect("Failed to create account");
    assert_eq!(created.id, id);

    let found = dao.get(&db, id).await.expect("Query failed").expect("Account not found");
    assert_eq!(found, created);
    assert_eq!(store.rows(Account::meta())[0]["id"], json!(id.to_string()));
}

#[tokio::test]
async fn test_create_duplicate_is_conflict() {
    let store = MemoryStore::new();
    seed_accounts(&store, &[("A", 0)]).await;
    let db = store.session();
    let dao = AccountDao::new();

    let err = dao
        .create(&db, &AccountCreate::new("A", 5), true)
        .await
        .expect_err("Duplicate name must fail");
    assert!(matches!(err, ShinjiError::Conflict(_)));
    assert_eq!(err.status_code(), 409);

    // The failed transaction was discarded; the session is usable again.
    dao.create(&db, &AccountCreate::new("B", 5), true)
        .await
        .expect("Failed to create account after conflict");
    assert_eq!(store.rows(Account::meta()).len(), 2);
}

#[tokio::test]
async fn test_uncommitted_writes_are_private_until_commit() {
    let store = MemoryStore::new();
    let db = store.session();
    let dao = AccountDao::new();

    let first = dao.create(&db, &AccountCreate::new("A", 1), false).await.expect("create A");
    dao.create(&db, &AccountCreate::new("B", 2), false).await.expect("create B");

    // Reads on the same session see staged writes.
    assert!(dao.get(&db, first.id).await.expect("Query failed").is_some());

    let other = store.session();
    assert!(dao.get(&other, first.id).await.expect("Query failed").is_none());

    db.commit().await.expect("Commit failed");
    let fresh = store.session();
    assert!(dao.get(&fresh, first.id).await.expect("Query failed").is_some());
    assert_eq!(store.rows(Account::meta()).len(), 2);
}

#[tokio::test]
async fn test_create_many_commits_batch() {
    let store = MemoryStore::new();
    let db = store.session();

    let holders = vec![holder("Ann"), holder("Bob")];
    let created = HolderDao::new()
        .create_many(&db, holders.clone(), true)
        .await
        .expect("Failed to create holders");
    assert_eq!(created, holders);

    let fresh = store.session();
    let (found, total) = HolderDao::new()
        .get_multi(&fresh, 0, 10, &Filters::new(), Some(&Ordering::parse("name")))
        .await
        .expect("Query failed");
    assert_eq!(total, 2);
    assert_eq!(found, holders);
}

// =============================================================================
// update / delete
// =============================================================================

#[tokio::test]
async fn test_partial_update_leaves_other_fields() {
    let store = MemoryStore::new();
    let db = store.session();
    let dao = AccountDao::new();

    let account = dao.create(&db, &AccountCreate::new("A", 0), true).await.expect("create");
    let patch = AccountUpdate {
        balance: MaybeSet::Set(100),
        ..AccountUpdate::default()
    };
    let updated = dao.update(&db, account.clone(), &patch, true).await.expect("update");
    assert_eq!(updated.balance, 100);
    assert_eq!(updated.name, "A");

    let found = dao.get(&db, account.id).await.expect("Query failed").expect("Account not found");
    assert_eq!(found.balance, 100);
    assert_eq!(found.name, "A");
}

#[tokio::test]
async fn test_aliased_fields_are_written_by_name() {
    let store = MemoryStore::new();
    let db = store.session();
    let dao = AccountDao::new();

    // `balance` is aliased on both payloads; the alias never reaches the row.
    let account = dao.create(&db, &AccountCreate::new("A", 5), true).await.expect("create");
    assert_eq!(account.balance, 5);

    let patch = AccountUpdate {
        balance: MaybeSet::Set(100),
        ..AccountUpdate::default()
    };
    dao.update(&db, account.clone(), &patch, true).await.expect("update");

    let rows = store.rows(Account::meta());
    assert_eq!(rows[0]["balance"], json!(100));
    assert!(!rows[0].contains_key("accountBalance"));
    assert!(!rows[0].contains_key("openingBalance"));
}

#[tokio::test]
async fn test_empty_update_changes_nothing() {
    let store = MemoryStore::new();
    let db = store.session();
    let dao = AccountDao::new();

    let account = dao.create(&db, &AccountCreate::new("A", 7), true).await.expect("create");
    let updated = dao
        .update(&db, account.clone(), &AccountUpdate::default(), true)
        .await
        .expect("update");
    assert_eq!(updated, account);
}

#[tokio::test]
async fn test_mapping_update_applies_every_known_key() {
    let store = MemoryStore::new();
    let db = store.session();

    let account = AccountDao::new()
        .create(&db, &AccountCreate::new("A", 0), true)
        .await
        .expect("create");
    let updated = AccountMapDao::new()
        .update(&db, account.clone(), &json!({"name": "Z", "balance": 3, "colour": "red"}), true)
        .await
        .expect("update");
    assert_eq!(updated.id, account.id);
    assert_eq!(updated.name, "Z");
    assert_eq!(updated.balance, 3);
}

#[tokio::test]
async fn test_delete_then_get_is_none() {
    let store = MemoryStore::new();
    let accounts = seed_accounts(&store, &[("A", 0), ("B", 0)]).await;
    let db = store.session();
    let dao = AccountDao::new();

    let removed = dao.delete(&db, accounts[0].clone(), true).await.expect("delete");
    assert_eq!(removed, accounts[0]);
    assert!(dao.get(&db, accounts[0].id).await.expect("Query failed").is_none());
    assert!(dao.get(&db, accounts[1].id).await.expect("Query failed").is_some());
}

// =============================================================================
// get_multi / count / ordering
// =============================================================================

#[tokio::test]
async fn test_get_multi_first_page_by_name() {
    let store = MemoryStore::new();
    seed_accounts(&store, &[("delta", 4), ("alpha", 1), ("echo", 5), ("charlie", 3), ("bravo", 2)]).await;
    let db = store.session();

    let (page, total) = AccountDao::new()
        .get_multi(&db, 0, 2, &Filters::new(), Some(&Ordering::new().asc("name")))
        .await
        .expect("Query failed");
    assert_eq!(names(&page), vec!["alpha", "bravo"]);
    assert_eq!(total, 5);
}

#[tokio::test]
async fn test_pages_reconstruct_full_ordering() {
    let store = MemoryStore::new();
    seed_accounts(&store, &[("d", 1), ("a", 1), ("e", 2), ("c", 2), ("b", 3)]).await;
    let db = store.session();
    let dao = AccountDao::new();
    let ordering = Ordering::parse("-balance,name");

    let (all, _) = dao
        .get_multi(&db, 0, 1000, &Filters::new(), Some(&ordering))
        .await
        .expect("Query failed");
    assert_eq!(names(&all), vec!["b", "c", "e", "a", "d"]);

    let mut stitched = Vec::new();
    let mut request = PageRequest::new(0, 2);
    loop {
        let page = dao
            .get_page(&db, request, &Filters::new(), Some(&ordering))
            .await
            .expect("Query failed");
        assert_eq!(page.total, 5);
        let next = page.next_request();
        stitched.extend(page);
        match next {
            Some(following) => request = following,
            None => break,
        }
    }
    assert_eq!(stitched, all);
}

#[tokio::test]
async fn test_descending_order_is_monotonic() {
    let store = MemoryStore::new();
    seed_accounts(&store, &[("a", 3), ("b", 9), ("c", 1), ("d", 9), ("e", 4)]).await;
    let db = store.session();

    let (accounts, _) = AccountDao::new()
        .get_multi(&db, 0, 10, &Filters::new(), Some(&Ordering::new().desc("balance")))
        .await
        .expect("Query failed");
    assert!(accounts.windows(2).all(|w| w[0].balance >= w[1].balance));
    // Ties keep storage order.
    assert_eq!(names(&accounts)[..2], ["b", "d"]);
}

#[tokio::test]
async fn test_count_matches_unbounded_fetch() {
    let store = MemoryStore::new();
    seed_accounts(&store, &[("a", 10), ("b", 20), ("c", 10), ("d", 30)]).await;
    let db = store.session();
    let dao = AccountDao::new();

    for filters in [Filters::new(), Filters::new().eq("balance", 10), Filters::new().eq("name", "zzz")] {
        let (rows, total) = dao
            .get_multi(&db, 0, 1000, &filters, None)
            .await
            .expect("Query failed");
        assert_eq!(rows.len() as u64, total);

        let mut query = dao.select();
        for (field, value) in filters.iter() {
            query = query.filter_by(field, value.clone()).expect("known field");
        }
        assert_eq!(dao.count(&db, &query).await.expect("count"), total);
    }
}

#[tokio::test]
async fn test_filter_on_unknown_field_fails() {
    let store = MemoryStore::new();
    let db = store.session();

    let err = AccountDao::new()
        .get_multi(&db, 0, 10, &Filters::new().eq("colour", "red"), None)
        .await
        .expect_err("Unknown filter must fail");
    assert!(matches!(err, ShinjiError::UnknownFilterField { ref field, .. } if field == "colour"));
}

#[tokio::test]
async fn test_page_size_is_clamped() {
    let store = MemoryStore::new();
    seed_accounts(&store, &[("a", 1), ("b", 1), ("c", 1)]).await;
    let db = store.session();
    let dao = AccountDao::with_config(DaoConfig {
        default_limit: 2,
        max_limit: 2,
    });

    let page = dao
        .get_page(&db, PageRequest::new(0, 50), &Filters::new(), None)
        .await
        .expect("Query failed");
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.limit, 2);
    assert_eq!(page.total, 3);

    // get_multi takes the limit as given.
    let (rows, total) = dao
        .get_multi(&db, 0, 50, &Filters::new(), None)
        .await
        .expect("Query failed");
    assert_eq!(rows.len(), 3);
    assert_eq!(total, 3);
}

#[tokio::test]
async fn test_order_by_relationship_fields() {
    let store = MemoryStore::new();
    let db = store.session();

    let zed = holder("Zed");
    let amy = holder("Amy");
    HolderDao::new()
        .create_many(&db, vec![zed.clone(), amy.clone()], false)
        .await
        .expect("create holders");
    ProfileDao::new()
        .create_many(&db, vec![profile(&zed, "Athens"), profile(&amy, "Zurich")], false)
        .await
        .expect("create profiles");

    let dao = AccountDao::new();
    dao.create(&db, &AccountCreate::new("orphan", 0), false).await.expect("create");
    dao.create(&db, &AccountCreate::new("zed-1", 0).owned_by(zed.id), false).await.expect("create");
    dao.create(&db, &AccountCreate::new("amy-1", 0).owned_by(amy.id), false).await.expect("create");
    db.commit().await.expect("Commit failed");

    let (by_owner, total) = dao
        .get_multi(&db, 0, 10, &Filters::new(), Some(&Ordering::parse("owner.name")))
        .await
        .expect("Query failed");
    assert_eq!(names(&by_owner), vec!["amy-1", "zed-1", "orphan"]);
    assert_eq!(total, 3);

    let (by_city, _) = dao
        .get_multi(&db, 0, 10, &Filters::new(), Some(&Ordering::parse("owner.profile.city")))
        .await
        .expect("Query failed");
    assert_eq!(names(&by_city), vec!["zed-1", "amy-1", "orphan"]);
}

#[tokio::test]
async fn test_to_many_ordering_windows_count_joined_rows() {
    let store = MemoryStore::new();
    let db = store.session();

    let zed = holder("Zed");
    let amy = holder("Amy");
    let holders = HolderDao::new();
    holders
        .create_many(&db, vec![zed.clone(), amy.clone()], false)
        .await
        .expect("create holders");
    let dao = AccountDao::new();
    for (name, owner) in [("amy-1", amy.id), ("amy-2", amy.id), ("zed-1", zed.id)] {
        dao.create(&db, &AccountCreate::new(name, 0).owned_by(owner), false)
            .await
            .expect("create");
    }
    db.commit().await.expect("Commit failed");

    let ordering = Ordering::parse("accounts.name");
    let (first, total) = holders
        .get_multi(&db, 0, 2, &Filters::new(), Some(&ordering))
        .await
        .expect("Query failed");
    // Both joined rows in the window belong to Amy.
    assert_eq!(first, vec![amy]);
    assert_eq!(total, 2);

    let (second, _) = holders
        .get_multi(&db, 2, 2, &Filters::new(), Some(&ordering))
        .await
        .expect("Query failed");
    assert_eq!(second, vec![zed]);
}

#[test]
fn test_order_by_joins_lazy_relationships_once() {
    let dao = AccountDao::new();
    let query = dao.select();
    assert!(query.has_join("owner"));

    let ordered = dao
        .order_by(&query, &Ordering::parse("owner.profile.city,-owner.name"))
        .expect("ordering resolves");
    let aliases: Vec<&str> = ordered.joins().iter().map(|join| join.alias.as_str()).collect();
    assert_eq!(aliases, vec!["owner", "owner__profile"]);
    assert_eq!(ordered.ordering().len(), 2);
    assert!(query.ordering().is_empty());
}

#[tokio::test]
async fn test_unresolvable_ordering_fails_without_side_effects() {
    let store = MemoryStore::new();
    seed_accounts(&store, &[("a", 1)]).await;
    let db = store.session();
    let dao = AccountDao::new();

    for path in ["owner.nickname2", "colour", "owner.wallet.name", "owner"] {
        let err = dao
            .get_multi(&db, 0, 10, &Filters::new(), Some(&Ordering::new().asc(path)))
            .await
            .expect_err("Unresolvable ordering must fail");
        assert!(matches!(err, ShinjiError::UnresolvableOrderingField { .. }), "{path}: {err}");
        assert_eq!(err.status_code(), 400);
    }
    assert_eq!(store.rows(Account::meta()).len(), 1);
}
