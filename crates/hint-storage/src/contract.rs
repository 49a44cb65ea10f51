//! Behavior every [`ProjectStore`] backend must share.
//!
//! Each backend's test module invokes [`store_contract_tests!`] with a
//! factory returning a fresh store wired to a [`FixedClock`].

use crate::clock::{Clock, FixedClock};
use crate::error::{ErrorKind, StorageError};
use crate::traits::ProjectStore;
use crate::types::{ProjectId, SessionToken, UserId, VersionUpdate};

macro_rules! store_contract_tests {
    ($factory:path) => {
        $crate::contract::store_contract_tests!(@cases $factory;
            test_user_registry,
            test_create_project_validation,
            test_project_edits,
            test_version_ordinals_are_dense,
            test_create_version_requires_owner,
            test_optimistic_update,
            test_soft_delete_version,
            test_malawi_scenario,
            test_share_project,
            test_share_project_errors,
            test_share_with_many_is_all_or_nothing,
            test_list_projects_orders_by_recent_activity,
            test_delete_project,
            test_get_version_by_ordinal,
            test_copy_version,
            test_find_current_project,
            test_latest_version,
        );
    };
    (@cases $factory:path; $($case:ident),* $(,)?) => {
        $(
            #[test]
            fn $case() {
                let (mut store, clock) = $factory();
                $crate::contract::$case(&mut store, &clock);
            }
        )*
    };
}

pub(crate) use store_contract_tests;

fn user(store: &mut impl ProjectStore, id: &str) -> UserId {
    let id = UserId::from(id);
    store.create_user(&id).unwrap();
    id
}

pub(crate) fn test_user_registry<S: ProjectStore>(store: &mut S, clock: &FixedClock) {
    let alice = UserId::from("alice@example.com");
    assert!(!store.user_exists(&alice).unwrap());

    let created = store.create_user(&alice).unwrap();
    assert_eq!(created.id, alice);
    assert_eq!(created.created, clock.now());
    assert!(store.user_exists(&alice).unwrap());
    assert_eq!(store.get_user(&alice).unwrap(), created);

    let dup = store.create_user(&alice).unwrap_err();
    assert!(matches!(dup, StorageError::UserExists(_)));
    assert!(dup.is_conflict());

    let blank = store.create_user(&UserId::from("  ")).unwrap_err();
    assert_eq!(blank.kind(), ErrorKind::Validation);

    let missing = store.get_user(&UserId::from("nobody")).unwrap_err();
    assert!(missing.is_not_found());
}

pub(crate) fn test_create_project_validation<S: ProjectStore>(store: &mut S, _clock: &FixedClock) {
    let missing = store
        .create_project(&UserId::from("ghost"), "p", None)
        .unwrap_err();
    assert!(matches!(missing, StorageError::UserNotFound(_)));

    let u1 = user(store, "u1");
    let empty = store.create_project(&u1, "", None).unwrap_err();
    assert_eq!(empty.kind(), ErrorKind::Validation);
    let blank = store.create_project(&u1, "   ", None).unwrap_err();
    assert_eq!(blank.kind(), ErrorKind::Validation);

    let id = store.create_project(&u1, "First", Some("a note")).unwrap();
    assert_eq!(id, ProjectId(1));
    let project = store.get_project(id).unwrap();
    assert_eq!(project.user_id, Some(u1.clone()));
    assert_eq!(project.name, "First");
    assert_eq!(project.note.as_deref(), Some("a note"));
    assert_eq!(project.shared_by, None);
    assert!(!project.is_uploaded);
    assert!(!project.deleted);

    // Names are not unique.
    let again = store.create_project(&u1, "First", None).unwrap();
    assert_eq!(again, ProjectId(2));

    assert!(store.get_project(ProjectId(99)).unwrap_err().is_not_found());
}

pub(crate) fn test_project_edits<S: ProjectStore>(store: &mut S, _clock: &FixedClock) {
    let u1 = user(store, "u1");
    let id = store.create_project(&u1, "Draft", None).unwrap();

    store.rename_project(id, "Final").unwrap();
    assert_eq!(store.get_project(id).unwrap().name, "Final");
    let err = store.rename_project(id, "").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(store.get_project(id).unwrap().name, "Final");

    store.update_project_note(id, Some("checked")).unwrap();
    assert_eq!(store.get_project(id).unwrap().note.as_deref(), Some("checked"));
    store.update_project_note(id, None).unwrap();
    assert_eq!(store.get_project(id).unwrap().note, None);

    store.mark_uploaded(id).unwrap();
    store.mark_uploaded(id).unwrap();
    assert!(store.get_project(id).unwrap().is_uploaded);

    assert!(store.rename_project(ProjectId(42), "x").unwrap_err().is_not_found());
    assert!(store.mark_uploaded(ProjectId(42)).unwrap_err().is_not_found());
}

pub(crate) fn test_version_ordinals_are_dense<S: ProjectStore>(store: &mut S, clock: &FixedClock) {
    let u1 = user(store, "u1");
    let p1 = store.create_project(&u1, "one", None).unwrap();
    let p2 = store.create_project(&u1, "two", None).unwrap();

    let mut tokens = Vec::new();
    for i in 0..5 {
        clock.advance(10);
        tokens.push(store.create_version(p1, &u1, &format!("s{i}"), None).unwrap());
    }
    // Another project has its own sequence.
    store.create_version(p2, &u1, "other", None).unwrap();

    // Deleting does not free an ordinal.
    store.soft_delete_version(&tokens[4]).unwrap();
    tokens.push(store.create_version(p1, &u1, "s5", None).unwrap());

    let all = store.list_versions(p1, true).unwrap();
    let ordinals: Vec<i64> = all.iter().map(|v| v.version_id).collect();
    assert_eq!(ordinals, vec![1, 2, 3, 4, 5, 6]);

    let mut unique: Vec<&SessionToken> = tokens.iter().collect();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), tokens.len());

    assert_eq!(store.list_versions(p2, false).unwrap()[0].version_id, 1);
    let v = store.get_version(&tokens[0]).unwrap();
    assert_eq!(v.created, v.updated);
    assert!(!v.deleted);
}

pub(crate) fn test_create_version_requires_owner<S: ProjectStore>(store: &mut S, _clock: &FixedClock) {
    let alice = user(store, "alice");
    let bob = user(store, "bob");
    let p = store.create_project(&alice, "mine", None).unwrap();

    let err = store.create_version(p, &bob, "s", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let err = store
        .create_version(p, &UserId::from("ghost"), "s", None)
        .unwrap_err();
    assert!(matches!(err, StorageError::UserNotFound(_)));

    let err = store.create_version(ProjectId(77), &alice, "s", None).unwrap_err();
    assert!(matches!(err, StorageError::ProjectNotFound(77)));

    assert!(store.list_versions(p, true).unwrap().is_empty());
}

pub(crate) fn test_optimistic_update<S: ProjectStore>(store: &mut S, clock: &FixedClock) {
    let u1 = user(store, "u1");
    let p = store.create_project(&u1, "p", None).unwrap();
    let token = store.create_version(p, &u1, "s1", Some("first")).unwrap();
    let read = store.get_version(&token).unwrap();

    // Two tabs read the same row; the first write wins.
    let first = store
        .update_version(&token, &VersionUpdate::new(read.updated).state("s2"))
        .unwrap();
    assert!(first > read.updated, "updated must advance even if the clock did not");

    let err = store
        .update_version(&token, &VersionUpdate::new(read.updated).state("s3"))
        .unwrap_err();
    assert!(matches!(err, StorageError::StaleVersion { .. }), "got {err:?}");
    assert_eq!(store.get_version(&token).unwrap().state, "s2");

    clock.advance(1_000);
    let second = store
        .update_version(&token, &VersionUpdate::new(first).note("second"))
        .unwrap();
    assert!(second > first);

    let after = store.get_version(&token).unwrap();
    assert_eq!(after.state, "s2");
    assert_eq!(after.note.as_deref(), Some("second"));
    assert_eq!(after.created, read.created);
    assert_eq!(after.updated, second);
    assert!(after.updated >= after.created);

    // State-only updates keep the note; clearing removes it.
    let third = store
        .update_version(&token, &VersionUpdate::new(second).state("s4"))
        .unwrap();
    assert_eq!(store.get_version(&token).unwrap().note.as_deref(), Some("second"));
    let fourth = store
        .update_version(&token, &VersionUpdate::new(third).clear_note())
        .unwrap();
    let cleared = store.get_version(&token).unwrap();
    assert_eq!(cleared.note, None);
    assert_eq!(cleared.state, "s4");
    assert_eq!(cleared.updated, fourth);

    let missing = store
        .update_version(&SessionToken::from("nope"), &VersionUpdate::new(second))
        .unwrap_err();
    assert!(missing.is_not_found());
}

pub(crate) fn test_soft_delete_version<S: ProjectStore>(store: &mut S, _clock: &FixedClock) {
    let u1 = user(store, "u1");
    let p = store.create_project(&u1, "p", None).unwrap();
    let keep = store.create_version(p, &u1, "a", None).unwrap();
    let gone = store.create_version(p, &u1, "b", None).unwrap();
    let before = store.get_version(&gone).unwrap();

    store.soft_delete_version(&gone).unwrap();

    let live = store.list_versions(p, false).unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].session, keep);
    assert_eq!(store.list_versions(p, true).unwrap().len(), 2);

    assert!(store.get_version(&gone).unwrap_err().is_not_found());
    let deleted = store.get_version_including_deleted(&gone).unwrap();
    assert!(deleted.deleted);
    assert!(deleted.updated > before.updated);

    // Idempotent, and does not touch the row again.
    store.soft_delete_version(&gone).unwrap();
    assert_eq!(
        store.get_version_including_deleted(&gone).unwrap().updated,
        deleted.updated
    );

    let err = store
        .update_version(&gone, &VersionUpdate::new(deleted.updated).state("c"))
        .unwrap_err();
    assert!(matches!(err, StorageError::VersionDeleted(_)));

    assert!(store
        .soft_delete_version(&SessionToken::from("nope"))
        .unwrap_err()
        .is_not_found());
}

pub(crate) fn test_malawi_scenario<S: ProjectStore>(store: &mut S, clock: &FixedClock) {
    let u1 = user(store, "u1");
    let project_id = store.create_project(&u1, "Malawi 2024", None).unwrap();
    assert_eq!(project_id, ProjectId(1));
    assert!(!store.get_project(project_id).unwrap().is_uploaded);

    let session = store.create_version(project_id, &u1, "s1", None).unwrap();
    let v = store.get_version(&session).unwrap();
    assert_eq!(v.version_id, 1);
    assert!(!v.deleted);

    clock.advance(1_000);
    let old = v.updated;
    let new = store
        .update_version(&session, &VersionUpdate::new(old).state("s2"))
        .unwrap();
    assert!(new > old);

    let retry = store
        .update_version(&session, &VersionUpdate::new(old).state("s2"))
        .unwrap_err();
    assert_eq!(retry.kind(), ErrorKind::Conflict);

    store.soft_delete_version(&session).unwrap();
    assert!(store.list_versions(project_id, false).unwrap().is_empty());
    let all = store.list_versions(project_id, true).unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].deleted);
}

pub(crate) fn test_share_project<S: ProjectStore>(store: &mut S, _clock: &FixedClock) {
    let alice = user(store, "alice");
    let bob = user(store, "bob");
    let original = store
        .create_project(&alice, "Malawi 2024", Some("district fits"))
        .unwrap();
    store.create_version(original, &alice, "a1", Some("v1")).unwrap();
    let dropped = store.create_version(original, &alice, "a2", None).unwrap();
    store.create_version(original, &alice, "a3", Some("v3")).unwrap();
    store.soft_delete_version(&dropped).unwrap();
    store.mark_uploaded(original).unwrap();

    let copy = store.share_project(original, &alice, &bob).unwrap();
    assert_ne!(copy, original);

    let shared = store.get_project(copy).unwrap();
    assert_eq!(shared.user_id, Some(bob.clone()));
    assert_eq!(shared.shared_by, Some(alice.clone()));
    assert_eq!(shared.name, "Malawi 2024");
    assert_eq!(shared.note.as_deref(), Some("district fits"));
    assert!(!shared.is_uploaded);

    assert_eq!(store.get_share_lineage(copy).unwrap().map(|u| u.id), Some(alice.clone()));
    assert_eq!(store.get_share_lineage(original).unwrap(), None);

    // Live versions only, renumbered, owned by the recipient.
    let versions = store.list_versions(copy, true).unwrap();
    let summary: Vec<(i64, &str)> = versions
        .iter()
        .map(|v| (v.version_id, v.state.as_str()))
        .collect();
    assert_eq!(summary, vec![(1, "a1"), (2, "a3")]);
    assert!(versions.iter().all(|v| v.user_id == bob && !v.deleted));
    assert_eq!(versions[1].note.as_deref(), Some("v3"));

    // The source project is untouched and still owned by alice.
    let orig = store.get_project(original).unwrap();
    assert_eq!(orig.user_id, Some(alice.clone()));
    assert_eq!(store.list_versions(original, true).unwrap().len(), 3);
    let originals: Vec<SessionToken> = store
        .list_versions(original, true)
        .unwrap()
        .into_iter()
        .map(|v| v.session)
        .collect();
    assert!(versions.iter().all(|v| !originals.contains(&v.session)));

    // Bob can now work on his copy independently.
    store.create_version(copy, &bob, "b1", None).unwrap();
    assert_eq!(store.list_versions(original, true).unwrap().len(), 3);
}

pub(crate) fn test_share_project_errors<S: ProjectStore>(store: &mut S, _clock: &FixedClock) {
    let alice = user(store, "alice");
    let bob = user(store, "bob");
    let p = store.create_project(&alice, "p", None).unwrap();

    let err = store.share_project(p, &alice, &UserId::from("ghost")).unwrap_err();
    assert!(matches!(err, StorageError::UserNotFound(_)));
    let err = store.share_project(p, &UserId::from("ghost"), &bob).unwrap_err();
    assert!(matches!(err, StorageError::UserNotFound(_)));
    let err = store.share_project(ProjectId(50), &alice, &bob).unwrap_err();
    assert!(err.is_not_found());
    let err = store.share_project(p, &bob, &alice).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    assert!(store.list_projects(&bob).unwrap().is_empty());
}

pub(crate) fn test_share_with_many_is_all_or_nothing<S: ProjectStore>(
    store: &mut S,
    _clock: &FixedClock,
) {
    let alice = user(store, "alice");
    let bob = user(store, "bob");
    let carol = user(store, "carol");
    let p = store.create_project(&alice, "p1", None).unwrap();
    store.create_version(p, &alice, "v1", None).unwrap();
    store.create_version(p, &alice, "v2", None).unwrap();

    let err = store
        .share_project_with_many(p, &alice, &[bob.clone(), UserId::from("ghost")])
        .unwrap_err();
    assert!(matches!(err, StorageError::UserNotFound(ref u) if u == "ghost"));
    assert!(store.list_projects(&bob).unwrap().is_empty());

    let copies = store
        .share_project_with_many(p, &alice, &[bob.clone(), carol.clone()])
        .unwrap();
    assert_eq!(copies.len(), 2);
    for (copy, owner) in copies.iter().zip([&bob, &carol]) {
        let project = store.get_project(*copy).unwrap();
        assert_eq!(project.user_id.as_ref(), Some(owner));
        assert_eq!(project.shared_by.as_ref(), Some(&alice));
        assert_eq!(store.list_versions(*copy, false).unwrap().len(), 2);
    }
}

pub(crate) fn test_list_projects_orders_by_recent_activity<S: ProjectStore>(
    store: &mut S,
    clock: &FixedClock,
) {
    let u1 = user(store, "u1");
    let other = user(store, "other");
    let empty = store.create_project(&u1, "empty", None).unwrap();
    let old = store.create_project(&u1, "old", None).unwrap();
    let fresh = store.create_project(&u1, "fresh", None).unwrap();
    store.create_project(&other, "not mine", None).unwrap();

    clock.advance(10);
    let old_v = store.create_version(old, &u1, "o", None).unwrap();
    clock.advance(10);
    store.create_version(fresh, &u1, "f", None).unwrap();

    let order: Vec<ProjectId> = store
        .list_projects(&u1)
        .unwrap()
        .iter()
        .map(|s| s.project.id)
        .collect();
    assert_eq!(order, vec![fresh, old, empty]);

    // Touching the old project moves it to the front.
    clock.advance(10);
    let read = store.get_version(&old_v).unwrap();
    store
        .update_version(&old_v, &VersionUpdate::new(read.updated).note("bump"))
        .unwrap();
    let listed = store.list_projects(&u1).unwrap();
    assert_eq!(listed[0].project.id, old);
    assert_eq!(listed[0].versions.len(), 1);
    assert_eq!(listed[0].last_updated(), Some(store.get_version(&old_v).unwrap().updated));
    assert_eq!(listed[2].last_updated(), None);

    assert!(store
        .list_projects(&UserId::from("ghost"))
        .unwrap_err()
        .is_not_found());
}

pub(crate) fn test_delete_project<S: ProjectStore>(store: &mut S, _clock: &FixedClock) {
    let alice = user(store, "alice");
    let bob = user(store, "bob");
    let p = store.create_project(&alice, "p", None).unwrap();
    let v1 = store.create_version(p, &alice, "a", None).unwrap();
    let v2 = store.create_version(p, &alice, "b", None).unwrap();

    let err = store.delete_project(p, &bob).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert!(store.get_project(p).is_ok());

    store.delete_project(p, &alice).unwrap();
    assert!(store.get_project(p).unwrap_err().is_not_found());
    assert!(store.list_projects(&alice).unwrap().is_empty());
    assert!(store.get_version(&v1).unwrap_err().is_not_found());
    assert!(matches!(
        store.get_version_by_ordinal(p, 1).unwrap_err(),
        StorageError::ProjectNotFound(_)
    ));
    assert!(matches!(
        store.get_share_lineage(p).unwrap_err(),
        StorageError::ProjectNotFound(_)
    ));

    // Only the audit reads still see the deleted project.
    let history = store.list_versions(p, true).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|v| v.deleted));
    assert!(store.list_versions(p, false).unwrap().is_empty());

    let deleted = store.get_version_including_deleted(&v2).unwrap();
    let err = store
        .update_version(&v2, &VersionUpdate::new(deleted.updated).state("c"))
        .unwrap_err();
    assert!(err.is_conflict());

    assert!(store.create_version(p, &alice, "c", None).unwrap_err().is_not_found());
    assert!(store.delete_project(p, &alice).unwrap_err().is_not_found());
}

pub(crate) fn test_get_version_by_ordinal<S: ProjectStore>(store: &mut S, _clock: &FixedClock) {
    let u1 = user(store, "u1");
    let p = store.create_project(&u1, "p", None).unwrap();
    store.create_version(p, &u1, "first", None).unwrap();
    let second = store.create_version(p, &u1, "second", None).unwrap();

    assert_eq!(store.get_version_by_ordinal(p, 2).unwrap().session, second);
    assert_eq!(store.get_version_by_ordinal(p, 1).unwrap().state, "first");

    for bad in [0, -1] {
        let err = store.get_version_by_ordinal(p, bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    let err = store.get_version_by_ordinal(p, 3).unwrap_err();
    assert!(matches!(
        err,
        StorageError::VersionOrdinalNotFound { version_id: 3, .. }
    ));

    store.soft_delete_version(&second).unwrap();
    assert!(store.get_version_by_ordinal(p, 2).unwrap_err().is_not_found());
}

pub(crate) fn test_copy_version<S: ProjectStore>(store: &mut S, _clock: &FixedClock) {
    let u1 = user(store, "u1");
    let p = store.create_project(&u1, "p", None).unwrap();
    let other = store.create_project(&u1, "other", None).unwrap();
    let parent = store.create_version(p, &u1, "calibrated", Some("base")).unwrap();

    let child = store.copy_version(&parent, p, &u1).unwrap();
    assert_ne!(child, parent);
    let copied = store.get_version(&child).unwrap();
    assert_eq!(copied.version_id, 2);
    assert_eq!(copied.state, "calibrated");
    assert_eq!(copied.note.as_deref(), Some("base"));

    // The parent must live in the target project.
    let err = store.copy_version(&parent, other, &u1).unwrap_err();
    assert!(err.is_not_found());

    store.soft_delete_version(&parent).unwrap();
    assert!(store.copy_version(&parent, p, &u1).unwrap_err().is_not_found());
}

pub(crate) fn test_find_current_project<S: ProjectStore>(store: &mut S, _clock: &FixedClock) {
    let u1 = user(store, "u1");
    let u2 = user(store, "u2");
    let p = store.create_project(&u1, "p", None).unwrap();
    let token = store.create_version(p, &u1, "s", None).unwrap();

    let (project, version) = store.find_current_project(&token, &u1).unwrap().unwrap();
    assert_eq!(project.id, p);
    assert_eq!(version.session, token);

    assert!(store.find_current_project(&token, &u2).unwrap().is_none());
    assert!(store
        .find_current_project(&SessionToken::from("unknown"), &u1)
        .unwrap()
        .is_none());

    store.soft_delete_version(&token).unwrap();
    assert!(store.find_current_project(&token, &u1).unwrap().is_none());
}

pub(crate) fn test_latest_version<S: ProjectStore>(store: &mut S, _clock: &FixedClock) {
    let u1 = user(store, "u1");
    let p = store.create_project(&u1, "p", None).unwrap();
    assert!(store.latest_version(p).unwrap().is_none());

    store.create_version(p, &u1, "1", None).unwrap();
    let second = store.create_version(p, &u1, "2", None).unwrap();
    let third = store.create_version(p, &u1, "3", None).unwrap();
    assert_eq!(store.latest_version(p).unwrap().unwrap().session, third);

    store.soft_delete_version(&third).unwrap();
    assert_eq!(store.latest_version(p).unwrap().unwrap().session, second);
}

